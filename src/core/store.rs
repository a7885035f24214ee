//! Tile records, the packed byte store they index into, and the byte-window
//! binary searches used by every downstream phase.

use rayon::prelude::*;

use crate::core::key::{TileKey, SHIFT_H};
use crate::error::{LumaError, Result};

/// One rectangular luminance tile. Pixels live in the owning [`TileSet`]'s
/// packed store at `offset`, row-major, `w * h` bytes.
#[derive(Clone, Copy, Debug)]
pub struct Tile {
    pub key: TileKey,
    pub offset: usize,
    pub w: u8,
    pub h: u8,
    pub min: u8,
    pub max: u8,
    pub avg: u8,
    /// Origin in the source image; only meaningful for trace targets.
    pub x: u16,
    pub y: u16,
}

impl Tile {
    #[inline]
    pub fn area(&self) -> usize {
        self.w as usize * self.h as usize
    }

    #[inline]
    pub fn shape(&self) -> u16 {
        ((self.w as u16) << 8) | self.h as u16
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.key.is_dead()
    }
}

/// A tile array plus the contiguous byte store its offsets address.
/// The store is append-only during construction; pruning tombstones tile
/// entries and never rewrites pixels.
#[derive(Debug)]
pub struct TileSet {
    pub tiles: Vec<Tile>,
    pub pixels: Vec<u8>,
}

impl TileSet {
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    #[inline]
    pub fn pixels_of(&self, tile: &Tile) -> &[u8] {
        &self.pixels[tile.offset..tile.offset + tile.area()]
    }

    /// Sort the tile array by packed key. Large arrays sort on the pool.
    pub fn sort_by_key(&mut self) {
        if self.tiles.len() > 1 << 16 {
            self.tiles.par_sort_unstable_by_key(|t| t.key.0);
        } else {
            self.tiles.sort_unstable_by_key(|t| t.key.0);
        }
    }

    /// Re-derive the regime flag of every key for a new margin. Used when a
    /// loaded or merged dataset is about to be pruned: file keys carry no
    /// regime, and the boundary depends on the margin in force.
    pub fn apply_depth_flags(&mut self, m8: u8) {
        for t in &mut self.tiles {
            let deep = m8 > 0 && t.max - t.min >= m8;
            t.key = TileKey::pack(
                t.w,
                t.h,
                t.avg,
                [
                    t.key.byte(crate::core::key::SHIFT_C1),
                    t.key.byte(crate::core::key::SHIFT_C2),
                    t.key.byte(crate::core::key::SHIFT_C3),
                    t.key.byte(crate::core::key::SHIFT_C4),
                ],
                deep,
            );
        }
    }

    /// Cheap structural audit used at phase boundaries.
    pub fn validate(&self) -> Result<()> {
        for t in &self.tiles {
            if t.w == 0 || t.h == 0 {
                return Err(LumaError::Internal("zero-dimensioned tile".into()));
            }
            if t.offset + t.area() > self.pixels.len() {
                return Err(LumaError::Internal(format!(
                    "tile offset {} + area {} past store end {}",
                    t.offset,
                    t.area(),
                    self.pixels.len()
                )));
            }
            if t.min > t.avg || t.avg > t.max {
                return Err(LumaError::Internal(format!(
                    "tile stats out of order: min={} avg={} max={}",
                    t.min, t.avg, t.max
                )));
            }
        }
        Ok(())
    }
}

/// First index in `[lo, hi)` whose key byte at `shift` is `>= query`.
/// Valid whenever the byte window is non-decreasing over the range, which
/// the sorted key order guarantees for every window below the flag byte.
pub fn lower_bound_byte(tiles: &[Tile], lo: usize, hi: usize, shift: u32, query: u8) -> usize {
    let mut a = lo;
    let mut b = hi;
    while a < b {
        let m = a + (b - a) / 2;
        if tiles[m].key.byte(shift) < query {
            a = m + 1;
        } else {
            b = m;
        }
    }
    a
}

/// First index in `[lo, hi)` whose (width, height) window reaches `shape`.
pub fn shape_run_start(tiles: &[Tile], lo: usize, hi: usize, shape: u16) -> usize {
    let mut a = lo;
    let mut b = hi;
    while a < b {
        let m = a + (b - a) / 2;
        if ((tiles[m].key.0 >> SHIFT_H) as u16) < shape {
            a = m + 1;
        } else {
            b = m;
        }
    }
    a
}

/// First index in `[lo, hi)` whose (width, height) window exceeds `shape`.
pub fn shape_run_end(tiles: &[Tile], lo: usize, hi: usize, shape: u16) -> usize {
    let mut a = lo;
    let mut b = hi;
    while a < b {
        let m = a + (b - a) / 2;
        if (tiles[m].key.0 >> SHIFT_H) as u16 <= shape {
            a = m + 1;
        } else {
            b = m;
        }
    }
    a
}

/// First index in `[lo, hi)` whose key prefix above `shift` (flag byte
/// excluded) exceeds `prefix`.
pub fn prefix_run_end(tiles: &[Tile], lo: usize, hi: usize, shift: u32, prefix: u64) -> usize {
    let mut a = lo;
    let mut b = hi;
    while a < b {
        let m = a + (b - a) / 2;
        if tiles[m].key.prefix_above(shift) <= prefix {
            a = m + 1;
        } else {
            b = m;
        }
    }
    a
}
