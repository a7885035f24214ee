//! The luma trace engine: re-draw a target image by replacing each of its
//! tiles with the nearest dataset tile under mean absolute difference.

use rayon::prelude::*;

use crate::core::key::{TileKey, SHIFT_AVG};
use crate::core::pixel::tile_distance;
use crate::core::store::{lower_bound_byte, shape_run_end, shape_run_start, Tile, TileSet};
use crate::core::tree::PartitionTree;
use crate::error::{LumaError, Result};

/// Re-key a tile set for tracing and re-sort it.
///
/// The trace key collapses the shallow/deep split so every shape occupies a
/// single contiguous run, and swaps the corner windows for (range, min, max):
/// exact-key equality then means identical search metadata, and the average
/// window stays in place for the band refinement.
pub fn rekey_for_trace(set: &mut TileSet) {
    for t in &mut set.tiles {
        t.key = TileKey::pack_trace(t.w, t.h, t.avg, t.min, t.max);
    }
    set.sort_by_key();
}

/// Trace one target image against a dataset prepared with
/// [`rekey_for_trace`]. Returns the output luminance plane.
///
/// The per-tile searches are independent and run on the pool; the output
/// writes are non-overlapping by construction (the tree partitions the
/// image), so matching is parallel and the blit is a cheap sequential pass.
pub fn trace(
    dataset: &TileSet,
    pixels: &[u8],
    img_w: u32,
    img_h: u32,
    tree: &PartitionTree,
) -> Result<Vec<u8>> {
    if dataset.is_empty() {
        return Err(LumaError::InvalidDataset("empty dataset for trace".into()));
    }

    // The target gets its own tile set, grouped and keyed like the dataset.
    let area = (img_w * img_h) as usize;
    let mut region = vec![0u8; area];
    let mut tiles = crate::core::extract::build_tiles(pixels, img_w, tree, 0, &mut region, 0)?;
    for t in &mut tiles {
        t.key = TileKey::pack_trace(t.w, t.h, t.avg, t.min, t.max);
    }
    let mut target = TileSet { tiles, pixels: region };
    target.sort_by_key();

    let matches = target
        .tiles
        .par_iter()
        .map(|g| find_best(dataset, target.pixels_of(g), g))
        .collect::<Result<Vec<usize>>>()?;

    let mut out = vec![0u8; area];
    let stride = img_w as usize;
    for (g, &mi) in target.tiles.iter().zip(matches.iter()) {
        let src = dataset.pixels_of(&dataset.tiles[mi]);
        let w = g.w as usize;
        for row in 0..g.h as usize {
            let dst = (g.y as usize + row) * stride + g.x as usize;
            out[dst..dst + w].copy_from_slice(&src[row * w..(row + 1) * w]);
        }
    }
    Ok(out)
}

/// Locate the dataset tile minimizing the mean absolute difference to `g`.
///
/// First pass scans the run with `g`'s exact key; the search then widens to
/// neighbouring averages, shrinking its own bounds every time a closer match
/// lowers the attainable per-pixel distance — the mean difference of two
/// tiles can never be under the difference of their averages.
fn find_best(dataset: &TileSet, g_px: &[u8], g: &Tile) -> Result<usize> {
    let ds = &dataset.tiles;
    let shape = g.shape();
    let lo = shape_run_start(ds, 0, ds.len(), shape);
    let hi = shape_run_end(ds, lo, ds.len(), shape);
    if lo == hi {
        return Err(LumaError::Internal(format!(
            "no dataset tile of shape {}x{}",
            g.w, g.h
        )));
    }

    let area = g.area() as u32;
    let mut best = u32::MAX;
    let mut best_at = None;

    let eq_lo = lo + ds[lo..hi].partition_point(|t| t.key.0 < g.key.0);
    let eq_hi = lo + ds[lo..hi].partition_point(|t| t.key.0 <= g.key.0);
    for j in eq_lo..eq_hi {
        let t = &ds[j];
        let d = tile_distance(g_px, g.min, g.max, dataset.pixels_of(t), t.min, t.max, best);
        if d < best {
            best = d;
            best_at = Some(j);
            if d == 0 {
                return Ok(j);
            }
        }
    }

    let mut d8 = per_pixel(best, area);

    // Averages above g's.
    let mut up_end = avg_band_end(ds, eq_hi, hi, g.avg, d8);
    let mut j = eq_hi;
    while j < up_end {
        let t = &ds[j];
        let d = tile_distance(g_px, g.min, g.max, dataset.pixels_of(t), t.min, t.max, best);
        if d < best {
            best = d;
            best_at = Some(j);
            let tight = per_pixel(best, area);
            if tight < d8 {
                d8 = tight;
                up_end = avg_band_end(ds, j + 1, up_end, g.avg, d8);
            }
        }
        j += 1;
    }

    // Averages below g's.
    let mut down_start = avg_band_start(ds, lo, eq_lo, g.avg, d8);
    let mut j = eq_lo;
    while j > down_start {
        j -= 1;
        let t = &ds[j];
        let d = tile_distance(g_px, g.min, g.max, dataset.pixels_of(t), t.min, t.max, best);
        if d < best {
            best = d;
            best_at = Some(j);
            let tight = per_pixel(best, area);
            if tight < d8 {
                d8 = tight;
                down_start = avg_band_start(ds, down_start, j, g.avg, d8);
            }
        }
    }

    best_at.ok_or_else(|| LumaError::Internal("nearest-tile search found no candidate".into()))
}

fn per_pixel(best: u32, area: u32) -> u8 {
    if best == u32::MAX {
        255
    } else {
        (best / area).min(255) as u8
    }
}

/// First index in `[lo, hi)` with average above `avg + d8`.
fn avg_band_end(ds: &[Tile], lo: usize, hi: usize, avg: u8, d8: u8) -> usize {
    let ceiling = avg as u16 + d8 as u16;
    if ceiling >= 255 {
        hi
    } else {
        lower_bound_byte(ds, lo, hi, SHIFT_AVG, (ceiling + 1) as u8)
    }
}

/// First index in `[lo, hi)` with average at least `avg - d8`.
fn avg_band_start(ds: &[Tile], lo: usize, hi: usize, avg: u8, d8: u8) -> usize {
    if avg <= d8 {
        lo
    } else {
        lower_bound_byte(ds, lo, hi, SHIFT_AVG, avg - d8)
    }
}
