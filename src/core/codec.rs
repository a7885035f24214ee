//! Dataset file codec.
//!
//! Layout: a 6-byte little-endian tile count, then one record per tile in
//! packed-key order: `w: u8, h: u8, w*h pixel bytes`. Metadata is never
//! persisted; loading recomputes it from the pixels.

use std::fs;
use std::path::Path;

use crate::core::key::TileKey;
use crate::core::pixel::min_max_sum;
use crate::core::store::{Tile, TileSet};
use crate::error::{LumaError, Result};

const COUNT_LEN: usize = 6;
const MAX_COUNT: u64 = 1u64 << 48;

/// Serialize a tile set. Tiles are written in array order, which the
/// pipeline keeps key-sorted.
pub fn save(set: &TileSet, path: &Path) -> Result<()> {
    let body: usize = set.tiles.iter().map(|t| 2 + t.area()).sum();
    let total = COUNT_LEN + body;
    let count = set.tiles.len() as u64;
    if count >= MAX_COUNT {
        return Err(LumaError::Internal(format!("{count} tiles exceed the 48-bit count")));
    }

    let mut buf = Vec::new();
    buf.try_reserve_exact(total).map_err(|_| LumaError::OutOfMemory(total))?;
    buf.extend_from_slice(&count.to_le_bytes()[..COUNT_LEN]);

    for t in &set.tiles {
        if t.w == 0 || t.h == 0 {
            return Err(LumaError::Internal("zero-dimensioned tile at save".into()));
        }
        buf.push(t.w);
        buf.push(t.h);
        buf.extend_from_slice(set.pixels_of(t));
    }
    fs::write(path, &buf)?;
    Ok(())
}

/// Load a dataset file. The file image itself becomes the packed byte store:
/// each tile's offset points just past its 2-byte shape header, so the
/// interleaved headers are never addressed as pixels. Keys are rebuilt with
/// no regime flag; the flag depends on a margin and is applied when one is.
pub fn load(path: &Path) -> Result<TileSet> {
    let buf = fs::read(path)?;
    if buf.len() < COUNT_LEN {
        return Err(LumaError::InvalidDataset(format!(
            "{}: shorter than the count prefix",
            path.display()
        )));
    }
    let mut count_bytes = [0u8; 8];
    count_bytes[..COUNT_LEN].copy_from_slice(&buf[..COUNT_LEN]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let mut tiles = Vec::new();
    tiles
        .try_reserve_exact(count)
        .map_err(|_| LumaError::OutOfMemory(count * std::mem::size_of::<Tile>()))?;

    let mut cursor = COUNT_LEN;
    for n in 0..count {
        if cursor + 2 > buf.len() {
            return Err(LumaError::InvalidDataset(format!(
                "{}: truncated at tile {n} of {count}",
                path.display()
            )));
        }
        let w = buf[cursor];
        let h = buf[cursor + 1];
        cursor += 2;
        if w == 0 || h == 0 {
            return Err(LumaError::InvalidDataset(format!(
                "{}: zero-dimensioned tile {n}",
                path.display()
            )));
        }
        let area = w as usize * h as usize;
        if cursor + area > buf.len() {
            return Err(LumaError::InvalidDataset(format!(
                "{}: tile {n} pixels run past end of file",
                path.display()
            )));
        }

        let px = &buf[cursor..cursor + area];
        let (min, max, sum) = min_max_sum(px);
        let avg = (sum / area as u64) as u8;
        let corners = [px[0], px[w as usize - 1], px[area - w as usize], px[area - 1]];
        tiles.push(Tile {
            key: TileKey::pack(w, h, avg, corners, false),
            offset: cursor,
            w,
            h,
            min,
            max,
            avg,
            x: 0,
            y: 0,
        });
        cursor += area;
    }

    let mut set = TileSet { tiles, pixels: buf };
    set.sort_by_key();
    Ok(set)
}
