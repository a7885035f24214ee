//! Dataset merging: balanced recursive pairwise merge with deduplication.

use crate::core::prune::prune;
use crate::core::store::{Tile, TileSet};
use crate::error::{LumaError, Result};

/// Merge two key-sorted tile sets into one, interleaving by packed key and
/// copying every tile's pixels into a fresh packed store, then prune the
/// union at the given margin. Inputs must already carry regime flags for
/// this margin.
pub fn merge(a: TileSet, b: TileSet, m8: u8, workers: usize) -> Result<TileSet> {
    let total: usize = a.tiles.iter().chain(b.tiles.iter()).map(Tile::area).sum();
    let mut pixels = Vec::new();
    pixels.try_reserve_exact(total).map_err(|_| LumaError::OutOfMemory(total))?;

    let mut tiles = Vec::new();
    tiles
        .try_reserve_exact(a.len() + b.len())
        .map_err(|_| LumaError::OutOfMemory((a.len() + b.len()) * std::mem::size_of::<Tile>()))?;

    let mut ai = a.tiles.iter().peekable();
    let mut bi = b.tiles.iter().peekable();
    loop {
        let take_a = match (ai.peek(), bi.peek()) {
            (Some(ta), Some(tb)) => ta.key.0 < tb.key.0,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let (tile, src) = if take_a {
            (ai.next().unwrap(), &a)
        } else {
            (bi.next().unwrap(), &b)
        };
        let mut out = *tile;
        out.offset = pixels.len();
        pixels.extend_from_slice(src.pixels_of(tile));
        tiles.push(out);
    }

    let mut merged = TileSet { tiles, pixels };
    prune(&mut merged, m8, workers);
    Ok(merged)
}

/// Merge any number of datasets: split the list in half, merge each half,
/// then merge the two results. Every pairwise step deduplicates, keeping the
/// intermediate sets small.
pub fn merge_all(mut sets: Vec<TileSet>, m8: u8, workers: usize) -> Result<TileSet> {
    match sets.len() {
        0 => Err(LumaError::InvalidDataset("no datasets to merge".into())),
        1 => Ok(sets.pop().unwrap()),
        _ => {
            let tail = sets.split_off(sets.len() / 2);
            let left = merge_all(sets, m8, workers)?;
            let right = merge_all(tail, m8, workers)?;
            merge(left, right, m8, workers)
        }
    }
}
