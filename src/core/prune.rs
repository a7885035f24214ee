//! Redundancy elimination: the sort-then-scan prune that keeps one
//! representative per cluster of near-duplicate tiles.
//!
//! The array is already key-sorted, so shallow tiles form a prefix and deep
//! tiles a suffix; the two regions are scanned independently, each carved
//! into worker ranges snapped to (width, height) run boundaries so that no
//! same-shape cluster straddles two workers. Workers write only their own
//! subrange (tombstone flags), the byte store stays read-only throughout,
//! and a single compaction closes the gaps at the end.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::core::key::{TileKey, SHIFT_AVG, SHIFT_C1, SHIFT_C2, SHIFT_C3, SHIFT_C4, SHIFT_FLAG, SHIFT_H};
use crate::core::pixel::{abs_diff, cross_range, max_diff_under, mean_diff_under};
use crate::core::store::{lower_bound_byte, prefix_run_end, shape_run_end, shape_run_start, Tile, TileSet};

/// Fair coin backed by one random word, consumed bit-by-bit and refreshed
/// only on exhaustion; the inner loop never pays for a full RNG call.
struct Coin {
    bits: u64,
    rng: SmallRng,
}

impl Coin {
    fn new() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }

    fn with_rng(mut rng: SmallRng) -> Self {
        let bits = Self::word(&mut rng);
        Coin { bits, rng }
    }

    fn word(rng: &mut SmallRng) -> u64 {
        loop {
            let w = rng.gen::<u64>();
            if w != 0 {
                return w;
            }
        }
    }

    fn flip(&mut self) -> bool {
        let heads = self.bits & 1 == 0;
        self.bits >>= 1;
        if self.bits == 0 {
            self.bits = Self::word(&mut self.rng);
        }
        heads
    }
}

/// Eliminate near-duplicates at margin `m8`, then compact survivors to the
/// front of the tile array (their relative order is already final).
/// `workers` bounds the number of index-range partitions per region.
pub fn prune(set: &mut TileSet, m8: u8, workers: usize) {
    if m8 == 0 || set.len() < 2 {
        return;
    }
    let n = set.len();
    let pixels = &set.pixels;
    // Shallow prefix / deep suffix boundary on the regime byte.
    let cutoff = lower_bound_byte(&set.tiles, 0, n, SHIFT_FLAG, 1);
    let (shallow, deep) = set.tiles.split_at_mut(cutoff);
    rayon::join(
        || prune_region(shallow, pixels, m8, false, workers),
        || prune_region(deep, pixels, m8, true, workers),
    );
    set.tiles.retain(|t| !t.is_dead());
}

/// Scan one regime region, fanned out over worker ranges with boundaries
/// snapped to shape runs.
fn prune_region(tiles: &mut [Tile], pixels: &[u8], m8: u8, deep: bool, workers: usize) {
    let n = tiles.len();
    if n < 2 {
        return;
    }
    let cuts = snapped_divisions(tiles, n, workers);
    if cuts.len() <= 2 {
        prune_range(tiles, pixels, m8, deep, Coin::new());
        return;
    }

    let mut chunks = Vec::with_capacity(cuts.len() - 1);
    let mut rest: &mut [Tile] = tiles;
    let mut consumed = 0usize;
    for &cut in &cuts[1..] {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(cut - consumed);
        chunks.push(head);
        rest = tail;
        consumed = cut;
    }

    rayon::scope(|s| {
        for chunk in chunks {
            s.spawn(move |_| prune_range(chunk, pixels, m8, deep, Coin::new()));
        }
    });
}

/// Worker range boundaries: an even split, with each interior boundary moved
/// to the nearer edge of the shape run it landed in. A boundary inside a run
/// would hide cross-worker pairs of equal-shape tiles.
fn snapped_divisions(tiles: &[Tile], n: usize, workers: usize) -> Vec<usize> {
    let mut cuts = vec![0];
    if workers > 1 && n > workers {
        for k in 1..workers {
            let cand = n * k / workers;
            let shape = (tiles[cand].key.0 >> SHIFT_H) as u16;
            let run_start = shape_run_start(tiles, 0, cand, shape);
            let run_end = shape_run_end(tiles, cand, n, shape);
            let snapped = if cand - run_start <= run_end - cand {
                run_start
            } else {
                run_end
            };
            if snapped > *cuts.last().unwrap() && snapped < n {
                cuts.push(snapped);
            }
        }
    }
    cuts.push(n);
    cuts
}

fn prune_range(tiles: &mut [Tile], pixels: &[u8], m8: u8, deep: bool, mut coin: Coin) {
    let n = tiles.len();
    let mut shape_end = 0usize;
    let mut i = 0usize;
    while i < n {
        if !tiles[i].is_dead() {
            if i >= shape_end {
                shape_end = shape_run_end(tiles, i + 1, n, tiles[i].shape());
            }
            scan_tile(tiles, pixels, i, shape_end, m8, deep, &mut coin);
        }
        i += 1;
    }
}

/// Walk every live tile after `i` that could still be a near-duplicate of
/// it: same shape, average within `m8`, all four corners within `m8`. The
/// cursor rides the sorted key order; a corner that falls out of the margin
/// band jumps it across the whole irrelevant subrange with one binary search.
fn scan_tile(
    tiles: &mut [Tile],
    pixels: &[u8],
    i: usize,
    shape_end: usize,
    m8: u8,
    deep: bool,
    coin: &mut Coin,
) {
    let ti = tiles[i];
    let band_hi = if ti.avg as u16 + m8 as u16 > 255 {
        shape_end
    } else {
        lower_bound_byte(tiles, i + 1, shape_end, SHIFT_AVG, ti.avg + m8)
    };
    let area = ti.area();
    let budget = m8 as u32 * area as u32;
    let a_px = &pixels[ti.offset..ti.offset + area];

    let mut j = i + 1;
    while j < band_hi {
        let tj = tiles[j];
        if tj.is_dead() {
            j += 1;
            continue;
        }

        if let Some(shift) = corner_mismatch(ti.key, tj.key, m8) {
            j = skip_ahead(tiles, j, band_hi, shift, ti.key, m8);
            continue;
        }

        let b_px = &pixels[tj.offset..tj.offset + area];
        let near = if deep {
            cross_range(ti.min, ti.max, tj.min, tj.max) < m8 || max_diff_under(a_px, b_px, m8)
        } else {
            // Envelopes disjoint by at least the margin: the mean difference
            // cannot come in under it, skip the pixels entirely.
            let gap = ti.min.saturating_sub(tj.max).max(tj.min.saturating_sub(ti.max));
            if gap >= m8 {
                false
            } else {
                let cross = cross_range(ti.min, ti.max, tj.min, tj.max);
                cross < m8 || mean_diff_under(a_px, b_px, budget, cross)
            }
        };

        if near {
            if coin.flip() {
                tiles[i].key.entomb();
                return;
            }
            tiles[j].key.entomb();
        }
        j += 1;
    }
}

/// First corner window (most significant first) whose bytes differ by at
/// least the margin.
fn corner_mismatch(a: TileKey, b: TileKey, m8: u8) -> Option<u32> {
    for shift in [SHIFT_C1, SHIFT_C2, SHIFT_C3, SHIFT_C4] {
        if abs_diff(a.byte(shift), b.byte(shift)) >= m8 {
            return Some(shift);
        }
    }
    None
}

/// `tiles[j]`'s corner at `shift` is out of the margin band around `key_i`.
/// Within the run of tiles sharing all key bytes above `shift`, that corner
/// is non-decreasing, so either the rest of the run is also too high (jump to
/// its end) or the cursor can seek the first entry whose corner re-enters the
/// band from below.
fn skip_ahead(tiles: &[Tile], j: usize, hi: usize, shift: u32, key_i: TileKey, m8: u8) -> usize {
    let prefix = tiles[j].key.prefix_above(shift + 8);
    let run_end = prefix_run_end(tiles, j + 1, hi, shift + 8, prefix);
    let bi = key_i.byte(shift) as u16;
    let bj = tiles[j].key.byte(shift) as u16;
    if bj >= bi + m8 as u16 {
        run_end
    } else {
        lower_bound_byte(tiles, j + 1, run_end, shift, (bi - (m8 as u16 - 1)) as u8)
    }
}
