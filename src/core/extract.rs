//! The tile builder: turns partition-tree leaves into packed tiles with
//! derived metadata, depositing pixels into a caller-provided store region.

use crate::core::key::TileKey;
use crate::core::pixel::min_max_sum;
use crate::core::store::Tile;
use crate::core::tree::PartitionTree;
use crate::error::{LumaError, Result};

/// Build the tiles of one image into `region`, a slice of the shared packed
/// store whose absolute position is `base`. Leaves are grouped by shape
/// before offsets are assigned so that equal-shape tiles sit contiguously,
/// which is what makes the later cluster scans cache-friendly.
///
/// `m8` decides each tile's regime flag (`max - min >= m8` is deep).
pub fn build_tiles(
    pixels: &[u8],
    img_w: u32,
    tree: &PartitionTree,
    m8: u8,
    region: &mut [u8],
    base: usize,
) -> Result<Vec<Tile>> {
    let mut leaves = tree.leaves();
    // Shape grouping: same (w, h) becomes one physical run in the store.
    leaves.sort_unstable_by_key(|r| ((r.width() as u32) << 8) | r.height() as u32);

    let mut tiles = Vec::with_capacity(leaves.len());
    let mut cursor = 0usize;

    for leaf in &leaves {
        let w = leaf.width() as usize;
        let h = leaf.height() as usize;
        if w == 0 || h == 0 || w > 255 || h > 255 {
            return Err(LumaError::Internal(format!(
                "leaf dimensions {}x{} outside the byte range",
                w, h
            )));
        }
        let area = w * h;
        if cursor + area > region.len() {
            return Err(LumaError::Internal(
                "leaf areas exceed the reserved store region".into(),
            ));
        }

        // Row-major copy out of the source plane.
        let dst = &mut region[cursor..cursor + area];
        let stride = img_w as usize;
        let mut src_row = leaf.y1 as usize * stride + leaf.x1 as usize;
        for row in dst.chunks_exact_mut(w) {
            row.copy_from_slice(&pixels[src_row..src_row + w]);
            src_row += stride;
        }

        let (min, max, sum) = min_max_sum(dst);
        let avg = (sum / area as u64) as u8;
        let corners = [dst[0], dst[w - 1], dst[area - w], dst[area - 1]];
        let deep = m8 > 0 && max - min >= m8;

        tiles.push(Tile {
            key: TileKey::pack(w as u8, h as u8, avg, corners, deep),
            offset: base + cursor,
            w: w as u8,
            h: h as u8,
            min,
            max,
            avg,
            x: leaf.x1 as u16,
            y: leaf.y1 as u16,
        });
        cursor += area;
    }

    Ok(tiles)
}
