//! Randomized recursive subdivision of an image rectangle into leaf tiles.

use rand::Rng;

use crate::core::TileBounds;

/// Half-open rectangle `[x1,x2) x [y1,y2)` in image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x1: u32,
    pub x2: u32,
    pub y1: u32,
    pub y2: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

enum Node {
    Split { left: Box<Node>, right: Box<Node>, leaves: usize },
    Leaf(Rect),
}

impl Node {
    fn leaves(&self) -> usize {
        match self {
            Node::Split { leaves, .. } => *leaves,
            Node::Leaf(_) => 1,
        }
    }
}

/// A binary partition of `[0,w) x [0,h)` whose leaves all have both
/// dimensions within the configured bounds (provided the image itself is at
/// least `min_dim` on each axis).
pub struct PartitionTree {
    root: Node,
}

impl PartitionTree {
    /// Subdivide `[0,w) x [0,h)`. Requires a validated `TileBounds`.
    pub fn generate<R: Rng>(w: u32, h: u32, bounds: &TileBounds, rng: &mut R) -> Self {
        let rect = Rect { x1: 0, x2: w, y1: 0, y2: h };
        PartitionTree { root: subdivide(rect, bounds, rng) }
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaves()
    }

    /// Collect the leaf rectangles in tree order.
    pub fn leaves(&self) -> Vec<Rect> {
        let mut out = Vec::with_capacity(self.leaf_count());
        collect(&self.root, &mut out);
        out
    }
}

fn subdivide<R: Rng>(rect: Rect, bounds: &TileBounds, rng: &mut R) -> Node {
    let (min, max) = (bounds.min_dim, bounds.max_dim);
    let w = rect.width();
    let h = rect.height();

    // The split point keeps at least `min` on either side, so both children
    // satisfy the lower bound; `max >= 2 * min` keeps the interval non-empty.
    if w > max && (h <= max || rng.gen::<bool>()) {
        let mid = rng.gen_range(rect.x1 + min..rect.x2 - min);
        let left = Box::new(subdivide(Rect { x2: mid, ..rect }, bounds, rng));
        let right = Box::new(subdivide(Rect { x1: mid, ..rect }, bounds, rng));
        let leaves = left.leaves() + right.leaves();
        Node::Split { left, right, leaves }
    } else if h > max {
        let mid = rng.gen_range(rect.y1 + min..rect.y2 - min);
        let top = Box::new(subdivide(Rect { y2: mid, ..rect }, bounds, rng));
        let bottom = Box::new(subdivide(Rect { y1: mid, ..rect }, bounds, rng));
        let leaves = top.leaves() + bottom.leaves();
        Node::Split { left: top, right: bottom, leaves }
    } else {
        Node::Leaf(rect)
    }
}

fn collect(node: &Node, out: &mut Vec<Rect>) {
    match node {
        Node::Split { left, right, .. } => {
            collect(left, out);
            collect(right, out);
        }
        Node::Leaf(rect) => out.push(*rect),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn bounds(min_dim: u32, max_dim: u32) -> TileBounds {
        let b = TileBounds { min_dim, max_dim };
        b.validate().unwrap();
        b
    }

    #[test]
    fn leaves_partition_the_rectangle() {
        let mut rng = SmallRng::seed_from_u64(7);
        let b = bounds(4, 16);
        for &(w, h) in &[(64u32, 48u32), (17, 200), (16, 16), (100, 5)] {
            let tree = PartitionTree::generate(w, h, &b, &mut rng);
            let leaves = tree.leaves();
            assert_eq!(leaves.len(), tree.leaf_count());
            let area: u64 = leaves.iter().map(|r| r.width() as u64 * r.height() as u64).sum();
            assert_eq!(area, w as u64 * h as u64);
        }
    }

    #[test]
    fn leaf_dimensions_stay_in_bounds() {
        let b = bounds(3, 9);
        for seed in 0..32 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let tree = PartitionTree::generate(120, 77, &b, &mut rng);
            for leaf in tree.leaves() {
                assert!(leaf.width() >= 3 && leaf.width() <= 9, "{leaf:?}");
                assert!(leaf.height() >= 3 && leaf.height() <= 9, "{leaf:?}");
            }
        }
    }

    #[test]
    fn small_image_is_a_single_leaf() {
        let mut rng = SmallRng::seed_from_u64(1);
        let b = bounds(2, 8);
        let tree = PartitionTree::generate(8, 8, &b, &mut rng);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.leaves()[0], Rect { x1: 0, x2: 8, y1: 0, y2: 8 });
    }
}
