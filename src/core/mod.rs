//! The tile engine: partitioning, extraction, pruning, serialization,
//! merging and tracing over packed luminance tiles.

pub mod codec;
pub mod extract;
pub mod key;
pub mod merge;
pub mod pixel;
pub mod prune;
pub mod store;
pub mod trace;
pub mod tree;

use crate::error::{LumaError, Result};

/// Inclusive bounds on leaf tile dimensions.
///
/// `max_dim >= 2 * min_dim` guarantees every oversized axis has a non-empty
/// range of legal split points; dimensions are byte-sized because the packed
/// key and the dataset format store them in one byte each.
#[derive(Clone, Copy, Debug)]
pub struct TileBounds {
    pub min_dim: u32,
    pub max_dim: u32,
}

impl TileBounds {
    pub fn validate(&self) -> Result<()> {
        if self.min_dim < 1 {
            return Err(LumaError::InvalidConfig("minimum tile dimension must be at least 1".into()));
        }
        if self.max_dim > 255 {
            return Err(LumaError::InvalidConfig("maximum tile dimension must be at most 255".into()));
        }
        if self.max_dim < 2 * self.min_dim {
            return Err(LumaError::InvalidConfig(format!(
                "maximum tile dimension {} must be at least twice the minimum {}",
                self.max_dim, self.min_dim
            )));
        }
        Ok(())
    }
}

/// Convert a user-facing margin in `[0, 1)` to its byte form, truncating
/// `256 * margin` toward zero. Zero disables pruning.
pub fn margin_to_m8(margin: f64) -> Result<u8> {
    if !margin.is_finite() || !(0.0..1.0).contains(&margin) {
        return Err(LumaError::InvalidConfig(format!(
            "margin {margin} must lie in [0, 1)"
        )));
    }
    Ok((margin * 256.0).min(255.0) as u8)
}
