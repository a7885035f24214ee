//! Luma: a content-based image texturing engine.
//!
//! A dataset of variable-sized luminance tiles is harvested from a corpus of
//! source images by randomized recursive subdivision; near-duplicate tiles
//! are pruned under a similarity margin; a target image is then re-drawn by
//! replacing each of its tiles with the closest dataset tile under mean
//! absolute difference. The practical effect is to give a digitally produced
//! image the grain of the reference corpus.

pub mod core;
pub mod error;
pub mod images;
pub mod pipeline;

pub use error::{LumaError, Result};
