use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LumaError>;

/// Every error is fatal: the tile array and the packed byte store are only
/// mutually consistent while all invariants hold, so nothing is skippable.
#[derive(Debug, Error)]
pub enum LumaError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("image too large: {width}x{height} (both dimensions must be at most {max})")]
    ImageTooLarge { width: u32, height: u32, max: u32 },

    #[error("out of memory allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}
