//! Thin wrappers over the `image` crate: decode any supported format to an
//! 8-bit luminance plane, encode a plane back out, enforce the dimension cap.

use std::path::Path;

use image::GrayImage;

use crate::error::{LumaError, Result};

/// Each image dimension must fit the 13-bit coordinate window used when
/// tile origins are encoded.
pub const MAX_IMAGE_DIM: u32 = 8191;

/// An 8-bit luminance plane in row-major order.
pub struct LumaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Decode an image file to luminance.
pub fn load_luma(path: &Path) -> Result<LumaImage> {
    let img = image::open(path)?;
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();
    if width > MAX_IMAGE_DIM || height > MAX_IMAGE_DIM {
        return Err(LumaError::ImageTooLarge { width, height, max: MAX_IMAGE_DIM });
    }
    if width == 0 || height == 0 {
        return Err(LumaError::InvalidConfig(format!("{}: empty image", path.display())));
    }
    Ok(LumaImage { width, height, pixels: gray.into_raw() })
}

/// Encode a luminance plane; the format follows the file extension.
pub fn save_luma(path: &Path, width: u32, height: u32, pixels: Vec<u8>) -> Result<()> {
    let img = GrayImage::from_raw(width, height, pixels)
        .ok_or_else(|| LumaError::Internal("output plane size mismatch".into()))?;
    img.save(path)?;
    Ok(())
}
