//! Avatar image pipeline: square crop in display coordinates, rasterized
//! from the full-resolution source, JPEG-encoded and uploaded.

pub mod crop;
pub mod uploader;

pub use crop::{CropRect, DisplaySize, JPEG_QUALITY};
pub use uploader::{ImageUploader, UploaderState};
