use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{AppError, AppResult};

pub const JPEG_QUALITY: u8 = 92;

/// Size the image is shown at. Crop rectangles are expressed in these pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> AppResult<Self> {
        if !(width > 0.0 && height > 0.0) {
            return Err(AppError::BadRequest(format!(
                "Invalid display size {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    /// Shown at natural size.
    pub fn natural(image: &DynamicImage) -> Self {
        Self {
            width: f64::from(image.width().max(1)),
            height: f64::from(image.height().max(1)),
        }
    }
}

impl FromStr for DisplaySize {
    type Err = AppError;

    /// `WIDTHxHEIGHT`, e.g. `400x300`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::BadRequest(format!("Expected WIDTHxHEIGHT, got {}", s));
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse().map_err(|_| invalid())?;
        let height = h.trim().parse().map_err(|_| invalid())?;
        Self::new(width, height)
    }
}

/// Crop rectangle in displayed-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Pixel rectangle in the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn square(x: f64, y: f64, size: f64) -> Self {
        Self {
            x,
            y,
            width: size,
            height: size,
        }
    }

    /// Largest square centred in the display.
    pub fn centered_square(display: DisplaySize) -> Self {
        let side = display.width.min(display.height);
        Self::square(
            (display.width - side) / 2.0,
            (display.height - side) / 2.0,
            side,
        )
    }

    /// Force a 1:1 aspect and keep the rectangle inside the display.
    pub fn lock_square(self, display: DisplaySize) -> Self {
        // At least one pixel, unless the display itself is smaller
        let side = self
            .width
            .min(self.height)
            .max(1.0)
            .min(display.width.min(display.height));
        let x = self.x.clamp(0.0, display.width - side);
        let y = self.y.clamp(0.0, display.height - side);
        Self::square(x, y, side)
    }

    /// Source pixels covered by this rectangle, scaled by natural/displayed size.
    pub fn source_region(&self, display: DisplaySize, natural: (u32, u32)) -> SourceRegion {
        let scale_x = f64::from(natural.0) / display.width;
        let scale_y = f64::from(natural.1) / display.height;

        let x = ((self.x * scale_x).round().max(0.0) as u32).min(natural.0.saturating_sub(1));
        let y = ((self.y * scale_y).round().max(0.0) as u32).min(natural.1.saturating_sub(1));
        let width = ((self.width * scale_x).round() as u32).clamp(1, natural.0 - x);
        let height = ((self.height * scale_y).round() as u32).clamp(1, natural.1 - y);
        SourceRegion {
            x,
            y,
            width,
            height,
        }
    }

    /// Output size: the crop's own width and height.
    pub fn output_size(&self) -> (u32, u32) {
        (
            (self.width.round() as u32).max(1),
            (self.height.round() as u32).max(1),
        )
    }
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0},{:.0} {:.0}x{:.0}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl FromStr for CropRect {
    type Err = AppError;

    /// `X,Y,SIZE` square in display pixels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::BadRequest(format!("Expected X,Y,SIZE, got {}", s));
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        match parts[..] {
            [x, y, size] if size > 0.0 && x >= 0.0 && y >= 0.0 => Ok(Self::square(x, y, size)),
            _ => Err(invalid()),
        }
    }
}

/// Draw the source region under `crop` into an image of the crop's size.
pub fn rasterize(image: &DynamicImage, crop: &CropRect, display: DisplaySize) -> DynamicImage {
    let region = crop.source_region(display, (image.width(), image.height()));
    let (out_w, out_h) = crop.output_size();
    image
        .crop_imm(region.x, region.y, region.width, region.height)
        .resize_exact(out_w, out_h, FilterType::Triangle)
}

pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> AppResult<Bytes> {
    let rgb = image.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    Ok(Bytes::from(buf))
}
