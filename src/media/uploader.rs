use std::path::Path;

use bytes::Bytes;
use image::DynamicImage;

use super::crop::{encode_jpeg, rasterize, CropRect, DisplaySize, JPEG_QUALITY};
use crate::auth::SessionContext;
use crate::backend::ObjectStorage;
use crate::data::uploads::{self, UploadTarget};
use crate::error::{AppError, AppResult};

#[derive(Debug)]
pub enum UploaderState {
    Empty,
    /// Decoded and shown, crop being adjusted.
    Selected {
        image: DynamicImage,
        display: DisplaySize,
        crop: CropRect,
    },
    /// Crop finished, JPEG ready to upload.
    Cropped {
        image: DynamicImage,
        display: DisplaySize,
        crop: CropRect,
        jpeg: Bytes,
    },
    Uploaded {
        url: String,
    },
}

impl UploaderState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::Selected { .. } => "Selected",
            Self::Cropped { .. } => "Cropped",
            Self::Uploaded { .. } => "Uploaded",
        }
    }
}

/// Select → crop → upload flow for the viewer's avatar image.
#[derive(Debug)]
pub struct ImageUploader {
    target: UploadTarget,
    state: UploaderState,
}

impl ImageUploader {
    pub fn new(target: UploadTarget) -> Self {
        Self {
            target,
            state: UploaderState::Empty,
        }
    }

    pub fn state(&self) -> &UploaderState {
        &self.state
    }

    pub fn crop(&self) -> Option<CropRect> {
        match &self.state {
            UploaderState::Selected { crop, .. } | UploaderState::Cropped { crop, .. } => {
                Some(*crop)
            }
            _ => None,
        }
    }

    /// Encoded JPEG of the finished crop, ready for preview or upload.
    pub fn cropped_jpeg(&self) -> Option<&Bytes> {
        match &self.state {
            UploaderState::Cropped { jpeg, .. } => Some(jpeg),
            _ => None,
        }
    }

    /// Decode a picked image. `display` defaults to the natural size.
    /// The crop starts as the largest centred square.
    pub fn select_bytes(&mut self, bytes: &[u8], display: Option<DisplaySize>) -> AppResult<()> {
        let image = image::load_from_memory(bytes)?;
        let display = display.unwrap_or_else(|| DisplaySize::natural(&image));
        let crop = CropRect::centered_square(display);
        let (shown_w, shown_h) = (display.width, display.height);
        tracing::debug!(
            "Selected {}x{} image shown at {}x{}",
            image.width(),
            image.height(),
            shown_w,
            shown_h
        );
        self.state = UploaderState::Selected {
            image,
            display,
            crop,
        };
        Ok(())
    }

    pub async fn select_file(&mut self, path: &Path, display: Option<DisplaySize>) -> AppResult<()> {
        let bytes = tokio::fs::read(path).await?;
        self.select_bytes(&bytes, display)
    }

    /// Move the crop. Always square and inside the displayed image.
    pub fn set_crop(&mut self, crop: CropRect) -> AppResult<()> {
        let state = std::mem::replace(&mut self.state, UploaderState::Empty);
        let (image, display) = match state {
            UploaderState::Selected { image, display, .. }
            | UploaderState::Cropped { image, display, .. } => (image, display),
            other => {
                let name = other.state_name();
                self.state = other;
                return Err(AppError::BadRequest(format!(
                    "Cannot crop from {} state",
                    name
                )));
            }
        };
        self.state = UploaderState::Selected {
            crop: crop.lock_square(display),
            image,
            display,
        };
        Ok(())
    }

    /// Rasterize the crop and encode it.
    pub fn complete_crop(&mut self) -> AppResult<Bytes> {
        let state = std::mem::replace(&mut self.state, UploaderState::Empty);
        let (image, display, crop) = match state {
            UploaderState::Selected {
                image,
                display,
                crop,
            } => (image, display, crop),
            other => {
                let name = other.state_name();
                self.state = other;
                return Err(AppError::BadRequest(format!(
                    "Cannot complete crop from {} state",
                    name
                )));
            }
        };

        let jpeg = match encode_jpeg(&rasterize(&image, &crop, display), JPEG_QUALITY) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.state = UploaderState::Selected {
                    image,
                    display,
                    crop,
                };
                return Err(e);
            }
        };
        tracing::debug!("Cropped to {} ({} bytes)", crop, jpeg.len());

        self.state = UploaderState::Cropped {
            image,
            display,
            crop,
            jpeg: jpeg.clone(),
        };
        Ok(jpeg)
    }

    /// Upload the cropped JPEG as `<user_id>/profile.jpg` and return its public URL.
    /// A failed upload keeps the crop so it can be retried.
    pub async fn upload(&mut self, storage: &dyn ObjectStorage, ctx: &SessionContext) -> AppResult<String> {
        let session = ctx.require_user()?;
        let jpeg = self
            .cropped_jpeg()
            .cloned()
            .ok_or_else(|| AppError::BadRequest("Nothing cropped to upload".into()))?;

        let url = uploads::upload_avatar(storage, &self.target, session.user_id(), jpeg).await?;
        self.state = UploaderState::Uploaded { url: url.clone() };
        Ok(url)
    }
}
