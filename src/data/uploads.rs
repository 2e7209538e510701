use bytes::Bytes;

use super::logged;
use crate::backend::{ObjectStorage, UploadOptions};
use crate::error::AppResult;

/// Where avatar images go and how long clients may cache them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub bucket: String,
    /// Cache lifetime in seconds.
    pub cache_control: String,
}

impl Default for UploadTarget {
    fn default() -> Self {
        Self {
            bucket: "avatars".to_string(),
            cache_control: "3600".to_string(),
        }
    }
}

/// Each user has a single avatar object, overwritten on every upload.
pub fn avatar_path(user_id: &str) -> String {
    format!("{}/profile.jpg", user_id)
}

/// Upload a JPEG as the user's avatar and return its public URL.
pub async fn upload_avatar(
    storage: &dyn ObjectStorage,
    target: &UploadTarget,
    user_id: &str,
    jpeg: Bytes,
) -> AppResult<String> {
    let path = avatar_path(user_id);
    let options = UploadOptions {
        cache_control: target.cache_control.clone(),
        upsert: true,
        content_type: Some("image/jpeg".to_string()),
    };

    logged(
        "upload avatar",
        storage.upload(&target.bucket, &path, jpeg, &options).await,
    )?;
    let url = logged("resolve avatar URL", storage.public_url(&target.bucket, &path))?;
    tracing::info!("Uploaded avatar for {}", user_id);
    Ok(url)
}
