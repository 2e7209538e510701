//! One function per backend request. Each logs a failure before handing it
//! back to the caller; nothing here retries.

pub mod avatar_profiles;
pub mod likes;
pub mod posts;
pub mod profiles;
pub mod uploads;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::BackendResult;
use crate::error::AppResult;

/// Log a failed request under `action` and convert it to an [`AppResult`].
pub(crate) fn logged<T>(action: &str, result: BackendResult<T>) -> AppResult<T> {
    result.map_err(|e| {
        tracing::error!("Failed to {}: {}", action, e);
        e.into()
    })
}

pub(crate) fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> AppResult<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(Into::into))
        .collect()
}
