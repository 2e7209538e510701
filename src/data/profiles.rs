use serde_json::json;

use super::{decode_rows, logged};
use crate::backend::{DataStore, Filter, Query};
use crate::error::{AppError, AppResult};
use crate::models::Profile;

pub const TABLE: &str = "profiles";

pub async fn fetch_profile(db: &dyn DataStore, user_id: &str) -> AppResult<Profile> {
    let rows = logged(
        "fetch profile",
        db.select(&Query::from(TABLE).select_all().eq("id", user_id))
            .await,
    )?;
    decode_rows::<Profile>(rows)?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

/// Write every editable field of `profile`. Exactly one row must match.
pub async fn update_profile(db: &dyn DataStore, profile: &Profile) -> AppResult<Profile> {
    let patch = json!({
        "username": profile.username,
        "full_name": profile.full_name,
        "avatar_url": profile.avatar_url,
        "bio": profile.bio,
    });
    update_one(db, &profile.id, patch).await
}

/// Point the profile at a freshly uploaded avatar image.
pub async fn set_avatar_url(db: &dyn DataStore, user_id: &str, url: &str) -> AppResult<Profile> {
    update_one(db, user_id, json!({ "avatar_url": url })).await
}

async fn update_one(db: &dyn DataStore, user_id: &str, patch: serde_json::Value) -> AppResult<Profile> {
    let rows = logged(
        "update profile",
        db.update(TABLE, &[Filter::eq("id", user_id)], patch).await,
    )?;
    let mut profiles = decode_rows::<Profile>(rows)?;
    match profiles.len() {
        1 => Ok(profiles.remove(0)),
        0 => {
            tracing::error!("Profile update for {} matched no row", user_id);
            Err(AppError::NotFound)
        }
        n => {
            tracing::error!("Profile update for {} matched {} rows", user_id, n);
            Err(AppError::BadRequest(format!(
                "Profile update matched {} rows",
                n
            )))
        }
    }
}
