use serde_json::{json, Value};

use super::{decode_rows, logged};
use crate::backend::{DataStore, Filter, Query};
use crate::error::{AppError, AppResult};
use crate::models::{AvatarProfile, AvatarProfileDraft};

pub const TABLE: &str = "avatar_profiles";

pub async fn list_avatar_profiles(db: &dyn DataStore, user_id: &str) -> AppResult<Vec<AvatarProfile>> {
    let rows = logged(
        "fetch avatar profiles",
        db.select(&Query::from(TABLE).select_all().eq("user_id", user_id))
            .await,
    )?;
    decode_rows(rows)
}

/// Insert a new record owned by `user_id`.
pub async fn insert_avatar_profile(
    db: &dyn DataStore,
    user_id: &str,
    draft: &AvatarProfileDraft,
) -> AppResult<AvatarProfile> {
    let mut row = draft_fields(draft);
    row["user_id"] = Value::String(user_id.to_string());

    let rows = logged("add avatar profile", db.insert(TABLE, row).await)?;
    decode_rows::<AvatarProfile>(rows)?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

/// Overwrite the editable fields of the record with `id`.
pub async fn update_avatar_profile(
    db: &dyn DataStore,
    id: &str,
    draft: &AvatarProfileDraft,
) -> AppResult<AvatarProfile> {
    let rows = logged(
        "update avatar profile",
        db.update(TABLE, &[Filter::eq("id", id)], draft_fields(draft))
            .await,
    )?;
    decode_rows::<AvatarProfile>(rows)?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

pub async fn delete_avatar_profile(db: &dyn DataStore, id: &str) -> AppResult<()> {
    let rows = logged(
        "delete avatar profile",
        db.delete(TABLE, &[Filter::eq("id", id)]).await,
    )?;
    if rows.is_empty() {
        return Err(AppError::NotFound);
    }
    Ok(())
}

fn draft_fields(draft: &AvatarProfileDraft) -> Value {
    json!({
        "metaverse_service": draft.metaverse_service,
        "service_url": draft.service_url,
        "avatar_name": draft.avatar_name,
        "avatar_id": draft.avatar_id,
        "avatar_image_url": draft.avatar_image_url,
    })
}
