use std::collections::HashSet;

use serde::Deserialize;

use super::{decode_rows, logged};
use crate::backend::{DataStore, Filter, Query};
use crate::error::AppResult;
use crate::models::Like;

pub const TABLE: &str = "likes";

#[derive(Deserialize)]
struct LikedPost {
    post_id: String,
}

pub async fn like_post(db: &dyn DataStore, user_id: &str, post_id: &str) -> AppResult<()> {
    let row = serde_json::to_value(Like {
        user_id: user_id.to_string(),
        post_id: post_id.to_string(),
    })?;
    logged("like post", db.insert(TABLE, row).await)?;
    Ok(())
}

pub async fn unlike_post(db: &dyn DataStore, user_id: &str, post_id: &str) -> AppResult<()> {
    logged(
        "unlike post",
        db.delete(
            TABLE,
            &[Filter::eq("user_id", user_id), Filter::eq("post_id", post_id)],
        )
        .await,
    )?;
    Ok(())
}

/// Every post the viewer has liked, across all pages.
pub async fn liked_post_ids(db: &dyn DataStore, user_id: &str) -> AppResult<HashSet<String>> {
    let rows = logged(
        "fetch liked posts",
        db.select(&Query::from(TABLE).field("post_id").eq("user_id", user_id))
            .await,
    )?;
    Ok(decode_rows::<LikedPost>(rows)?
        .into_iter()
        .map(|like| like.post_id)
        .collect())
}
