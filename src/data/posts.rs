use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{decode_rows, likes, logged};
use crate::backend::{DataStore, Query};
use crate::error::{AppError, AppResult};
use crate::models::{NewPost, Post, PostAuthor};
use crate::timeline::SortBy;

pub const TABLE: &str = "posts";

/// Post row as selected by [`feed_query`], before the viewer's likes are joined in.
#[derive(Debug, Deserialize)]
struct PostRow {
    id: String,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    metaverse_tags: Option<Vec<String>>,
    image_url: Option<String>,
    author: OneOrMany<PostAuthor>,
    #[serde(default)]
    likes: Vec<LikeCount>,
}

/// Embedded relations come back as either an object or a one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            Self::One(item) => Some(item),
            Self::Many(items) => items.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LikeCount {
    count: i64,
}

fn post_columns() -> Query {
    Query::from(TABLE)
        .fields(&["id", "content", "created_at", "metaverse_tags", "image_url"])
        .embed("author", "profiles", "user_id", &["id", "username", "avatar_url"])
        .count("likes", "post_id")
}

/// Page query for the feed: author embed, like count, optional tag and sort order.
pub fn feed_query(sort_by: SortBy, tag: Option<&str>, from: u64, to: u64) -> Query {
    let mut query = post_columns();

    if let Some(tag) = tag.filter(|t| !t.is_empty()) {
        query = query.contains("metaverse_tags", vec![tag.to_string()]);
    }
    query = match sort_by {
        SortBy::Latest => query.order_by("created_at", false),
        SortBy::Popular => query.order_by_count("likes", false),
    };
    query.range(from, to)
}

/// Fetch rows `from..=to` of the feed and mark the ones `viewer` has liked.
pub async fn fetch_posts(
    db: &dyn DataStore,
    sort_by: SortBy,
    tag: Option<&str>,
    from: u64,
    to: u64,
    viewer: Option<&str>,
) -> AppResult<Vec<Post>> {
    let rows = logged(
        "fetch posts",
        db.select(&feed_query(sort_by, tag, from, to)).await,
    )?;
    let rows = decode_rows::<PostRow>(rows)?;
    into_posts(db, rows, viewer).await
}

/// Single post by id, with the same author, count and `is_liked` fields as the feed.
pub async fn fetch_post(db: &dyn DataStore, post_id: &str, viewer: Option<&str>) -> AppResult<Post> {
    let rows = logged(
        "fetch post",
        db.select(&post_columns().eq("id", post_id)).await,
    )?;
    let rows = decode_rows::<PostRow>(rows)?;
    into_posts(db, rows, viewer)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound)
}

async fn into_posts(db: &dyn DataStore, rows: Vec<PostRow>, viewer: Option<&str>) -> AppResult<Vec<Post>> {
    // A failed like lookup degrades to "nothing liked" rather than failing the page
    let liked = match viewer {
        Some(viewer) => likes::liked_post_ids(db, viewer).await.unwrap_or_default(),
        None => Default::default(),
    };

    rows.into_iter()
        .map(|row| {
            let author = row.author.into_first().ok_or_else(|| {
                tracing::error!("Post {} has no author", row.id);
                AppError::NotFound
            })?;
            Ok(Post {
                is_liked: liked.contains(&row.id),
                likes_count: row.likes.first().map(|l| l.count).unwrap_or(0),
                id: row.id,
                content: row.content,
                created_at: row.created_at,
                metaverse_tags: row.metaverse_tags.unwrap_or_default(),
                image_url: row.image_url,
                author,
            })
        })
        .collect()
}

/// Publish a post as `user_id`. Returns the new post's id.
pub async fn create_post(db: &dyn DataStore, user_id: &str, post: &NewPost) -> AppResult<String> {
    let content = post.content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("Post content cannot be empty".into()));
    }
    let tags: Vec<&str> = post
        .metaverse_tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    let rows = logged(
        "create post",
        db.insert(
            TABLE,
            json!({
                "user_id": user_id,
                "content": content,
                "metaverse_tags": tags,
                "image_url": post.image_url,
            }),
        )
        .await,
    )?;

    rows.first()
        .and_then(|row| row.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(AppError::NotFound)
}
