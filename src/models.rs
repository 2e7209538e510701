use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Nullable text columns read as empty strings.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Credentials issued by the auth service for one signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub full_name: String,
    pub avatar_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarProfile {
    pub id: String,
    pub user_id: String,
    pub metaverse_service: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub service_url: String,
    pub avatar_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub avatar_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub avatar_image_url: String,
}

/// Editable fields of an avatar profile. Owner and id are never part of the draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarProfileDraft {
    pub metaverse_service: String,
    pub service_url: String,
    pub avatar_name: String,
    pub avatar_id: String,
    pub avatar_image_url: String,
}

impl From<&AvatarProfile> for AvatarProfileDraft {
    fn from(record: &AvatarProfile) -> Self {
        Self {
            metaverse_service: record.metaverse_service.clone(),
            service_url: record.service_url.clone(),
            avatar_name: record.avatar_name.clone(),
            avatar_id: record.avatar_id.clone(),
            avatar_image_url: record.avatar_image_url.clone(),
        }
    }
}

/// Denormalized subset of the author's profile embedded in every post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostAuthor {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub metaverse_tags: Vec<String>,
    pub image_url: Option<String>,
    pub author: PostAuthor,
    pub likes_count: i64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub content: String,
    pub metaverse_tags: Vec<String>,
    pub image_url: Option<String>,
}

/// One viewer's like of one post. The pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    pub user_id: String,
    pub post_id: String,
}
