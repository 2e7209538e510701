use crate::auth::SessionContext;
use crate::backend::DataStore;
use crate::data::posts;
use crate::error::{AppError, AppResult};
use crate::models::NewPost;

/// New-post form.
#[derive(Debug, Default)]
pub struct PostComposer {
    draft: NewPost,
}

impl PostComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &NewPost {
        &self.draft
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.draft.content = content.into();
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !tag.trim().is_empty() && !self.draft.metaverse_tags.contains(&tag) {
            self.draft.metaverse_tags.push(tag);
        }
    }

    pub fn set_image_url(&mut self, url: Option<String>) {
        self.draft.image_url = url;
    }

    pub fn can_submit(&self) -> bool {
        !self.draft.content.trim().is_empty()
    }

    /// Publish as the signed-in viewer and clear the form. Returns the new post id.
    pub async fn submit(&mut self, db: &dyn DataStore, ctx: &SessionContext) -> AppResult<String> {
        let session = ctx.require_user()?;
        if !self.can_submit() {
            return Err(AppError::BadRequest("Post content cannot be empty".into()));
        }
        let id = posts::create_post(db, session.user_id(), &self.draft).await?;
        tracing::info!("Published post {}", id);
        self.draft = NewPost::default();
        Ok(id)
    }
}
