use crate::backend::DataStore;
use crate::data::avatar_profiles;
use crate::error::{AppError, AppResult};
use crate::models::{AvatarProfile, AvatarProfileDraft};

/// Whether a submit creates a record or updates the one being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarProfileMode {
    Creating,
    Editing(String),
}

/// The viewer's avatar profiles plus the add/edit form.
#[derive(Debug)]
pub struct AvatarProfileEditor {
    owner: String,
    records: Vec<AvatarProfile>,
    draft: AvatarProfileDraft,
    editing_id: Option<String>,
}

impl AvatarProfileEditor {
    pub fn new(owner: impl Into<String>, records: Vec<AvatarProfile>) -> Self {
        Self {
            owner: owner.into(),
            records,
            draft: AvatarProfileDraft::default(),
            editing_id: None,
        }
    }

    pub async fn load(db: &dyn DataStore, owner: &str) -> AppResult<Self> {
        let records = avatar_profiles::list_avatar_profiles(db, owner).await?;
        Ok(Self::new(owner, records))
    }

    pub async fn reload(&mut self, db: &dyn DataStore) -> AppResult<()> {
        self.records = avatar_profiles::list_avatar_profiles(db, &self.owner).await?;
        Ok(())
    }

    pub fn records(&self) -> &[AvatarProfile] {
        &self.records
    }

    pub fn draft(&self) -> &AvatarProfileDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut AvatarProfileDraft {
        &mut self.draft
    }

    pub fn mode(&self) -> AvatarProfileMode {
        match &self.editing_id {
            Some(id) => AvatarProfileMode::Editing(id.clone()),
            None => AvatarProfileMode::Creating,
        }
    }

    /// Only records listed for the owner may be edited or deleted.
    fn owned_record(&self, id: &str) -> AppResult<&AvatarProfile> {
        let record = self
            .records
            .iter()
            .find(|r| r.id == id)
            .ok_or(AppError::NotFound)?;
        if record.user_id != self.owner {
            tracing::warn!("Avatar profile {} does not belong to {}", id, self.owner);
            return Err(AppError::Unauthorized);
        }
        Ok(record)
    }

    pub fn start_editing(&mut self, id: &str) -> AppResult<()> {
        let draft = AvatarProfileDraft::from(self.owned_record(id)?);
        self.draft = draft;
        self.editing_id = Some(id.to_string());
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.draft = AvatarProfileDraft::default();
        self.editing_id = None;
    }

    /// Insert when creating, update by id when editing. Never both.
    pub async fn submit(&mut self, db: &dyn DataStore) -> AppResult<AvatarProfile> {
        if self.draft.metaverse_service.trim().is_empty() {
            return Err(AppError::BadRequest("Metaverse service is required".into()));
        }
        if self.draft.avatar_name.trim().is_empty() {
            return Err(AppError::BadRequest("Avatar name is required".into()));
        }

        let saved = match self.editing_id.clone() {
            Some(id) => {
                self.owned_record(&id)?;
                avatar_profiles::update_avatar_profile(db, &id, &self.draft).await?
            }
            None => avatar_profiles::insert_avatar_profile(db, &self.owner, &self.draft).await?,
        };
        tracing::info!("Saved avatar profile {}", saved.id);

        self.cancel();
        if let Err(e) = self.reload(db).await {
            tracing::error!("Avatar profile {} saved but list reload failed: {}", saved.id, e);
            match self.records.iter_mut().find(|r| r.id == saved.id) {
                Some(existing) => *existing = saved.clone(),
                None => self.records.push(saved.clone()),
            }
        }
        Ok(saved)
    }

    pub async fn delete(&mut self, db: &dyn DataStore, id: &str) -> AppResult<()> {
        self.owned_record(id)?;
        avatar_profiles::delete_avatar_profile(db, id).await?;
        tracing::info!("Deleted avatar profile {}", id);

        if self.editing_id.as_deref() == Some(id) {
            self.cancel();
        }
        if let Err(e) = self.reload(db).await {
            tracing::error!("Avatar profile {} deleted but list reload failed: {}", id, e);
            self.records.retain(|r| r.id != id);
        }
        Ok(())
    }
}
