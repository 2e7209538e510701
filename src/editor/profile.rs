use crate::auth::SessionContext;
use crate::backend::DataStore;
use crate::data::{avatar_profiles, profiles};
use crate::error::{AppError, AppResult};
use crate::models::{AvatarProfile, Profile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEditorState {
    Viewing,
    Editing { draft: Profile },
}

impl ProfileEditorState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Viewing => "Viewing",
            Self::Editing { .. } => "Editing",
        }
    }
}

/// The signed-in user's own profile, `Viewing ⇄ Editing`.
#[derive(Debug)]
pub struct ProfileEditor {
    profile: Profile,
    state: ProfileEditorState,
}

impl ProfileEditor {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            state: ProfileEditorState::Viewing,
        }
    }

    /// Load the viewer's profile. Requires a session.
    pub async fn load(db: &dyn DataStore, ctx: &SessionContext) -> AppResult<Self> {
        let session = ctx.require_user()?;
        let profile = profiles::fetch_profile(db, session.user_id()).await?;
        Ok(Self::new(profile))
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn state(&self) -> &ProfileEditorState {
        &self.state
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, ProfileEditorState::Editing { .. })
    }

    /// Copy the record into a fresh draft.
    pub fn start_editing(&mut self) {
        self.state = ProfileEditorState::Editing {
            draft: self.profile.clone(),
        };
    }

    pub fn draft_mut(&mut self) -> Option<&mut Profile> {
        match &mut self.state {
            ProfileEditorState::Editing { draft } => Some(draft),
            ProfileEditorState::Viewing => None,
        }
    }

    pub fn cancel(&mut self) {
        self.state = ProfileEditorState::Viewing;
    }

    /// Write the whole draft. Back to viewing only on success.
    pub async fn submit(&mut self, db: &dyn DataStore) -> AppResult<&Profile> {
        let ProfileEditorState::Editing { draft } = &self.state else {
            return Err(AppError::BadRequest("Profile is not being edited".into()));
        };
        if draft.username.trim().is_empty() {
            return Err(AppError::BadRequest("Username cannot be empty".into()));
        }
        let mut draft = draft.clone();
        // Id is not editable
        draft.id = self.profile.id.clone();

        let saved = profiles::update_profile(db, &draft).await?;
        tracing::info!("Updated profile {}", saved.id);
        self.profile = saved;
        self.state = ProfileEditorState::Viewing;
        Ok(&self.profile)
    }

    /// Persist a freshly uploaded avatar onto the profile right away.
    /// An open draft picks up the new URL too.
    pub async fn apply_avatar_url(&mut self, db: &dyn DataStore, url: &str) -> AppResult<()> {
        let saved = profiles::set_avatar_url(db, &self.profile.id, url).await?;
        if let ProfileEditorState::Editing { draft } = &mut self.state {
            draft.avatar_url = saved.avatar_url.clone();
        }
        self.profile = saved;
        Ok(())
    }
}

/// Read-only view of any user's profile with their avatar profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileView {
    pub profile: Profile,
    pub avatar_profiles: Vec<AvatarProfile>,
}

impl ProfileView {
    pub async fn load(db: &dyn DataStore, user_id: &str) -> AppResult<Self> {
        let (profile, avatar_profiles) = futures::try_join!(
            profiles::fetch_profile(db, user_id),
            avatar_profiles::list_avatar_profiles(db, user_id)
        )?;
        Ok(Self {
            profile,
            avatar_profiles,
        })
    }
}
