use std::fs;
use std::path::{Path, PathBuf};

use crate::models::Session;

/// Persists the signed-in session between runs as `session.json`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted session. A missing or unreadable file means no session.
    pub fn load(&self) -> Option<Session> {
        let json = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&json) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("Ignoring corrupt session file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, json)
    }

    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use chrono::Utc;

    fn session() -> Session {
        Session {
            user: User {
                id: "u1".into(),
                email: Some("a@example.com".into()),
            },
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn load_without_file_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(SessionStore::in_dir(tmp.path()).load().is_none());
    }

    #[test]
    fn save_then_load_restores_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(&tmp.path().join("nested"));
        store.save(&session()).unwrap();
        assert_eq!(store.load(), Some(session()));
    }

    #[test]
    fn clear_removes_file_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(tmp.path());
        store.save(&session()).unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::in_dir(tmp.path());
        fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_none());
    }
}
