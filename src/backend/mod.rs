// Seams to the managed backend - every side effect of the client goes through these traits
pub mod local;
pub mod query;
pub mod rest;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::Session;

pub use self::query::{Column, Filter, Order, OrderKey, Query};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Auth-state change notification, carrying the session that is current after the change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl AuthEvent {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) | Self::TokenRefreshed(session) => Some(session),
            Self::SignedOut => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SignedIn(_) => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed(_) => "TOKEN_REFRESHED",
        }
    }
}

/// Live registration for auth events. Dropping it unsubscribes.
pub struct AuthSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    pub fn new(receiver: broadcast::Receiver<AuthEvent>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event. Returns `None` once the auth service is gone.
    /// Lagged receivers skip to the most recent events.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Auth subscription lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// Sender half shared by the adapters for publishing auth events.
#[derive(Clone)]
pub struct AuthEvents {
    sender: broadcast::Sender<AuthEvent>,
}

impl AuthEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn subscribe(&self) -> AuthSubscription {
        AuthSubscription::new(self.sender.subscribe())
    }

    pub fn emit(&self, event: AuthEvent) {
        tracing::debug!("Auth event: {}", event.name());
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for AuthEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session>;

    /// Register a new account. Returns the session when the backend signs the user in right away.
    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// Current session, restored from persistence and refreshed when expired.
    async fn current_session(&self) -> BackendResult<Option<Session>>;

    fn subscribe(&self) -> AuthSubscription;
}

/// Table-scoped reads and writes. Rows travel as JSON objects.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>>;

    /// Insert one row and return the stored representation.
    async fn insert(&self, table: &str, row: Value) -> BackendResult<Vec<Value>>;

    /// Patch every row matching `filters` and return the updated rows.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value)
        -> BackendResult<Vec<Value>>;

    /// Delete every row matching `filters` and return the removed rows.
    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub cache_control: String,
    pub upsert: bool,
    pub content_type: Option<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            cache_control: "3600".to_string(),
            upsert: false,
            content_type: None,
        }
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()>;

    fn public_url(&self, bucket: &str, path: &str) -> BackendResult<String>;
}

/// Reject object paths that could escape their bucket.
pub(crate) fn validate_object_path(path: &str) -> BackendResult<()> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(BackendError::InvalidQuery(format!(
            "Invalid object path: {}",
            path
        )));
    }
    Ok(())
}
