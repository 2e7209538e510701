//! Client for a Supabase-style managed backend.
//!
//! Auth goes through the GoTrue endpoints under `/auth/v1`, table access
//! through PostgREST under `/rest/v1` and uploads through `/storage/v1`.
//! Every request carries the project's anon key as `apikey`; the bearer
//! token is the signed-in session's access token, or the anon key when
//! nobody is signed in.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use url::Url;

use crate::auth::SessionStore;
use crate::backend::{
    validate_object_path, AuthEvent, AuthEvents, AuthService, AuthSubscription, BackendError,
    BackendResult, DataStore, Filter, ObjectStorage, Query, UploadOptions,
};
use crate::models::{Session, User};

pub struct RestBackend {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
    current: RwLock<Option<Session>>,
    events: AuthEvents,
    store: Option<SessionStore>,
}

/// GoTrue token grant response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in.unwrap_or(3600)));
        Session {
            user: self.user,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

impl RestBackend {
    pub fn new(base_url: Url, anon_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, anon_key)
    }

    pub fn with_client(client: reqwest::Client, mut base_url: Url, anon_key: impl Into<String>) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            anon_key: anon_key.into(),
            current: RwLock::new(None),
            events: AuthEvents::new(),
            store: None,
        }
    }

    pub fn with_session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::InvalidQuery(format!("Invalid endpoint {}: {}", path, e)))
    }

    async fn bearer(&self) -> String {
        match self.current.read().await.as_ref() {
            Some(session) => session.access_token.clone(),
            None => self.anon_key.clone(),
        }
    }

    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self.bearer().await;
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn set_current(&self, session: Option<Session>) {
        if let Some(store) = &self.store {
            let persisted = match &session {
                Some(session) => store.save(session),
                None => store.clear(),
            };
            if let Err(e) = persisted {
                tracing::warn!("Failed to persist session: {}", e);
            }
        }
        *self.current.write().await = session;
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> BackendResult<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = parse_response(response).await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn refresh(&self, session: &Session) -> BackendResult<Option<Session>> {
        let Some(refresh_token) = &session.refresh_token else {
            self.set_current(None).await;
            return Ok(None);
        };

        match self
            .token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
        {
            Ok(refreshed) => {
                tracing::info!("Refreshed session for {}", refreshed.user.id);
                self.set_current(Some(refreshed.clone())).await;
                self.events.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(BackendError::Api { status, message }) => {
                tracing::warn!("Session refresh rejected ({}): {}", status, message);
                self.set_current(None).await;
                self.events.emit(AuthEvent::SignedOut);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn table_request(
        &self,
        method: Method,
        table: &str,
        filters: &[Filter],
    ) -> BackendResult<RequestBuilder> {
        let mut url = self.endpoint(&format!("rest/v1/{}", table))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in filters.iter().map(Filter::to_param) {
                pairs.append_pair(&key, &value);
            }
        }
        Ok(self
            .request(method, url)
            .await
            .header("Prefer", "return=representation"))
    }

    fn object_url(&self, prefix: &str, bucket: &str, path: &str) -> BackendResult<Url> {
        validate_object_path(bucket)?;
        validate_object_path(path)?;
        self.endpoint(&format!("{}/{}/{}", prefix, bucket, path))
    }
}

/// Pull the human-readable message out of a GoTrue, PostgREST or storage error body.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

/// Ensure the response has a success status, mapping failures to typed errors.
async fn ensure_success(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let message = error_message(&body);
    tracing::debug!("Backend responded {}: {}", status, body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if !body.contains("invalid_grant") => {
            BackendError::Unauthorized
        }
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::CONFLICT => BackendError::Conflict(message),
        _ => BackendError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

async fn parse_response<T: serde::de::DeserializeOwned>(response: Response) -> BackendResult<T> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn check_status(response: Response) -> BackendResult<()> {
    ensure_success(response).await?;
    Ok(())
}

#[async_trait]
impl AuthService for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await
            .map_err(|e| match e {
                BackendError::Api { status: 400, message }
                    if message.eq_ignore_ascii_case("Invalid login credentials") =>
                {
                    BackendError::InvalidCredentials
                }
                other => other,
            })?;

        tracing::info!("Signed in {}", session.user.id);
        self.set_current(Some(session.clone())).await;
        self.events.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>> {
        let response = self
            .client
            .post(self.endpoint("auth/v1/signup")?)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: Value = parse_response(response).await?;

        // With e-mail confirmation enabled only the user comes back
        if body.get("access_token").is_none() {
            tracing::info!("Registered {}, confirmation pending", email);
            return Ok(None);
        }
        let session = serde_json::from_value::<TokenResponse>(body)?.into_session(Utc::now());
        tracing::info!("Registered and signed in {}", session.user.id);
        self.set_current(Some(session.clone())).await;
        self.events.emit(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let signed_in = self.current.read().await.is_some();
        if signed_in {
            let response = self
                .request(Method::POST, self.endpoint("auth/v1/logout")?)
                .await
                .send()
                .await?;
            // An already revoked token still signs out locally
            match check_status(response).await {
                Ok(()) | Err(BackendError::Unauthorized) | Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.set_current(None).await;
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        let cached = self.current.read().await.clone();
        let session = match cached {
            Some(session) => session,
            None => match self.store.as_ref().and_then(SessionStore::load) {
                Some(restored) => {
                    *self.current.write().await = Some(restored.clone());
                    restored
                }
                None => return Ok(None),
            },
        };

        if session.is_expired(Utc::now()) {
            return self.refresh(&session).await;
        }
        Ok(Some(session))
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }
}

#[async_trait]
impl DataStore for RestBackend {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>> {
        let mut url = self.endpoint(&format!("rest/v1/{}", query.table))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.to_params() {
                pairs.append_pair(&key, &value);
            }
        }
        let response = self.request(Method::GET, url).await.send().await?;
        parse_response(response).await
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Vec<Value>> {
        let response = self
            .table_request(Method::POST, table, &[])
            .await?
            .json(&row)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> BackendResult<Vec<Value>> {
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(
                "Refusing to update without filters".into(),
            ));
        }
        let response = self
            .table_request(Method::PATCH, table, filters)
            .await?
            .json(&patch)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>> {
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(
                "Refusing to delete without filters".into(),
            ));
        }
        let response = self
            .table_request(Method::DELETE, table, filters)
            .await?
            .send()
            .await?;
        parse_response(response).await
    }
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()> {
        let url = self.object_url("storage/v1/object", bucket, path)?;
        let content_type = options.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        let size = bytes.len();

        let response = self
            .request(Method::POST, url)
            .await
            .header("cache-control", format!("max-age={}", options.cache_control))
            .header("x-upsert", options.upsert.to_string())
            .header("content-type", content_type)
            .body(bytes)
            .send()
            .await?;
        check_status(response).await?;

        tracing::debug!("Uploaded {}/{} ({} bytes)", bucket, path, size);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> BackendResult<String> {
        Ok(self
            .object_url("storage/v1/object/public", bucket, path)?
            .to_string())
    }
}
