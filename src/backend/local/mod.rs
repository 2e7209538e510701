//! Embedded stand-in for the managed backend.
//!
//! SQLite holds accounts, sessions and the social tables; uploaded objects
//! live under a directory on disk. Writes follow the same ownership policy
//! the managed backend enforces with row-level security: a row can only be
//! written by the user its owner column names.

pub mod db;
pub mod schema;
pub mod sql;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use url::Url;

use self::db::DbPool;
use self::schema::TableDef;
use crate::auth::session::issue_session;
use crate::auth::SessionStore;
use crate::backend::{
    validate_object_path, AuthEvent, AuthEvents, AuthService, AuthSubscription, BackendError,
    BackendResult, DataStore, Filter, ObjectStorage, Query, UploadOptions,
};
use crate::models::{Session, User};

const MIN_PASSWORD_LEN: usize = 6;

pub struct LocalBackend {
    pool: DbPool,
    uploads_dir: PathBuf,
    public_base_url: Option<Url>,
    session_hours: u64,
    hash_cost: u32,
    current: RwLock<Option<Session>>,
    events: AuthEvents,
    store: Option<SessionStore>,
}

impl LocalBackend {
    /// Wrap an already migrated pool. A relative `uploads_dir` is taken
    /// against the current directory.
    pub fn new(pool: DbPool, uploads_dir: impl Into<PathBuf>) -> Self {
        let uploads_dir = uploads_dir.into();
        let uploads_dir = std::path::absolute(&uploads_dir).unwrap_or(uploads_dir);
        Self {
            pool,
            uploads_dir,
            public_base_url: None,
            session_hours: 720,
            hash_cost: bcrypt::DEFAULT_COST,
            current: RwLock::new(None),
            events: AuthEvents::new(),
            store: None,
        }
    }

    /// Open (and migrate) the database file at `db_path`.
    pub fn open(db_path: &std::path::Path, uploads_dir: impl Into<PathBuf>) -> BackendResult<Self> {
        let pool = db::create_pool(db_path)?;
        db::run_migrations(&pool)?;
        Ok(Self::new(pool, uploads_dir))
    }

    pub fn in_memory(uploads_dir: impl Into<PathBuf>) -> BackendResult<Self> {
        let pool = db::memory_pool()?;
        db::run_migrations(&pool)?;
        Ok(Self::new(pool, uploads_dir))
    }

    pub fn with_session_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_session_hours(mut self, hours: u64) -> Self {
        self.session_hours = hours;
        self
    }

    /// bcrypt work factor for new password hashes.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn with_public_base_url(mut self, mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.public_base_url = Some(url);
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn current_user_id(&self) -> BackendResult<String> {
        let current = self.current.read().await;
        match current.as_ref() {
            Some(session) if !session.is_expired(Utc::now()) => Ok(session.user.id.clone()),
            _ => Err(BackendError::Unauthorized),
        }
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

    fn start_session(&self, user: User) -> BackendResult<Session> {
        let session = issue_session(user, self.session_hours, Utc::now());
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO auth_sessions (access_token, refresh_token, user_id, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.access_token,
                session.refresh_token,
                session.user.id,
                timestamp(session.expires_at)
            ],
        )?;
        Ok(session)
    }

    /// Check a persisted or cached session against the sessions table, refreshing it if expired.
    async fn revalidate(&self, session: Session) -> BackendResult<Option<Session>> {
        let stored: Option<(String, Option<String>)> = {
            let conn = self.pool.get()?;
            conn.query_row(
                "SELECT expires_at, refresh_token FROM auth_sessions WHERE access_token = ?1",
                params![session.access_token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((expires_at, refresh_token)) = stored else {
            tracing::info!("Stored session is no longer valid");
            self.set_current(None).await;
            return Ok(None);
        };

        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if !expired {
            self.set_current(Some(session.clone())).await;
            return Ok(Some(session));
        }

        if refresh_token.is_none() || refresh_token != session.refresh_token {
            self.set_current(None).await;
            return Ok(None);
        }

        let refreshed = {
            let conn = self.pool.get()?;
            conn.execute(
                "DELETE FROM auth_sessions WHERE access_token = ?1",
                params![session.access_token],
            )?;
            drop(conn);
            self.start_session(session.user.clone())?
        };
        tracing::info!("Refreshed session for {}", refreshed.user.id);
        self.set_current(Some(refreshed.clone())).await;
        self.events.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
        Ok(Some(refreshed))
    }

    fn row_by_rowid(
        conn: &rusqlite::Connection,
        table: &TableDef,
        rowid: i64,
    ) -> BackendResult<Value> {
        let text = sql::select_by_rowid(table)?;
        let json: String = conn.query_row(&text, params![rowid], |row| row.get(0))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn object_path(&self, bucket: &str, path: &str) -> BackendResult<PathBuf> {
        validate_object_path(bucket)?;
        if bucket.contains('/') {
            return Err(BackendError::InvalidQuery(format!(
                "Invalid bucket: {}",
                bucket
            )));
        }
        validate_object_path(path)?;
        Ok(self.uploads_dir.join(bucket).join(path))
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn map_constraint(err: rusqlite::Error) -> BackendError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            BackendError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => BackendError::Sql(err),
    }
}

fn as_object(row: Value) -> BackendResult<Map<String, Value>> {
    match row {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::InvalidQuery(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

#[async_trait]
impl AuthService for LocalBackend {
    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Session> {
        let email = email.trim().to_lowercase();
        let found: Option<(String, String)> = {
            let conn = self.pool.get()?;
            conn.query_row(
                "SELECT id, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((user_id, hash)) = found else {
            return Err(BackendError::InvalidCredentials);
        };
        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            return Err(BackendError::InvalidCredentials);
        }

        let session = self.start_session(User {
            id: user_id,
            email: Some(email),
        })?;
        tracing::info!("Signed in {}", session.user.id);
        self.set_current(Some(session.clone())).await;
        self.events.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<Option<Session>> {
        let email = email.trim().to_lowercase();
        let Some((local_part, domain)) = email.split_once('@') else {
            return Err(BackendError::Api {
                status: 400,
                message: "Unable to validate email address: invalid format".into(),
            });
        };
        if local_part.is_empty() || domain.is_empty() {
            return Err(BackendError::Api {
                status: 400,
                message: "Unable to validate email address: invalid format".into(),
            });
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Api {
                status: 422,
                message: format!(
                    "Password should be at least {} characters",
                    MIN_PASSWORD_LEN
                ),
            });
        }

        let hash = bcrypt::hash(password, self.hash_cost).map_err(|e| BackendError::Api {
            status: 500,
            message: format!("Password hashing failed: {}", e),
        })?;
        let user_id = uuid::Uuid::now_v7().to_string();

        {
            let mut conn = self.pool.get()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password_hash) VALUES (?1, ?2, ?3)",
                params![user_id, email, hash],
            )
            .map_err(|e| match map_constraint(e) {
                BackendError::Conflict(_) => BackendError::Api {
                    status: 422,
                    message: "User already registered".into(),
                },
                other => other,
            })?;
            tx.execute(
                "INSERT INTO profiles (id, username) VALUES (?1, ?2)",
                params![user_id, local_part],
            )?;
            tx.commit()?;
        }
        tracing::info!("Registered user {}", user_id);

        self.sign_in(&email, password).await.map(Some)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let current = self.current.read().await.clone();
        if let Some(session) = current {
            let conn = self.pool.get()?;
            conn.execute(
                "DELETE FROM auth_sessions WHERE access_token = ?1",
                params![session.access_token],
            )?;
            tracing::info!("Signed out {}", session.user.id);
        }
        self.set_current(None).await;
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> BackendResult<Option<Session>> {
        let cached = self.current.read().await.clone();
        let candidate = match cached {
            Some(session) if !session.is_expired(Utc::now()) => return Ok(Some(session)),
            Some(session) => Some(session),
            None => self.store.as_ref().and_then(SessionStore::load),
        };

        match candidate {
            Some(session) => self.revalidate(session).await,
            None => Ok(None),
        }
    }

    fn subscribe(&self) -> AuthSubscription {
        self.events.subscribe()
    }
}

#[async_trait]
impl DataStore for LocalBackend {
    async fn select(&self, query: &Query) -> BackendResult<Vec<Value>> {
        let statement = sql::select(query)?;
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&statement.text)?;
        let rows: Vec<String> = stmt
            .query_map(params_from_iter(statement.params.iter()), |row| row.get(0))?
            .collect::<Result<_, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(BackendError::from))
            .collect()
    }

    async fn insert(&self, table: &str, row: Value) -> BackendResult<Vec<Value>> {
        let table = schema::table(table)?;
        let mut row = as_object(row)?;
        let user_id = self.current_user_id().await?;

        if row.get(table.owner).and_then(Value::as_str) != Some(user_id.as_str()) {
            tracing::warn!("Rejected insert into {} for another owner", table.name);
            return Err(BackendError::Unauthorized);
        }
        if table.generated_id && !row.contains_key("id") {
            row.insert("id".into(), Value::String(uuid::Uuid::now_v7().to_string()));
        }
        if table.has_column("created_at") && !row.contains_key("created_at") {
            row.insert("created_at".into(), Value::String(timestamp(Utc::now())));
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (name, value) in &row {
            let kind = table.column(name)?;
            columns.push(name.as_str());
            values.push(sql::to_sql(value, kind)?);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");

        let conn = self.pool.get()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.name,
                columns.join(", "),
                placeholders
            ),
            params_from_iter(values.iter()),
        )
        .map_err(map_constraint)?;

        let stored = Self::row_by_rowid(&conn, table, conn.last_insert_rowid())?;
        Ok(vec![stored])
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> BackendResult<Vec<Value>> {
        let table = schema::table(table)?;
        let patch = as_object(patch)?;
        let user_id = self.current_user_id().await?;

        if let Some(owner) = patch.get(table.owner) {
            if owner.as_str() != Some(user_id.as_str()) {
                return Err(BackendError::Unauthorized);
            }
        }
        let mut assignments = Vec::with_capacity(patch.len());
        let mut values = Vec::with_capacity(patch.len() + 1);
        for (name, value) in &patch {
            let kind = table.column(name)?;
            assignments.push(format!("{} = ?", name));
            values.push(sql::to_sql(value, kind)?);
        }
        if assignments.is_empty() {
            return Err(BackendError::InvalidQuery("Empty update".into()));
        }

        let mut scoped = filters.to_vec();
        scoped.push(Filter::eq(table.owner, user_id));
        let matching = sql::matching_rowids(table, &scoped)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let rowids: Vec<i64> = {
            let mut stmt = tx.prepare(&matching.text)?;
            let ids = stmt
                .query_map(params_from_iter(matching.params.iter()), |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            ids
        };

        let statement = format!(
            "UPDATE {} SET {} WHERE rowid = ?",
            table.name,
            assignments.join(", ")
        );
        let mut updated = Vec::with_capacity(rowids.len());
        for rowid in rowids {
            let mut bound = values.clone();
            bound.push(rusqlite::types::Value::Integer(rowid));
            tx.execute(&statement, params_from_iter(bound.iter()))
                .map_err(map_constraint)?;
            updated.push(Self::row_by_rowid(&tx, table, rowid)?);
        }
        tx.commit()?;

        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>> {
        let table = schema::table(table)?;
        let user_id = self.current_user_id().await?;

        let mut scoped = filters.to_vec();
        scoped.push(Filter::eq(table.owner, user_id));
        let matching = sql::matching_rowids(table, &scoped)?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let rowids: Vec<i64> = {
            let mut stmt = tx.prepare(&matching.text)?;
            let ids = stmt
                .query_map(params_from_iter(matching.params.iter()), |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            ids
        };

        let mut removed = Vec::with_capacity(rowids.len());
        for rowid in rowids {
            removed.push(Self::row_by_rowid(&tx, table, rowid)?);
            tx.execute(
                &format!("DELETE FROM {} WHERE rowid = ?1", table.name),
                params![rowid],
            )
            .map_err(map_constraint)?;
        }
        tx.commit()?;

        Ok(removed)
    }
}

#[async_trait]
impl ObjectStorage for LocalBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        options: &UploadOptions,
    ) -> BackendResult<()> {
        let target = self.object_path(bucket, path)?;
        let user_id = self.current_user_id().await?;

        // Objects live under a folder named after their owner
        if path.split('/').next() != Some(user_id.as_str()) {
            tracing::warn!("Rejected upload to {}/{} by {}", bucket, path, user_id);
            return Err(BackendError::Unauthorized);
        }
        if !options.upsert && tokio::fs::try_exists(&target).await? {
            return Err(BackendError::Conflict("The resource already exists".into()));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        tracing::debug!(
            "Stored {}/{} ({} bytes, cache-control max-age={})",
            bucket,
            path,
            bytes.len(),
            options.cache_control
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> BackendResult<String> {
        let target = self.object_path(bucket, path)?;
        let url = match &self.public_base_url {
            Some(base) => base
                .join(&format!("{}/{}", bucket, path))
                .map_err(|e| BackendError::InvalidQuery(e.to_string()))?,
            None => Url::from_file_path(&target).map_err(|_| {
                BackendError::InvalidQuery(format!(
                    "Uploads directory must be absolute: {}",
                    target.display()
                ))
            })?,
        };
        Ok(url.to_string())
    }
}
