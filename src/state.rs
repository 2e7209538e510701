use std::sync::Arc;

use anyhow::Context;
use url::Url;

use crate::auth::SessionStore;
use crate::backend::local::LocalBackend;
use crate::backend::rest::RestBackend;
use crate::backend::{AuthService, DataStore, ObjectStorage};
use crate::config::{BackendKind, Config};

/// Backend handles shared by every command, all pointing at one adapter.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub auth: Arc<dyn AuthService>,
    pub db: Arc<dyn DataStore>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl AppState {
    pub fn with_backend<B>(config: Config, backend: Arc<B>) -> Self
    where
        B: AuthService + DataStore + ObjectStorage + 'static,
    {
        Self {
            config,
            auth: backend.clone(),
            db: backend.clone(),
            storage: backend,
        }
    }

    /// Open the backend selected by the configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = config
            .session
            .persist
            .then(|| SessionStore::in_dir(&config.data_dir));

        match config.backend.kind {
            BackendKind::Local => {
                let db_path = config.db_path();
                let mut backend = LocalBackend::open(&db_path, config.uploads_path())
                    .with_context(|| format!("Failed to open database {}", db_path.display()))?
                    .with_session_hours(config.local.session_hours);
                if let Some(ref base) = config.local.public_base_url {
                    let base = Url::parse(base).context("Invalid [local] public_base_url")?;
                    backend = backend.with_public_base_url(base);
                }
                if let Some(store) = store {
                    backend = backend.with_session_store(store);
                }
                tracing::info!("Using local backend at {}", db_path.display());
                Ok(Self::with_backend(config, Arc::new(backend)))
            }
            BackendKind::Rest => {
                let url = config
                    .backend
                    .url
                    .as_deref()
                    .context("The rest backend needs [backend] url or --url")?;
                let url = Url::parse(url).context("Invalid backend url")?;
                let anon_key = config.backend.anon_key.clone().with_context(|| {
                    format!(
                        "The rest backend needs [backend] anon_key or {}",
                        crate::config::ANON_KEY_ENV
                    )
                })?;
                tracing::info!("Using managed backend at {}", url);
                let mut backend = RestBackend::new(url, anon_key);
                if let Some(store) = store {
                    backend = backend.with_session_store(store);
                }
                Ok(Self::with_backend(config, Arc::new(backend)))
            }
        }
    }
}
