use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::data::uploads::UploadTarget;
use crate::media::{CropRect, DisplaySize};
use crate::timeline::SortBy;

/// Overrides `[backend] anon_key`.
pub const ANON_KEY_ENV: &str = "METASOCIAL_ANON_KEY";

#[derive(Parser, Debug)]
#[command(name = "metasocial", about = "Metaverse social network client")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Backend to talk to
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Managed backend URL
    #[arg(long)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Create an account
    Signup {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign in with e-mail and password
    Login {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    Logout,
    /// Show the signed-in user
    Whoami,
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },
    /// Manage metaverse avatar profiles
    Avatars {
        #[command(subcommand)]
        action: AvatarCommand,
    },
    /// Show the post timeline
    Timeline {
        #[arg(long, default_value = "latest")]
        sort: SortBy,
        /// Only posts tagged with this metaverse
        #[arg(long)]
        tag: Option<String>,
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Like a post, or remove your like
    Like { post_id: String },
    /// Publish a post
    Post {
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Crop, upload and set a new profile picture
    UploadAvatar {
        file: PathBuf,
        /// Square crop as X,Y,SIZE in display pixels (default: centred square)
        #[arg(long)]
        crop: Option<CropRect>,
        /// Size the image is displayed at, WIDTHxHEIGHT (default: natural size)
        #[arg(long)]
        display: Option<DisplaySize>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ProfileCommand {
    /// Show a profile with its avatar profiles (default: your own)
    Show { id: Option<String> },
    /// Edit your profile
    Edit {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
    },
}

#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct AvatarFields {
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub service_url: Option<String>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub avatar_id: Option<String>,
    #[arg(long)]
    pub image_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum AvatarCommand {
    /// List avatar profiles (default: your own)
    List { user_id: Option<String> },
    Add {
        #[command(flatten)]
        fields: AvatarFields,
    },
    Update {
        id: String,
        #[command(flatten)]
        fields: AvatarFields,
    },
    Delete { id: String },
}

#[derive(Deserialize, ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded SQLite database and local uploads directory
    #[default]
    Local,
    /// Supabase-style managed backend
    Rest,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub local: LocalConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LocalConfig {
    pub database: Option<PathBuf>,
    pub uploads: Option<PathBuf>,
    pub public_base_url: Option<String>,
    pub session_hours: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub cache_control: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub persist: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            database: None,
            uploads: None,
            public_base_url: None,
            session_hours: 720,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let target = UploadTarget::default();
        Self {
            bucket: target.bucket,
            cache_control: target.cache_control,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        Self::load_with_env(cli, std::env::var(ANON_KEY_ENV).ok())
    }

    /// Load with an explicit value for the anon key environment variable.
    pub fn load_with_env(cli: &Cli, anon_key_env: Option<String>) -> anyhow::Result<Self> {
        // Stored objects are addressed by file:// URLs, which need absolute paths
        let data_dir = std::path::absolute(Self::data_dir(cli))?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI and environment overrides
        if let Some(kind) = cli.backend {
            config.backend.kind = kind;
        }
        if let Some(ref url) = cli.url {
            config.backend.url = Some(url.clone());
        }
        if let Some(key) = anon_key_env.filter(|k| !k.is_empty()) {
            config.backend.anon_key = Some(key);
        }

        // Resolve paths relative to data dir
        config.local.database = Some(resolve(
            &data_dir,
            config.local.database.take(),
            "metasocial.db",
        ));
        config.local.uploads = Some(resolve(&data_dir, config.local.uploads.take(), "uploads"));
        config.data_dir = data_dir;

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".metasocial")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.local
            .database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("metasocial.db"))
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.local
            .uploads
            .clone()
            .unwrap_or_else(|| self.data_dir.join("uploads"))
    }

    pub fn upload_target(&self) -> UploadTarget {
        UploadTarget {
            bucket: self.storage.bucket.clone(),
            cache_control: self.storage.cache_control.clone(),
        }
    }
}

fn resolve(data_dir: &Path, configured: Option<PathBuf>, default_name: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path,
        Some(path) => data_dir.join(path),
        None => data_dir.join(default_name),
    }
}
