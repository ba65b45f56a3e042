pub mod api;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mcp;
pub mod media;
pub mod store;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use api::GenerationClient;
use db::Db;
use jobs::Generator;
use media::MediaResolver;
use store::GenerationStore;

// ---------------------------------------------------------------------------
// Settings: {dataDir}/settings.json, then environment overrides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_api_url")]
    #[serde(alias = "baseURL")]
    pub api_url: String,
    /// Session token sent as a bearer credential.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Signed-in user; generation is refused without one.
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default)]
    pub cdn_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Posts database shared with the generation worker. Defaults to
    /// `{dataDir}/genpost.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_gateway_url() -> String {
    "https://ipfs.io/ipfs".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_token: None,
            author_id: None,
            gateway_url: default_gateway_url(),
            cdn_url: None,
            request_timeout_secs: default_timeout_secs(),
            database_path: None,
        }
    }
}

impl Settings {
    /// Load `{data_dir}/settings.json` (missing or invalid → defaults), then
    /// apply `GENPOST_*` environment variables, including any from `.env`.
    pub fn load(data_dir: &Path) -> Self {
        dotenvy::dotenv().ok();
        let mut settings = Self::from_file(&data_dir.join("settings.json"));
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    fn from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "ignoring invalid settings file: {e}");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = var("GENPOST_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = var("GENPOST_API_TOKEN") {
            self.api_token = Some(v);
        }
        if let Some(v) = var("GENPOST_AUTHOR") {
            self.author_id = Some(v);
        }
        if let Some(v) = var("GENPOST_GATEWAY_URL") {
            self.gateway_url = v;
        }
        if let Some(v) = var("GENPOST_CDN_URL") {
            self.cdn_url = Some(v);
        }
        if let Some(v) = var("GENPOST_DB_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(secs) = var("GENPOST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| data_dir.join("genpost.db"))
    }

    pub fn media_resolver(&self) -> MediaResolver {
        MediaResolver::new(&self.gateway_url, self.cdn_url.as_deref())
    }
}

/// Resolve the data directory cross-platform: `{data_dir}/genpost`, or
/// `GENPOST_DATA_DIR` when set.
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("GENPOST_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let data = dirs::data_dir().context("could not determine data directory")?;
    Ok(data.join("genpost"))
}

/// Wire the HTTP client, posts database and in-flight store into a
/// [`Generator`].
pub fn build_generator(settings: &Settings, data_dir: &Path) -> Result<Generator> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let db_path = settings.database_path(data_dir);
    let db = Db::open(&db_path).context("failed to open database")?;
    info!(db = %db_path.display(), "opened posts database");

    let client = GenerationClient::new(
        &settings.api_url,
        settings.api_token.clone(),
        Duration::from_secs(settings.request_timeout_secs),
    )
    .context("failed to create HTTP client")?;
    info!(api_url = %client.base_url(), author = ?settings.author_id, "loaded settings");

    Ok(Generator::new(
        Arc::new(client),
        db.into_shared(),
        GenerationStore::new(),
        settings.author_id.clone(),
    ))
}
