//! Engine settings.
//!
//! Layered via the `config` crate: defaults, then an optional settings
//! file, then `TRACECAP_*` environment variables (double underscore for
//! nesting, e.g. `TRACECAP_INGEST__ENDPOINT`).

use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::utils::errors::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding the metadata database and blob files.
    pub root_dir: PathBuf,
    pub database_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./tracecap-data"),
            database_file: "tasks.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Root for per-session archive folders.
    pub root_dir: PathBuf,
    pub folder_name: String,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            folder_name: "event-capture-archives".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt, capped at 30s.
    pub retry_base_ms: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8089".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub enabled: bool,
    /// Timeslice between recorder chunks.
    pub chunk_ms: u64,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageSettings,
    pub archive: ArchiveSettings,
    pub ingest: IngestSettings,
    pub video: VideoSettings,
    /// Capture rule file, read fresh on every session start.
    pub capture_config_path: Option<PathBuf>,
}

impl EngineConfig {
    /// Loads settings, file then environment on top of defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::new(path, FileFormat::Json).required(false));
        }
        let cfg = builder
            .add_source(Environment::with_prefix("TRACECAP").separator("__"))
            .build()
            .map_err(|e| EngineError::ConfigError(format!("settings build: {e}")))?;
        cfg.try_deserialize()
            .map_err(|e| EngineError::ConfigError(format!("settings shape: {e}")))
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage.root_dir.join(&self.storage.database_file)
    }

    pub fn archive_root(&self) -> PathBuf {
        self.archive.root_dir.join(&self.archive.folder_name)
    }
}
