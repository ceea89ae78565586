use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use coursetrack_core::DEFAULT_UNDO_LIMIT;
use coursetrack_store_sqlite::{SessionConfig, DEFAULT_QUOTA_BYTES};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

/// Optional `<data-dir>/config.json`. Every field has a default, so a
/// partial file is fine; a malformed one is a startup error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub autosave_delay_ms: u64,
    pub undo_limit: usize,
    pub storage_quota_bytes: usize,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            autosave_delay_ms: 1000,
            undo_limit: DEFAULT_UNDO_LIMIT,
            storage_quota_bytes: DEFAULT_QUOTA_BYTES,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            autosave_delay: Duration::from_millis(self.autosave_delay_ms),
            undo_limit: self.undo_limit,
        }
    }
}
