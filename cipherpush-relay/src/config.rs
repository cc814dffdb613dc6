//! Relay server configuration.

use cipherpush_core::CoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    /// SQLite database file. An empty path keeps everything in memory.
    pub storage_path: PathBuf,
    pub max_payload_size: usize,
    /// How long a notice request waits for its broadcast to finish.
    pub broadcast_timeout_secs: u64,
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8743".to_string(),
            storage_path: PathBuf::from("cipherpush.db"),
            max_payload_size: 65_536,
            broadcast_timeout_secs: 30,
            core: CoreConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.broadcast_timeout_secs)
    }

    pub fn in_memory(&self) -> bool {
        self.storage_path.as_os_str().is_empty()
    }
}
