//! Configuration reading.
//!
//! `assistant_config.json` in the data directory, written by whoever
//! installs the core (settings UI, provisioning script). Read once at
//! startup; the controller treats every field as immutable.

pub mod paths;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Base URL of the assistant backend service.
    pub endpoint: String,
    /// Ask the backend to synthesize spoken replies for text input.
    pub voice_response: bool,
    /// Reply playback volume, 0.0..=1.0.
    pub volume: f64,
    /// Named input device; `None` uses the system default.
    pub input_device: Option<String>,
    /// Deadline for one backend round trip.
    pub request_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".to_string(),
            voice_response: true,
            volume: 0.8,
            input_device: None,
            request_timeout_secs: 30,
        }
    }
}

/// Read the config from the default location, falling back to defaults.
pub fn read_config() -> AssistantConfig {
    read_config_from(&config_path())
}

pub fn config_path() -> PathBuf {
    paths::data_dir().join("assistant_config.json")
}

/// Read and parse a config file. Missing file or bad JSON both fall back
/// to defaults; a broken config must not keep the assistant from coming
/// up.
pub fn read_config_from(path: &Path) -> AssistantConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!("failed to parse {}: {}", path.display(), e);
                AssistantConfig::default()
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to read {}: {}", path.display(), e);
            }
            AssistantConfig::default()
        }
    }
}
