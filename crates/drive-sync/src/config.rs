//! Configuration loading and management

use std::path::Path;

use anyhow::{Context, Result};
use drive_sync_core::orchestrator::{OrchestratorOptions, DEFAULT_ROOT_FOLDER_NAME};
use drive_sync_core::reconciler::{SyncOptions, DEFAULT_TOLERANCE_MS};
use serde::{Deserialize, Serialize};

use crate::drive::{DriveEndpoints, DEFAULT_REDIRECT_URI};

/// Config file name within the config directory
pub const CONFIG_FILE: &str = "config.json";

/// Main configuration for a synced vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// OAuth client ID from the Google Cloud console
    #[serde(default)]
    pub client_id: String,

    /// OAuth client secret
    #[serde(default)]
    pub client_secret: String,

    /// Redirect URI registered for the OAuth client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Name of the top-level Drive folder created on first sync
    #[serde(default = "default_root_folder_name")]
    pub root_folder_name: String,

    /// Timestamp differences up to this many milliseconds count as equal
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: i64,

    /// Watch mode configuration
    #[serde(default)]
    pub watch: WatchConfig,

    /// Drive and OAuth endpoints
    #[serde(default)]
    pub endpoints: DriveEndpoints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    /// Quiet period before local changes trigger a sync
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Periodic sync interval, picking up remote changes (0 disables)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_root_folder_name() -> String {
    DEFAULT_ROOT_FOLDER_NAME.to_string()
}

fn default_tolerance_ms() -> i64 {
    DEFAULT_TOLERANCE_MS
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_interval_secs() -> u64 {
    300 // 5 minutes
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            root_folder_name: default_root_folder_name(),
            tolerance_ms: default_tolerance_ms(),
            watch: WatchConfig::default(),
            endpoints: DriveEndpoints::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {:?}", config_file))?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_file
            );
            let config = Config::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    /// Both OAuth client fields are set
    pub fn has_client(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            sync: SyncOptions {
                tolerance_ms: self.tolerance_ms,
            },
            root_folder_name: self.root_folder_name.clone(),
        }
    }
}
