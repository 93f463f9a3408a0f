//! Configuration loading and management
//!
//! Handles parsing of `.nexapro.toml` configuration files. Lookup order for
//! [`Config::discover`]: an explicit path, `.nexapro.toml` in the working
//! directory, then `config.toml` in the platform config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reconcile::ReconcileMode;

pub const CONFIG_FILE_NAME: &str = ".nexapro.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Signed-in user
    #[serde(default)]
    pub session: SessionConfig,

    /// Store behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL every REST path is joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout; the transport default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: None,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub user_id: i64,

    #[serde(default = "default_user_name")]
    pub name: String,

    /// Role used for permission checks
    #[serde(default = "default_role")]
    pub role: String,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_user_name() -> String {
    "unknown".to_string()
}

fn default_role() -> String {
    "member".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            name: default_user_name(),
            role: default_role(),
            token: None,
        }
    }
}

/// Store synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How status is re-derived from progress on every read
    #[serde(default)]
    pub reconcile_mode: ReconcileMode,

    /// Keep provisional local entities when create cannot reach the gateway
    #[serde(default)]
    pub offline_fallback: bool,

    /// Post activity log entries for every mutation
    #[serde(default = "default_true")]
    pub activity_log: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_mode: ReconcileMode::default(),
            offline_fallback: false,
            activity_log: true,
        }
    }
}

/// Event bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast channel capacity before slow subscribers lag
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    crate::events::DEFAULT_CAPACITY
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a `.nexapro.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults when the file
    /// is missing. A present but invalid file is an error.
    pub fn load_from_dir(dir: &Path) -> crate::error::Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the configuration for the CLI.
    pub fn discover(explicit: Option<&Path>) -> crate::error::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let cwd = std::env::current_dir()?;
        if cwd.join(CONFIG_FILE_NAME).exists() {
            return Self::load_from_dir(&cwd);
        }
        match user_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.gateway.validate()?;
        self.session.validate()?;
        if self.events.capacity == 0 {
            return Err(crate::error::Error::InvalidConfig(
                "events.capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl GatewayConfig {
    fn validate(&self) -> crate::error::Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "gateway.base_url cannot be empty".to_string(),
            ));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(crate::error::Error::InvalidConfig(format!(
                "gateway.base_url '{base}' must start with http:// or https://"
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(crate::error::Error::InvalidConfig(
                "gateway.timeout_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl SessionConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.role.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "session.role cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `config.toml` under the platform config directory.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "nexapro")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
