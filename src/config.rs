//! Listener configuration

use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants::{DEFAULT_AMI_PORT, DEFAULT_AUTO_CLEAR_SECS};

/// Default status file path, relative to the working directory.
pub const DEFAULT_STATUS_FILE: &str = "data/CaCallstatus.dat";

/// Error returned when a configuration file exists but cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),
    /// Config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// PBX manager-interface connection settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PbxConfig {
    /// Hostname or address of the manager interface. Empty means unset.
    pub host: String,
    /// Manager interface TCP port.
    pub port: u16,
    /// Manager account name.
    pub username: String,
    /// Manager account secret.
    pub secret: String,
    /// Master switch; a disabled PBX puts the listener in demo mode.
    pub enabled: bool,
}

impl Default for PbxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_AMI_PORT,
            username: String::new(),
            secret: String::new(),
            enabled: false,
        }
    }
}

// Manual Debug so the secret never reaches a log line.
impl fmt::Debug for PbxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PbxConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Agent-side settings: which extension to watch and where to publish.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Extension whose calls are published. Empty matches nothing.
    pub extension: String,
    /// Path of the status file consumed by the CRM.
    pub status_file: PathBuf,
    /// Seconds before a written call record is cleared again.
    pub auto_clear_delay: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            extension: String::new(),
            status_file: PathBuf::from(DEFAULT_STATUS_FILE),
            auto_clear_delay: DEFAULT_AUTO_CLEAR_SECS,
        }
    }
}

impl AgentConfig {
    /// Effective auto-clear delay. Clamped to at least one second so a
    /// written record is observable before it disappears.
    pub fn clear_delay(&self) -> Duration {
        let secs = self
            .auto_clear_delay
            .max(1);
        Duration::from_secs(secs)
    }
}

/// Root configuration for one listener run.
///
/// The engine takes a snapshot by value at start; changing settings requires
/// a stop/start cycle.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// PBX connection settings.
    pub pbx: PbxConfig,
    /// Agent and publishing settings.
    pub agent: AgentConfig,
}

impl ListenerConfig {
    /// True when no usable PBX endpoint is configured and the engine should
    /// synthesize events instead of connecting.
    pub fn demo_mode(&self) -> bool {
        let pbx = &self.pbx;
        let host_unset = pbx
            .host
            .is_empty();
        !pbx.enabled || host_unset
    }

    /// Loads the config file at `path`, returning `ListenerConfig::default()`
    /// if the file does not exist. Returns an error if the file exists but
    /// cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
