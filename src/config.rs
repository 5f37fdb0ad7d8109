//! Rig configuration: which serial port drives the stimulus, how many
//! trials to run, and which controller family to poll.
//!
//! Missing files degrade to defaults so the binary can still start and
//! tell the operator what to fill in; validation rejects a configuration
//! that cannot identify the trigger port.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "PADLAG_CONFIG";

const CONFIG_DIR: &str = "padlag";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Controller family polled during a session. Families are never mixed
/// within one session.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PadFamily {
    #[default]
    Gamepad,
    SerialFrame,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct RigConfig {
    /// Serial port wired to the stimulus actuator.
    pub port: String,

    /// Number of trials per session.
    pub trial_count: u32,

    /// Which device family to poll.
    pub pad_family: PadFamily,

    /// Port of the rig-attached pad (serial-frame family only).
    pub pad_port: Option<String>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            trial_count: 10,
            pad_family: PadFamily::Gamepad,
            pad_port: None,
        }
    }
}

impl RigConfig {
    /// Resolve the config file location: env override, then the user
    /// config directory, then the working directory.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!(
                "No config file at {}, continuing with defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "trigger port is not set; list the available ports in the log \
                 and put one in the config file"
                    .to_string(),
            ));
        }

        if self.pad_family == PadFamily::SerialFrame
            && self
                .pad_port
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(ConfigError::Invalid(
                "pad_family = \"serial-frame\" requires pad_port".to_string(),
            ));
        }

        Ok(())
    }
}
