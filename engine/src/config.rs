use serde::Deserialize;
use std::{
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "FEDLINK_CONFIG";

const fn default_ttl_secs() -> u64 {
    43_200
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_registry_refresh_ms() -> u64 {
    1_000
}

const fn default_num_rounds() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FedlinkConfig {
    /// TTL for messages created without an explicit one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Sleep between pulls in `send_and_receive` and between node polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the registry task refreshes available nodes.
    #[serde(default = "default_registry_refresh_ms")]
    pub registry_refresh_ms: u64,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for FedlinkConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            registry_refresh_ms: default_registry_refresh_ms(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl FedlinkConfig {
    /// Load from `$FEDLINK_CONFIG` or `~/.fedlink/config.toml`. A missing
    /// file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn registry_refresh(&self) -> Duration {
        Duration::from_millis(self.registry_refresh_ms)
    }
}

/// Round settings for the orchestrator loop.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_num_rounds")]
    pub num_rounds: u32,
    /// Seconds to wait for replies in each round; unset waits indefinitely.
    #[serde(default)]
    pub round_timeout_secs: Option<f64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_rounds: default_num_rounds(),
            round_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// `None` for an unset, negative or non-finite timeout.
    #[must_use]
    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "num_rounds={}, ", self.num_rounds)?;
        match self.round_timeout_secs {
            Some(secs) => write!(f, "round_timeout={secs}s"),
            None => f.write_str("no round_timeout"),
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".fedlink").join("config.toml"))
}
