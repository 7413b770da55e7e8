//! Relay configuration.
//!
//! Values are layered in increasing precedence: built-in defaults, an
//! optional TOML file, then overrides collected from the environment and
//! the command line.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use relay_protocol::DEFAULT_MAX_FRAME_LEN;

use crate::registry::DEFAULT_MAX_SESSIONS;
use crate::server::SessionOptions;

/// Default listen address (all interfaces)
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default TCP port
pub const DEFAULT_PORT: u16 = 4000;

/// Smallest accepted frame limit
pub const MIN_FRAME_LEN: usize = 16;

/// Relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address to listen on
    pub bind_address: String,

    /// TCP port to listen on (0 picks a free port)
    pub port: u16,

    /// Maximum number of admitted clients
    pub max_clients: usize,

    /// Seconds of silence before a client is disconnected (0 = never)
    pub idle_timeout_secs: u64,

    /// Longest accepted inbound line in bytes
    pub max_frame_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_SESSIONS,
            idle_timeout_secs: 0,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Values taken from the environment or command line.
///
/// `None` leaves the underlying value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub max_clients: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
    pub max_frame_len: Option<usize>,
}

impl RelayConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default file is optional and
    /// built-in defaults apply when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No configuration file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Parses a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// `<config_dir>/chat-relay/relayd.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chat-relay").join("relayd.toml"))
    }

    /// Applies overrides on top of the current values.
    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(bind_address) = overrides.bind_address {
            self.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(max_clients) = overrides.max_clients {
            self.max_clients = max_clients;
        }
        if let Some(idle_timeout_secs) = overrides.idle_timeout_secs {
            self.idle_timeout_secs = idle_timeout_secs;
        }
        if let Some(max_frame_len) = overrides.max_frame_len {
            self.max_frame_len = max_frame_len;
        }
        self
    }

    /// Checks that the values can run a relay.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.max_frame_len < MIN_FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "max_frame_len must be at least {MIN_FRAME_LEN}"
            )));
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Address the listener binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Idle limit, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Per-connection limits derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            idle_timeout: self.idle_timeout(),
            max_frame_len: self.max_frame_len,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
