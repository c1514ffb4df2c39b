//! Daemon configuration, read from `postern.config.ron`
//!
//! ```ron
//! (
//!     resolver: (
//!         control_dir: "/var/qmail/control",
//!         users: [Assign(path: "/var/qmail/users/assign")],
//!     ),
//!     channel: (
//!         socket_path: "/run/postern/resolver.sock",
//!         mode: 0o660,
//!         group: Some("postern"),
//!     ),
//!     server: (
//!         tcp_listen: Some("127.0.0.1:7025"),
//!         udp_listen: Some("127.0.0.1:7025"),
//!         user: Some("postern"),
//!     ),
//! )
//! ```

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use postern_resolver::{ConfigError, ResolverConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Postern {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// The Unix socket between listener and resolver
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "defaults::socket_path")]
    pub socket_path: PathBuf,

    /// Permission bits of the socket file.
    ///
    /// Default: `0o660`
    #[serde(default = "defaults::socket_mode")]
    pub mode: u32,

    /// Group owning the socket; the listener's account must belong to it.
    #[serde(default)]
    pub group: Option<String>,

    /// How long the listener waits for one channel exchange.
    ///
    /// Default: 5000 milliseconds
    #[serde(default = "defaults::channel_timeout_ms")]
    pub timeout_ms: u64,
}

/// Where the listener obtains verdicts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum VerdictSourceConfig {
    /// Ask the privileged `postern-resolver` process.
    #[default]
    Channel,
    /// Resolve inside the listener. It then needs read access to every home
    /// directory.
    InProcess,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::tcp_listen")]
    pub tcp_listen: Option<SocketAddr>,

    #[serde(default)]
    pub udp_listen: Option<SocketAddr>,

    /// Budget for answering one request.
    ///
    /// Default: 3000 milliseconds
    #[serde(default = "defaults::deadline_ms")]
    pub deadline_ms: u64,

    /// TCP connections without a request for this long are closed.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Longest accepted request line, terminator excluded.
    ///
    /// Default: 1024 bytes
    #[serde(default = "defaults::max_line_length")]
    pub max_line_length: usize,

    /// Account the listener switches to once its sockets are bound.
    #[serde(default)]
    pub user: Option<String>,

    /// Group to switch to, instead of the account's primary group.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub verdicts: VerdictSourceConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            socket_path: defaults::socket_path(),
            mode: defaults::socket_mode(),
            group: None,
            timeout_ms: defaults::channel_timeout_ms(),
        }
    }
}

impl ChannelConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_listen: defaults::tcp_listen(),
            udp_listen: None,
            deadline_ms: defaults::deadline_ms(),
            idle_timeout_secs: defaults::idle_timeout_secs(),
            max_line_length: defaults::max_line_length(),
            user: None,
            group: None,
            verdicts: VerdictSourceConfig::default(),
        }
    }
}

impl ServerConfig {
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Postern {
    /// Read the configuration file found by [`find_config_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if no file is found or it cannot be parsed.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = find_config_file()?;
        let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config from {}: {}",
                config_path.display(),
                e
            )
        })?;

        ron::from_str(&config_content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", config_path.display()))
    }

    /// Check settings that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolver.validate()?;

        if self.server.tcp_listen.is_none() && self.server.udp_listen.is_none() {
            return Err(ConfigError::InvalidSetting {
                field: "server.tcp_listen",
                reason: "at least one of tcp_listen and udp_listen is required".to_string(),
            });
        }
        if self.server.deadline_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "server.deadline_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.server.idle_timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "server.idle_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.server.max_line_length == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "server.max_line_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.channel.mode > 0o777 {
            return Err(ConfigError::InvalidSetting {
                field: "channel.mode",
                reason: format!("{:o} is not a permission mode", self.channel.mode),
            });
        }

        Ok(())
    }
}

/// Find the configuration file using the following precedence:
/// 1. `POSTERN_CONFIG` environment variable
/// 2. ./postern.config.ron (current working directory)
/// 3. /etc/postern/postern.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if `POSTERN_CONFIG` names a missing file or no candidate
/// exists.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("POSTERN_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "POSTERN_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./postern.config.ron"),
        PathBuf::from("/etc/postern/postern.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - POSTERN_CONFIG environment variable\n{paths_tried}"
    )
}

mod defaults {
    use std::{net::SocketAddr, path::PathBuf};

    pub fn socket_path() -> PathBuf {
        PathBuf::from(postern_channel::DEFAULT_CHANNEL_SOCKET)
    }

    pub const fn socket_mode() -> u32 {
        0o660
    }

    pub const fn channel_timeout_ms() -> u64 {
        5000
    }

    pub fn tcp_listen() -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], 7025)))
    }

    pub const fn deadline_ms() -> u64 {
        3000
    }

    pub const fn idle_timeout_secs() -> u64 {
        30
    }

    pub const fn max_line_length() -> usize {
        1024
    }
}
