//! Channel protocol types

use std::fmt::{Display, Formatter};

use chrono::{TimeZone, Utc, offset::LocalResult};
use postern_common::Resolution;
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body either side will accept (64 KiB)
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Format timestamp (milliseconds since epoch) as human-readable
fn format_timestamp(timestamp_ms: u64) -> String {
    let datetime = Utc.timestamp_millis_opt(i64::try_from(timestamp_ms).unwrap_or(0));
    if let LocalResult::Single(dt) = datetime {
        dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    } else {
        "unknown".to_string()
    }
}

/// Request sent to the resolver (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// The actual command to execute
    pub command: RequestCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    /// Decide deliverability for one recipient
    Resolve {
        /// Normalized `local-part@domain`
        address: String,
        /// Optional hosting context
        hint: Option<String>,
    },
    /// System management commands
    System(SystemCommand),
    /// Query cache management commands
    Cache(CacheCommand),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Uptime, configuration generation and cache statistics
    Status,
    /// Re-read the delivery configuration now
    Reload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheCommand {
    Stats,
    Clear,
}

/// Response from the resolver (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// Verdict for a `Resolve` request
    Resolution(Resolution),
    /// System status information
    SystemStatus(SystemStatus),
    /// Query cache statistics
    CacheStats(CacheStatistics),
    /// Generation now in effect after a reload
    Reloaded { generation: u64 },
    /// Simple string message
    Message(String),
}

/// System status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Server version
    pub version: String,
    /// Start time (milliseconds since epoch)
    pub started_at_ms: u64,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Current configuration generation
    pub generation: u64,
    /// Configured hosting contexts besides the default
    pub tenants: Vec<String>,
    pub cache: CacheStatistics,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:     {}", self.version)?;
        writeln!(
            f,
            "Started:     {} (up {}s)",
            format_timestamp(self.started_at_ms),
            self.uptime_secs
        )?;
        writeln!(f, "Generation:  {}", self.generation)?;
        if !self.tenants.is_empty() {
            writeln!(f, "Contexts:    {}", self.tenants.join(", "))?;
        }
        write!(f, "{}", self.cache)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStatistics {
    /// Fraction of lookups served from the cache
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl Display for CacheStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache:       {}/{} entries", self.entries, self.capacity)?;
        write!(
            f,
            "Lookups:     {} hits, {} misses ({:.1}% hit rate)",
            self.hits,
            self.misses,
            self.hit_ratio() * 100.0
        )
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            command,
        }
    }

    #[must_use]
    pub fn resolve(address: impl Into<String>, hint: Option<String>) -> Self {
        Self::new(RequestCommand::Resolve {
            address: address.into(),
            hint,
        })
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}
