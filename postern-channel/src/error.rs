//! Error types for channel operations

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while talking across the channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O error communicating with the socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame body could not be decoded
    #[error("Protocol error: {0}")]
    ProtocolDeserialization(#[from] bincode::error::DecodeError),

    /// Frame body could not be encoded
    #[error("Protocol error: {0}")]
    ProtocolSerialization(#[from] bincode::error::EncodeError),

    /// Length prefix exceeds the frame limit
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },

    /// Peer speaks a different protocol version
    #[error("Incompatible protocol version: peer={peer}, local={local}")]
    VersionMismatch { peer: u32, local: u32 },

    /// Server returned an error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Server answered with a payload the request does not expect
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Another live server already owns the socket
    #[error("Socket already in use by running instance: {}", .0.display())]
    SocketInUse(PathBuf),
}

impl ChannelError {
    /// Returns `true` if the peer could not be reached or stopped answering,
    /// as opposed to answering something invalid.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout | Self::SocketInUse(_)
        )
    }
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;
