//! Error types for the postern daemon.

use std::{io, net::SocketAddr};

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while binding or running the query listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configured address could not be bound.
    #[error("Failed to bind {protocol} listener on {address}: {source}")]
    Bind {
        protocol: &'static str,
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Neither a TCP nor a UDP address was configured.
    #[error("No listen address configured")]
    NothingToServe,
}

/// Errors raised while looking up accounts or giving up root.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    /// Empty, or cannot be passed to the system account database.
    #[error("Invalid account name: {0:?}")]
    InvalidName(String),

    #[error("Failed to look up {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: Errno,
    },

    /// Only root can switch to another account.
    #[error("Cannot switch to uid {target} while running as uid {current}")]
    NotPermitted { current: u32, target: u32 },

    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: Errno,
    },

    /// Root privileges could be regained after the switch.
    #[error("Privileges were not dropped permanently")]
    Regained,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_the_address() {
        let err = ListenerError::Bind {
            protocol: "tcp",
            address: "127.0.0.1:7025".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        let message = err.to_string();
        assert!(message.contains("tcp"));
        assert!(message.contains("127.0.0.1:7025"));
    }
}
