//! The postern daemon
//!
//! Two processes share one configuration file:
//!
//! - `postern` listens for queries over TCP and UDP, drops to an
//!   unprivileged account, and forwards each validated recipient over the
//!   channel socket.
//! - `postern-resolver` keeps root's view of the user database and home
//!   directories, and answers over that socket.
//!
//! Deployments that do not need the split can resolve in process instead.

pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod listener;
pub mod privilege;
pub mod source;
pub mod wire;

pub use self::{
    config::{ChannelConfig, Postern, ServerConfig, VerdictSourceConfig},
    controller::SHUTDOWN_BROADCAST,
    error::{ListenerError, PrivilegeError},
    handler::ResolverHandler,
    listener::Listener,
    source::VerdictSource,
    wire::Reply,
};
