//! Privilege-separation channel
//!
//! The network-facing listener runs unprivileged and cannot read users' home
//! directories. It forwards each normalized recipient over a Unix domain
//! socket to the privileged resolver, which answers with a verdict. The same
//! socket carries the administrative commands used by `posternctl`.
//!
//! Every request uses its own connection, so one requester can never observe
//! another's query. Frames are length-prefixed bincode.

pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use client::ChannelClient;
pub use error::{ChannelError, Result};
pub use protocol::{
    CacheCommand, MAX_FRAME_SIZE, PROTOCOL_VERSION, Request, RequestCommand, Response,
    ResponseData, ResponsePayload, SystemCommand,
};
pub use server::{ChannelServer, CommandHandler};

/// Default path for the resolver socket
pub const DEFAULT_CHANNEL_SOCKET: &str = "/run/postern/resolver.sock";
