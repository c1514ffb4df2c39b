//! Client for connecting to the resolver socket

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use postern_common::Resolution;
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::{
    CacheCommand, ChannelError, Request, RequestCommand, Response, ResponseData, ResponsePayload,
    Result, SystemCommand, frame,
    protocol::{CacheStatistics, SystemStatus},
};

/// Client for the channel server. Each request opens a fresh connection.
#[derive(Debug, Clone)]
pub struct ChannelClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl ChannelClient {
    /// Create a new channel client with the given socket path
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and receive a response
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Connection fails
    /// - Protocol error occurs
    /// - Request times out
    /// - Server returns an error
    pub async fn send_request(&self, request: Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.send_and_receive(request))
            .await
            .map_err(|_| ChannelError::Timeout)?
    }

    async fn send_and_receive(&self, request: Request) -> Result<Response> {
        debug!("Connecting to channel socket: {}", self.socket_path.display());
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        trace!("Sending request: {request:?}");
        frame::write(&mut stream, &request).await?;
        let response: Response = frame::read(&mut stream).await?;

        if !response.is_version_compatible() {
            return Err(ChannelError::VersionMismatch {
                peer: response.version,
                local: crate::PROTOCOL_VERSION,
            });
        }

        if let ResponsePayload::Error(err) = response.payload {
            return Err(ChannelError::ServerError(err));
        }

        Ok(response)
    }

    async fn data(&self, command: RequestCommand) -> Result<ResponseData> {
        match self.send_request(Request::new(command)).await?.payload {
            ResponsePayload::Data(data) => Ok(*data),
            other => Err(ChannelError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Ask the resolver for a verdict on a normalized address.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached or answers with
    /// anything other than a resolution.
    pub async fn resolve(&self, address: &str, hint: Option<&str>) -> Result<Resolution> {
        let command = RequestCommand::Resolve {
            address: address.to_string(),
            hint: hint.map(str::to_string),
        };
        match self.data(command).await? {
            ResponseData::Resolution(resolution) => Ok(resolution),
            other => Err(ChannelError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.send_request(Request::new(RequestCommand::System(SystemCommand::Ping)))
            .await
            .map(|_| ())
    }

    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached.
    pub async fn status(&self) -> Result<SystemStatus> {
        match self.data(RequestCommand::System(SystemCommand::Status)).await? {
            ResponseData::SystemStatus(status) => Ok(status),
            other => Err(ChannelError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Force a configuration reload, returning the generation now in effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached or the reload failed.
    pub async fn reload(&self) -> Result<u64> {
        match self.data(RequestCommand::System(SystemCommand::Reload)).await? {
            ResponseData::Reloaded { generation } => Ok(generation),
            other => Err(ChannelError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached.
    pub async fn cache_stats(&self) -> Result<CacheStatistics> {
        match self.data(RequestCommand::Cache(CacheCommand::Stats)).await? {
            ResponseData::CacheStats(stats) => Ok(stats),
            other => Err(ChannelError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the resolver cannot be reached.
    pub async fn cache_clear(&self) -> Result<()> {
        self.send_request(Request::new(RequestCommand::Cache(CacheCommand::Clear)))
            .await
            .map(|_| ())
    }
}
