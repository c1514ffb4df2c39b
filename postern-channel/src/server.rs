//! Channel server, run by the privileged resolver

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use postern_common::{Signal, internal};
use tokio::{
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, trace, warn};

use crate::{ChannelError, Request, Response, Result, frame};

/// Handler trait for processing channel requests
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request and return a response
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be processed
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// Unix domain socket server answering verdict and control requests
pub struct ChannelServer {
    socket_path: PathBuf,
    handler: Arc<dyn CommandHandler>,
    mode: u32,
    group: Option<u32>,
    timeout: Duration,
}

impl ChannelServer {
    /// Create a new channel server. The socket is created with mode `0600`
    /// unless [`ChannelServer::with_mode`] says otherwise.
    pub fn new(socket_path: impl Into<PathBuf>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            socket_path: socket_path.into(),
            handler,
            mode: 0o600,
            group: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Permission bits applied to the socket after binding
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Group that owns the socket, so the unprivileged listener can connect
    #[must_use]
    pub const fn with_group(mut self, gid: Option<u32>) -> Self {
        self.group = gid;
        self
    }

    /// Per-connection read/write timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and serve until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another live server already owns the socket
    /// - The socket cannot be bound or its ownership set
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let listener = self.bind().await?;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = Arc::clone(&self.handler);
                            let timeout = self.timeout;
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler, timeout).await {
                                    warn!("Error handling channel connection: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting channel connection: {e}");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            info!("Channel server shutting down");
                            break;
                        }
                        Err(e) => {
                            error!("Channel server shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        if self.socket_path.exists() {
            debug!("Removing socket file: {}", self.socket_path.display());
            let _ = tokio::fs::remove_file(&self.socket_path).await;
        }

        Ok(())
    }

    async fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(ChannelError::SocketInUse(self.socket_path.clone()));
            }
            // Left behind by a process that did not shut down cleanly.
            info!("Removing stale socket file: {}", self.socket_path.display());
            tokio::fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        if let Some(gid) = self.group {
            std::os::unix::fs::chown(&self.socket_path, None, Some(gid))?;
        }
        tokio::fs::set_permissions(
            &self.socket_path,
            std::fs::Permissions::from_mode(self.mode),
        )
        .await?;

        internal!(
            level = INFO,
            "Channel socket listening on {} (mode {:o})",
            self.socket_path.display(),
            self.mode
        );

        Ok(listener)
    }

    /// Handle a single client connection: one request, one response
    async fn handle_connection(
        mut stream: UnixStream,
        handler: Arc<dyn CommandHandler>,
        timeout: Duration,
    ) -> Result<()> {
        if let Ok(cred) = stream.peer_cred() {
            trace!("Channel peer uid={} gid={}", cred.uid(), cred.gid());
        }

        let request = tokio::time::timeout(timeout, frame::read::<Request, _>(&mut stream))
            .await
            .map_err(|_| ChannelError::Timeout)?;

        let response = match request {
            Ok(request) if !request.is_version_compatible() => {
                warn!(
                    "Rejecting request with protocol version {}",
                    request.version
                );
                Response::error(
                    ChannelError::VersionMismatch {
                        peer: request.version,
                        local: crate::PROTOCOL_VERSION,
                    }
                    .to_string(),
                )
            }
            Ok(request) => {
                trace!("Received request: {request:?}");
                match handler.handle_request(request).await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Error handling request: {e}");
                        Response::error(e.to_string())
                    }
                }
            }
            Err(ChannelError::ConnectionClosed) => return Ok(()),
            Err(e @ (ChannelError::ProtocolDeserialization(_) | ChannelError::FrameTooLarge { .. })) => {
                warn!("Rejecting malformed frame: {e}");
                Response::error(e.to_string())
            }
            Err(e) => return Err(e),
        };

        trace!("Sending response: {response:?}");

        tokio::time::timeout(timeout, frame::write(&mut stream, &response))
            .await
            .map_err(|_| ChannelError::Timeout)??;

        Ok(())
    }
}
