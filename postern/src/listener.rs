//! Network-facing query listener
//!
//! Every TCP connection and every UDP datagram gets its own task. A request
//! moves through `Received → Validated → Resolving → Responded`, and is
//! answered exactly once: malformed input is rejected before the verdict
//! source is consulted, and a source that misses the deadline yields
//! `DEFER timeout`.

use std::{fmt, io, net::SocketAddr, sync::Arc, time::Duration};

use postern_common::{Address, Signal, incoming, internal, outgoing, verdict::reason};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::broadcast,
    task::JoinSet,
};
use tracing::{debug, error, warn};

use crate::{
    config::ServerConfig,
    error::ListenerError,
    source::VerdictSource,
    wire::{self, Reply},
};

/// Largest datagram read off the UDP socket
const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    Validated,
    Resolving,
    Responded,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Resolving => "resolving",
            Self::Responded => "responded",
        })
    }
}

/// Per-request logic shared by the TCP and UDP paths
struct Queries {
    source: Arc<dyn VerdictSource>,
    deadline: Duration,
    max_line_length: usize,
}

impl Queries {
    #[tracing::instrument(level = "debug", skip(self, raw), fields(source = self.source.name()))]
    async fn answer(&self, raw: &[u8], peer: SocketAddr) -> Reply {
        incoming!("{peer} [{}] {:?}", Phase::Received, String::from_utf8_lossy(raw));

        let reply = self.decide(raw, peer).await;

        outgoing!("{peer} [{}] {reply}", Phase::Responded);
        reply
    }

    async fn decide(&self, raw: &[u8], peer: SocketAddr) -> Reply {
        let query = match wire::parse_line(raw, self.max_line_length) {
            Ok(query) => query,
            Err(err) => return Reply::malformed(err),
        };

        // Case folding is left to the resolver, which owns that setting.
        let address = match Address::parse(query.address, true) {
            Ok(address) => address,
            Err(err) => return Reply::malformed(err),
        };
        let address = address.to_string();
        debug!("{peer} [{}] {address}", Phase::Validated);

        debug!("{peer} [{}] {address}", Phase::Resolving);
        match tokio::time::timeout(self.deadline, self.source.resolve(&address, query.hint)).await
        {
            Ok(resolution) => {
                debug!(
                    cache_hit = resolution.cache_hit,
                    generation = resolution.generation,
                    "{peer} {address}: {}",
                    resolution.verdict
                );
                Reply::from(&resolution.verdict)
            }
            Err(_) => {
                warn!(
                    "{peer} {address}: no verdict within {}ms",
                    self.deadline.as_millis()
                );
                Reply::Defer(reason::TIMEOUT.to_string())
            }
        }
    }
}

/// Bound TCP and UDP sockets, ready to serve
pub struct Listener {
    tcp: Option<TcpListener>,
    udp: Option<Arc<UdpSocket>>,
    queries: Arc<Queries>,
    idle_timeout: Duration,
}

impl Listener {
    /// Bind the configured addresses. Binding happens before privileges are
    /// dropped, so ports below 1024 work.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is configured or an address cannot be
    /// bound.
    pub async fn bind(
        config: &ServerConfig,
        source: Arc<dyn VerdictSource>,
    ) -> Result<Self, ListenerError> {
        if config.tcp_listen.is_none() && config.udp_listen.is_none() {
            return Err(ListenerError::NothingToServe);
        }

        let tcp = match config.tcp_listen {
            Some(address) => Some(TcpListener::bind(address).await.map_err(|source| {
                ListenerError::Bind {
                    protocol: "tcp",
                    address,
                    source,
                }
            })?),
            None => None,
        };

        let udp = match config.udp_listen {
            Some(address) => Some(Arc::new(UdpSocket::bind(address).await.map_err(
                |source| ListenerError::Bind {
                    protocol: "udp",
                    address,
                    source,
                },
            )?)),
            None => None,
        };

        let listener = Self {
            tcp,
            udp,
            queries: Arc::new(Queries {
                source,
                deadline: config.deadline(),
                max_line_length: config.max_line_length,
            }),
            idle_timeout: config.idle_timeout(),
        };

        if let Some(address) = listener.tcp_address() {
            internal!(level = INFO, "Query listener on tcp://{address}");
        }
        if let Some(address) = listener.udp_address() {
            internal!(level = INFO, "Query listener on udp://{address}");
        }

        Ok(listener)
    }

    pub fn tcp_address(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|tcp| tcp.local_addr().ok())
    }

    pub fn udp_address(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|udp| udp.local_addr().ok())
    }

    /// Serve until shutdown, then wait for in-flight requests.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept and receive failures are logged
    /// and the listener keeps going.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ListenerError> {
        let mut tasks = JoinSet::new();
        let mut datagram = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if let Err(err) = sig {
                        error!("Listener shutdown channel error: {err}");
                    }
                    internal!(
                        level = INFO,
                        "Query listener received shutdown signal, finishing {} request(s) ...",
                        tasks.len()
                    );
                    break;
                }

                connection = accept(self.tcp.as_ref()) => match connection {
                    Ok((stream, peer)) => {
                        debug!("Connection received from {peer}");
                        let queries = Arc::clone(&self.queries);
                        let idle_timeout = self.idle_timeout;
                        let shutdown = shutdown.resubscribe();
                        tasks.spawn(async move {
                            if let Err(err) = session(stream, peer, queries, idle_timeout, shutdown).await {
                                warn!("Session with {peer} ended: {err}");
                            }
                        });
                    }
                    Err(err) => error!("Error accepting connection: {err}"),
                },

                received = receive(self.udp.as_deref(), &mut datagram) => match received {
                    Ok((len, peer)) => {
                        let request = datagram[..len].to_vec();
                        let queries = Arc::clone(&self.queries);
                        if let Some(socket) = self.udp.as_ref().map(Arc::clone) {
                            tasks.spawn(async move {
                                let reply = queries.answer(&request, peer).await;
                                if let Err(err) = socket.send_to(&reply.to_line(), peer).await {
                                    warn!("Failed to answer datagram from {peer}: {err}");
                                }
                            });
                        }
                    }
                    Err(err) => error!("Error receiving datagram: {err}"),
                },

                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = finished {
                        error!("Query task failed: {err}");
                    }
                }
            }
        }

        while let Some(finished) = tasks.join_next().await {
            if let Err(err) = finished {
                error!("Query task failed: {err}");
            }
        }

        Ok(())
    }
}

async fn accept(tcp: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match tcp {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn receive(udp: Option<&UdpSocket>, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
    match udp {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// One TCP connection: any number of request lines, one reply each.
async fn session(
    stream: TcpStream,
    peer: SocketAddr,
    queries: Arc<Queries>,
    idle_timeout: Duration,
    mut shutdown: broadcast::Receiver<Signal>,
) -> Result<(), ListenerError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    // Room for the longest line plus CRLF; anything longer is cut off and rejected.
    let limit = queries.max_line_length.saturating_add(2);
    let mut line = Vec::with_capacity(256);

    loop {
        line.clear();
        let mut bounded = (&mut reader).take(u64::try_from(limit).unwrap_or(u64::MAX));

        let read = tokio::select! {
            read = tokio::time::timeout(idle_timeout, bounded.read_until(b'\n', &mut line)) => read,
            _ = shutdown.recv() => {
                debug!("Closing connection from {peer} for shutdown");
                return Ok(());
            }
        };

        let Ok(read) = read else {
            debug!("Closing idle connection from {peer}");
            return Ok(());
        };
        let read = read?;
        if read == 0 {
            return Ok(());
        }

        let complete = line.ends_with(b"\n");
        let reply = queries.answer(&line, peer).await;
        writer.write_all(&reply.to_line()).await?;

        if complete {
            continue;
        }
        // The peer closed mid-line.
        if read < limit {
            return Ok(());
        }
        match tokio::time::timeout(idle_timeout, skip_line(&mut reader)).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Err(_) => return Ok(()),
            Ok(Err(err)) => return Err(err.into()),
        }
    }
}

/// Discard input up to and including the next LF. Returns `false` on EOF.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<bool> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        if let Some(end) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(end + 1);
            return Ok(true);
        }
        let len = buf.len();
        reader.consume(len);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use async_trait::async_trait;
    use postern_common::{Resolution, Verdict};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Deliverable for `example.com`, slow for `slow.example`
    struct Fixed;

    #[async_trait]
    impl VerdictSource for Fixed {
        async fn resolve(&self, address: &str, hint: Option<&str>) -> Resolution {
            if address.ends_with("@slow.example") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let verdict = match (address.ends_with("@example.com"), hint) {
                (true, None) => Verdict::deliverable(),
                (true, Some(hint)) => Verdict::deliverable().with_note(hint),
                (false, _) => Verdict::undeliverable().with_note("no such user"),
            };
            Resolution {
                verdict,
                cache_hit: false,
                generation: 1,
            }
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn queries() -> Queries {
        Queries {
            source: Arc::new(Fixed),
            deadline: Duration::from_millis(100),
            max_line_length: 64,
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn test_answers() {
        let queries = queries();

        assert_eq!(
            queries.answer(b"<Alice@Example.COM>\r\n", peer()).await,
            Reply::Ok(None)
        );
        assert_eq!(
            queries.answer(b"alice@example.com hub-b\n", peer()).await,
            Reply::Ok(Some("hub-b".to_string()))
        );
        assert_eq!(
            queries.answer(b"alice@example.net\n", peer()).await,
            Reply::No(Some("no such user".to_string()))
        );
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let queries = queries();

        assert_eq!(
            queries.answer(b"no-at-sign\n", peer()).await,
            Reply::malformed("missing '@' delimiter")
        );
        assert_eq!(
            queries.answer(b"\n", peer()).await,
            Reply::malformed("empty request")
        );

        let long = format!("{}@example.com\n", "a".repeat(80));
        assert_eq!(
            queries.answer(long.as_bytes(), peer()).await,
            Reply::malformed("request exceeds 64 bytes")
        );
    }

    #[tokio::test]
    async fn test_deadline_defers() {
        assert_eq!(
            queries().answer(b"bob@slow.example\n", peer()).await,
            Reply::Defer("timeout".to_string())
        );
    }

    #[tokio::test]
    async fn test_skip_line() {
        let mut reader = BufReader::new(&b"rest of a long line\nnext\n"[..]);
        assert!(skip_line(&mut reader).await.unwrap());

        let mut next = String::new();
        reader.read_line(&mut next).await.unwrap();
        assert_eq!(next, "next\n");

        assert!(!skip_line(&mut reader).await.unwrap());
    }
}
