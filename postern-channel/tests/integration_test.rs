//! Integration tests for channel client/server communication
//!
//! These tests run a real server on a temporary Unix socket and verify the
//! full request/response cycle, including malformed frames and stale sockets.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{
    os::unix::fs::PermissionsExt,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use postern_channel::{
    CacheCommand, ChannelClient, ChannelError, ChannelServer, CommandHandler, Request,
    RequestCommand, Response, ResponseData, Result, SystemCommand,
    protocol::{CacheStatistics, SystemStatus},
};
use postern_common::{Resolution, Signal, Verdict};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::broadcast,
};

/// Mock command handler: every address at `example.com` is deliverable
#[derive(Default)]
struct MockHandler {
    generation: AtomicU64,
}

#[async_trait]
impl CommandHandler for MockHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        let generation = self.generation.load(Ordering::SeqCst);
        Ok(match request.command {
            RequestCommand::Resolve { address, hint } => {
                if hint.as_deref() == Some("slow") {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                let verdict = if address.ends_with("@example.com") {
                    Verdict::deliverable()
                } else {
                    Verdict::undeliverable()
                };
                Response::data(ResponseData::Resolution(Resolution {
                    verdict,
                    cache_hit: false,
                    generation,
                }))
            }
            RequestCommand::System(SystemCommand::Ping) => Response::ok(),
            RequestCommand::System(SystemCommand::Status) => {
                Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: "test".to_string(),
                    started_at_ms: 0,
                    uptime_secs: 1,
                    generation,
                    tenants: Vec::new(),
                    cache: CacheStatistics::default(),
                }))
            }
            RequestCommand::System(SystemCommand::Reload) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                Response::data(ResponseData::Reloaded { generation })
            }
            RequestCommand::Cache(CacheCommand::Stats) => {
                Response::data(ResponseData::CacheStats(CacheStatistics {
                    entries: 2,
                    capacity: 8,
                    hits: 5,
                    misses: 2,
                }))
            }
            RequestCommand::Cache(CacheCommand::Clear) => Response::error("cache is read-only"),
        })
    }
}

struct Running {
    _dir: TempDir,
    client: ChannelClient,
    shutdown: broadcast::Sender<Signal>,
    server: tokio::task::JoinHandle<Result<()>>,
    socket: std::path::PathBuf,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("resolver.sock");
    let (shutdown, rx) = broadcast::channel(4);

    let server = ChannelServer::new(&socket, Arc::new(MockHandler::default())).with_mode(0o660);
    let server = tokio::spawn(async move { server.serve(rx).await });
    wait_for_socket(&socket).await;

    Running {
        client: ChannelClient::new(&socket).with_timeout(Duration::from_secs(2)),
        _dir: dir,
        shutdown,
        server,
        socket,
    }
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if UnixStream::connect(path).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("channel server never came up");
}

#[tokio::test]
async fn test_resolve_round_trip() {
    let running = start().await;

    let resolution = running
        .client
        .resolve("alice@example.com", None)
        .await
        .unwrap();
    assert!(resolution.verdict.is_deliverable());

    let resolution = running
        .client
        .resolve("alice@example.net", Some("hub-b"))
        .await
        .unwrap();
    assert!(resolution.verdict.is_undeliverable());

    running.shutdown.send(Signal::Shutdown).unwrap();
    running.server.await.unwrap().unwrap();
    assert!(!running.socket.exists());
}

#[tokio::test]
async fn test_system_and_cache_commands() {
    let running = start().await;

    running.client.ping().await.unwrap();
    assert_eq!(running.client.status().await.unwrap().generation, 0);
    assert_eq!(running.client.reload().await.unwrap(), 1);
    assert_eq!(running.client.status().await.unwrap().generation, 1);
    assert_eq!(running.client.cache_stats().await.unwrap().hits, 5);

    match running.client.cache_clear().await {
        Err(ChannelError::ServerError(message)) => assert_eq!(message, "cache is read-only"),
        other => panic!("expected server error, got {other:?}"),
    }

    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_socket_mode() {
    let running = start().await;
    // Answered only once the accept loop runs, i.e. after permissions are set.
    running.client.ping().await.unwrap();

    let mode = std::fs::metadata(&running.socket)
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o660);
    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_client_timeout() {
    let running = start().await;
    let client = ChannelClient::new(&running.socket).with_timeout(Duration::from_millis(100));

    let err = client
        .resolve("alice@example.com", Some("slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Timeout));

    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_server_survives() {
    let running = start().await;

    let mut raw = UnixStream::connect(&running.socket).await.unwrap();
    raw.write_all(&3u32.to_be_bytes()).await.unwrap();
    raw.write_all(&[1, 2, 3]).await.unwrap();

    let mut len = [0u8; 4];
    raw.read_exact(&mut len).await.unwrap();
    let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
    raw.read_exact(&mut body).await.unwrap();
    let (response, _): (Response, _) =
        bincode::serde::decode_from_slice(&body, bincode::config::legacy()).unwrap();
    assert!(!response.is_success());

    running.client.ping().await.unwrap();
    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_version_mismatch_is_rejected() {
    let running = start().await;

    let request = Request {
        version: 99,
        command: RequestCommand::System(SystemCommand::Ping),
    };
    let err = running.client.send_request(request).await.unwrap_err();
    match err {
        ChannelError::ServerError(message) => assert!(message.contains("peer=99"), "{message}"),
        other => panic!("expected server error, got {other:?}"),
    }

    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_live_socket_is_not_replaced() {
    let running = start().await;

    let (_tx, rx) = broadcast::channel(1);
    let second = ChannelServer::new(&running.socket, Arc::new(MockHandler::default()));
    let err = second.serve(rx).await.unwrap_err();
    assert!(matches!(err, ChannelError::SocketInUse(_)));

    running.client.ping().await.unwrap();
    running.shutdown.send(Signal::Shutdown).unwrap();
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("resolver.sock");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let (shutdown, rx) = broadcast::channel(1);
    let server = ChannelServer::new(&socket, Arc::new(MockHandler::default()));
    let handle = tokio::spawn(async move { server.serve(rx).await });
    wait_for_socket(&socket).await;

    ChannelClient::new(&socket).ping().await.unwrap();
    shutdown.send(Signal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
}
