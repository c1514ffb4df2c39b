//! Channel command handler run by the privileged resolver
//!
//! Turns channel requests into calls on the [`Resolver`]: recipient queries
//! from the listener and administrative commands from `posternctl`.

use std::time::Instant;

use async_trait::async_trait;
use postern_channel::{
    CacheCommand, CommandHandler, Request, RequestCommand, Response, ResponseData, SystemCommand,
    protocol::{CacheStatistics, SystemStatus},
};
use postern_common::{incoming, internal, outgoing};
use postern_resolver::{CacheStats, Resolver};

pub struct ResolverHandler {
    resolver: Resolver,
    /// Server start time for uptime calculation
    start_time: Instant,
    started_at_ms: u64,
}

impl ResolverHandler {
    #[must_use]
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver,
            start_time: Instant::now(),
            started_at_ms: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0),
        }
    }

    async fn handle_system_command(&self, command: SystemCommand) -> Response {
        match command {
            SystemCommand::Ping => Response::ok(),
            SystemCommand::Status => {
                let snapshot = self.resolver.store().snapshot();
                let mut tenants = snapshot.tenants().map(str::to_string).collect::<Vec<_>>();
                tenants.sort();

                Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    started_at_ms: self.started_at_ms,
                    uptime_secs: self.start_time.elapsed().as_secs(),
                    generation: snapshot.generation(),
                    tenants,
                    cache: statistics(self.resolver.cache().stats()),
                }))
            }
            SystemCommand::Reload => {
                internal!(level = INFO, "Reload requested over the channel");
                let resolver = self.resolver.clone();
                match tokio::task::spawn_blocking(move || resolver.reload()).await {
                    Ok(Ok(generation)) => Response::data(ResponseData::Reloaded { generation }),
                    Ok(Err(err)) => Response::error(format!("reload failed: {err}")),
                    Err(err) => Response::error(format!("reload task failed: {err}")),
                }
            }
        }
    }

    fn handle_cache_command(&self, command: CacheCommand) -> Response {
        match command {
            CacheCommand::Stats => {
                Response::data(ResponseData::CacheStats(statistics(self.resolver.cache().stats())))
            }
            CacheCommand::Clear => {
                self.resolver.cache().clear();
                internal!(level = INFO, "Query cache cleared");
                Response::ok()
            }
        }
    }
}

#[async_trait]
impl CommandHandler for ResolverHandler {
    async fn handle_request(&self, request: Request) -> postern_channel::Result<Response> {
        Ok(match request.command {
            RequestCommand::Resolve { address, hint } => {
                incoming!("resolve {address} hint={hint:?}");
                let resolution = self.resolver.resolve(&address, hint.as_deref()).await;
                outgoing!(
                    "resolve {address}: {} (cache_hit={})",
                    resolution.verdict,
                    resolution.cache_hit
                );
                Response::data(ResponseData::Resolution(resolution))
            }
            RequestCommand::System(command) => self.handle_system_command(command).await,
            RequestCommand::Cache(command) => self.handle_cache_command(command),
        })
    }
}

const fn statistics(stats: CacheStats) -> CacheStatistics {
    CacheStatistics {
        entries: stats.entries,
        capacity: stats.capacity,
        hits: stats.hits,
        misses: stats.misses,
    }
}
