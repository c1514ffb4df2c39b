//! Where the listener gets its verdicts from

use async_trait::async_trait;
use postern_channel::ChannelClient;
use postern_common::{Resolution, Verdict, verdict::reason};
use postern_resolver::Resolver;

/// Answers a deliverability query for a validated address.
///
/// Implementations never fail: problems reaching the backend are reported
/// as a deferred verdict.
#[async_trait]
pub trait VerdictSource: Send + Sync {
    async fn resolve(&self, address: &str, hint: Option<&str>) -> Resolution;

    /// Short label used in logs.
    fn name(&self) -> &'static str;
}

/// Resolve in this process, for deployments without privilege separation.
#[async_trait]
impl VerdictSource for Resolver {
    async fn resolve(&self, address: &str, hint: Option<&str>) -> Resolution {
        Self::resolve(self, address, hint).await
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}

/// Forward to the privileged resolver over its Unix socket.
#[async_trait]
impl VerdictSource for ChannelClient {
    async fn resolve(&self, address: &str, hint: Option<&str>) -> Resolution {
        match Self::resolve(self, address, hint).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::error!(
                    socket = %self.socket_path().display(),
                    "Privileged resolver unavailable: {err}"
                );
                Resolution {
                    verdict: Verdict::deferred(reason::PRIVILEGE_CHANNEL),
                    cache_hit: false,
                    generation: 0,
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}
