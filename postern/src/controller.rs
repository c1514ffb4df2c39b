use std::sync::{Arc, LazyLock};

use postern_channel::{ChannelClient, ChannelServer};
use postern_common::{Signal, internal, logging};
use postern_resolver::Resolver;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast,
    task::JoinHandle,
};

use crate::{
    config::{Postern, VerdictSourceConfig},
    handler::ResolverHandler,
    listener::Listener,
    privilege,
    source::VerdictSource,
};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

/// Reload the delivery configuration on every `SIGHUP`.
async fn reload_on_hangup(
    resolver: Resolver,
    mut shutdown: broadcast::Receiver<Signal>,
) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    return Ok(());
                }
                internal!(level = INFO, "SIGHUP received, reloading delivery configuration");
                let resolver = resolver.clone();
                // Failures are logged by the store, which keeps the old snapshot.
                if let Err(err) = tokio::task::spawn_blocking(move || resolver.reload()).await {
                    tracing::error!("Reload task failed: {err}");
                }
            }
            _ = shutdown.recv() => return Ok(()),
        }
    }
}

/// Keep the configuration fresh: poll backing files and honour `SIGHUP`.
fn maintain(resolver: &Resolver) -> JoinHandle<()> {
    let store = Arc::clone(resolver.store());
    let resolver = resolver.clone();

    tokio::spawn(async move {
        let ((), hangup) = tokio::join!(
            store.watch(SHUTDOWN_BROADCAST.subscribe()),
            reload_on_hangup(resolver, SHUTDOWN_BROADCAST.subscribe()),
        );
        if let Err(err) = hangup {
            tracing::error!("SIGHUP handler failed: {err}");
        }
    })
}

/// Stop background work, including after a startup failure that never
/// broadcast a shutdown.
async fn finish(background: Option<JoinHandle<()>>) {
    let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);

    if let Some(background) = background
        && let Err(err) = background.await
    {
        tracing::error!("Background task failed: {err}");
    }
}

impl Postern {
    /// Run the network-facing listener.
    ///
    /// Sockets are bound first; then, if a `server.user` is configured, the
    /// process switches to that account before serving any request.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a socket cannot be
    /// bound, or privileges cannot be dropped.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run_listener(self) -> anyhow::Result<()> {
        logging::init()?;
        self.validate()?;

        let (source, background): (Arc<dyn VerdictSource>, _) = match self.server.verdicts {
            VerdictSourceConfig::Channel => {
                let client = ChannelClient::new(self.channel.socket_path.clone())
                    .with_timeout(self.channel.timeout());
                internal!(
                    level = INFO,
                    "Forwarding queries to {}",
                    self.channel.socket_path.display()
                );
                let client: Arc<dyn VerdictSource> = Arc::new(client);
                (client, None)
            }
            VerdictSourceConfig::InProcess => {
                let resolver = Resolver::from_config(self.resolver)?;
                internal!(
                    level = INFO,
                    "Resolving in process (generation {})",
                    resolver.store().generation()
                );
                let background = maintain(&resolver);
                let resolver: Arc<dyn VerdictSource> = Arc::new(resolver);
                (resolver, Some(background))
            }
        };

        let listener = match Listener::bind(&self.server, source).await {
            Ok(listener) => listener,
            Err(err) => {
                finish(background).await;
                return Err(err.into());
            }
        };

        if let Some(user) = self.server.user.as_deref() {
            if self.server.verdicts == VerdictSourceConfig::InProcess {
                tracing::warn!(
                    "Dropping privileges while resolving in process; home directories must stay readable"
                );
            }
            match privilege::drop_privileges(user, self.server.group.as_deref()) {
                Ok(account) => internal!(
                    level = INFO,
                    "Running as {} (uid {}, gid {})",
                    account.name,
                    account.uid,
                    account.gid
                ),
                Err(err) => {
                    finish(background).await;
                    return Err(err.into());
                }
            }
        }

        let ret = tokio::select! {
            r = listener.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(anyhow::Error::from),
            r = shutdown() => r,
        };

        internal!("Shutting down...");
        finish(background).await;

        ret
    }

    /// Run the privileged resolver behind the channel socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded, the socket
    /// group does not exist, or the socket cannot be bound.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run_resolver(self) -> anyhow::Result<()> {
        logging::init()?;
        self.validate()?;

        let resolver = Resolver::from_config(self.resolver)?;
        internal!(
            level = INFO,
            "Loaded delivery configuration (generation {})",
            resolver.store().generation()
        );

        let group = self
            .channel
            .group
            .as_deref()
            .map(privilege::lookup_group)
            .transpose()?;

        let server = ChannelServer::new(
            self.channel.socket_path.clone(),
            Arc::new(ResolverHandler::new(resolver.clone())),
        )
        .with_mode(self.channel.mode)
        .with_group(group);

        let background = maintain(&resolver);

        let ret = tokio::select! {
            r = server.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(anyhow::Error::from),
            r = shutdown() => r,
        };

        internal!("Shutting down...");
        finish(Some(background)).await;

        ret
    }
}
