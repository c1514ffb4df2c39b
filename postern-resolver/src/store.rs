//! Process-wide delivery configuration
//!
//! A [`Snapshot`] is built completely before it is published, so readers
//! either see the previous configuration or the new one, never a mixture.
//! Each successful load bumps the generation, which the query cache uses to
//! discard verdicts computed against an older snapshot.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use postern_common::{Address, Domain, DomainClassification, Signal, internal};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{
    config::ResolverConfig,
    error::ConfigError,
    freshness::Freshness,
    tables::{DomainSource, DomainTable},
    users::{ChainedSource, UserSource},
};

/// One immutable view of every backing table
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    domains: DomainTable,
    tenants: HashMap<String, DomainTable>,
    users: ChainedSource,
    freshness: Freshness,
}

impl Snapshot {
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn users(&self) -> &ChainedSource {
        &self.users
    }

    /// Classify `domain` using the tables selected by `hint`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTenant`] if the hint names no context.
    pub fn classify(
        &self,
        domain: &Domain,
        hint: Option<&str>,
    ) -> Result<DomainClassification, ConfigError> {
        Ok(self.table(hint)?.lookup_domain(domain))
    }

    /// Classify a whole recipient, honouring per-address `virtualdomains`
    /// entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTenant`] if the hint names no context.
    pub fn classify_address(
        &self,
        address: &Address,
        hint: Option<&str>,
    ) -> Result<DomainClassification, ConfigError> {
        Ok(self
            .table(hint)?
            .lookup_address(address.local_part(), address.domain()))
    }

    fn table(&self, hint: Option<&str>) -> Result<&DomainTable, ConfigError> {
        match hint {
            None => Ok(&self.domains),
            Some(name) => self
                .tenants
                .get(name)
                .ok_or_else(|| ConfigError::UnknownTenant(name.to_string())),
        }
    }

    /// Returns `true` if any backing file changed after this snapshot was built.
    pub fn is_stale(&self) -> bool {
        self.domains.changed_since(&self.freshness)
            || self
                .tenants
                .values()
                .any(|table| table.changed_since(&self.freshness))
            || self.users.changed_since(&self.freshness)
    }

    pub fn tenants(&self) -> impl Iterator<Item = &str> {
        self.tenants.keys().map(String::as_str)
    }
}

/// Holds the current [`Snapshot`] and swaps in new ones on reload
#[derive(Debug)]
pub struct ConfigStore {
    settings: ResolverConfig,
    extra_users: Vec<Arc<dyn UserSource>>,
    current: RwLock<Arc<Snapshot>>,
    generation: AtomicU64,
    reloading: Mutex<()>,
}

impl ConfigStore {
    /// Load the initial snapshot.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal: there is no previous snapshot to fall back to.
    pub fn open(settings: ResolverConfig) -> Result<Self, ConfigError> {
        Self::open_with(settings, Vec::new())
    }

    /// Like [`ConfigStore::open`], with additional Local-User Sources
    /// consulted after the configured ones.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal: there is no previous snapshot to fall back to.
    pub fn open_with(
        settings: ResolverConfig,
        extra_users: Vec<Arc<dyn UserSource>>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let store = Self {
            settings,
            extra_users,
            current: RwLock::new(Arc::new(Snapshot {
                generation: 0,
                domains: DomainTable::default(),
                tenants: HashMap::new(),
                users: ChainedSource::default(),
                freshness: Freshness::default(),
            })),
            generation: AtomicU64::new(0),
            reloading: Mutex::new(()),
        };

        let generation = store.publish(store.load()?);
        internal!(
            level = INFO,
            "Loaded delivery configuration from {} (generation {generation})",
            store.settings.control_dir.display()
        );

        Ok(store)
    }

    pub const fn settings(&self) -> &ResolverConfig {
        &self.settings
    }

    /// Build a new snapshot from the backing files without publishing it.
    ///
    /// # Errors
    ///
    /// Returns an error if any table or user source fails to load.
    pub fn load(&self) -> Result<Snapshot, ConfigError> {
        let domains = DomainTable::load(&self.settings.control_dir)?;

        let tenants = self
            .settings
            .tenants
            .iter()
            .map(|(name, tenant)| Ok((name.clone(), DomainTable::load(&tenant.control_dir)?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        let users = self
            .extra_users
            .iter()
            .fold(ChainedSource::from_config(&self.settings.users)?, |chain, source| {
                chain.with(Arc::clone(source))
            });

        let mut watched: Vec<PathBuf> = domains.backing_files();
        watched.extend(tenants.values().flat_map(|table| table.backing_files()));
        watched.extend(users.backing_files());

        Ok(Snapshot {
            generation: 0,
            domains,
            tenants,
            users,
            freshness: Freshness::capture(watched),
        })
    }

    fn publish(&self, mut snapshot: Snapshot) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        snapshot.generation = generation;
        *self.current.write() = Arc::new(snapshot);
        generation
    }

    /// The snapshot every part of one query should read from.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Classify `domain` against the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTenant`] if the hint names no context.
    pub fn classify(
        &self,
        domain: &Domain,
        hint: Option<&str>,
    ) -> Result<DomainClassification, ConfigError> {
        self.snapshot().classify(domain, hint)
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot().is_stale()
    }

    /// Rebuild and publish a snapshot, returning the new generation.
    ///
    /// On failure the current snapshot keeps serving.
    ///
    /// # Errors
    ///
    /// Returns the load failure after logging it.
    pub fn reload(&self) -> Result<u64, ConfigError> {
        let _guard = self.reloading.lock();

        match self.load() {
            Ok(snapshot) => {
                let generation = self.publish(snapshot);
                internal!(level = INFO, "Reloaded delivery configuration (generation {generation})");
                Ok(generation)
            }
            Err(err) => {
                error!(
                    "Failed to reload delivery configuration, keeping generation {}: {err}",
                    self.generation()
                );
                Err(err)
            }
        }
    }

    /// Reload only if a backing file changed.
    ///
    /// # Errors
    ///
    /// Returns the load failure after logging it.
    pub fn reload_if_stale(&self) -> Result<Option<u64>, ConfigError> {
        if self.is_stale() {
            debug!("Backing files changed, reloading");
            self.reload().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Poll backing files every `reload_interval` until shutdown.
    pub async fn watch(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        let mut ticker = tokio::time::interval(self.settings.reload_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let store = Arc::clone(&self);
                    // Failures are already logged by `reload`.
                    if let Err(err) = tokio::task::spawn_blocking(move || store.reload_if_stale()).await {
                        error!("Configuration watcher task failed: {err}");
                    }
                }
                signal = shutdown.recv() => {
                    if matches!(
                        signal,
                        Ok(Signal::Shutdown) | Err(broadcast::error::RecvError::Closed)
                    ) {
                        internal!(level = DEBUG, "Configuration watcher stopping");
                        break;
                    }
                }
            }
        }
    }
}
