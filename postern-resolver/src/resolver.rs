use std::sync::Arc;

use postern_common::{Address, Resolution, Verdict, verdict::reason};
use tracing::{debug, error};

use crate::{
    cache::{CacheKey, QueryCache},
    config::ResolverConfig,
    dotfile::{DotFileStore, FsDotFileStore},
    engine::Engine,
    error::ConfigError,
    store::ConfigStore,
};

/// Cache in front of the decision engine
///
/// This is what the privileged side of the channel serves. Every decision
/// runs in its own task, so a caller that gives up on its deadline still
/// leaves the verdict in the cache for the next query.
#[derive(Debug, Clone)]
pub struct Resolver {
    store: Arc<ConfigStore>,
    engine: Arc<Engine>,
    cache: Arc<QueryCache>,
}

impl Resolver {
    /// Open the configuration and resolve against the real filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial configuration cannot be loaded.
    pub fn from_config(settings: ResolverConfig) -> Result<Self, ConfigError> {
        let store = Arc::new(ConfigStore::open(settings)?);
        Self::new(store, Arc::new(FsDotFileStore))
    }

    /// # Errors
    ///
    /// Returns an error if the cache settings are invalid.
    pub fn new(store: Arc<ConfigStore>, files: Arc<dyn DotFileStore>) -> Result<Self, ConfigError> {
        let settings = &store.settings().cache;
        let cache = Arc::new(QueryCache::new(settings.capacity()?, settings.ttl()));
        let engine = Arc::new(Engine::new(Arc::clone(&store), files));

        Ok(Self {
            store,
            engine,
            cache,
        })
    }

    pub const fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Parse `raw` and resolve it. A malformed address is answered
    /// Undeliverable without reaching the engine.
    pub async fn resolve(&self, raw: &str, hint: Option<&str>) -> Resolution {
        match Address::parse(raw, self.store.settings().case_sensitive_local_part) {
            Ok(address) => self.resolve_address(address, hint).await,
            Err(err) => {
                debug!("Rejecting malformed address {raw:?}: {err}");
                Resolution {
                    verdict: Verdict::undeliverable().with_note(format!("malformed: {err}")),
                    cache_hit: false,
                    generation: self.store.generation(),
                }
            }
        }
    }

    pub async fn resolve_address(&self, address: Address, hint: Option<&str>) -> Resolution {
        let key = CacheKey::new(&address, hint);
        let generation = self.store.generation();

        if let Some(verdict) = self.cache.get(&key, generation) {
            debug!("Cache hit for {address}");
            return Resolution {
                verdict,
                cache_hit: true,
                generation,
            };
        }

        let engine = Arc::clone(&self.engine);
        let cache = Arc::clone(&self.cache);
        let hint = hint.map(str::to_string);
        let task = tokio::spawn(async move {
            let decision = engine.decide(&address, hint.as_deref()).await;
            cache.put(key, decision.generation, decision.verdict.clone());
            decision
        });

        match task.await {
            Ok(decision) => Resolution {
                verdict: decision.verdict,
                cache_hit: false,
                generation: decision.generation,
            },
            Err(err) => {
                error!("Resolution task failed: {err}");
                Resolution {
                    verdict: Verdict::deferred(reason::BACKEND_ERROR),
                    cache_hit: false,
                    generation,
                }
            }
        }
    }

    /// Force a configuration reload. See [`ConfigStore::reload`].
    ///
    /// # Errors
    ///
    /// Returns the load failure; the previous configuration stays active.
    pub fn reload(&self) -> Result<u64, ConfigError> {
        self.store.reload()
    }
}
