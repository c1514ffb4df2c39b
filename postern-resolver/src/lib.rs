//! Recipient deliverability resolution
//!
//! Answers "would this address be accepted for local or virtual delivery?"
//! from a qmail-style control directory, user database and per-user
//! delivery-instruction files, without delivering anything.
//!
//! ```text
//! Resolver ── QueryCache
//!    │
//!    └─ Engine ── ConfigStore (DomainTable, UserSource)
//!                 DotFileResolver (DotFileStore)
//! ```

pub mod cache;
pub mod config;
pub mod dotfile;
pub mod engine;
pub mod error;
pub mod freshness;
pub mod resolver;
pub mod store;
pub mod tables;
pub mod users;

pub use self::{
    cache::{CacheKey, CacheStats, QueryCache},
    config::{CacheConfig, ResolverConfig, TenantConfig, UserSourceConfig},
    dotfile::{DotFileChain, DotFileResolver, DotFileStore, FsDotFileStore, MemoryDotFileStore},
    engine::{Decision, Engine},
    error::{BackendError, ConfigError},
    resolver::Resolver,
    store::{ConfigStore, Snapshot},
    tables::{DomainSource, DomainTable},
    users::{Assignment, MemoryUserSource, UserRecord, UserSource},
};
