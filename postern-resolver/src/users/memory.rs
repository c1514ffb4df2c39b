use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{UserRecord, UserSource};
use crate::error::BackendError;

/// In-memory Local-User Source
///
/// Used for tests and for embedding the resolver with users provisioned by
/// other means. Latency and failures can be injected at runtime.
#[derive(Debug, Default)]
pub struct MemoryUserSource {
    users: RwLock<HashMap<String, UserRecord>>,
    delay: RwLock<Duration>,
    failure: RwLock<Option<String>>,
    lookups: AtomicUsize,
}

impl MemoryUserSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: UserRecord) {
        self.users.write().insert(record.name.clone(), record);
    }

    pub fn remove(&self, name: &str) -> Option<UserRecord> {
        self.users.write().remove(name)
    }

    /// Delay every subsequent lookup by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    /// Make every subsequent lookup fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.write() = Some(reason.into());
    }

    pub fn recover(&self) {
        *self.failure.write() = None;
        *self.delay.write() = Duration::ZERO;
    }

    /// Number of lookups answered (or attempted) so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UserSource for MemoryUserSource {
    async fn lookup_user(&self, name: &str) -> Result<Option<UserRecord>, BackendError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.failure.read().clone() {
            return Err(BackendError::Unavailable(reason));
        }

        Ok(self.users.read().get(name).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_remove() {
        let source = MemoryUserSource::new();
        source.insert(UserRecord::new("alice", 1000, 100, "/home/alice"));

        assert!(source.lookup_user("alice").await.unwrap().is_some());
        assert!(source.remove("alice").is_some());
        assert!(source.lookup_user("alice").await.unwrap().is_none());
        assert_eq!(source.lookups(), 2);
    }

    #[tokio::test]
    async fn test_failure_and_recovery() {
        let source = MemoryUserSource::new();
        source.fail_with("offline");
        assert!(source.lookup_user("alice").await.is_err());

        source.recover();
        assert!(source.lookup_user("alice").await.unwrap().is_none());
    }
}
