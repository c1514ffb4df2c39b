use std::{
    collections::HashMap,
    fmt::Debug,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{error::BackendError, users::UserRecord};

/// Where delivery-instruction files live
#[async_trait]
pub trait DotFileStore: Debug + Send + Sync {
    /// Whether `file` exists for `owner`. Absence is `Ok(false)`.
    async fn exists(&self, owner: &UserRecord, file: &str) -> Result<bool, BackendError>;

    async fn read(&self, owner: &UserRecord, file: &str) -> Result<String, BackendError>;
}

/// Files in each owner's home directory
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDotFileStore;

impl FsDotFileStore {
    fn path(owner: &UserRecord, file: &str) -> PathBuf {
        owner.home.join(file)
    }
}

#[async_trait]
impl DotFileStore for FsDotFileStore {
    async fn exists(&self, owner: &UserRecord, file: &str) -> Result<bool, BackendError> {
        let path = Self::path(owner, file);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if is_absent(&err) => Ok(false),
            Err(source) => Err(BackendError::Io { path, source }),
        }
    }

    async fn read(&self, owner: &UserRecord, file: &str) -> Result<String, BackendError> {
        let path = Self::path(owner, file);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| BackendError::Io { path, source })
    }
}

/// A home directory that is missing entirely means the file is missing too.
fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// In-memory store keyed by `(home, file)`
#[derive(Debug, Default)]
pub struct MemoryDotFileStore {
    files: RwLock<HashMap<(PathBuf, String), String>>,
}

impl MemoryDotFileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, owner: &UserRecord, file: impl Into<String>, content: impl Into<String>) {
        self.files
            .write()
            .insert((owner.home.clone(), file.into()), content.into());
    }

    pub fn remove(&self, owner: &UserRecord, file: &str) {
        self.files
            .write()
            .remove(&(owner.home.clone(), file.to_string()));
    }

    fn get(&self, home: &Path, file: &str) -> Option<String> {
        self.files
            .read()
            .get(&(home.to_path_buf(), file.to_string()))
            .cloned()
    }
}

#[async_trait]
impl DotFileStore for MemoryDotFileStore {
    async fn exists(&self, owner: &UserRecord, file: &str) -> Result<bool, BackendError> {
        Ok(self.get(&owner.home, file).is_some())
    }

    async fn read(&self, owner: &UserRecord, file: &str) -> Result<String, BackendError> {
        self.get(&owner.home, file).ok_or_else(|| BackendError::Io {
            path: owner.home.join(file),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }
}
