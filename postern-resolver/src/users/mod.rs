//! Local-User Sources
//!
//! A source maps a mailbox owner name to the home directory holding that
//! owner's delivery-instruction files. "No such user" is `Ok(None)`, never
//! an error; errors are reserved for a source that cannot answer.
//!
//! Delivery goes through [`UserSource::assign`], which maps a whole
//! (possibly rewritten) local-part to an owner and the extension left over,
//! the way `qmail-lspawn` consults `users/assign` before `qmail-getpw`.

mod assign;
mod memory;
mod passwd;

use std::{fmt::Debug, path::PathBuf, sync::Arc};

use async_trait::async_trait;

pub use self::{assign::AssignSource, memory::MemoryUserSource, passwd::PasswdSource};
use crate::{config::UserSourceConfig, error::BackendError, error::ConfigError, freshness::Freshness};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
            home: home.into(),
        }
    }
}

/// The owner of a local-part and the extension its dot-files are keyed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub owner: UserRecord,
    /// `None` selects the bare `.qmail` file; `Some("")` still appends the
    /// separator.
    pub extension: Option<String>,
}

#[async_trait]
pub trait UserSource: Debug + Send + Sync {
    /// Look up a mailbox owner by name.
    async fn lookup_user(&self, name: &str) -> Result<Option<UserRecord>, BackendError>;

    /// Find the owner of `local`.
    ///
    /// The default follows `qmail-getpw`: the longest prefix of `local`
    /// ending at a `separator` that names a user wins, and the text after
    /// that separator is the extension.
    async fn assign(
        &self,
        local: &str,
        separator: char,
    ) -> Result<Option<Assignment>, BackendError> {
        let mut end = local.len();
        loop {
            if end > 0
                && let Some(owner) = self.lookup_user(&local[..end]).await?
            {
                let extension = (end < local.len())
                    .then(|| local[end + separator.len_utf8()..].to_string());
                return Ok(Some(Assignment { owner, extension }));
            }

            match local[..end].rfind(separator) {
                Some(index) => end = index,
                None => return Ok(None),
            }
        }
    }

    /// Files whose modification invalidates this source.
    fn backing_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Returns `true` if this source no longer matches `token`.
    fn changed_since(&self, token: &Freshness) -> bool {
        token.changed_for(&self.backing_files())
    }
}

/// Consults each source in order; the first one that knows the user wins
#[derive(Debug, Clone, Default)]
pub struct ChainedSource {
    sources: Vec<Arc<dyn UserSource>>,
}

impl ChainedSource {
    pub const fn new(sources: Vec<Arc<dyn UserSource>>) -> Self {
        Self { sources }
    }

    /// Load every file-backed source named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first source that fails to load.
    pub fn from_config(configs: &[UserSourceConfig]) -> Result<Self, ConfigError> {
        let sources = configs
            .iter()
            .map(|config| -> Result<Arc<dyn UserSource>, ConfigError> {
                Ok(match config {
                    UserSourceConfig::Assign { path } => Arc::new(AssignSource::load(path)?),
                    UserSourceConfig::Passwd { path } => Arc::new(PasswdSource::load(path)?),
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { sources })
    }

    /// Append a source consulted after all existing ones.
    #[must_use]
    pub fn with(mut self, source: Arc<dyn UserSource>) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
impl UserSource for ChainedSource {
    async fn lookup_user(&self, name: &str) -> Result<Option<UserRecord>, BackendError> {
        for source in &self.sources {
            if let Some(record) = source.lookup_user(name).await? {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    async fn assign(
        &self,
        local: &str,
        separator: char,
    ) -> Result<Option<Assignment>, BackendError> {
        for source in &self.sources {
            if let Some(assignment) = source.assign(local, separator).await? {
                return Ok(Some(assignment));
            }
        }

        Ok(None)
    }

    fn backing_files(&self) -> Vec<PathBuf> {
        self.sources
            .iter()
            .flat_map(|source| source.backing_files())
            .collect()
    }

    fn changed_since(&self, token: &Freshness) -> bool {
        self.sources.iter().any(|source| source.changed_since(token))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chain_order() {
        let first = MemoryUserSource::new();
        first.insert(UserRecord::new("alice", 1000, 100, "/home/alice"));

        let second = MemoryUserSource::new();
        second.insert(UserRecord::new("alice", 2000, 200, "/srv/alice"));
        second.insert(UserRecord::new("bob", 2001, 200, "/srv/bob"));

        let chain = ChainedSource::default()
            .with(Arc::new(first))
            .with(Arc::new(second));
        let alice = chain.lookup_user("alice").await.unwrap().unwrap();
        assert_eq!(alice.uid, 1000);

        let bob = chain.lookup_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.home, PathBuf::from("/srv/bob"));

        assert!(chain.lookup_user("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assign_takes_longest_user_prefix() {
        let source = MemoryUserSource::new();
        source.insert(UserRecord::new("alice", 1000, 100, "/home/alice"));
        source.insert(UserRecord::new("alice-lists", 1001, 100, "/home/lists"));

        let assignment = source.assign("alice-lists-dev-core", '-').await.unwrap().unwrap();
        assert_eq!(assignment.owner.name, "alice-lists");
        assert_eq!(assignment.extension.as_deref(), Some("dev-core"));

        let assignment = source.assign("alice-foo", '-').await.unwrap().unwrap();
        assert_eq!(assignment.owner.name, "alice");
        assert_eq!(assignment.extension.as_deref(), Some("foo"));

        let assignment = source.assign("alice", '-').await.unwrap().unwrap();
        assert_eq!(assignment.extension, None);

        let assignment = source.assign("alice-", '-').await.unwrap().unwrap();
        assert_eq!(assignment.owner.name, "alice");
        assert_eq!(assignment.extension.as_deref(), Some(""));

        assert!(source.assign("-alice", '-').await.unwrap().is_none());
        assert!(source.assign("bob-alice", '-').await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chain_assigns_from_first_source() {
        let assign = AssignSource::parse(
            std::path::Path::new("assign"),
            "+vhost-:vpopmail:89:89:/home/vpopmail:-::\n",
        )
        .unwrap();
        let passwd = MemoryUserSource::new();
        passwd.insert(UserRecord::new("vhost", 1001, 100, "/home/vhost"));

        let chain = ChainedSource::new(vec![Arc::new(assign), Arc::new(passwd)]);
        let assignment = chain.assign("vhost-bob", '-').await.unwrap().unwrap();
        assert_eq!(assignment.owner.home, PathBuf::from("/home/vpopmail"));
        assert_eq!(assignment.extension.as_deref(), Some("bob"));

        let assignment = chain.assign("vhost", '-').await.unwrap().unwrap();
        assert_eq!(assignment.owner.home, PathBuf::from("/home/vhost"));
    }

    #[tokio::test]
    async fn test_chain_propagates_errors() {
        let failing = MemoryUserSource::new();
        failing.fail_with("directory offline");

        let chain = ChainedSource::new(vec![Arc::new(failing)]);
        assert!(matches!(
            chain.lookup_user("alice").await,
            Err(BackendError::Unavailable(_))
        ));
    }
}
