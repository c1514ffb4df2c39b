use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tracing::debug;

use super::{UserRecord, UserSource};
use crate::error::{BackendError, ConfigError};

/// `/etc/passwd`-format user database
///
/// Mirrors what `qmail-getpw` accepts: the superuser never receives mail,
/// and names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct PasswdSource {
    path: PathBuf,
    users: HashMap<String, UserRecord>,
}

impl PasswdSource {
    /// Parse the passwd file at `path`. A missing file yields an empty source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Ok(Self {
            users: Self::parse(&path, &content),
            path,
        })
    }

    /// Lines that do not look like passwd entries are skipped rather than
    /// rejected, as NSS itself does.
    fn parse(path: &Path, content: &str) -> HashMap<String, UserRecord> {
        let mut users = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split(':').collect();
            let [name, _password, uid, gid, _gecos, home, ..] = fields.as_slice() else {
                debug!("{}:{}: skipping short passwd entry", path.display(), index + 1);
                continue;
            };

            let (Ok(uid), Ok(gid)) = (uid.parse::<u32>(), gid.parse::<u32>()) else {
                debug!("{}:{}: skipping entry with invalid ids", path.display(), index + 1);
                continue;
            };

            if uid == 0 || name.is_empty() {
                continue;
            }

            let name = name.to_ascii_lowercase();
            users
                .entry(name.clone())
                .or_insert_with(|| UserRecord::new(name, uid, gid, *home));
        }

        users
    }
}

#[async_trait]
impl UserSource for PasswdSource {
    async fn lookup_user(&self, name: &str) -> Result<Option<UserRecord>, BackendError> {
        Ok(self.users.get(name).cloned())
    }

    fn backing_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
alice:x:1000:100:Alice:/home/alice:/bin/sh
Bob:x:1001:100:Bob:/home/bob:/bin/sh
broken:x:1002
weird:x:abc:100::/home/weird:/bin/sh
alice:x:2000:100:Duplicate:/home/other:/bin/sh
";

    #[tokio::test]
    async fn test_parse_passwd() {
        let source = PasswdSource {
            path: PathBuf::from("passwd"),
            users: PasswdSource::parse(Path::new("passwd"), PASSWD),
        };

        let alice = source.lookup_user("alice").await.unwrap().unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(alice.home, PathBuf::from("/home/alice"));

        assert!(source.lookup_user("bob").await.unwrap().is_some());
        assert!(source.lookup_user("root").await.unwrap().is_none());
        assert!(source.lookup_user("broken").await.unwrap().is_none());
        assert!(source.lookup_user("weird").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        std::fs::write(&path, PASSWD).unwrap();

        let source = PasswdSource::load(&path).unwrap();
        assert!(source.lookup_user("alice").await.unwrap().is_some());
        assert_eq!(source.backing_files(), vec![path]);
    }
}
