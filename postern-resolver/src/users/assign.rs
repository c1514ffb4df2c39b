use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;

use super::{Assignment, UserRecord, UserSource};
use crate::error::{BackendError, ConfigError};

/// qmail `users/assign` file
///
/// ```text
/// =alice:alice:1000:100:/home/alice:::
/// +list-:lists:1002:100:/var/lists:-::
/// .
/// ```
///
/// Each entry reads `local:user:uid:gid:home:dash:ext:`. `=` lines match a
/// local-part exactly, `+` lines match any local-part starting with the
/// given prefix (longest prefix wins) and append the rest to `ext`. A
/// non-empty `dash` puts the separator between `.qmail` and the extension.
/// Parsing stops at a line holding a single `.`.
#[derive(Debug, Clone, Default)]
pub struct AssignSource {
    path: PathBuf,
    exact: HashMap<String, Entry>,
    prefixes: Vec<(String, Entry)>,
}

#[derive(Debug, Clone)]
struct Entry {
    owner: UserRecord,
    dash: bool,
    ext: String,
}

impl Entry {
    fn assignment(&self, rest: &str) -> Assignment {
        let ext = format!("{}{rest}", self.ext);
        let extension = (self.dash || !ext.is_empty()).then_some(ext);
        Assignment {
            owner: self.owner.clone(),
            extension,
        }
    }
}

impl AssignSource {
    /// Parse the assign file at `path`. A missing file yields an empty source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or an entry is malformed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let mut source = Self::parse(&path, &content)?;
        source.path = path;
        Ok(source)
    }

    pub(super) fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let mut exact = HashMap::new();
        let mut prefixes = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let number = index + 1;
            let line = line.trim_end();
            if line == "." {
                break;
            }
            let Some(kind) = line.chars().next() else {
                continue;
            };
            let rest = &line[kind.len_utf8()..];
            let fields: Vec<&str> = rest.split(':').collect();
            if fields.len() < 7 {
                return Err(ConfigError::malformed(path, number, "expected 7 fields"));
            }

            let parse_id = |field: &str, what: &str| {
                field
                    .parse::<u32>()
                    .map_err(|_| ConfigError::malformed(path, number, format!("invalid {what}")))
            };

            let key = fields[0].to_ascii_lowercase();
            let entry = Entry {
                owner: UserRecord::new(
                    fields[1],
                    parse_id(fields[2], "uid")?,
                    parse_id(fields[3], "gid")?,
                    fields[4],
                ),
                dash: !fields[5].is_empty(),
                ext: fields[6].to_string(),
            };

            match kind {
                '=' => {
                    exact.insert(key, entry);
                }
                '+' => prefixes.push((key, entry)),
                _ => {
                    return Err(ConfigError::malformed(
                        path,
                        number,
                        "entries must start with '=' or '+'",
                    ));
                }
            }
        }

        prefixes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        Ok(Self {
            path: path.to_path_buf(),
            exact,
            prefixes,
        })
    }

    fn find(&self, local: &str) -> Option<Assignment> {
        if let Some(entry) = self.exact.get(local) {
            return Some(entry.assignment(""));
        }

        self.prefixes.iter().find_map(|(prefix, entry)| {
            local
                .strip_prefix(prefix.as_str())
                .map(|rest| entry.assignment(rest))
        })
    }
}

#[async_trait]
impl UserSource for AssignSource {
    /// Only `=` entries name a single owner.
    async fn lookup_user(&self, name: &str) -> Result<Option<UserRecord>, BackendError> {
        Ok(self.exact.get(name).map(|entry| entry.owner.clone()))
    }

    async fn assign(
        &self,
        local: &str,
        _separator: char,
    ) -> Result<Option<Assignment>, BackendError> {
        Ok(self.find(local))
    }

    fn backing_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const ASSIGN: &str = "\
=alice:alice:1000:100:/home/alice:::
=alice-work:alice:1000:100:/home/alice:-:work:
+list-:lists:1002:100:/var/lists:-::
+list-dev-:devlists:1003:100:/var/devlists:-:dev-:
+example.com-:example.com:89:89:/home/vpopmail/domains/example.com:-::
.
=ignored:ignored:1:1:/nowhere:::
";

    fn source() -> AssignSource {
        AssignSource::parse(Path::new("assign"), ASSIGN).unwrap()
    }

    #[tokio::test]
    async fn test_exact_entries() {
        let source = source();

        let alice = source.assign("alice", '-').await.unwrap().unwrap();
        assert_eq!(
            alice,
            Assignment {
                owner: UserRecord::new("alice", 1000, 100, "/home/alice"),
                extension: None,
            }
        );

        let work = source.assign("alice-work", '-').await.unwrap().unwrap();
        assert_eq!(work.owner.name, "alice");
        assert_eq!(work.extension.as_deref(), Some("work"));

        assert!(source.lookup_user("alice").await.unwrap().is_some());
        assert!(source.lookup_user("list-announce").await.unwrap().is_none());
        assert!(source.assign("ignored", '-').await.unwrap().is_none());
        assert!(source.assign("bob", '-').await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_entries_keep_the_rest_as_extension() {
        let source = source();

        let list = source.assign("list-announce", '-').await.unwrap().unwrap();
        assert_eq!(list.owner.name, "lists");
        assert_eq!(list.owner.home, PathBuf::from("/var/lists"));
        assert_eq!(list.extension.as_deref(), Some("announce"));

        let dev = source.assign("list-dev-core", '-').await.unwrap().unwrap();
        assert_eq!(dev.owner.home, PathBuf::from("/var/devlists"));
        assert_eq!(dev.extension.as_deref(), Some("dev-core"));

        let vpopmail = source
            .assign("example.com-postmaster", '-')
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vpopmail.owner.name, "example.com");
        assert_eq!(vpopmail.owner.uid, 89);
        assert_eq!(vpopmail.extension.as_deref(), Some("postmaster"));

        // The prefix alone leaves an empty extension after the dash.
        let bare = source.assign("list-", '-').await.unwrap().unwrap();
        assert_eq!(bare.extension.as_deref(), Some(""));
    }

    #[test]
    fn test_malformed_entries() {
        assert!(matches!(
            AssignSource::parse(Path::new("assign"), "=alice:alice:1000\n"),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            AssignSource::parse(Path::new("assign"), "=a:a:x:100:/home/a:::\n"),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            AssignSource::parse(Path::new("assign"), "\n*a:a:1:1:/home/a:::\n"),
            Err(ConfigError::Malformed { line: 2, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = AssignSource::load(dir.path().join("assign")).unwrap();
        assert!(source.exact.is_empty());
        assert!(source.prefixes.is_empty());
        assert_eq!(source.backing_files(), vec![dir.path().join("assign")]);
    }
}
