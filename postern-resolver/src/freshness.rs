//! Change detection for file-backed configuration

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Modification times observed for a set of backing files
///
/// A file that did not exist is recorded as `None`, so creating it later
/// counts as a change just like editing or deleting it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Freshness {
    stamps: Vec<(PathBuf, Option<SystemTime>)>,
}

impl Freshness {
    /// Observe the current modification time of every path.
    pub fn capture<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            stamps: paths
                .into_iter()
                .map(|path| {
                    let path = path.as_ref();
                    (path.to_path_buf(), modified(path))
                })
                .collect(),
        }
    }

    /// Returns `true` if any of `paths` differs from what was captured.
    ///
    /// Paths that were never captured are always reported as changed.
    pub fn changed_for<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        paths.iter().any(|path| {
            let path = path.as_ref();
            self.stamps
                .iter()
                .find(|(captured, _)| captured == path)
                .is_none_or(|(_, stamp)| *stamp != modified(path))
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
