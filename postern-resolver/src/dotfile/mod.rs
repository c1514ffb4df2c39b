//! Delivery-instruction (dot-file) resolution
//!
//! A local-part is split into a user and positional extension segments.
//! Candidates are generated most specific first by replacing trailing
//! segments with the literal `default`, followed by one terminal catch-all:
//!
//! ```text
//! alice-foo-bar  ->  alice-foo-bar, alice-foo-default, alice-default, default
//! alice          ->  alice, default
//! ```
//!
//! This module only answers *which* file governs an address; what the file
//! says is interpreted by [`directive`].

pub mod directive;
mod storage;

use std::{fmt, sync::Arc};

use tracing::trace;

pub use self::storage::{DotFileStore, FsDotFileStore, MemoryDotFileStore};
use crate::{error::BackendError, users::UserRecord};

pub const DEFAULT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateKind {
    /// Looked up in the owner's home directory.
    Owner,
    /// The terminal catch-all: the owner-level `default` when nothing else
    /// covered it, then the domain-level catch-all owner.
    CatchAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    name: String,
    extension: Option<String>,
    kind: CandidateKind,
    wildcard: bool,
}

impl Candidate {
    /// Display name, e.g. `alice-foo-default`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extension relative to the owner, `None` for the bare user.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub const fn kind(&self) -> &CandidateKind {
        &self.kind
    }

    /// Whether this candidate matches more than one local-part.
    pub const fn is_wildcard(&self) -> bool {
        self.wildcard
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordered candidates for one local-part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotFileChain {
    candidates: Vec<Candidate>,
    segments: usize,
}

impl DotFileChain {
    /// Build the chain for `user` and an optional extension.
    ///
    /// The extension is split on every `separator`; empty segments are kept,
    /// so `a--b` has the segments `["", "b"]`.
    pub fn resolve(user: &str, extension: Option<&str>, separator: char) -> Self {
        let segments: Vec<&str> =
            extension.map_or_else(Vec::new, |ext| ext.split(separator).collect());
        let sep = separator.to_string();

        let mut candidates = Vec::with_capacity(segments.len() + 2);
        for kept in (0..=segments.len()).rev() {
            let extension = if kept == segments.len() {
                extension.map(str::to_string)
            } else {
                let mut parts = segments[..kept].to_vec();
                parts.push(DEFAULT);
                Some(parts.join(&sep))
            };

            let name = extension
                .as_ref()
                .map_or_else(|| user.to_string(), |ext| format!("{user}{separator}{ext}"));

            candidates.push(Candidate {
                name,
                extension,
                kind: CandidateKind::Owner,
                wildcard: kept < segments.len(),
            });
        }

        candidates.push(Candidate {
            name: DEFAULT.to_string(),
            extension: Some(DEFAULT.to_string()),
            kind: CandidateKind::CatchAll,
            wildcard: true,
        });

        Self {
            candidates,
            segments: segments.len(),
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Number of extension segments the chain was built from.
    pub const fn segments(&self) -> usize {
        self.segments
    }
}

/// A delivery-instruction file that exists for a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    pub candidate: String,
    pub owner: String,
    pub file: String,
    pub content: String,
    pub catch_all: bool,
}

/// Maps candidates to files and checks storage for them
#[derive(Debug, Clone)]
pub struct DotFileResolver {
    store: Arc<dyn DotFileStore>,
    prefix: String,
    separator: char,
    domain_owner: Option<UserRecord>,
}

impl DotFileResolver {
    pub fn new(
        store: Arc<dyn DotFileStore>,
        prefix: impl Into<String>,
        separator: char,
        domain_owner: Option<UserRecord>,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            separator,
            domain_owner,
        }
    }

    pub fn resolve(&self, user: &str, extension: Option<&str>) -> DotFileChain {
        DotFileChain::resolve(user, extension, self.separator)
    }

    /// The owner consulted for domain-level catch-alls, if configured.
    pub const fn domain_owner(&self) -> Option<&UserRecord> {
        self.domain_owner.as_ref()
    }

    /// Owner-relative file name: `.qmail` for the bare user, `.qmail-ext`
    /// otherwise, with `.` in the extension written as `:`.
    pub fn file_name(&self, extension: Option<&str>) -> String {
        extension.map_or_else(
            || self.prefix.clone(),
            |ext| format!("{}-{}", self.prefix, ext.replace('.', ":")),
        )
    }

    /// Return the first candidate, in chain order, whose file exists.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; a missing file is not an error.
    pub async fn first_existing(
        &self,
        owner: &UserRecord,
        chain: &DotFileChain,
    ) -> Result<Option<MatchedFile>, BackendError> {
        for candidate in chain.candidates() {
            let holders = match candidate.kind() {
                CandidateKind::Owner => vec![owner],
                CandidateKind::CatchAll => {
                    let mut holders = Vec::with_capacity(2);
                    if chain.segments() == 0 {
                        holders.push(owner);
                    }
                    if let Some(domain_owner) = &self.domain_owner
                        && domain_owner.home != owner.home
                    {
                        holders.push(domain_owner);
                    }
                    holders
                }
            };

            let file = self.file_name(candidate.extension());
            for holder in holders {
                trace!("Looking in {} for {file} ({candidate})", holder.home.display());
                if self.store.exists(holder, &file).await? {
                    let content = self.store.read(holder, &file).await?;
                    return Ok(Some(MatchedFile {
                        candidate: candidate.name().to_string(),
                        owner: holder.name.clone(),
                        file,
                        content,
                        catch_all: candidate.is_wildcard(),
                    }));
                }
            }
        }

        Ok(None)
    }
}
