//! The answer handed back for every query
//!
//! A [`Verdict`] is created once per decision and never mutated afterwards;
//! it is either returned, cached, or both.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Well-known reasons attached to [`VerdictKind::Deferred`].
pub mod reason {
    /// A Local-User Source or dot-file lookup exceeded its deadline.
    pub const BACKEND_TIMEOUT: &str = "backend-timeout";
    /// A backend failed for a reason other than a timeout.
    pub const BACKEND_ERROR: &str = "backend-error";
    /// The whole request exceeded the server deadline.
    pub const TIMEOUT: &str = "timeout";
    /// The privileged resolver could not be reached.
    pub const PRIVILEGE_CHANNEL: &str = "privilege-channel-unavailable";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictKind {
    Deliverable,
    Undeliverable,
    Deferred(String),
}

/// Optional detail explaining how a verdict was reached
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The dot-file candidate that matched, e.g. `alice-default`.
    pub matched: Option<String>,
    /// Whether the match came from a catch-all rule.
    pub catch_all: bool,
    /// Free-form explanation, e.g. `relay domain` or `no such user`.
    pub note: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn matched(candidate: impl Into<String>, catch_all: bool) -> Self {
        Self {
            matched: Some(candidate.into()),
            catch_all,
            note: None,
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(matched) = &self.matched {
            parts.push(format!("matched={matched}"));
        }
        if self.catch_all {
            parts.push("catch-all".to_string());
        }
        if let Some(note) = &self.note {
            parts.push(note.clone());
        }
        f.write_str(&parts.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    pub diagnostic: Option<Diagnostic>,
}

impl Verdict {
    #[must_use]
    pub const fn deliverable() -> Self {
        Self {
            kind: VerdictKind::Deliverable,
            diagnostic: None,
        }
    }

    #[must_use]
    pub const fn undeliverable() -> Self {
        Self {
            kind: VerdictKind::Undeliverable,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self {
            kind: VerdictKind::Deferred(reason.into()),
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostic = Some(diagnostic);
        self
    }

    #[must_use]
    pub fn with_note(self, note: impl Into<String>) -> Self {
        self.with_diagnostic(Diagnostic::note(note))
    }

    #[must_use]
    pub const fn is_deliverable(&self) -> bool {
        matches!(self.kind, VerdictKind::Deliverable)
    }

    #[must_use]
    pub const fn is_undeliverable(&self) -> bool {
        matches!(self.kind, VerdictKind::Undeliverable)
    }

    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self.kind, VerdictKind::Deferred(_))
    }

    /// The deferral reason, if this verdict is deferred.
    #[must_use]
    pub fn deferred_reason(&self) -> Option<&str> {
        match &self.kind {
            VerdictKind::Deferred(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            VerdictKind::Deliverable => f.write_str("deliverable")?,
            VerdictKind::Undeliverable => f.write_str("undeliverable")?,
            VerdictKind::Deferred(reason) => write!(f, "deferred ({reason})")?,
        }

        match &self.diagnostic {
            Some(diagnostic) => write!(f, ": {diagnostic}"),
            None => Ok(()),
        }
    }
}

/// A verdict together with where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub verdict: Verdict,
    /// Served from the query cache without consulting the engine.
    pub cache_hit: bool,
    /// Configuration generation the verdict was computed against.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_predicates() {
        assert!(Verdict::deliverable().is_deliverable());
        assert!(Verdict::undeliverable().is_undeliverable());

        let deferred = Verdict::deferred(reason::BACKEND_TIMEOUT);
        assert!(deferred.is_deferred());
        assert_eq!(deferred.deferred_reason(), Some("backend-timeout"));
        assert_eq!(Verdict::deliverable().deferred_reason(), None);
    }

    #[test]
    fn test_verdict_display() {
        let verdict =
            Verdict::deliverable().with_diagnostic(Diagnostic::matched("bob-default", true));
        assert_eq!(verdict.to_string(), "deliverable: matched=bob-default catch-all");

        let verdict = Verdict::undeliverable().with_note("no such user");
        assert_eq!(verdict.to_string(), "undeliverable: no such user");

        assert_eq!(
            Verdict::deferred("timeout").to_string(),
            "deferred (timeout)"
        );
    }
}
