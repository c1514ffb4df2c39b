//! Domain newtype and the classification derived for it
//!
//! [`Domain`] wraps an already-normalized domain name so that it cannot be
//! confused with a local-part or a full address. Construction through
//! [`Domain::parse`] lowercases the name and strips a trailing root dot.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

const MAX_DOMAIN_LENGTH: usize = 255;

/// A normalized (lowercase, no trailing dot) domain name
///
/// # Examples
///
/// ```
/// use postern_common::Domain;
///
/// let domain = Domain::parse("Mail.Example.COM.").unwrap();
/// assert_eq!(domain.as_str(), "mail.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Normalize and validate a domain name.
    ///
    /// Accepts dotted hostnames made of letters, digits, `-` and `_`, and
    /// bracketed address literals such as `[192.0.2.1]`.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] when the name is empty, too long or
    /// contains an empty label or an illegal character.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.strip_suffix('.').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(AddressError::EmptyDomain);
        }
        if trimmed.len() > MAX_DOMAIN_LENGTH {
            return Err(AddressError::TooLong {
                part: "domain",
                limit: MAX_DOMAIN_LENGTH,
            });
        }

        let normalized = trimmed.to_ascii_lowercase();

        if normalized.starts_with('[') {
            if !normalized.ends_with(']') || normalized.len() < 3 {
                return Err(AddressError::InvalidDomain(normalized));
            }
            return Ok(Self(Arc::from(normalized)));
        }

        for label in normalized.split('.') {
            if label.is_empty() {
                return Err(AddressError::InvalidDomain(normalized));
            }
            if let Some(c) = label
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
            {
                return Err(AddressError::IllegalCharacter(c));
            }
        }

        Ok(Self(Arc::from(normalized)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the wildcard suffixes of this domain, most specific first
    ///
    /// `a.b.example.com` yields `.b.example.com`, `.example.com`, `.com`.
    pub fn suffixes(&self) -> impl Iterator<Item = &str> {
        self.0
            .match_indices('.')
            .map(|(index, _)| &self.0[index..])
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// How the delivery configuration treats a recipient domain
///
/// Derived once per query from a single configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainClassification {
    /// Listed in `locals`: mailboxes are system (or assigned) users.
    Local,
    /// Listed in `virtualdomains`: mailboxes belong to the owner named by the
    /// mapped prefix.
    Virtual(String),
    /// Accepted for forwarding only.
    Relay,
    /// Not handled by this system at all.
    Unknown,
}

impl DomainClassification {
    #[must_use]
    pub const fn is_local_delivery(&self) -> bool {
        matches!(self, Self::Local | Self::Virtual(_))
    }
}

impl Display for DomainClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Virtual(prefix) => write!(f, "virtual({prefix})"),
            Self::Relay => f.write_str("relay"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_normalization() {
        let domain = Domain::parse("Example.COM.").unwrap();
        assert_eq!(domain.as_str(), "example.com");
        assert_eq!(domain.to_string(), "example.com");
    }

    #[test]
    fn test_domain_rejects_empty_labels() {
        assert!(matches!(
            Domain::parse("example..com"),
            Err(AddressError::InvalidDomain(_))
        ));
        assert_eq!(Domain::parse("."), Err(AddressError::EmptyDomain));
        assert_eq!(Domain::parse(""), Err(AddressError::EmptyDomain));
    }

    #[test]
    fn test_domain_rejects_illegal_characters() {
        assert_eq!(
            Domain::parse("exa mple.com"),
            Err(AddressError::IllegalCharacter(' '))
        );
        assert_eq!(
            Domain::parse("exa/mple.com"),
            Err(AddressError::IllegalCharacter('/'))
        );
    }

    #[test]
    fn test_domain_literal() {
        let domain = Domain::parse("[192.0.2.1]").unwrap();
        assert_eq!(domain.as_str(), "[192.0.2.1]");
        assert!(Domain::parse("[192.0.2.1").is_err());
    }

    #[test]
    fn test_domain_suffixes() {
        let domain = Domain::parse("a.b.example.com").unwrap();
        let suffixes: Vec<_> = domain.suffixes().collect();
        assert_eq!(suffixes, vec![".b.example.com", ".example.com", ".com"]);

        let bare = Domain::parse("localhost").unwrap();
        assert_eq!(bare.suffixes().count(), 0);
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(DomainClassification::Local.to_string(), "local");
        assert_eq!(
            DomainClassification::Virtual("vhost".to_string()).to_string(),
            "virtual(vhost)"
        );
        assert!(DomainClassification::Virtual(String::new()).is_local_delivery());
        assert!(!DomainClassification::Relay.is_local_delivery());
    }
}
