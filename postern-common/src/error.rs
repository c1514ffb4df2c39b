//! Error types shared by every postern crate.

use thiserror::Error;

/// Reasons an envelope recipient can be rejected before any lookup happens.
///
/// These are always client errors: the caller gets an Undeliverable-shaped
/// answer and must not retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Nothing left after trimming whitespace and angle brackets.
    #[error("empty address")]
    Empty,

    /// No unescaped, unquoted `@` was found.
    #[error("missing '@' delimiter")]
    MissingDelimiter,

    /// More than one unescaped, unquoted `@` was found.
    #[error("more than one '@' delimiter")]
    MultipleDelimiters,

    /// A quoted local-part was opened but never closed.
    #[error("unterminated quoted local-part")]
    UnterminatedQuote,

    #[error("empty local-part")]
    EmptyLocalPart,

    #[error("empty domain")]
    EmptyDomain,

    /// Whitespace or a control character outside of a quoted string.
    #[error("illegal character {0:?}")]
    IllegalCharacter(char),

    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// Local-part or domain exceeds the RFC 5321 length limits.
    #[error("{part} exceeds {limit} octets")]
    TooLong { part: &'static str, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_error_display() {
        assert_eq!(
            AddressError::MissingDelimiter.to_string(),
            "missing '@' delimiter"
        );
        assert_eq!(
            AddressError::TooLong {
                part: "local-part",
                limit: 64
            }
            .to_string(),
            "local-part exceeds 64 octets"
        );
        assert_eq!(
            AddressError::IllegalCharacter(' ').to_string(),
            "illegal character ' '"
        );
    }
}
