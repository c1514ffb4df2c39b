use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::{domain::Domain, error::AddressError};

const MAX_LOCAL_PART_LENGTH: usize = 64;

/// A normalized envelope recipient
///
/// The domain is always lowercase. The local-part is lowercased unless the
/// deployment treats local-parts case-sensitively.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    local_part: String,
    domain: Domain,
}

impl Address {
    /// Parse and normalize a raw recipient such as `<Alice-Ext@Example.com>`.
    ///
    /// The delimiter is the only `@` that is neither backslash-escaped nor
    /// inside a quoted local-part.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] describing the first problem found.
    pub fn parse(raw: &str, case_sensitive_local_part: bool) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let unbracketed = trimmed
            .strip_prefix('<')
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(trimmed);

        if unbracketed.is_empty() {
            return Err(AddressError::Empty);
        }

        let delimiter = find_delimiter(unbracketed)?;
        let (local_part, domain) = (&unbracketed[..delimiter], &unbracketed[delimiter + 1..]);

        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart);
        }
        if local_part.len() > MAX_LOCAL_PART_LENGTH {
            return Err(AddressError::TooLong {
                part: "local-part",
                limit: MAX_LOCAL_PART_LENGTH,
            });
        }

        let domain = Domain::parse(domain)?;
        let local_part = if case_sensitive_local_part {
            local_part.to_string()
        } else {
            local_part.to_lowercase()
        };

        Ok(Self { local_part, domain })
    }

    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }
}

/// Locate the single unescaped, unquoted `@`.
fn find_delimiter(raw: &str) -> Result<usize, AddressError> {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut delimiter = None;

    for (index, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }

        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '@' if !in_quotes => {
                if delimiter.replace(index).is_some() {
                    return Err(AddressError::MultipleDelimiters);
                }
            }
            c if c.is_control() => return Err(AddressError::IllegalCharacter(c)),
            c if c.is_whitespace() && !in_quotes => {
                return Err(AddressError::IllegalCharacter(c));
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(AddressError::UnterminatedQuote);
    }

    delimiter.ok_or(AddressError::MissingDelimiter)
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}
