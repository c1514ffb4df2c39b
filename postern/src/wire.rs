//! Line-based query protocol spoken over TCP and UDP
//!
//! ```text
//! C: <alice-foo@example.com> hub-b
//! S: OK matched=alice-default catch-all deliver
//! C: nobody@example.com
//! S: NO no such user
//! C: bob@slow.example
//! S: DEFER backend-timeout
//! ```
//!
//! A request is an address, optionally followed by a single space and a
//! hosting-context hint, terminated by LF or CRLF.

use std::fmt::{self, Display};

use postern_common::{Verdict, VerdictKind};
use thiserror::Error;

/// One parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLine<'a> {
    pub address: &'a str,
    pub hint: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Option<String>),
    No(Option<String>),
    Defer(String),
}

impl Reply {
    /// Answer for input that never reached the resolver.
    pub fn malformed(detail: impl Display) -> Self {
        Self::No(Some(format!("malformed: {detail}")))
    }

    /// The reply followed by its line terminator.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = self.to_string().into_bytes();
        line.push(b'\n');
        line
    }
}

impl From<&Verdict> for Reply {
    fn from(verdict: &Verdict) -> Self {
        let detail = verdict
            .diagnostic
            .as_ref()
            .map(ToString::to_string)
            .filter(|detail| !detail.is_empty());

        match &verdict.kind {
            VerdictKind::Deliverable => Self::Ok(detail),
            VerdictKind::Undeliverable => Self::No(detail),
            VerdictKind::Deferred(reason) => Self::Defer(reason.clone()),
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (status, detail) = match self {
            Self::Ok(detail) => ("OK", detail.as_deref()),
            Self::No(detail) => ("NO", detail.as_deref()),
            Self::Defer(reason) => ("DEFER", Some(reason.as_str())),
        };

        match detail {
            Some(detail) => write!(f, "{status} {detail}"),
            None => f.write_str(status),
        }
    }
}

/// Why a request line was rejected before address validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("empty request")]
    Empty,
    #[error("request is not valid UTF-8")]
    NotUtf8,
    #[error("request exceeds {0} bytes")]
    TooLong(usize),
    #[error("unexpected data after context hint")]
    TrailingData,
}

/// Parse one request, with or without its line terminator.
///
/// The address may contain spaces inside a quoted local-part; the hint is
/// whatever follows the first space outside quotes.
pub fn parse_line(raw: &[u8], max_length: usize) -> Result<QueryLine<'_>, LineError> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    if raw.len() > max_length {
        return Err(LineError::TooLong(max_length));
    }

    let line = std::str::from_utf8(raw).map_err(|_| LineError::NotUtf8)?;
    if line.trim().is_empty() {
        return Err(LineError::Empty);
    }

    let Some(split) = hint_separator(line) else {
        return Ok(QueryLine {
            address: line,
            hint: None,
        });
    };

    let (address, hint) = (&line[..split], line[split + 1..].trim());
    if hint.chars().any(char::is_whitespace) {
        return Err(LineError::TrailingData);
    }

    Ok(QueryLine {
        address,
        hint: (!hint.is_empty()).then_some(hint),
    })
}

fn hint_separator(line: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (index, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => return Some(index),
            _ => {}
        }
    }

    None
}
