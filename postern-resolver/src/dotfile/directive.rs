//! Interpretation of a matched delivery-instruction file
//!
//! Only enough of the file is understood to decide acceptance. Forwards and
//! delegations are terminal: their targets are never resolved.

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// A program that rejects the message, e.g. `|bouncesaying ...`.
    Bounce(String),
    /// Delivery handed to another resolver, e.g. `|vdelivermail ...`.
    Delegate(String),
    /// `&addr` or a bare address line.
    Forward(String),
    /// Mailbox, maildir or any other program.
    Deliver,
    /// No instruction lines at all.
    Empty,
}

impl Directive {
    pub const fn accepts(&self) -> bool {
        !matches!(self, Self::Bounce(_))
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Bounce(_) => "bounce",
            Self::Delegate(_) => "delegate",
            Self::Forward(_) => "forward",
            Self::Deliver => "deliver",
            Self::Empty => "empty",
        }
    }
}

/// Program names recognised while classifying a file
#[derive(Debug, Clone, Default)]
pub struct Programs<'a> {
    pub bounce: &'a [String],
    pub delegation: &'a [String],
}

impl Programs<'_> {
    fn contains(list: &[String], program: &str) -> bool {
        let name = Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(program);
        list.iter().any(|candidate| candidate == name || candidate == program)
    }
}

/// Classify file contents. Precedence is bounce, delegate, forward, deliver.
pub fn classify(content: &str, programs: &Programs<'_>) -> Directive {
    let mut delegate = None;
    let mut forward = None;
    let mut deliver = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(command) = line.strip_prefix('|') {
            let command = command.trim();
            let program = command.split_whitespace().next().unwrap_or_default();

            if Programs::contains(programs.bounce, program) || is_hard_exit(command) {
                return Directive::Bounce(command.to_string());
            }
            if Programs::contains(programs.delegation, program) {
                delegate.get_or_insert_with(|| command.to_string());
            } else {
                deliver = true;
            }
        } else if let Some(target) = line.strip_prefix('&') {
            forward.get_or_insert_with(|| target.trim().to_string());
        } else if line.starts_with('.') || line.starts_with('/') {
            deliver = true;
        } else {
            forward.get_or_insert_with(|| line.to_string());
        }
    }

    if let Some(command) = delegate {
        Directive::Delegate(command)
    } else if let Some(target) = forward {
        Directive::Forward(target)
    } else if deliver {
        Directive::Deliver
    } else {
        Directive::Empty
    }
}

/// `exit 100` is the permanent-failure status for delivery programs.
fn is_hard_exit(command: &str) -> bool {
    let mut words = command.split_whitespace();
    words.next() == Some("exit") && words.next() == Some("100")
}
