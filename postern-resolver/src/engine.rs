//! The decision procedure
//!
//! 1. Classify the domain. Relay domains are accepted outright; unknown
//!    domains follow the configured policy.
//! 2. Virtual domains rewrite the local-part to `prefix-local`.
//! 3. Assign the local-part to an owner and extension through the user
//!    sources, falling back to the domain catch-all owner. Then find the
//!    first delivery-instruction file that exists for it and read what it
//!    says.
//!
//! The engine never mutates anything and converts every backend failure
//! into a Deferred verdict.

use std::{sync::Arc, time::Duration};

use postern_common::{
    Address, Diagnostic, DomainClassification, Verdict,
    verdict::reason,
};
use tracing::{debug, warn};

use crate::{
    dotfile::{
        DotFileResolver, DotFileStore, MatchedFile,
        directive::{self, Directive, Programs},
    },
    error::{BackendError, ConfigError},
    store::{ConfigStore, Snapshot},
    users::{Assignment, UserRecord, UserSource},
};

/// Owner name used for the domain-level catch-all.
pub const ALIAS_USER: &str = "alias";

/// A verdict and the configuration generation it was computed against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub generation: u64,
}

#[derive(Debug)]
pub struct Engine {
    store: Arc<ConfigStore>,
    dotfiles: DotFileResolver,
}

impl Engine {
    pub fn new(store: Arc<ConfigStore>, files: Arc<dyn DotFileStore>) -> Self {
        let settings = store.settings();
        let alias = settings
            .alias_home
            .as_ref()
            .map(|home| UserRecord::new(ALIAS_USER, 0, 0, home.clone()));
        let dotfiles = DotFileResolver::new(
            files,
            settings.dotfile_prefix.clone(),
            settings.separator,
            alias,
        );

        Self { store, dotfiles }
    }

    fn backend_timeout(&self) -> Duration {
        self.store.settings().backend_timeout()
    }

    /// Decide whether `address` would be accepted.
    #[tracing::instrument(level = "debug", skip(self, address), fields(address = %address))]
    pub async fn decide(&self, address: &Address, hint: Option<&str>) -> Decision {
        let snapshot = self.store.snapshot();
        let generation = snapshot.generation();

        let verdict = match snapshot.classify_address(address, hint) {
            Ok(classification) => self.decide_for(&snapshot, address, classification).await,
            Err(ConfigError::UnknownTenant(name)) => {
                debug!("Query named unknown context {name}");
                Verdict::undeliverable().with_note("unknown context")
            }
            Err(err) => {
                warn!("Classification failed: {err}");
                Verdict::deferred(reason::BACKEND_ERROR)
            }
        };

        debug!("Decided {verdict} (generation {generation})");
        Decision {
            verdict,
            generation,
        }
    }

    async fn decide_for(
        &self,
        snapshot: &Snapshot,
        address: &Address,
        classification: DomainClassification,
    ) -> Verdict {
        let separator = self.store.settings().separator;
        let local_part = address.local_part();

        let local = match classification {
            DomainClassification::Relay => {
                return Verdict::deliverable().with_note("relay domain");
            }
            DomainClassification::Unknown => {
                return if self.store.settings().accept_unknown_domains {
                    Verdict::deliverable().with_note("unknown domain accepted")
                } else {
                    Verdict::undeliverable().with_note("domain not handled here")
                };
            }
            DomainClassification::Local => local_part.to_string(),
            DomainClassification::Virtual(prefix) => format!("{prefix}{separator}{local_part}"),
        };

        self.mailbox(snapshot, &local).await.unwrap_or_else(|err| {
            if matches!(err, BackendError::Timeout) {
                warn!("Backend lookup for {address} timed out");
                Verdict::deferred(reason::BACKEND_TIMEOUT)
            } else {
                warn!("Backend lookup for {address} failed: {err}");
                Verdict::deferred(reason::BACKEND_ERROR)
            }
        })
    }

    /// Resolve a (possibly rewritten) local-part to a verdict.
    async fn mailbox(&self, snapshot: &Snapshot, local: &str) -> Result<Verdict, BackendError> {
        let separator = self.store.settings().separator;
        let assignment = tokio::time::timeout(
            self.backend_timeout(),
            snapshot.users().assign(local, separator),
        )
        .await??;

        let (assignment, unowned) = match assignment {
            Some(assignment) => (assignment, false),
            None => match self.dotfiles.domain_owner() {
                Some(alias) => {
                    debug!("Nobody owns {local}, checking the catch-all owner");
                    let assignment = Assignment {
                        owner: alias.clone(),
                        extension: Some(local.to_string()),
                    };
                    (assignment, true)
                }
                None => return Ok(Verdict::undeliverable().with_note("no such user")),
            },
        };

        let Assignment { owner, extension } = assignment;
        let chain = self.dotfiles.resolve(&owner.name, extension.as_deref());
        let matched = tokio::time::timeout(
            self.backend_timeout(),
            self.dotfiles.first_existing(&owner, &chain),
        )
        .await??;

        Ok(matched.map_or_else(
            || {
                let note = if unowned {
                    "no such user"
                } else {
                    "no delivery instructions"
                };
                Verdict::undeliverable().with_note(note)
            },
            |matched| self.interpret(&matched),
        ))
    }

    fn interpret(&self, matched: &MatchedFile) -> Verdict {
        let settings = self.store.settings();
        let programs = Programs {
            bounce: &settings.bounce_programs,
            delegation: &settings.delegation_programs,
        };

        let directive = directive::classify(&matched.content, &programs);
        debug!(
            "{} in {}'s {} is a {} directive",
            matched.candidate,
            matched.owner,
            matched.file,
            directive.label()
        );

        let diagnostic =
            Diagnostic::matched(&matched.candidate, matched.catch_all).with_note(directive.label());
        let verdict = if directive.accepts() {
            Verdict::deliverable()
        } else {
            Verdict::undeliverable()
        };

        if let Directive::Forward(target) | Directive::Delegate(target) = &directive {
            debug!("Not following {} to {target}", directive.label());
        }

        verdict.with_diagnostic(diagnostic)
    }
}
