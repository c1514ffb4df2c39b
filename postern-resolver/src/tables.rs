//! Domain tables loaded from a qmail-style control directory
//!
//! - `locals`: one domain per line, delivered to local users.
//! - `virtualdomains`: `user@domain:prefix`, `domain:prefix` or
//!   `.suffix:prefix`; an empty prefix exempts an address or domain from a
//!   less specific entry.
//!
//! A domain listed in `locals` is local even when `virtualdomains` maps it.
//! Otherwise the most specific `virtualdomains` key wins: the full address,
//! then the domain, then its wildcard suffixes.
//! - `rcpthosts`: `domain` or `.suffix`, accepted for relaying.
//!
//! Blank lines and `#` comments are ignored, entries are lowercased and a
//! missing file is treated as empty.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
};

use postern_common::{Domain, DomainClassification};

use crate::{error::ConfigError, freshness::Freshness};

pub const LOCALS: &str = "locals";
pub const VIRTUAL_DOMAINS: &str = "virtualdomains";
pub const RCPT_HOSTS: &str = "rcpthosts";

/// Anything that can classify a recipient domain
pub trait DomainSource: Send + Sync {
    fn lookup_domain(&self, domain: &Domain) -> DomainClassification;

    /// Classify one recipient. Sources without per-address entries only
    /// look at the domain.
    fn lookup_address(&self, _local_part: &str, domain: &Domain) -> DomainClassification {
        self.lookup_domain(domain)
    }

    /// Files whose modification invalidates this source.
    fn backing_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Returns `true` if this source no longer matches `token`.
    fn changed_since(&self, token: &Freshness) -> bool {
        token.changed_for(&self.backing_files())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainTable {
    control_dir: PathBuf,
    locals: HashSet<String>,
    virtuals: HashMap<String, String>,
    relays: HashSet<String>,
}

impl DomainTable {
    /// Load all three tables from `control_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a table exists but cannot be read, or if a
    /// `virtualdomains` entry lacks its `:` separator.
    pub fn load(control_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let control_dir = control_dir.into();

        let locals = read_lines(&control_dir.join(LOCALS))?
            .into_iter()
            .map(|(_, line)| line)
            .collect();

        let relays = read_lines(&control_dir.join(RCPT_HOSTS))?
            .into_iter()
            .map(|(_, line)| line)
            .collect();

        let path = control_dir.join(VIRTUAL_DOMAINS);
        let mut virtuals = HashMap::new();
        for (number, line) in read_lines(&path)? {
            let Some((key, prefix)) = line.split_once(':') else {
                return Err(ConfigError::malformed(&path, number, "missing ':'"));
            };
            if key.is_empty() || key.ends_with('@') {
                return Err(ConfigError::malformed(&path, number, "empty domain"));
            }
            virtuals.insert(key.to_string(), prefix.to_string());
        }

        Ok(Self {
            control_dir,
            locals,
            virtuals,
            relays,
        })
    }

    /// Build a table directly, mostly useful for tests.
    pub fn from_entries<'a>(
        locals: impl IntoIterator<Item = &'a str>,
        virtuals: impl IntoIterator<Item = (&'a str, &'a str)>,
        relays: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            control_dir: PathBuf::new(),
            locals: locals.into_iter().map(str::to_ascii_lowercase).collect(),
            virtuals: virtuals
                .into_iter()
                .map(|(domain, prefix)| (domain.to_ascii_lowercase(), prefix.to_string()))
                .collect(),
            relays: relays.into_iter().map(str::to_ascii_lowercase).collect(),
        }
    }

    /// Virtual mapping for an address: the `user@domain` key when given,
    /// then the domain, then its wildcard suffixes.
    ///
    /// `Some("")` means the address or domain is explicitly exempted.
    fn virtual_prefix(&self, address: Option<&str>, domain: &Domain) -> Option<&str> {
        address
            .into_iter()
            .chain(std::iter::once(domain.as_str()))
            .chain(domain.suffixes())
            .find_map(|key| self.virtuals.get(key))
            .map(String::as_str)
    }

    fn classify(&self, address: Option<&str>, domain: &Domain) -> DomainClassification {
        if self.locals.contains(domain.as_str()) {
            return DomainClassification::Local;
        }

        match self.virtual_prefix(address, domain) {
            Some(prefix) if !prefix.is_empty() => DomainClassification::Virtual(prefix.to_string()),
            _ if self.is_relay(domain) => DomainClassification::Relay,
            _ => DomainClassification::Unknown,
        }
    }

    fn is_relay(&self, domain: &Domain) -> bool {
        std::iter::once(domain.as_str())
            .chain(domain.suffixes())
            .any(|key| self.relays.contains(key))
    }
}

impl DomainSource for DomainTable {
    fn lookup_domain(&self, domain: &Domain) -> DomainClassification {
        self.classify(None, domain)
    }

    fn lookup_address(&self, local_part: &str, domain: &Domain) -> DomainClassification {
        let address = format!("{}@{domain}", local_part.to_ascii_lowercase());
        self.classify(Some(&address), domain)
    }

    fn backing_files(&self) -> Vec<PathBuf> {
        if self.control_dir.as_os_str().is_empty() {
            return Vec::new();
        }

        [LOCALS, VIRTUAL_DOMAINS, RCPT_HOSTS]
            .iter()
            .map(|name| self.control_dir.join(name))
            .collect()
    }
}

/// Read a control file into `(line number, entry)` pairs.
fn read_lines(path: &Path) -> Result<Vec<(usize, String)>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    Ok(content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| (number, line.to_ascii_lowercase()))
        .collect())
}
