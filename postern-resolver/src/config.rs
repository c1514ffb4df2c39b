//! Resolver settings as they appear in the daemon configuration file
//!
//! ```ron
//! resolver: (
//!     control_dir: "/var/qmail/control",
//!     users: [
//!         Assign(path: "/var/qmail/users/assign"),
//!         Passwd(path: "/etc/passwd"),
//!     ],
//!     alias_home: Some("/var/qmail/alias"),
//!     accept_unknown_domains: false,
//!     tenants: {
//!         "hub-b": (control_dir: "/var/qmail/hub-b/control"),
//!     },
//!     cache: (capacity: 4096, ttl_secs: 300),
//! )
//! ```

use std::{collections::HashMap, num::NonZeroUsize, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Directory holding `locals`, `virtualdomains` and `rcpthosts` for the
    /// default hosting context.
    #[serde(default = "defaults::control_dir")]
    pub control_dir: PathBuf,

    /// Additional hosting contexts, selected by the query hint.
    #[serde(default)]
    pub tenants: HashMap<String, TenantConfig>,

    /// Local-User Sources, consulted in order.
    #[serde(default = "defaults::users")]
    pub users: Vec<UserSourceConfig>,

    /// Home directory of the owner that receives mail for unknown users.
    #[serde(default = "defaults::alias_home")]
    pub alias_home: Option<PathBuf>,

    /// File name prefix of delivery-instruction files.
    #[serde(default = "defaults::dotfile_prefix")]
    pub dotfile_prefix: String,

    /// Character separating the user from extension segments.
    #[serde(default = "defaults::separator")]
    pub separator: char,

    /// Accept recipients in domains nothing else claims.
    #[serde(default)]
    pub accept_unknown_domains: bool,

    /// Keep the local-part's case instead of lowercasing it.
    #[serde(default)]
    pub case_sensitive_local_part: bool,

    /// Programs that, when piped to, reject the message.
    #[serde(default = "defaults::bounce_programs")]
    pub bounce_programs: Vec<String>,

    /// Programs that take over delivery and are known to accept.
    #[serde(default = "defaults::delegation_programs")]
    pub delegation_programs: Vec<String>,

    /// Deadline for each Local-User Source or dot-file lookup.
    ///
    /// Default: 2000 milliseconds
    #[serde(default = "defaults::backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// How often backing files are checked for modification.
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::reload_interval_secs")]
    pub reload_interval_secs: u64,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// A hosting context with its own domain tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub control_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserSourceConfig {
    /// A qmail `users/assign` file.
    Assign { path: PathBuf },
    /// An `/etc/passwd`-format file.
    Passwd { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached verdicts.
    ///
    /// Default: 4096
    #[serde(default = "defaults::cache_capacity")]
    pub capacity: usize,

    /// Maximum age of a cached verdict.
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::cache_capacity(),
            ttl_secs: defaults::cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// # Errors
    ///
    /// Returns an error when the capacity is zero.
    pub fn capacity(&self) -> Result<NonZeroUsize, ConfigError> {
        NonZeroUsize::new(self.capacity).ok_or_else(|| ConfigError::InvalidSetting {
            field: "cache.capacity",
            reason: "must be greater than zero".to_string(),
        })
    }

    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            control_dir: defaults::control_dir(),
            tenants: HashMap::new(),
            users: defaults::users(),
            alias_home: defaults::alias_home(),
            dotfile_prefix: defaults::dotfile_prefix(),
            separator: defaults::separator(),
            accept_unknown_domains: false,
            case_sensitive_local_part: false,
            bounce_programs: defaults::bounce_programs(),
            delegation_programs: defaults::delegation_programs(),
            backend_timeout_ms: defaults::backend_timeout_ms(),
            reload_interval_secs: defaults::reload_interval_secs(),
            cache: CacheConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub const fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub const fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    /// Check settings that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.capacity()?;

        if self.separator.is_alphanumeric() || self.separator == '@' {
            return Err(ConfigError::InvalidSetting {
                field: "separator",
                reason: format!("{:?} cannot separate extensions", self.separator),
            });
        }
        if self.dotfile_prefix.is_empty() || self.dotfile_prefix.contains('/') {
            return Err(ConfigError::InvalidSetting {
                field: "dotfile_prefix",
                reason: "must be a non-empty file name".to_string(),
            });
        }
        if self.backend_timeout_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "backend_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.reload_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "reload_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::UserSourceConfig;

    pub fn control_dir() -> PathBuf {
        PathBuf::from("/var/qmail/control")
    }

    pub fn users() -> Vec<UserSourceConfig> {
        vec![
            UserSourceConfig::Assign {
                path: PathBuf::from("/var/qmail/users/assign"),
            },
            UserSourceConfig::Passwd {
                path: PathBuf::from("/etc/passwd"),
            },
        ]
    }

    #[allow(clippy::unnecessary_wraps, reason = "serde default for an Option field")]
    pub fn alias_home() -> Option<PathBuf> {
        Some(PathBuf::from("/var/qmail/alias"))
    }

    pub fn dotfile_prefix() -> String {
        ".qmail".to_string()
    }

    pub const fn separator() -> char {
        '-'
    }

    pub fn bounce_programs() -> Vec<String> {
        vec!["bouncesaying".to_string()]
    }

    pub fn delegation_programs() -> Vec<String> {
        vec!["vdelivermail".to_string()]
    }

    pub const fn backend_timeout_ms() -> u64 {
        2000
    }

    pub const fn reload_interval_secs() -> u64 {
        5
    }

    pub const fn cache_capacity() -> usize {
        4096
    }

    pub const fn cache_ttl_secs() -> u64 {
        300
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.separator, '-');
        assert_eq!(config.dotfile_prefix, ".qmail");
        assert_eq!(config.backend_timeout(), Duration::from_secs(2));
        assert!(!config.accept_unknown_domains);
        assert_eq!(config.users.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_config_format() {
        let config: ResolverConfig = ron::from_str(
            r#"(
                control_dir: "/srv/mail/control",
                users: [Passwd(path: "/srv/mail/passwd")],
                alias_home: None,
                accept_unknown_domains: true,
                tenants: {
                    "hub-b": (control_dir: "/srv/hub-b/control"),
                },
                cache: (capacity: 16),
            )"#,
        )
        .unwrap();

        assert_eq!(config.control_dir, PathBuf::from("/srv/mail/control"));
        assert_eq!(
            config.users,
            vec![UserSourceConfig::Passwd {
                path: PathBuf::from("/srv/mail/passwd")
            }]
        );
        assert!(config.alias_home.is_none());
        assert!(config.accept_unknown_domains);
        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.cache.ttl_secs, 300);
        assert!(config.tenants.contains_key("hub-b"));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let config = ResolverConfig {
            separator: 'x',
            ..ResolverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting {
                field: "separator",
                ..
            })
        ));

        let config = ResolverConfig {
            cache: CacheConfig {
                capacity: 0,
                ttl_secs: 1,
            },
            ..ResolverConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
