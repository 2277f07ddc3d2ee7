//! Startup configuration: storage root, rule lists and the user directory.
//!
//! Everything is validated once at load time. Rule lists are validated while
//! deserializing (see [`RuleSet`]); cross-entry checks run in
//! [`ShareConfig::validate`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::acl::{Principal, RuleSet, ANONYMOUS_USER};
use crate::error::{ConfigError, StorageError};
use crate::storage::{AclStorage, LocalStorage};

pub const DEFAULT_CONFIG_FILE: &str = "share-hub.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn default_log_level() -> String {
    "info".to_string()
}

/// One entry of the user directory.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub acl: RuleSet,
}

impl UserConfig {
    pub fn principal(&self) -> Principal {
        if self.admin {
            Principal::administrator(&self.name)
        } else {
            Principal::user(&self.name, self.acl.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// Host directory served as `/`.
    pub root: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub anonymous_access: bool,
    /// Rules for every non-administrator whose own rules are silent.
    #[serde(default)]
    pub default_acl: RuleSet,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl ShareConfig {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file without the cross-entry checks of
    /// [`ShareConfig::validate`]. Rule lists are still validated.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: ShareConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        let mut anonymous_found = false;
        for (i, user) in self.users.iter().enumerate() {
            if user.name.is_empty() {
                return Err(ConfigError::EmptyUserName);
            }
            if self.users[..i].iter().any(|u| u.name == user.name) {
                return Err(ConfigError::DuplicateUser(user.name.clone()));
            }
            if user.admin && !user.acl.is_empty() {
                tracing::warn!(user = %user.name, "redundant ACL for admin user");
            }
            if user.name == ANONYMOUS_USER {
                anonymous_found = true;
                if !self.anonymous_access {
                    tracing::warn!("anonymous user configured but anonymous access is disabled");
                }
            }
        }

        if self.anonymous_access && !anonymous_found {
            return Err(ConfigError::MissingAnonymousUser);
        }
        Ok(())
    }

    pub fn user(&self, name: &str) -> Option<&UserConfig> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Resolve a principal from the user directory.
    pub fn principal(&self, name: &str) -> Option<Principal> {
        self.user(name).map(UserConfig::principal)
    }

    /// The principal for unauthenticated callers, if anonymous access is on.
    pub fn anonymous(&self) -> Option<Principal> {
        if !self.anonymous_access {
            return None;
        }
        self.principal(ANONYMOUS_USER)
    }

    /// Access-controlled storage over the local directory at `root`.
    pub fn storage(&self) -> Result<AclStorage, StorageError> {
        let backend = LocalStorage::new(&self.root)?;
        Ok(AclStorage::new(Arc::new(backend), self.default_acl.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
root = "/srv/share"
anonymous_access = true

[[default_acl]]
path = "/public"
read = true

[[users]]
name = "alice"

[[users.acl]]
path = "/shared/reports"
read = true
write = true

[[users]]
name = "root"
admin = true

[[users]]
name = "anonymous"
"#;

    #[test]
    fn parse_sample() {
        let config = ShareConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/share"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.default_acl.len(), 1);

        let alice = config.principal("alice").unwrap();
        assert!(!alice.is_administrator());
        let rule = alice.rules().iter().next().unwrap();
        assert_eq!(rule.path().to_string(), "/shared/reports");
        assert!(rule.read() && rule.write());

        assert!(config.principal("root").unwrap().is_administrator());
        assert!(config.anonymous().unwrap().is_anonymous());
        assert!(config.principal("mallory").is_none());
    }

    #[test]
    fn rejects_write_without_read() {
        let raw = r#"
root = "/srv"
[[default_acl]]
path = "/x"
write = true
"#;
        let err = ShareConfig::from_toml(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("write is allowed but read is denied"));
    }

    #[test]
    fn rejects_unclean_and_duplicate_paths() {
        let unclean = r#"
root = "/srv"
[[default_acl]]
path = "/x/../y"
read = true
"#;
        let err = ShareConfig::from_toml(unclean).unwrap_err();
        assert!(err.to_string().contains("not clean"));

        let duplicate = r#"
root = "/srv"
[[default_acl]]
path = "/x"
read = true
[[default_acl]]
path = "/x"
read = false
"#;
        let err = ShareConfig::from_toml(duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate rule for path /x"));
    }

    #[test]
    fn rejects_duplicate_users() {
        let raw = r#"
root = "/srv"
[[users]]
name = "alice"
[[users]]
name = "alice"
"#;
        assert!(matches!(
            ShareConfig::from_toml(raw),
            Err(ConfigError::DuplicateUser(name)) if name == "alice"
        ));
    }

    #[test]
    fn anonymous_access_needs_anonymous_user() {
        let raw = r#"
root = "/srv"
anonymous_access = true
"#;
        assert!(matches!(
            ShareConfig::from_toml(raw),
            Err(ConfigError::MissingAnonymousUser)
        ));
    }

    #[test]
    fn anonymous_disabled_hides_anonymous_user() {
        let raw = r#"
root = "/srv"
[[users]]
name = "anonymous"
"#;
        let config = ShareConfig::from_toml(raw).unwrap();
        assert!(config.anonymous().is_none());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let raw = r#"
root = "/srv"
log_level = "loud"
"#;
        assert!(matches!(
            ShareConfig::from_toml(raw),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
