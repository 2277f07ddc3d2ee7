//! Error types for the access-controlled storage layer.
//!
//! Request-time failures and startup failures are kept apart: nothing that
//! runs per request can produce a [`ConfigError`].

use std::io;

/// Failure of a storage operation performed on behalf of a principal.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("user is not allowed to read from {0}")]
    ReadForbidden(String),
    #[error("user is not allowed to write to {0}")]
    WriteForbidden(String),
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the two authorization failures.
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            StorageError::ReadForbidden(_) | StorageError::WriteForbidden(_)
        )
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Invalid configuration detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rule path must not be empty")]
    EmptyRulePath,
    #[error("rule path is not clean: {0}")]
    UncleanRulePath(String),
    #[error("invalid rule for {0}: write is allowed but read is denied")]
    WriteWithoutRead(String),
    #[error("duplicate rule for path {0}")]
    DuplicateRule(String),
    #[error("user name must not be empty")]
    EmptyUserName,
    #[error("duplicate user {0}")]
    DuplicateUser(String),
    #[error("anonymous access is enabled but no anonymous user is configured")]
    MissingAnonymousUser,
    #[error("invalid log level {0}")]
    InvalidLogLevel(String),
}
