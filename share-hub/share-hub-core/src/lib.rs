pub mod acl;
pub mod archive;
pub mod config;
pub mod error;
pub mod path;
pub mod storage;

pub use acl::{AccessLevel, AccessPolicy, PathRule, Principal, RuleSet};
pub use config::ShareConfig;
pub use error::{ConfigError, StorageError};
pub use path::SharePath;
pub use storage::{AclStorage, LocalStorage, MemoryStorage, StorageBackend};
