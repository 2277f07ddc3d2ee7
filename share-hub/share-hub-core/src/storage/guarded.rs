//! Access-controlled storage: every operation is authorized against the
//! caller's rules before it reaches the backend.

use std::io::Write;
use std::sync::Arc;

use serde::Serialize;

use super::{DirEntry, FileWriter, Opened, StorageBackend};
use crate::acl::{AccessLevel, AccessPolicy, Clearance, Principal, RuleSet};
use crate::archive;
use crate::error::{Result, StorageError};
use crate::path::SharePath;

/// Resolved read/write permissions of a principal on one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

/// Storage facade handed to front ends. Paths are caller supplied and are
/// canonicalised once; the canonical path is what gets authorized and what
/// reaches the backend.
#[derive(Clone)]
pub struct AclStorage {
    backend: Arc<dyn StorageBackend>,
    policy: AccessPolicy,
}

impl AclStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, default_rules: RuleSet) -> Self {
        Self {
            backend,
            policy: AccessPolicy::new(default_rules),
        }
    }

    fn permits(&self, principal: &Principal, path: &SharePath, access: AccessLevel) -> bool {
        let allowed = self.policy.permits(principal, path, access);
        if !allowed {
            tracing::debug!(user = principal.name(), path = %path, ?access, "access denied");
        }
        allowed
    }

    /// Create or truncate a file. Requires write access.
    pub fn create_file(&self, path: &str, principal: &Principal) -> Result<FileWriter> {
        let path = SharePath::parse(path);
        if !self.permits(principal, &path, AccessLevel::Write) {
            return Err(StorageError::WriteForbidden(path.to_string()));
        }
        self.backend.create_file(&path)
    }

    /// Open a file or stat a directory. Requires read access.
    pub fn open_file(&self, path: &str, principal: &Principal) -> Result<Opened> {
        let path = SharePath::parse(path);
        if !self.permits(principal, &path, AccessLevel::Read) {
            return Err(StorageError::ReadForbidden(path.to_string()));
        }
        self.backend.open_file(&path)
    }

    /// List a directory.
    ///
    /// The directory itself is not gated. Every entry is authorized on its
    /// own and entries the principal cannot read are left out of the result
    /// without an error, so an empty listing is a normal outcome.
    pub fn read_dir(&self, path: &str, principal: &Principal) -> Result<Vec<DirEntry>> {
        let path = SharePath::parse(path);
        let entries = self.backend.read_dir(&path)?;
        let rules = match principal.clearance() {
            Clearance::Administrator => return Ok(entries),
            Clearance::Restricted(rules) => rules,
        };

        let total = entries.len();
        let visible: Vec<DirEntry> = entries
            .into_iter()
            .filter(|entry| {
                self.policy
                    .evaluate(rules, &path.join(entry.name()), AccessLevel::Read)
                    .is_allowed()
            })
            .collect();
        tracing::debug!(
            user = principal.name(),
            path = %path,
            total,
            visible = visible.len(),
            "filtered listing"
        );
        Ok(visible)
    }

    pub fn can_read(&self, path: &str, principal: &Principal) -> bool {
        self.policy
            .permits(principal, &SharePath::parse(path), AccessLevel::Read)
    }

    pub fn can_write(&self, path: &str, principal: &Principal) -> bool {
        self.policy
            .permits(principal, &SharePath::parse(path), AccessLevel::Write)
    }

    pub fn permissions(&self, path: &str, principal: &Principal) -> Permissions {
        Permissions {
            read: self.can_read(path, principal),
            write: self.can_write(path, principal),
        }
    }

    /// Stream `path` and everything visible below it into `sink` as a
    /// gzip-compressed tar archive. See [`archive::export_directory`].
    pub fn export_directory<W: Write>(&self, path: &str, principal: &Principal, sink: W) -> Result<W> {
        archive::export_directory(self, path, principal, sink)
    }
}
