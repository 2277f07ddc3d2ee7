//! Storage backends and the access-controlled wrapper around them.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::path::SharePath;

pub mod guarded;
pub mod local;
pub mod memory;

pub use guarded::{AclStorage, Permissions};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Writable stream returned by [`StorageBackend::create_file`].
pub type FileWriter = Box<dyn Write + Send>;
/// Readable stream returned by [`StorageBackend::open_file`].
pub type FileReader = Box<dyn Read + Send>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    metadata: Metadata,
}

impl DirEntry {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// Result of opening a path: a stream for files, metadata only for
/// directories.
pub enum Opened {
    File { reader: FileReader, metadata: Metadata },
    Directory(Metadata),
}

impl Opened {
    pub fn metadata(&self) -> &Metadata {
        match self {
            Opened::File { metadata, .. } => metadata,
            Opened::Directory(metadata) => metadata,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Opened::Directory(_))
    }
}

impl std::fmt::Debug for Opened {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opened::File { metadata, .. } => f.debug_tuple("File").field(metadata).finish(),
            Opened::Directory(metadata) => f.debug_tuple("Directory").field(metadata).finish(),
        }
    }
}

/// Trusted byte store addressed by share paths. Implementations perform no
/// permission checks; [`AclStorage`] does that before delegating.
pub trait StorageBackend: Send + Sync {
    /// Create or truncate a file.
    fn create_file(&self, path: &SharePath) -> Result<FileWriter>;
    /// Open a file for reading, or stat a directory.
    fn open_file(&self, path: &SharePath) -> Result<Opened>;
    /// List a directory, sorted by name.
    fn read_dir(&self, path: &SharePath) -> Result<Vec<DirEntry>>;
}
