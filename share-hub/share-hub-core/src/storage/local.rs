//! Backend rooted at a directory on the local filesystem.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{DirEntry, FileWriter, Metadata, Opened, StorageBackend};
use crate::error::{Result, StorageError};
use crate::path::SharePath;

/// Files live under `base`; a [`SharePath`] cannot climb above it.
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    /// Create a backend rooted at `base`, which must be an existing
    /// directory.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        let meta = fs::metadata(&base).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(base.display().to_string()),
            _ => StorageError::io(base.display().to_string(), e),
        })?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(base.display().to_string()));
        }
        Ok(Self { base })
    }

    fn resolve(&self, path: &SharePath) -> PathBuf {
        path.to_host_path(&self.base)
    }

    fn stat(&self, path: &SharePath) -> Result<fs::Metadata> {
        fs::metadata(self.resolve(path)).map_err(|e| map_io(path, e))
    }
}

fn map_io(path: &SharePath, err: io::Error) -> StorageError {
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        _ => StorageError::io(path.to_string(), err),
    }
}

fn to_metadata(name: &str, meta: &fs::Metadata) -> Metadata {
    Metadata {
        name: name.to_string(),
        is_dir: meta.is_dir(),
        size: if meta.is_dir() { 0 } else { meta.len() },
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
    }
}

impl StorageBackend for LocalStorage {
    fn create_file(&self, path: &SharePath) -> Result<FileWriter> {
        let host = self.resolve(path);
        if path.is_root() || host.is_dir() {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        let file = File::create(&host).map_err(|e| StorageError::io(path.to_string(), e))?;
        tracing::debug!(path = %path, "created file");
        Ok(Box::new(file))
    }

    fn open_file(&self, path: &SharePath) -> Result<Opened> {
        let meta = self.stat(path)?;
        let metadata = to_metadata(path.file_name().unwrap_or(""), &meta);
        if meta.is_dir() {
            return Ok(Opened::Directory(metadata));
        }
        let file = File::open(self.resolve(path)).map_err(|e| map_io(path, e))?;
        Ok(Opened::File {
            reader: Box::new(file),
            metadata,
        })
    }

    fn read_dir(&self, path: &SharePath) -> Result<Vec<DirEntry>> {
        if !self.stat(path)?.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(path)).map_err(|e| map_io(path, e))? {
            let entry = entry.map_err(|e| StorageError::io(path.to_string(), e))?;
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(dir = %path, "skipping entry with non UTF-8 name");
                continue;
            };
            // follow symlinks so the entry agrees with open_file
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(dir = %path, name = %name, "skipping dangling entry");
                    continue;
                }
                Err(e) => return Err(StorageError::io(path.join(&name).to_string(), e)),
            };
            entries.push(DirEntry::new(to_metadata(&name, &meta)));
        }
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(entries)
    }
}
