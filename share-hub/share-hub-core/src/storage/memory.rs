//! In-memory backend used as a test double for the access-controlled layer.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Cursor, Read, Write};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{DirEntry, FileWriter, Metadata, Opened, StorageBackend};
use crate::error::{Result, StorageError};
use crate::path::SharePath;

#[derive(Clone, Debug)]
enum Node {
    Dir { modified: DateTime<Utc> },
    File { data: Vec<u8>, modified: DateTime<Utc> },
}

impl Node {
    fn metadata(&self, path: &SharePath) -> Metadata {
        let name = path.file_name().unwrap_or("").to_string();
        match self {
            Node::Dir { modified } => Metadata {
                name,
                is_dir: true,
                size: 0,
                modified: Some(*modified),
            },
            Node::File { data, modified } => Metadata {
                name,
                is_dir: false,
                size: data.len() as u64,
                modified: Some(*modified),
            },
        }
    }
}

type Tree = Arc<RwLock<BTreeMap<SharePath, Node>>>;

/// Tree of directories and files held in memory. Cloning shares the tree.
#[derive(Clone)]
pub struct MemoryStorage {
    nodes: Tree,
    unreadable: Arc<RwLock<HashSet<SharePath>>>,
    open_readers: Arc<AtomicUsize>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(SharePath::root(), Node::Dir { modified: Utc::now() });
        Self {
            nodes: Arc::new(RwLock::new(nodes)),
            unreadable: Arc::new(RwLock::new(HashSet::new())),
            open_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a directory and any missing parents.
    pub fn add_dir(&self, path: &str) -> &Self {
        let path = SharePath::parse(path);
        let mut nodes = self.nodes.write();
        Self::ensure_dirs(&mut nodes, &path);
        self
    }

    /// Create a file with `data`, creating missing parents.
    pub fn add_file(&self, path: &str, data: impl AsRef<[u8]>) -> &Self {
        let path = SharePath::parse(path);
        let mut nodes = self.nodes.write();
        if let Some(parent) = path.parent() {
            Self::ensure_dirs(&mut nodes, &parent);
        }
        nodes.insert(
            path,
            Node::File {
                data: data.as_ref().to_vec(),
                modified: Utc::now(),
            },
        );
        self
    }

    /// Make `open_file` fail with an I/O error for this path.
    pub fn make_unreadable(&self, path: &str) -> &Self {
        self.unreadable.write().insert(SharePath::parse(path));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.read().contains_key(&SharePath::parse(path))
    }

    /// Contents of a file, `None` for directories and missing paths.
    pub fn contents(&self, path: &str) -> Option<Bytes> {
        match self.nodes.read().get(&SharePath::parse(path)) {
            Some(Node::File { data, .. }) => Some(Bytes::copy_from_slice(data)),
            _ => None,
        }
    }

    /// Readers handed out by `open_file` and not yet dropped.
    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }

    fn ensure_dirs(nodes: &mut BTreeMap<SharePath, Node>, path: &SharePath) {
        let mut current = SharePath::root();
        for segment in path.segments() {
            current = current.join(segment);
            nodes
                .entry(current.clone())
                .or_insert_with(|| Node::Dir { modified: Utc::now() });
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn create_file(&self, path: &SharePath) -> Result<FileWriter> {
        let mut nodes = self.nodes.write();
        if let Some(Node::Dir { .. }) = nodes.get(path) {
            return Err(StorageError::IsADirectory(path.to_string()));
        }
        let parent_is_dir = path
            .parent()
            .map(|p| matches!(nodes.get(&p), Some(Node::Dir { .. })))
            .unwrap_or(false);
        if !parent_is_dir {
            let err = io::Error::new(io::ErrorKind::NotFound, "parent directory does not exist");
            return Err(StorageError::io(path.to_string(), err));
        }
        nodes.insert(
            path.clone(),
            Node::File {
                data: Vec::new(),
                modified: Utc::now(),
            },
        );
        Ok(Box::new(MemoryWriter {
            path: path.clone(),
            nodes: Arc::clone(&self.nodes),
        }))
    }

    fn open_file(&self, path: &SharePath) -> Result<Opened> {
        if self.unreadable.read().contains(path) {
            let err = io::Error::new(io::ErrorKind::PermissionDenied, "unreadable");
            return Err(StorageError::io(path.to_string(), err));
        }
        let nodes = self.nodes.read();
        let node = nodes
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let metadata = node.metadata(path);
        match node {
            Node::Dir { .. } => Ok(Opened::Directory(metadata)),
            Node::File { data, .. } => {
                self.open_readers.fetch_add(1, Ordering::SeqCst);
                Ok(Opened::File {
                    reader: Box::new(MemoryReader {
                        inner: Cursor::new(Bytes::copy_from_slice(data)),
                        open_readers: Arc::clone(&self.open_readers),
                    }),
                    metadata,
                })
            }
        }
    }

    fn read_dir(&self, path: &SharePath) -> Result<Vec<DirEntry>> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            None => return Err(StorageError::NotFound(path.to_string())),
            Some(Node::File { .. }) => return Err(StorageError::NotADirectory(path.to_string())),
            Some(Node::Dir { .. }) => {}
        }
        // descendants sort directly after their ancestor
        let entries = nodes
            .range((Bound::Excluded(path), Bound::Unbounded))
            .take_while(|(p, _)| p.starts_with(path))
            .filter(|(p, _)| p.depth() == path.depth() + 1)
            .map(|(p, node)| DirEntry::new(node.metadata(p)))
            .collect();
        Ok(entries)
    }
}

struct MemoryWriter {
    path: SharePath,
    nodes: Tree,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&self.path) {
            Some(Node::File { data, modified }) => {
                data.extend_from_slice(buf);
                *modified = Utc::now();
                Ok(buf.len())
            }
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "file no longer exists")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MemoryReader {
    inner: Cursor<Bytes>,
    open_readers: Arc<AtomicUsize>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}
