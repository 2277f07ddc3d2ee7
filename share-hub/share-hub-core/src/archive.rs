//! Directory export as a `.tar.gz` stream.
//!
//! The exporter reads the tree exclusively through [`AclStorage`], so the
//! archive holds exactly what the principal could list and open by hand.

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};

use crate::acl::Principal;
use crate::error::{Result, StorageError};
use crate::path::SharePath;
use crate::storage::{AclStorage, Metadata, Opened};

/// Recursively archive `path` into `sink`. Entry names are relative to
/// `path`. On success the finished sink is handed back.
///
/// On failure the sink is dropped and receives no further bytes, in
/// particular no tar end-of-archive blocks and no gzip trailer, so a reader
/// of whatever was written never sees a complete archive.
pub fn export_directory<W: Write>(
    storage: &AclStorage,
    path: &str,
    principal: &Principal,
    sink: W,
) -> Result<W> {
    let root = SharePath::parse(path);
    let sink = ExportSink::new(sink);
    let aborted = sink.aborted();
    let mut builder = Builder::new(GzEncoder::new(sink, Compression::default()));

    let files = match append_dir(storage, principal, &root, &root, &mut builder) {
        Ok(files) => files,
        Err(e) => {
            // must happen before the builder's Drop tries to finish the archive
            aborted.set(true);
            return Err(e);
        }
    };

    let sink = builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| StorageError::io(root.to_string(), e))?;
    tracing::debug!(user = principal.name(), path = %root, files, "exported directory");
    Ok(sink.inner)
}

fn append_dir<W: Write>(
    storage: &AclStorage,
    principal: &Principal,
    root: &SharePath,
    dir: &SharePath,
    builder: &mut Builder<W>,
) -> Result<usize> {
    let mut files = 0;
    for entry in storage.read_dir(&dir.to_string(), principal)? {
        let path = dir.join(entry.name());
        let name = path.relative_to(root).unwrap_or_default();

        if entry.is_dir() {
            let mut header = header_for(entry.metadata());
            builder
                .append_data(&mut header, &name, io::empty())
                .map_err(|e| StorageError::io(path.to_string(), e))?;
            files += append_dir(storage, principal, root, &path, builder)?;
            continue;
        }

        match storage.open_file(&path.to_string(), principal)? {
            Opened::File { mut reader, metadata } => {
                let mut header = header_for(&metadata);
                let body = SizedReader::new(&mut reader, metadata.size);
                builder
                    .append_data(&mut header, &name, body)
                    .map_err(|e| StorageError::io(path.to_string(), e))?;
                files += 1;
            }
            Opened::Directory(_) => {
                tracing::warn!(path = %path, "entry changed kind during export, skipping");
            }
        }
    }
    Ok(files)
}

fn header_for(metadata: &Metadata) -> Header {
    let mut header = Header::new_gnu();
    if metadata.is_dir {
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
    } else {
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(metadata.size);
    }
    let mtime = metadata.modified.map(|t| t.timestamp().max(0) as u64);
    header.set_mtime(mtime.unwrap_or(0));
    header
}

/// Writer in front of the caller's sink. Once aborted, either explicitly or
/// by a failed write, every later write fails.
struct ExportSink<W> {
    inner: W,
    aborted: Rc<Cell<bool>>,
}

impl<W: Write> ExportSink<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            aborted: Rc::new(Cell::new(false)),
        }
    }

    fn aborted(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.aborted)
    }

    fn check(&self) -> io::Result<()> {
        if self.aborted.get() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "export aborted"));
        }
        Ok(())
    }
}

impl<W: Write> Write for ExportSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf).inspect_err(|_| self.aborted.set(true))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush().inspect_err(|_| self.aborted.set(true))
    }
}

/// Yields exactly `size` bytes. The header is written from the size seen
/// when the file was opened, so a file that grew is cut at that size and a
/// file that shrank is an error.
struct SizedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file ended {} bytes short", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{PathRule, RuleSet};
    use crate::storage::{DirEntry, FileWriter, MemoryStorage, StorageBackend};
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::Arc;

    /// Unpack into `name -> Some(contents)` for files, `None` for directories.
    fn unpack(bytes: &[u8]) -> BTreeMap<String, Option<String>> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
            if entry.header().entry_type().is_dir() {
                out.insert(name, None);
            } else {
                let mut s = String::new();
                entry.read_to_string(&mut s).unwrap();
                out.insert(name, Some(s));
            }
        }
        out
    }

    fn fixture() -> (MemoryStorage, AclStorage) {
        let mem = MemoryStorage::new();
        mem.add_file("/shared/reports/q1.csv", "q1")
            .add_file("/shared/reports/2024/q4.csv", "q4")
            .add_file("/shared/reports/private/salaries.csv", "secret")
            .add_file("/shared/notes.txt", "notes")
            .add_dir("/shared/empty");
        let storage = AclStorage::new(Arc::new(mem.clone()), RuleSet::empty());
        (mem, storage)
    }

    fn user() -> Principal {
        Principal::user(
            "alice",
            RuleSet::new(vec![
                PathRule::new("/shared/reports", true, true).unwrap(),
                PathRule::new("/shared/reports/private", false, false).unwrap(),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_export_contains_only_visible_files() {
        let (mem, storage) = fixture();
        let bytes = storage.export_directory("/shared/reports", &user(), Vec::new()).unwrap();
        let files = unpack(&bytes);

        let expected: BTreeMap<String, Option<String>> = [
            ("2024", None),
            ("2024/q4.csv", Some("q4")),
            ("q1.csv", Some("q1")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect();
        assert_eq!(files, expected);
        assert_eq!(mem.open_readers(), 0);
    }

    #[test]
    fn test_export_from_parent_keeps_hierarchy() {
        let (_mem, storage) = fixture();
        let bytes = storage.export_directory("/shared", &user(), Vec::new()).unwrap();
        let names: Vec<String> = unpack(&bytes).into_keys().collect();
        assert_eq!(names, vec!["reports", "reports/2024", "reports/2024/q4.csv", "reports/q1.csv"]);
    }

    #[test]
    fn test_administrator_exports_everything() {
        let (_mem, storage) = fixture();
        let admin = Principal::administrator("root");
        let files = unpack(&storage.export_directory("/", &admin, Vec::new()).unwrap());
        assert_eq!(files.get("shared/notes.txt"), Some(&Some("notes".to_string())));
        assert_eq!(
            files.get("shared/reports/private/salaries.csv"),
            Some(&Some("secret".to_string()))
        );
        assert_eq!(files.get("shared/empty"), Some(&None));
    }

    #[test]
    fn test_read_failure_aborts_and_releases_handles() {
        let (mem, storage) = fixture();
        mem.make_unreadable("/shared/reports/q1.csv");
        let err = storage
            .export_directory("/shared/reports", &user(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { ref path, .. } if path == "/shared/reports/q1.csv"));
        assert_eq!(mem.open_readers(), 0);
    }

    #[test]
    fn test_export_of_file_fails() {
        let (_mem, storage) = fixture();
        let admin = Principal::administrator("root");
        let err = storage
            .export_directory("/shared/notes.txt", &admin, Vec::new())
            .unwrap_err();
        assert!(matches!(err, StorageError::NotADirectory(_)));
    }

    #[test]
    fn test_failed_export_leaves_no_complete_archive() {
        let mem = MemoryStorage::new();
        let big: Vec<u8> = (0..262_144u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        mem.add_file("/d/a.txt", &big)
            .add_file("/d/b.txt", "bbbb")
            .make_unreadable("/d/b.txt");
        let storage = AclStorage::new(Arc::new(mem.clone()), RuleSet::empty());
        let admin = Principal::administrator("root");

        let mut sink = Vec::new();
        assert!(storage.export_directory("/d", &admin, &mut sink).is_err());
        assert_eq!(mem.open_readers(), 0);

        // whatever reached the sink must not decode as a finished gzip stream
        let mut decoded = Vec::new();
        let complete = !sink.is_empty() && GzDecoder::new(sink.as_slice()).read_to_end(&mut decoded).is_ok();
        assert!(!complete, "{} bytes in sink form a complete archive", sink.len());
    }

    struct FailingWriter {
        writes: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_export_sink_rejects_writes_once_aborted() {
        let mut sink = ExportSink::new(Vec::new());
        sink.write_all(b"head").unwrap();
        sink.aborted().set(true);
        assert!(sink.write_all(b"trailer").is_err());
        assert!(sink.flush().is_err());
        assert_eq!(sink.inner, b"head");

        // a failed write poisons the sink on its own
        let mut sink = ExportSink::new(FailingWriter { writes: 0 });
        assert!(sink.write_all(b"x").is_err());
        assert!(sink.write_all(b"y").is_err());
        assert_eq!(sink.inner.writes, 1);
    }

    #[test]
    fn test_sized_reader_enforces_declared_size() {
        let mut out = Vec::new();
        SizedReader::new(&b"abcdef"[..], 4).read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");

        let err = SizedReader::new(&b"ab"[..], 4).read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    /// Backend whose `open_file` reports a size off by `delta`, as when a
    /// file changes between stat and read.
    struct SkewedSize {
        inner: MemoryStorage,
        delta: i64,
    }

    impl StorageBackend for SkewedSize {
        fn create_file(&self, path: &SharePath) -> Result<FileWriter> {
            self.inner.create_file(path)
        }

        fn open_file(&self, path: &SharePath) -> Result<Opened> {
            match self.inner.open_file(path)? {
                Opened::File { reader, mut metadata } => {
                    metadata.size = (metadata.size as i64 + self.delta).max(0) as u64;
                    Ok(Opened::File { reader, metadata })
                }
                dir => Ok(dir),
            }
        }

        fn read_dir(&self, path: &SharePath) -> Result<Vec<DirEntry>> {
            self.inner.read_dir(path)
        }
    }

    fn skewed(delta: i64) -> AclStorage {
        let mem = MemoryStorage::new();
        mem.add_file("/d/a.txt", "aaaaaaaa").add_file("/d/b.txt", "bbbb");
        AclStorage::new(Arc::new(SkewedSize { inner: mem, delta }), RuleSet::empty())
    }

    #[test]
    fn test_file_grown_since_stat_is_cut_to_header_size() {
        let admin = Principal::administrator("root");
        let bytes = skewed(-2).export_directory("/d", &admin, Vec::new()).unwrap();
        let files = unpack(&bytes);
        assert_eq!(files.get("a.txt"), Some(&Some("aaaaaa".to_string())));
        assert_eq!(files.get("b.txt"), Some(&Some("bb".to_string())));
    }

    #[test]
    fn test_file_shrunk_since_stat_aborts_export() {
        let admin = Principal::administrator("root");
        let err = skewed(3).export_directory("/d", &admin, Vec::new()).unwrap_err();
        assert!(matches!(err, StorageError::Io { ref path, .. } if path == "/d/a.txt"));
    }
}
