//! Command layer of the `share-hub` binary.
//!
//! A [`Session`] pairs the access-controlled storage with the principal the
//! commands run as. Everything here is blocking; the binary drives it from
//! `spawn_blocking`.

use anyhow::{anyhow, bail, Context, Result};
use share_hub_core::{
    storage::{Metadata, Opened, Permissions},
    AclStorage, Principal, SharePath, ShareConfig,
};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Archive name used when the exported directory has no name of its own.
pub const ROOT_ARCHIVE_NAME: &str = "files.tar.gz";

/// What `fetch` wrote to the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    File(PathBuf),
    Archive(PathBuf),
}

impl Fetched {
    pub fn path(&self) -> &Path {
        match self {
            Fetched::File(p) | Fetched::Archive(p) => p,
        }
    }
}

#[derive(Clone)]
pub struct Session {
    storage: AclStorage,
    principal: Principal,
}

impl Session {
    pub fn new(storage: AclStorage, principal: Principal) -> Self {
        Self { storage, principal }
    }

    /// Resolve `user` against the config. Without a user name the anonymous
    /// principal is used, which requires anonymous access to be enabled.
    pub fn open(config: &ShareConfig, user: Option<&str>) -> Result<Self> {
        let principal = match user {
            Some(name) => config
                .principal(name)
                .ok_or_else(|| anyhow!("unknown user {name}"))?,
            None => config
                .anonymous()
                .ok_or_else(|| anyhow!("anonymous access is disabled, pass --user"))?,
        };
        let storage = config
            .storage()
            .with_context(|| format!("opening storage at {}", config.root.display()))?;
        Ok(Self::new(storage, principal))
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn list(&self, path: &str) -> Result<Vec<Metadata>> {
        let entries = self.storage.read_dir(path, &self.principal)?;
        Ok(entries.into_iter().map(|e| e.metadata().clone()).collect())
    }

    /// Copy a file out, or export a directory as `.tar.gz`. `output` defaults
    /// to the entry name in the current directory.
    pub fn fetch(&self, path: &str, output: Option<&Path>) -> Result<Fetched> {
        let canonical = SharePath::parse(path);
        match self.storage.open_file(path, &self.principal)? {
            Opened::File { mut reader, metadata } => {
                let target = output
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(&metadata.name));
                let copied = write_out(&target, |file| io::copy(&mut reader, file).map_err(Into::into))?;
                tracing::info!(user = self.principal.name(), path = %canonical, bytes = copied, "fetched file");
                Ok(Fetched::File(target))
            }
            Opened::Directory(_) => {
                let target = output.map(Path::to_path_buf).unwrap_or_else(|| {
                    canonical
                        .file_name()
                        .map(|name| PathBuf::from(format!("{name}.tar.gz")))
                        .unwrap_or_else(|| PathBuf::from(ROOT_ARCHIVE_NAME))
                });
                write_out(&target, |file| {
                    self.storage
                        .export_directory(path, &self.principal, file)
                        .map(|_| 0)
                        .map_err(Into::into)
                })?;
                tracing::info!(user = self.principal.name(), path = %canonical, archive = %target.display(), "exported directory");
                Ok(Fetched::Archive(target))
            }
        }
    }

    /// Upload a local file into `dir`, keeping its file name. Returns the
    /// path it was stored under.
    pub fn upload(&self, local: &Path, dir: &str) -> Result<SharePath> {
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("{} has no usable file name", local.display()))?;
        if local.is_dir() {
            bail!("{} is a directory", local.display());
        }
        let target = SharePath::parse(dir).join(name);
        let mut source =
            File::open(local).with_context(|| format!("opening {}", local.display()))?;

        let mut writer = self.storage.create_file(&target.to_string(), &self.principal)?;
        let bytes = io::copy(&mut source, &mut writer)
            .with_context(|| format!("uploading to {target}"))?;
        writer.flush().with_context(|| format!("uploading to {target}"))?;
        tracing::info!(user = self.principal.name(), path = %target, bytes, "uploaded file");
        Ok(target)
    }

    pub fn check(&self, path: &str) -> Permissions {
        self.storage.permissions(path, &self.principal)
    }
}

/// Create `target` and fill it. A failed write removes the partial file.
fn write_out<F>(target: &Path, fill: F) -> Result<u64>
where
    F: FnOnce(&mut File) -> Result<u64>,
{
    let mut file =
        File::create(target).with_context(|| format!("creating {}", target.display()))?;
    match fill(&mut file) {
        Ok(n) => Ok(n),
        Err(e) => {
            drop(file);
            if let Err(rm) = fs::remove_file(target) {
                tracing::warn!(path = %target.display(), error = %rm, "could not remove partial output");
            }
            Err(e)
        }
    }
}
