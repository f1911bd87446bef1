//! Blob store access: directory listing, size/mtime lookup, idempotent delete.
//!
//! File identifiers are `/`-separated paths relative to the media root, the
//! same strings the campaign records store (e.g.
//! `uploads/admanager/posters/spring.jpg`). Identifiers that are absolute or
//! climb out of the root are vetoed before touching the filesystem.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::core::errors::{CsnError, Result};

/// Result of a successful delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    /// The file was already absent; deletion is idempotent.
    AlreadyGone,
}

/// Minimal directory-style interface over the poster blob store.
pub trait BlobStore {
    /// Identifiers of regular files directly inside `dir`.
    ///
    /// A directory that does not exist yet lists as empty. Any other read
    /// failure is `StorageUnavailable`.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    fn exists(&self, file: &str) -> Result<bool>;

    fn size(&self, file: &str) -> Result<u64>;

    fn modified(&self, file: &str) -> Result<SystemTime>;

    fn delete(&self, file: &str) -> Result<DeleteStatus>;
}

/// Join a directory identifier and an entry name with `/`.
#[must_use]
pub fn join_identifier(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Reject identifiers that could resolve outside the media root.
pub fn check_identifier(file: &str) -> Result<()> {
    let veto = |reason: &str| CsnError::SafetyVeto {
        file: file.to_string(),
        reason: reason.to_string(),
    };
    if file.is_empty() {
        return Err(veto("empty identifier"));
    }
    if file.contains('\\') || file.contains('\0') {
        return Err(veto("identifier contains a backslash or NUL"));
    }
    let path = Path::new(file);
    if path.is_absolute() {
        return Err(veto("absolute identifier"));
    }
    if path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(veto("identifier escapes the media root"));
    }
    Ok(())
}

// ──────────────────── filesystem store ────────────────────

/// Blob store backed by a local media root.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, file: &str) -> Result<PathBuf> {
        check_identifier(file)?;
        Ok(self.root.join(file))
    }
}

impl BlobStore for FsBlobStore {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = self.resolve(dir)?;
        let unavailable = |details: String| CsnError::StorageUnavailable {
            path: path.clone(),
            details,
        };

        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(e.to_string())),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| unavailable(e.to_string()))?;
            let is_file = entry.file_type().is_ok_and(|t| t.is_file());
            if !is_file {
                continue;
            }
            // Non-UTF-8 names cannot be referenced by a record; skip them.
            if let Some(name) = entry.file_name().to_str() {
                files.push(join_identifier(dir, name));
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, file: &str) -> Result<bool> {
        let path = self.resolve(file)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CsnError::io(&path, e)),
        }
    }

    fn size(&self, file: &str) -> Result<u64> {
        let path = self.resolve(file)?;
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| CsnError::io(&path, e))
    }

    fn modified(&self, file: &str) -> Result<SystemTime> {
        let path = self.resolve(file)?;
        fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| CsnError::io(&path, e))
    }

    fn delete(&self, file: &str) -> Result<DeleteStatus> {
        let path = self.resolve(file)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(DeleteStatus::Deleted),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteStatus::AlreadyGone),
            Err(e) => Err(CsnError::FileDeletionFailed {
                file: file.to_string(),
                details: e.to_string(),
            }),
        }
    }
}

// ──────────────────── in-memory store ────────────────────

#[derive(Debug, Clone, Copy)]
struct MemoryBlob {
    size: u64,
    modified: SystemTime,
}

/// In-memory blob store with failure injection, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    files: RwLock<BTreeMap<String, MemoryBlob>>,
    unavailable: bool,
    undeletable: HashSet<String>,
    unsizeable: HashSet<String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, file: &str, size: u64) -> Self {
        self.insert(file, size, SystemTime::now());
        self
    }

    /// Every call fails with `StorageUnavailable`.
    #[must_use]
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// `delete(file)` fails for this identifier.
    #[must_use]
    pub fn refuse_delete(mut self, file: &str) -> Self {
        self.undeletable.insert(file.to_string());
        self
    }

    /// `size(file)` fails for this identifier.
    #[must_use]
    pub fn refuse_size(mut self, file: &str) -> Self {
        self.unsizeable.insert(file.to_string());
        self
    }

    pub fn insert(&self, file: &str, size: u64, modified: SystemTime) {
        self.files
            .write()
            .insert(file.to_string(), MemoryBlob { size, modified });
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    fn guard(&self) -> Result<()> {
        if self.unavailable {
            return Err(CsnError::StorageUnavailable {
                path: PathBuf::from("memory://"),
                details: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn get(&self, file: &str) -> Result<MemoryBlob> {
        self.guard()?;
        self.files
            .read()
            .get(file)
            .copied()
            .ok_or_else(|| CsnError::io(file, std::io::Error::from(ErrorKind::NotFound)))
    }
}

impl BlobStore for MemoryBlobStore {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        self.guard()?;
        let prefix = join_identifier(dir, "");
        Ok(self
            .files
            .read()
            .keys()
            .filter(|k| {
                k.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect())
    }

    fn exists(&self, file: &str) -> Result<bool> {
        self.guard()?;
        check_identifier(file)?;
        Ok(self.files.read().contains_key(file))
    }

    fn size(&self, file: &str) -> Result<u64> {
        if self.unsizeable.contains(file) {
            return Err(CsnError::io(
                file,
                std::io::Error::from(ErrorKind::PermissionDenied),
            ));
        }
        self.get(file).map(|b| b.size)
    }

    fn modified(&self, file: &str) -> Result<SystemTime> {
        self.get(file).map(|b| b.modified)
    }

    fn delete(&self, file: &str) -> Result<DeleteStatus> {
        self.guard()?;
        check_identifier(file)?;
        if self.undeletable.contains(file) {
            return Err(CsnError::FileDeletionFailed {
                file: file.to_string(),
                details: "permission denied".to_string(),
            });
        }
        Ok(match self.files.write().remove(file) {
            Some(_) => DeleteStatus::Deleted,
            None => DeleteStatus::AlreadyGone,
        })
    }
}
