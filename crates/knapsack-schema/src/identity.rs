//! Build identity: a deterministic content hash over directory trees.
//!
//! The digest is a single running blake3 accumulator. Roots are sorted by
//! canonical absolute path; inside each directory, file contents are hashed
//! in name-sorted order before subdirectories are recursed in name-sorted
//! order. The result depends only on relative structure and byte content,
//! never on caller-supplied ordering, absolute location, modification times,
//! or directory-listing order.
//!
//! No separator or length prefix is injected between file contents, so
//! boundaries exist only through name-sorted order: two layouts whose
//! sorted, concatenated bytes coincide produce the same digest. The identity
//! is a change detector for build reuse, not a tamper-evident seal.

use crate::patterns::ExcludeSet;
use crate::types::{BuildId, ShortId};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Block size for streaming file content into the digest. Bounds memory use;
/// the digest does not depend on it.
const READ_BLOCK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("hash root '{}' is not an existing directory", path.display())]
    MissingRoot { path: PathBuf },

    #[error("failed to read '{}' while hashing: {source}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hashing cancelled")]
    Cancelled,
}

/// The content-derived cache key of a build request's source directories.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildIdentity {
    build_id: BuildId,
    short_id: ShortId,
}

impl BuildIdentity {
    /// Wrap an already-computed digest, deriving the display prefix.
    pub fn from_id(build_id: BuildId) -> Self {
        let short_id = build_id.short();
        Self { build_id, short_id }
    }

    /// Full 64-character lowercase hex digest.
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    /// 12-character display prefix.
    pub fn short_id(&self) -> &ShortId {
        &self.short_id
    }
}

/// Directory-tree hasher. Stateless between calls; the accumulator lives on
/// the stack of each invocation, so concurrent hashes never share state.
#[derive(Debug, Clone, Default)]
pub struct TreeHash {
    exclude: ExcludeSet,
}

impl TreeHash {
    /// A hasher that hashes every file.
    pub fn new() -> Self {
        Self::default()
    }

    /// A hasher that skips file and directory names matching `exclude`.
    pub fn with_exclude(exclude: ExcludeSet) -> Self {
        Self { exclude }
    }

    /// Hash `roots` to a [`BuildIdentity`] without a cancellation signal.
    pub fn hash(&self, roots: &[PathBuf]) -> Result<BuildIdentity, IdentityError> {
        self.hash_with_cancel(roots, || false)
    }

    /// Hash `roots`, aborting with [`IdentityError::Cancelled`] once
    /// `should_stop` returns true. The signal is polled per directory, per
    /// file, and between read blocks; a cancelled hash never yields a
    /// partial identity.
    ///
    /// A directory reachable more than once (a duplicate root, a root nested
    /// inside another root, a symlink cycle) is hashed only the first time.
    pub fn hash_with_cancel(
        &self,
        roots: &[PathBuf],
        should_stop: impl Fn() -> bool,
    ) -> Result<BuildIdentity, IdentityError> {
        let mut canonical: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            let resolved = fs::canonicalize(root)
                .map_err(|_| IdentityError::MissingRoot { path: root.clone() })?;
            if !resolved.is_dir() {
                return Err(IdentityError::MissingRoot { path: root.clone() });
            }
            canonical.push(resolved);
        }
        // Absolute-path string order, so the caller's ordering is invisible.
        canonical.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

        let mut hasher = blake3::Hasher::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        for root in &canonical {
            self.hash_dir(root, &mut hasher, &mut visited, &should_stop)?;
        }

        let build_id = BuildId::new(hasher.finalize().to_hex().to_string());
        let short_id = build_id.short();
        Ok(BuildIdentity { build_id, short_id })
    }

    /// Hash one directory level: sorted file contents first, then sorted
    /// subdirectories recursively.
    fn hash_dir(
        &self,
        dir: &Path,
        hasher: &mut blake3::Hasher,
        visited: &mut HashSet<PathBuf>,
        should_stop: &impl Fn() -> bool,
    ) -> Result<(), IdentityError> {
        if should_stop() {
            return Err(IdentityError::Cancelled);
        }
        let resolved = fs::canonicalize(dir).map_err(|source| IdentityError::UnreadableFile {
            path: dir.to_path_buf(),
            source,
        })?;
        if !visited.insert(resolved) {
            return Ok(());
        }

        let entries = fs::read_dir(dir).map_err(|source| IdentityError::UnreadableFile {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<(String, PathBuf)> = Vec::new();
        let mut subdirs: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IdentityError::UnreadableFile {
                path: dir.to_path_buf(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.exclude.matches(&name) {
                continue;
            }
            let path = entry.path();
            // Classification follows symlinks: a link resolving to a
            // directory is walked, anything else is read as a file, so a
            // dangling link surfaces as UnreadableFile instead of being
            // skipped.
            let metadata =
                fs::metadata(&path).map_err(|source| IdentityError::UnreadableFile {
                    path: path.clone(),
                    source,
                })?;
            if metadata.is_dir() {
                subdirs.push((name, path));
            } else {
                files.push((name, path));
            }
        }
        files.sort();
        subdirs.sort();

        for (_, path) in &files {
            self.hash_file(path, hasher, should_stop)?;
        }
        for (_, path) in &subdirs {
            self.hash_dir(path, hasher, visited, should_stop)?;
        }
        Ok(())
    }

    fn hash_file(
        &self,
        path: &Path,
        hasher: &mut blake3::Hasher,
        should_stop: &impl Fn() -> bool,
    ) -> Result<(), IdentityError> {
        if should_stop() {
            return Err(IdentityError::Cancelled);
        }
        let mut file = File::open(path).map_err(|source| IdentityError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
        let mut block = [0u8; READ_BLOCK];
        loop {
            if should_stop() {
                return Err(IdentityError::Cancelled);
            }
            let read = file
                .read(&mut block)
                .map_err(|source| IdentityError::UnreadableFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            hasher.update(&block[..read]);
        }
        Ok(())
    }
}
