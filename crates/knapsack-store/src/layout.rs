//! On-disk layout of a store root.

use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Format version written to the store's version marker.
pub const STORE_FORMAT_VERSION: u32 = 1;

const VERSION_FILE: &str = "version";

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    version: u32,
}

/// Path management for a store root. The getters never touch the
/// filesystem; creation happens in [`StoreLayout::initialize`].
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    #[inline]
    pub fn receipts_dir(&self) -> PathBuf {
        self.root.join("receipts")
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    #[inline]
    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    /// Create the directory tree and version marker. An existing store is
    /// checked against [`STORE_FORMAT_VERSION`] instead of overwritten.
    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.artifacts_dir())?;
        fs::create_dir_all(self.receipts_dir())?;
        fs::create_dir_all(self.locks_dir())?;

        let version_file = self.version_file();
        if version_file.exists() {
            return self.verify_version();
        }
        let payload = serde_json::to_vec(&StoreVersion {
            version: STORE_FORMAT_VERSION,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&version_file)
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.root)?;
        Ok(())
    }

    /// Check the version marker against [`STORE_FORMAT_VERSION`].
    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.version_file())?;
        let stored: StoreVersion = serde_json::from_str(&content)?;
        if stored.version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: stored.version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_layout() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("store"));
        (dir, layout)
    }

    #[test]
    fn initialize_creates_directories_and_version() {
        let (_dir, layout) = temp_layout();
        layout.initialize().unwrap();
        assert!(layout.artifacts_dir().is_dir());
        assert!(layout.receipts_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.version_file().is_file());
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_is_idempotent() {
        let (_dir, layout) = temp_layout();
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn future_version_is_rejected() {
        let (_dir, layout) = temp_layout();
        layout.initialize().unwrap();
        fs::write(layout.version_file(), r#"{"version": 9}"#).unwrap();
        let err = layout.initialize().unwrap_err();
        match err {
            StoreError::VersionMismatch { expected, found } => {
                assert_eq!(expected, STORE_FORMAT_VERSION);
                assert_eq!(found, 9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn paths_live_under_the_root() {
        let layout = StoreLayout::new("/srv/knapsack");
        assert_eq!(layout.root(), Path::new("/srv/knapsack"));
        assert_eq!(
            layout.artifacts_dir(),
            PathBuf::from("/srv/knapsack/artifacts")
        );
        assert_eq!(layout.version_file(), PathBuf::from("/srv/knapsack/version"));
    }
}
