//! Stored artifact archives, content-verified on reuse.

use crate::{fsync_dir, StoreError, StoreLayout};
use knapsack_schema::{ArchiveHash, BuildId};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Archive persistence under `artifacts/`, one `<build_id>.tar` per build.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    artifacts_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            artifacts_dir: layout.artifacts_dir(),
        }
    }

    /// Where the archive for `id` lives.
    pub fn path_for(&self, id: &BuildId) -> PathBuf {
        self.artifacts_dir.join(format!("{id}.tar"))
    }

    /// Atomically persist archive bytes, returning their content hash.
    pub fn write(&self, id: &BuildId, data: &[u8]) -> Result<ArchiveHash, StoreError> {
        let hash = ArchiveHash::new(blake3::hash(data).to_hex().to_string());
        let mut tmp = tempfile::NamedTempFile::new_in(&self.artifacts_dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.artifacts_dir)?;
        debug!(build_id = %id, size = data.len(), "stored artifact");
        Ok(hash)
    }

    /// Recompute the stored archive's hash and compare against `expected`.
    pub fn verify(&self, id: &BuildId, expected: &ArchiveHash) -> Result<(), StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::ArtifactNotFound(id.clone()));
        }
        let data = fs::read(path)?;
        let computed = ArchiveHash::new(blake3::hash(&data).to_hex().to_string());
        if computed != *expected {
            return Err(StoreError::ArtifactCorrupt {
                id: id.clone(),
                expected: expected.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub fn exists(&self, id: &BuildId) -> bool {
        self.path_for(id).exists()
    }

    pub fn remove(&self, id: &BuildId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(StoreError::ArtifactNotFound(id.clone()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Build ids with a stored archive, sorted.
    pub fn list(&self) -> Result<Vec<BuildId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.artifacts_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if let Some(stem) = name.strip_suffix(".tar") {
                    ids.push(BuildId::new(stem));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("store"));
        layout.initialize().unwrap();
        (dir, ArtifactStore::new(&layout))
    }

    #[test]
    fn write_then_verify() {
        let (_dir, store) = temp_store();
        let id = BuildId::new("abc123");
        let hash = store.write(&id, b"archive bytes").unwrap();
        store.verify(&id, &hash).unwrap();
        assert!(store.exists(&id));
    }

    #[test]
    fn write_is_idempotent_for_same_content() {
        let (_dir, store) = temp_store();
        let id = BuildId::new("abc123");
        let first = store.write(&id, b"same").unwrap();
        let second = store.write(&id, b"same").unwrap();
        assert_eq!(first, second);
        store.verify(&id, &first).unwrap();
    }

    #[test]
    fn corruption_is_detected() {
        let (_dir, store) = temp_store();
        let id = BuildId::new("abc123");
        let hash = store.write(&id, b"pristine").unwrap();
        fs::write(store.path_for(&id), b"tampered").unwrap();
        let err = store.verify(&id, &hash).unwrap_err();
        assert!(matches!(err, StoreError::ArtifactCorrupt { .. }));
    }

    #[test]
    fn verify_missing_is_not_found() {
        let (_dir, store) = temp_store();
        let err = store
            .verify(&BuildId::new("missing"), &ArchiveHash::new("aaa"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ArtifactNotFound(_)));
    }

    #[test]
    fn remove_deletes_archive() {
        let (_dir, store) = temp_store();
        let id = BuildId::new("abc123");
        store.write(&id, b"bytes").unwrap();
        store.remove(&id).unwrap();
        assert!(!store.exists(&id));
        let err = store.remove(&id).unwrap_err();
        assert!(matches!(err, StoreError::ArtifactNotFound(_)));
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, store) = temp_store();
        for id in ["zzz", "mmm", "aaa"] {
            store.write(&BuildId::new(id), id.as_bytes()).unwrap();
        }
        assert_eq!(
            store.list().unwrap(),
            vec![BuildId::new("aaa"), BuildId::new("mmm"), BuildId::new("zzz")]
        );
    }

    #[test]
    fn large_archive_roundtrip() {
        let (_dir, store) = temp_store();
        let id = BuildId::new("large");
        let data: Vec<u8> = (0..65536u32).flat_map(u32::to_le_bytes).collect();
        let hash = store.write(&id, &data).unwrap();
        store.verify(&id, &hash).unwrap();
        assert_eq!(fs::read(store.path_for(&id)).unwrap(), data);
    }
}
