//! Build receipts: checksummed records of completed publishes.
//!
//! A receipt is the store's claim that a given build identity was published
//! and which archive belongs to it. The embedded checksum covers every other
//! field and is recomputed on read, so a hand-edited or truncated receipt is
//! reported as corrupt rather than trusted.

use crate::{fsync_dir, StoreError, StoreLayout};
use knapsack_schema::{ArchiveHash, BuildId, BuildIdentity, HandlerRef, ShortId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Receipt format version.
pub const RECEIPT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReceipt {
    pub receipt_version: u32,
    pub build_id: BuildId,
    pub short_id: ShortId,
    pub handler: HandlerRef,
    pub runtime: String,
    pub backend: String,
    pub archive_hash: ArchiveHash,
    pub archive_size: u64,
    pub entry_count: u64,
    pub created_at: String,
    /// Blake3 over every field above; verified on read.
    pub checksum: String,
}

impl BuildReceipt {
    /// Record one completed publish, stamped with the current time.
    pub fn new(
        identity: &BuildIdentity,
        handler: HandlerRef,
        runtime: &str,
        backend: &str,
        archive_hash: ArchiveHash,
        archive_size: u64,
        entry_count: u64,
    ) -> Self {
        let mut receipt = Self {
            receipt_version: RECEIPT_VERSION,
            build_id: identity.build_id().clone(),
            short_id: identity.short_id().clone(),
            handler,
            runtime: runtime.to_owned(),
            backend: backend.to_owned(),
            archive_hash,
            archive_size,
            entry_count,
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum: String::new(),
        };
        receipt.checksum = receipt.compute_checksum();
        receipt
    }

    /// Blake3 over every field except the checksum itself.
    pub fn compute_checksum(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("version:{}", self.receipt_version).as_bytes());
        hasher.update(format!("build_id:{}", self.build_id).as_bytes());
        hasher.update(format!("short_id:{}", self.short_id).as_bytes());
        hasher.update(format!("handler:{}", self.handler).as_bytes());
        hasher.update(format!("runtime:{}", self.runtime).as_bytes());
        hasher.update(format!("backend:{}", self.backend).as_bytes());
        hasher.update(format!("archive_hash:{}", self.archive_hash).as_bytes());
        hasher.update(format!("archive_size:{}", self.archive_size).as_bytes());
        hasher.update(format!("entry_count:{}", self.entry_count).as_bytes());
        hasher.update(format!("created_at:{}", self.created_at).as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Compare the embedded checksum against a freshly computed one.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        let computed = self.compute_checksum();
        if computed != self.checksum {
            return Err(StoreError::ReceiptCorrupt {
                id: self.build_id.clone(),
                stored: self.checksum.clone(),
                computed,
            });
        }
        Ok(())
    }
}

/// TOML-backed receipt persistence under `receipts/`.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
    receipts_dir: PathBuf,
}

impl ReceiptStore {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            receipts_dir: layout.receipts_dir(),
        }
    }

    fn receipt_path(&self, id: &BuildId) -> PathBuf {
        self.receipts_dir.join(format!("{id}.toml"))
    }

    /// Atomically persist a receipt.
    pub fn put(&self, receipt: &BuildReceipt) -> Result<(), StoreError> {
        let rendered = toml::to_string_pretty(receipt)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.receipts_dir)?;
        tmp.write_all(rendered.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.receipt_path(&receipt.build_id))
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.receipts_dir)?;
        Ok(())
    }

    /// Load a receipt and verify its checksum.
    pub fn get(&self, id: &BuildId) -> Result<BuildReceipt, StoreError> {
        let path = self.receipt_path(id);
        if !path.exists() {
            return Err(StoreError::ReceiptNotFound(id.clone()));
        }
        let content = fs::read_to_string(path)?;
        let receipt: BuildReceipt = toml::from_str(&content)?;
        receipt.verify_integrity()?;
        Ok(receipt)
    }

    pub fn exists(&self, id: &BuildId) -> bool {
        self.receipt_path(id).exists()
    }

    pub fn remove(&self, id: &BuildId) -> Result<(), StoreError> {
        let path = self.receipt_path(id);
        if !path.exists() {
            return Err(StoreError::ReceiptNotFound(id.clone()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Build ids with a stored receipt, sorted. Stray files are skipped
    /// with a warning, not treated as corruption.
    pub fn list(&self) -> Result<Vec<BuildId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.receipts_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("skipping receipt with non-UTF8 name");
                continue;
            };
            if let Some(stem) = name.strip_suffix(".toml") {
                ids.push(BuildId::new(stem));
            } else if !name.starts_with('.') {
                warn!(name, "unexpected file in receipts directory");
            }
        }
        ids.sort();
        Ok(ids)
    }
}
