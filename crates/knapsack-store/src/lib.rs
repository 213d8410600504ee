//! Artifact reuse store for Knapsack.
//!
//! Persists the two halves of a completed publish under one store root:
//! the packaged archive (`artifacts/`) and its checksummed [`BuildReceipt`]
//! (`receipts/`). Both are written atomically and verified on read; a store
//! that fails verification reports corruption instead of serving stale or
//! damaged state.

pub mod artifacts;
pub mod layout;
pub mod receipt;

pub use artifacts::ArtifactStore;
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use receipt::{BuildReceipt, ReceiptStore, RECEIPT_VERSION};

use knapsack_schema::{ArchiveHash, BuildId};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to parse receipt: {0}")]
    ReceiptParse(#[from] toml::de::Error),

    #[error("failed to serialize receipt: {0}")]
    ReceiptSerialize(#[from] toml::ser::Error),

    #[error("no receipt for build {0}")]
    ReceiptNotFound(BuildId),

    #[error("receipt for build {id} failed verification: stored checksum {stored}, computed {computed}")]
    ReceiptCorrupt {
        id: BuildId,
        stored: String,
        computed: String,
    },

    #[error("no stored artifact for build {0}")]
    ArtifactNotFound(BuildId),

    #[error("artifact for build {id} failed verification: expected {expected}, computed {computed}")]
    ArtifactCorrupt {
        id: BuildId,
        expected: ArchiveHash,
        computed: ArchiveHash,
    },

    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Fsync a directory handle so a rename performed inside it is durable.
pub(crate) fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    let handle = std::fs::File::open(dir)?;
    handle.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_not_found_display() {
        let err = StoreError::ReceiptNotFound(BuildId::new("abc123"));
        assert_eq!(err.to_string(), "no receipt for build abc123");
    }

    #[test]
    fn receipt_corrupt_display() {
        let err = StoreError::ReceiptCorrupt {
            id: BuildId::new("abc123"),
            stored: "aaa".to_owned(),
            computed: "bbb".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "receipt for build abc123 failed verification: stored checksum aaa, computed bbb"
        );
    }

    #[test]
    fn artifact_not_found_display() {
        let err = StoreError::ArtifactNotFound(BuildId::new("deadbeef"));
        assert_eq!(err.to_string(), "no stored artifact for build deadbeef");
    }

    #[test]
    fn artifact_corrupt_display() {
        let err = StoreError::ArtifactCorrupt {
            id: BuildId::new("deadbeef"),
            expected: ArchiveHash::new("aaa"),
            computed: ArchiveHash::new("bbb"),
        };
        assert_eq!(
            err.to_string(),
            "artifact for build deadbeef failed verification: expected aaa, computed bbb"
        );
    }

    #[test]
    fn version_mismatch_display() {
        let err = StoreError::VersionMismatch {
            expected: 1,
            found: 9,
        };
        assert_eq!(
            err.to_string(),
            "store format version mismatch: expected 1, found 9"
        );
    }

    #[test]
    fn io_error_wraps() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StoreError::from(io);
        assert!(err.to_string().contains("denied"));
    }
}
