//! Deterministic mock backend for tests.

use crate::backend::{PackagedArtifact, PublishBackend, PublishSpec};
use crate::PublishError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Backend that fabricates a deterministic archive from the cache key and
/// counts its publishes. Never touches the filesystem, so tests can assert
/// how often packaging actually ran.
#[derive(Debug, Default)]
pub struct MockBackend {
    publishes: AtomicU64,
    failing: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publishes performed so far.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::SeqCst)
    }

    /// Make every subsequent publish fail.
    pub fn fail_publishes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

impl PublishBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn publish(&self, spec: &PublishSpec) -> Result<PackagedArtifact, PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Backend {
                backend: "mock".to_owned(),
                message: "injected failure".to_owned(),
            });
        }
        self.publishes.fetch_add(1, Ordering::SeqCst);

        let digest = blake3::hash(spec.cache_key.as_str().as_bytes());
        let mut archive = b"MOCKPKG1".to_vec();
        archive.extend_from_slice(digest.as_bytes());
        Ok(PackagedArtifact {
            archive,
            entry_count: spec.code_paths.len() as u64,
        })
    }
}
