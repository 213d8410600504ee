use crate::PublishError;
use knapsack_schema::{BuildId, ExcludeSet};
use std::path::PathBuf;

/// What a backend packages: the cache key labeling the work, the source
/// directories to bundle, and the name patterns to drop. The exclude set is
/// the one the identity hash used, so key and content stay in agreement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSpec {
    pub cache_key: BuildId,
    pub code_paths: Vec<PathBuf>,
    pub exclude: ExcludeSet,
}

/// One packaged artifact, returned in memory. Persisting it is the
/// caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub archive: Vec<u8>,
    pub entry_count: u64,
}

pub trait PublishBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Package `spec.code_paths` into one artifact. The first path is the
    /// entrypoint directory, whose contents land at the artifact root;
    /// every further path is a library directory mounted as a top-level
    /// subdirectory named by its final component.
    fn publish(&self, spec: &PublishSpec) -> Result<PackagedArtifact, PublishError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn PublishBackend>, PublishError> {
    match name {
        "local" => Ok(Box::new(crate::local::LocalBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(PublishError::UnknownBackend(other.to_owned())),
    }
}
