//! Artifact publisher backends for Knapsack.
//!
//! This crate implements the packaging half of a build: a pluggable
//! [`PublishBackend`] trait, a deterministic in-process tar backend, and a
//! mock backend for tests. The caller guarantees at most one publish per
//! cache key system-wide; backends package, they do not coordinate.

pub mod backend;
pub mod local;
pub mod mock;

pub use backend::{select_backend, PackagedArtifact, PublishBackend, PublishSpec};
pub use local::LocalBackend;
pub use mock::MockBackend;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no publish backend named '{0}'")]
    UnknownBackend(String),

    #[error("source directory '{}' cannot be staged", path.display())]
    MissingSource { path: PathBuf },

    #[error("failed to read '{}' while packaging: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("top-level name '{0}' is claimed by more than one source")]
    StagingConflict(String),

    #[error("backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },
}
