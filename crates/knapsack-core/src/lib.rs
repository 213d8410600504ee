//! Package engine for Knapsack.
//!
//! Orchestrates one packaging invocation end to end: validate the spec into
//! a canonical request, derive the content-based build identity, serve a
//! verified prior artifact when one exists, otherwise publish under a
//! per-identity lock and record a receipt. Concurrent builds of the same
//! content either share the completed result or serialize on the lock;
//! the same identity is never published twice at once.

pub mod concurrency;
pub mod engine;

pub use concurrency::{install_signal_handler, shutdown_requested, BuildLock};
pub use engine::{Engine, FunctionConfig, PackageOptions, PackageOutput};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("spec error: {0}")]
    Spec(#[from] knapsack_schema::SpecError),

    #[error("validation error: {0}")]
    Validation(#[from] knapsack_schema::ValidationError),

    #[error("identity error: {0}")]
    Identity(#[from] knapsack_schema::IdentityError),

    #[error("store error: {0}")]
    Store(#[from] knapsack_store::StoreError),

    #[error("publish error: {0}")]
    Publish(#[from] knapsack_publish::PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
