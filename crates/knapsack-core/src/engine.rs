//! The package engine: validate, derive identity, reuse or publish.

use crate::concurrency::BuildLock;
use crate::CoreError;
use knapsack_publish::{select_backend, PublishBackend, PublishSpec};
use knapsack_schema::{
    parse_spec_file, BuildId, BuildIdentity, BuildRequest, FunctionSpec, HandlerRef, Runtime,
    TreeHash,
};
use knapsack_store::{ArtifactStore, BuildReceipt, ReceiptStore, StoreError, StoreLayout};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for one packaging invocation.
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Publish even when a verified prior artifact exists.
    pub force_rebuild: bool,
    /// Publish backend name, resolved via `select_backend`.
    pub backend: String,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            force_rebuild: false,
            backend: "local".to_owned(),
        }
    }
}

/// Configuration handed to the deployment layer: everything needed to wire
/// the packaged artifact into a function resource, fully populated here so
/// the deployment side composes it without reaching back into the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionConfig {
    pub handler: HandlerRef,
    pub runtime: Runtime,
    pub artifact_path: PathBuf,
}

/// Result of one packaging invocation.
#[derive(Debug, Clone)]
pub struct PackageOutput {
    pub request: BuildRequest,
    pub identity: BuildIdentity,
    pub receipt: BuildReceipt,
    pub config: FunctionConfig,
    /// True when a verified prior artifact was served instead of publishing.
    pub reused: bool,
}

/// Engine over one store root, orchestrating validate, identity, and
/// reuse-or-publish.
#[derive(Debug, Clone)]
pub struct Engine {
    layout: StoreLayout,
    artifacts: ArtifactStore,
    receipts: ReceiptStore,
}

impl Engine {
    /// Engine over `store_root`. The store is created on first use.
    pub fn new(store_root: impl Into<PathBuf>) -> Self {
        let layout = StoreLayout::new(store_root);
        let artifacts = ArtifactStore::new(&layout);
        let receipts = ReceiptStore::new(&layout);
        Self {
            layout,
            artifacts,
            receipts,
        }
    }

    pub fn store_layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Package from a spec file on disk.
    pub fn package_file(
        &self,
        path: &Path,
        options: &PackageOptions,
    ) -> Result<PackageOutput, CoreError> {
        let spec = parse_spec_file(path)?;
        self.package(&spec, options)
    }

    /// Package with the backend named in `options`.
    pub fn package(
        &self,
        spec: &FunctionSpec,
        options: &PackageOptions,
    ) -> Result<PackageOutput, CoreError> {
        let backend = select_backend(&options.backend)?;
        self.package_with(spec, options, backend.as_ref())
    }

    /// Package with a caller-supplied backend instance.
    pub fn package_with(
        &self,
        spec: &FunctionSpec,
        options: &PackageOptions,
        backend: &dyn PublishBackend,
    ) -> Result<PackageOutput, CoreError> {
        let request = spec.validate()?;
        self.layout.initialize()?;

        // Identity comes first: reuse and locking both key on it, and a
        // cancelled hash must abort before any packaging work starts.
        let hasher = TreeHash::with_exclude(request.excluded_patterns().clone());
        let identity = hasher
            .hash_with_cancel(&request.code_paths(), crate::concurrency::shutdown_requested)?;
        info!(
            short_id = %identity.short_id(),
            handler = %request.handler(),
            "derived build identity"
        );

        if !options.force_rebuild {
            if let Some(output) = self.try_reuse(&request, &identity)? {
                info!(short_id = %identity.short_id(), "reusing published artifact");
                return Ok(output);
            }
        }

        // One publish per identity: hold the identity's lock, then re-check
        // the store, since another holder may have published while we
        // waited.
        let _lock = BuildLock::acquire(&self.layout, identity.build_id())?;
        if !options.force_rebuild {
            if let Some(output) = self.try_reuse(&request, &identity)? {
                debug!(
                    short_id = %identity.short_id(),
                    "another holder published while waiting; sharing its result"
                );
                return Ok(output);
            }
        }

        let publish_spec = PublishSpec {
            cache_key: identity.build_id().clone(),
            code_paths: request.code_paths(),
            exclude: request.excluded_patterns().clone(),
        };
        let artifact = backend.publish(&publish_spec)?;
        let archive_hash = self.artifacts.write(identity.build_id(), &artifact.archive)?;
        let receipt = BuildReceipt::new(
            &identity,
            request.handler().clone(),
            request.runtime().id(),
            backend.name(),
            archive_hash,
            artifact.archive.len() as u64,
            artifact.entry_count,
        );
        self.receipts.put(&receipt)?;
        info!(
            short_id = %identity.short_id(),
            backend = backend.name(),
            entries = artifact.entry_count,
            "published artifact"
        );

        let config = self.function_config(&request, &receipt);
        Ok(PackageOutput {
            request,
            identity,
            receipt,
            config,
            reused: false,
        })
    }

    /// Serve a prior publish when its receipt and archive both verify. A
    /// missing receipt is a plain miss; one that fails to parse or verify
    /// is cleared and treated as a miss rather than propagated. Reuse is
    /// an optimization and a damaged cache entry must not wedge builds.
    fn try_reuse(
        &self,
        request: &BuildRequest,
        identity: &BuildIdentity,
    ) -> Result<Option<PackageOutput>, CoreError> {
        let id = identity.build_id();
        let receipt = match self.receipts.get(id) {
            Ok(receipt) => receipt,
            Err(StoreError::ReceiptNotFound(_)) => return Ok(None),
            Err(StoreError::ReceiptParse(_) | StoreError::ReceiptCorrupt { .. }) => {
                warn!(build_id = %id, "discarding corrupt receipt");
                self.discard_build(id);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        match self.artifacts.verify(id, &receipt.archive_hash) {
            Ok(()) => {}
            Err(StoreError::ArtifactNotFound(_) | StoreError::ArtifactCorrupt { .. }) => {
                warn!(build_id = %id, "stored artifact failed verification, republishing");
                self.discard_build(id);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        }
        let config = self.function_config(request, &receipt);
        Ok(Some(PackageOutput {
            request: request.clone(),
            identity: identity.clone(),
            receipt,
            config,
            reused: true,
        }))
    }

    /// Drop whichever halves of a build are still on disk.
    fn discard_build(&self, id: &BuildId) {
        if self.receipts.exists(id) {
            if let Err(err) = self.receipts.remove(id) {
                warn!(build_id = %id, %err, "failed to remove receipt");
            }
        }
        if self.artifacts.exists(id) {
            if let Err(err) = self.artifacts.remove(id) {
                warn!(build_id = %id, %err, "failed to remove artifact");
            }
        }
    }

    fn function_config(&self, request: &BuildRequest, receipt: &BuildReceipt) -> FunctionConfig {
        FunctionConfig {
            handler: request.handler().clone(),
            runtime: request.runtime(),
            artifact_path: self.artifacts.path_for(&receipt.build_id),
        }
    }

    /// Build ids with a stored receipt, sorted.
    pub fn list_builds(&self) -> Result<Vec<BuildId>, CoreError> {
        self.layout.initialize()?;
        Ok(self.receipts.list()?)
    }

    /// Remove a build's receipt and artifact.
    pub fn remove_build(&self, id: &BuildId) -> Result<(), CoreError> {
        self.receipts.remove(id)?;
        if self.artifacts.exists(id) {
            self.artifacts.remove(id)?;
        }
        Ok(())
    }
}
