//! Request validation: turn a parsed spec into a canonical [`BuildRequest`].
//!
//! Validation fails fast with a specific error instead of deferring failure
//! into packaging. It touches the filesystem only for existence and type
//! checks and has no other side effects.

use crate::patterns::ExcludeSet;
use crate::runtime::{Runtime, RuntimeFamily};
use crate::spec::{FunctionSpec, LibraryPaths};
use crate::types::HandlerRef;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Patterns excluded from hashing and packaging when a spec supplies none.
/// Covers compiled Python bytecode.
pub const DEFAULT_EXCLUDES: &[&str] = &["*.pyc"];

/// The runtime family requests must target.
pub const ALLOWED_FAMILY: RuntimeFamily = RuntimeFamily::Python;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("entrypoint '{}' is not a source file inside an accessible directory", path.display())]
    InvalidEntrypoint { path: PathBuf },

    #[error("library path '{}' is not a directory", path.display())]
    InvalidLibrary { path: PathBuf },

    #[error("explicit handler '{handler}' conflicts with the handler derived from entrypoint and function")]
    ConflictingHandler { handler: String },

    #[error("pre-built code '{}' conflicts with packaging from source directories", path.display())]
    ConflictingCode { path: PathBuf },

    #[error("runtime '{runtime}' is not in the supported {family} family")]
    UnsupportedRuntime {
        runtime: String,
        family: RuntimeFamily,
    },
}

/// A validated, canonical build request. Immutable once constructed;
/// every accessor is read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    entrypoint_dir: PathBuf,
    module_stem: String,
    exported_function: String,
    handler: HandlerRef,
    library_dirs: Vec<PathBuf>,
    runtime: Runtime,
    excluded_patterns: ExcludeSet,
}

impl BuildRequest {
    /// Directory containing the entrypoint source file.
    pub fn entrypoint_dir(&self) -> &Path {
        &self.entrypoint_dir
    }

    /// Entrypoint file name without its extension.
    pub fn module_stem(&self) -> &str {
        &self.module_stem
    }

    /// Name of the function the runtime must invoke.
    pub fn exported_function(&self) -> &str {
        &self.exported_function
    }

    /// `<module_stem>.<exported_function>`, handed verbatim to the runtime.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// Library directories, sorted and deduplicated.
    pub fn library_dirs(&self) -> &[PathBuf] {
        &self.library_dirs
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime
    }

    /// Patterns dropped from both the identity hash and the artifact.
    pub fn excluded_patterns(&self) -> &ExcludeSet {
        &self.excluded_patterns
    }

    /// All directories whose content feeds both the identity hash and the
    /// artifact: the entrypoint directory followed by the library directories.
    pub fn code_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(1 + self.library_dirs.len());
        paths.push(self.entrypoint_dir.clone());
        paths.extend(self.library_dirs.iter().cloned());
        paths
    }
}

impl FunctionSpec {
    /// Validate this spec into a canonical [`BuildRequest`].
    pub fn validate(&self) -> Result<BuildRequest, ValidationError> {
        let function = &self.function;

        if let Some(handler) = &function.handler {
            return Err(ValidationError::ConflictingHandler {
                handler: handler.clone(),
            });
        }
        if let Some(code) = &function.code {
            return Err(ValidationError::ConflictingCode { path: code.clone() });
        }

        let entrypoint = &function.entrypoint;
        let entrypoint_dir = match entrypoint.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !entrypoint_dir.is_dir() {
            return Err(ValidationError::InvalidEntrypoint {
                path: entrypoint.clone(),
            });
        }

        let module_stem = entrypoint
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| ValidationError::InvalidEntrypoint {
                path: entrypoint.clone(),
            })?
            .to_owned();

        let runtime = match &function.runtime {
            Some(id) => {
                Runtime::parse(id).ok_or_else(|| ValidationError::UnsupportedRuntime {
                    runtime: id.clone(),
                    family: ALLOWED_FAMILY,
                })?
            }
            None => Runtime::DEFAULT,
        };
        if runtime.family() != ALLOWED_FAMILY {
            return Err(ValidationError::UnsupportedRuntime {
                runtime: runtime.id().to_owned(),
                family: ALLOWED_FAMILY,
            });
        }

        let mut library_dirs: Vec<PathBuf> = function
            .libraries
            .as_ref()
            .map(LibraryPaths::to_vec)
            .unwrap_or_default();
        library_dirs.sort();
        library_dirs.dedup();
        library_dirs.retain(|path| *path != entrypoint_dir);
        for library in &library_dirs {
            if !library.is_dir() {
                return Err(ValidationError::InvalidLibrary {
                    path: library.clone(),
                });
            }
        }

        let handler = HandlerRef::new(format!("{module_stem}.{}", function.function));

        let excluded_patterns = match self.package.as_ref().and_then(|p| p.exclude.as_ref()) {
            Some(patterns) => ExcludeSet::new(patterns),
            None => ExcludeSet::new(DEFAULT_EXCLUDES),
        };

        Ok(BuildRequest {
            entrypoint_dir,
            module_stem,
            exported_function: function.function.clone(),
            handler,
            library_dirs,
            runtime,
            excluded_patterns,
        })
    }
}
