//! The TOML function spec: the raw input carrier for validation.
//!
//! Parsing checks structure and format version only. Semantic checks
//! (paths, conflicts, runtime family) live in [`FunctionSpec::validate`].
//!
//! [`FunctionSpec::validate`]: crate::validate

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Spec format version understood by this crate.
pub const SPEC_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read spec file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse spec: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported spec version {0} (expected {SPEC_VERSION})")]
    UnsupportedVersion(u32),
}

/// Library paths accept either a single path or a list of paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LibraryPaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl LibraryPaths {
    /// Flatten into a list; a single path becomes a singleton.
    pub fn into_vec(self) -> Vec<PathBuf> {
        match self {
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.clone().into_vec()
    }
}

/// The `[function]` table: what to package and which function to expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSection {
    /// Path of the source file defining the exported function.
    pub entrypoint: PathBuf,
    /// Name of the function the runtime must invoke.
    pub function: String,
    /// Additional directories packaged alongside the entrypoint's directory.
    #[serde(default)]
    pub libraries: Option<LibraryPaths>,
    /// Runtime id; defaults to the fixed default when absent.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Explicit handler override. Always rejected by validation; the handler
    /// is derived from `entrypoint` and `function`.
    #[serde(default)]
    pub handler: Option<String>,
    /// Pre-built code reference. Always rejected by validation; code is
    /// packaged from disk.
    #[serde(default)]
    pub code: Option<PathBuf>,
}

/// The `[package]` table: packaging knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PackageSection {
    /// Name patterns dropped from both the identity hash and the artifact.
    /// Replaces the default pattern list when present.
    pub exclude: Option<Vec<String>>,
}

/// A parsed, structurally valid function spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
    pub spec_version: u32,
    pub function: FunctionSection,
    #[serde(default)]
    pub package: Option<PackageSection>,
}

/// Parse a spec from a TOML string.
pub fn parse_spec_str(input: &str) -> Result<FunctionSpec, SpecError> {
    let spec: FunctionSpec = toml::from_str(input)?;
    if spec.spec_version != SPEC_VERSION {
        return Err(SpecError::UnsupportedVersion(spec.spec_version));
    }
    Ok(spec)
}

/// Parse a spec from a TOML file on disk.
pub fn parse_spec_file(path: &Path) -> Result<FunctionSpec, SpecError> {
    let content = fs::read_to_string(path)?;
    parse_spec_str(&content)
}
