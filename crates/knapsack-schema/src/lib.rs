//! Schema layer for Knapsack: function spec parsing, request validation,
//! and build identity hashing.
//!
//! This crate is the pure core of the system. It keeps no persistent state,
//! reads no environment, and exposes no command surface. It validates raw
//! inputs into a canonical [`BuildRequest`] and derives the content-based
//! [`BuildIdentity`] that keys artifact reuse; everything stateful (stores,
//! locks, publishing) lives in the crates built on top of it.

pub mod identity;
pub mod patterns;
pub mod runtime;
pub mod spec;
pub mod types;
pub mod validate;

pub use identity::{BuildIdentity, IdentityError, TreeHash};
pub use patterns::ExcludeSet;
pub use runtime::{Runtime, RuntimeFamily};
pub use spec::{
    parse_spec_file, parse_spec_str, FunctionSection, FunctionSpec, LibraryPaths, PackageSection,
    SpecError, SPEC_VERSION,
};
pub use types::{ArchiveHash, BuildId, HandlerRef, ShortId};
pub use validate::{BuildRequest, ValidationError, ALLOWED_FAMILY, DEFAULT_EXCLUDES};
