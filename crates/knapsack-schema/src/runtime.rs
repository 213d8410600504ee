//! The table of known execution runtimes.
//!
//! Validation gates requests on the runtime's family, not on an exact id, so
//! the table carries foreign families too. Ids use the provider's spelling
//! (`python3.11`, `nodejs20`).

use std::fmt;

/// Broad execution-language family a runtime belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFamily {
    Python,
    Node,
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => f.write_str("python"),
            Self::Node => f.write_str("node"),
        }
    }
}

/// One known execution runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Runtime {
    id: &'static str,
    family: RuntimeFamily,
}

impl Runtime {
    pub const PYTHON_3_9: Self = Self::known("python3.9", RuntimeFamily::Python);
    pub const PYTHON_3_10: Self = Self::known("python3.10", RuntimeFamily::Python);
    pub const PYTHON_3_11: Self = Self::known("python3.11", RuntimeFamily::Python);
    pub const PYTHON_3_12: Self = Self::known("python3.12", RuntimeFamily::Python);
    pub const PYTHON_3_13: Self = Self::known("python3.13", RuntimeFamily::Python);
    pub const NODEJS_18: Self = Self::known("nodejs18", RuntimeFamily::Node);
    pub const NODEJS_20: Self = Self::known("nodejs20", RuntimeFamily::Node);

    /// Applied when a request names no runtime.
    pub const DEFAULT: Self = Self::PYTHON_3_11;

    const TABLE: &'static [Self] = &[
        Self::PYTHON_3_9,
        Self::PYTHON_3_10,
        Self::PYTHON_3_11,
        Self::PYTHON_3_12,
        Self::PYTHON_3_13,
        Self::NODEJS_18,
        Self::NODEJS_20,
    ];

    const fn known(id: &'static str, family: RuntimeFamily) -> Self {
        Self { id, family }
    }

    /// Look up a runtime by id. Ids are matched exactly.
    pub fn parse(id: &str) -> Option<Self> {
        Self::TABLE.iter().copied().find(|r| r.id == id)
    }

    /// Provider-facing id string.
    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn family(&self) -> RuntimeFamily {
        self.family
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id)
    }
}
