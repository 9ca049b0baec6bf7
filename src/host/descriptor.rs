//! Addin identity records.

use serde::{Deserialize, Serialize};

/// Declared kind of a registered module.
///
/// Only `Addin` modules are loaded by the supervisor; `Framework` marks the
/// host runtime's own module in the descriptor store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddinKind {
    Addin,
    Framework,
}

/// Identity record for a registered addin.
///
/// Descriptors are created and persisted by the external descriptor store;
/// the host only reads them to decide what to load. `code` is the stable
/// key everything else (registry, install state, licensing) hangs off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddinDescriptor {
    /// Stable addin code.
    pub code: String,

    /// Human-readable load name.
    pub name: String,

    /// Vendor namespace, used for the on-disk working directory layout.
    #[serde(default)]
    pub namespace: String,

    /// Declared module kind.
    pub kind: AddinKind,
}

impl AddinDescriptor {
    /// Create an addin descriptor (kind `Addin`).
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            namespace: namespace.into(),
            kind: AddinKind::Addin,
        }
    }
}
