//! Error types for the addin host.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while supervising addins.
#[derive(Debug, Error)]
pub enum AddinError {
    #[error("Addin '{0}' has no valid license")]
    LicenseInvalid(String),

    #[error("Addin '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Install failed for addin '{addin}': {message}")]
    InstallFailed { addin: String, message: String },

    #[error("Addin '{addin}' failed to boot: {message}")]
    BootFailed { addin: String, message: String },

    #[error("Addin '{addin}' did not signal boot within {waited:?}")]
    BootTimeout { addin: String, waited: Duration },

    #[error("Fault inside addin context: {0}")]
    ContextFault(String),

    #[error("Context for addin '{0}' is already torn down")]
    ContextGone(String),

    #[error("Declaration rejected for addin '{addin}': {message}")]
    DeclarationRejected { addin: String, message: String },

    #[error("Collaborator call failed: {0}")]
    Collaborator(#[from] anyhow::Error),

    #[error("Invalid host config in {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type for addin host operations.
pub type AddinResult<T> = Result<T, AddinError>;
