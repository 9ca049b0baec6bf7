//! addin-host - Addin isolation and lifecycle supervisor.
//!
//! A library for embedding third-party addin modules in a long-lived host
//! process. Each addin runs in its own isolation context on a dedicated
//! thread; the host drives install, boot and shutdown, and routes the
//! capability declarations addins make at boot (menus, menu-event
//! bindings, resource documents, permissions, init hooks) to the
//! embedding application.
//!
//! # Architecture
//!
//! The library is organized into two modules:
//!
//! - [`config`] - TOML-backed host configuration
//! - [`host`] - the supervisor, isolation contexts, runners, and the
//!   collaborator traits the embedding application implements
//!
//! # Example
//!
//! ```ignore
//! use addin_host::{AddinSupervisor, HostConfig};
//!
//! let config = HostConfig::load("host.toml".as_ref())?;
//! let supervisor = AddinSupervisor::new(config, collaborators);
//!
//! supervisor.load_addins(&candidates);
//! // ... host runs ...
//! supervisor.shutdown_all();
//! ```

pub mod config;
pub mod host;

pub use config::HostConfig;
pub use host::{
    Addin, AddinCode, AddinDescriptor, AddinError, AddinKind, AddinResult, AddinStatus,
    AddinSupervisor, CapabilityRegistrar, HostCollaborators, HostHandle,
};
