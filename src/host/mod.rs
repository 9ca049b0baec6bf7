//! Addin lifecycle supervision.
//!
//! This module hosts third-party addin modules inside a long-lived
//! process: each addin runs in its own isolation context on a dedicated
//! thread, and its capability declarations are routed to the embedding
//! application's collaborators.
//!
//! # Architecture
//!
//! ```text
//! AddinSupervisor
//! ├── registry: IndexMap<AddinCode, RunningAddin>   (one mutex)
//! ├── contexts: IsolationContextManager
//! └── collaborators: HostCollaborators              (Arc<dyn …> bundle)
//!
//! AddinRunner (one thread per addin)
//! ├── IsolationContext (fault boundary, proxy leases)
//! ├── boot / shutdown / done SignalFlags
//! └── CapabilityScanner → MenuRegistrar / EventRegistrar / init hooks
//! ```
//!
//! Lifecycle of one addin: authorize → license check → payload sync →
//! install on first load (resources applied table → field → business
//! object) → runner boot handshake → serve until shutdown is signaled.

pub mod capability;
pub mod collaborators;
mod context;
mod descriptor;
mod error;
mod install;
mod lease;
mod runner;
mod scanner;
mod supervisor;
mod sync;

pub use capability::{
    CapabilityDeclarations, CapabilityRegistrar, InitHook, MenuEntry, MenuEventBinding,
    PermissionDeclaration, ResourceDeclaration, ResourceKind,
};
pub use collaborators::{
    Addin, AddinAuthorizer, AddinFactory, DescriptorStore, EventRegistrar, FormRegistrar,
    HostCollaborators, InstallStateStore, LicenseCheck, LicenseValidator, MenuRegistrar,
    PayloadSync, ResourceInstaller,
};
pub use context::{
    AddinLoaderProxy, BootParams, ContextProxies, EventDispatcherProxy, FormHandlerProxy,
    IsolationContext, IsolationContextManager,
};
pub use descriptor::{AddinDescriptor, AddinKind};
pub use error::{AddinError, AddinResult};
pub use lease::Lease;
pub use scanner::CapabilityScanner;
pub use supervisor::{AddinCode, AddinStatus, AddinSupervisor, HostHandle};
pub use sync::SignalFlag;
