//! Contracts between the host and the embedding application.
//!
//! The supervisor consumes everything below as `Arc<dyn …>` trait objects:
//! authorization, licensing, descriptor lookup, payload sync, install
//! state, resource/permission persistence, and the UI-side registrars.
//! Persisted layouts are entirely owned by the implementations.
//!
//! [`Addin`] is the one contract addin modules themselves implement.
//!
//! # Example: implementing an addin
//!
//! ```rust,ignore
//! use addin_host::host::{Addin, CapabilityRegistrar, MenuEntry};
//! use addin_host::host::AddinResult;
//!
//! struct InventoryAddin;
//!
//! impl Addin for InventoryAddin {
//!     fn declare(&self, registrar: &mut CapabilityRegistrar) -> AddinResult<()> {
//!         registrar.register_menu(MenuEntry {
//!             id: "inventory.recount".into(),
//!             title: "Recount Stock".into(),
//!             parent: Some("modules.inventory".into()),
//!             position: None,
//!         });
//!         registrar.register_menu_event("inventory.recount", "on_recount", false);
//!         Ok(())
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::capability::{CapabilityRegistrar, MenuEntry, MenuEventBinding};
use super::capability::{PermissionDeclaration, ResourceDeclaration};
use super::context::BootParams;
use super::descriptor::{AddinDescriptor, AddinKind};
use super::error::AddinResult;

/// Entry-point contract addin modules implement.
///
/// The host instantiates one entry point per addin inside that addin's
/// isolation context and drives it through the registration protocol:
/// `declare` runs at install time (resources and permissions are read) and
/// again at every boot (menus, events and init hooks are read).
pub trait Addin: Send + Sync {
    /// Declare capabilities through the registrar.
    fn declare(&self, registrar: &mut CapabilityRegistrar) -> AddinResult<()>;

    /// Called when the host requests shutdown, before the context is torn
    /// down. The default does nothing.
    fn on_stop(&self) {}
}

/// Builds entry-point objects for descriptors.
///
/// This is how addin code enters the process; the returned box is owned by
/// the addin's isolation context and every call into it runs under the
/// context's fault boundary. The context's [`BootParams`] are handed
/// through so the entry point can keep the load name and the host
/// back-reference.
pub trait AddinFactory: Send + Sync {
    fn instantiate(
        &self,
        descriptor: &AddinDescriptor,
        params: &BootParams,
    ) -> AddinResult<Box<dyn Addin>>;
}

/// Per-addin enablement check applied before anything else.
pub trait AddinAuthorizer: Send + Sync {
    fn addin_enabled(&self, code: &str) -> bool;
}

/// Outcome of a license validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseCheck {
    pub valid: bool,
    pub due_date: Option<SystemTime>,
}

impl LicenseCheck {
    pub fn valid_until(due_date: SystemTime) -> Self {
        Self {
            valid: true,
            due_date: Some(due_date),
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            due_date: None,
        }
    }
}

/// License validation, consulted at load time and re-checked in-context at
/// boot. Validation logic is entirely external.
pub trait LicenseValidator: Send + Sync {
    fn validate(&self, code: &str) -> LicenseCheck;
}

/// Read access to the persisted descriptor records.
pub trait DescriptorStore: Send + Sync {
    /// Look a descriptor up by code; `None` for unknown codes.
    fn descriptor(&self, code: &str) -> Option<AddinDescriptor>;

    /// All descriptors of the given kind.
    fn list(&self, kind: AddinKind) -> Vec<AddinDescriptor>;
}

/// Synchronizes an addin's payload into its working directory.
pub trait PayloadSync: Send + Sync {
    fn sync(&self, descriptor: &AddinDescriptor, directory: &Path) -> AddinResult<()>;
}

/// Persisted two-valued install flag per addin code.
///
/// Each call is assumed atomic at this boundary; the host never caches the
/// flag beyond a single lifecycle transaction.
pub trait InstallStateStore: Send + Sync {
    fn is_installed(&self, code: &str) -> AddinResult<bool>;
    fn set_installed(&self, code: &str, installed: bool) -> AddinResult<()>;
}

/// Applies resource documents and permission declarations to the host's
/// business-object store during install.
pub trait ResourceInstaller: Send + Sync {
    fn apply_resource(&self, declaration: &ResourceDeclaration) -> AddinResult<()>;
    fn apply_permission(&self, declaration: &PermissionDeclaration) -> AddinResult<()>;
}

/// Host UI menu surface. Menu batches arrive at most once per scan.
pub trait MenuRegistrar: Send + Sync {
    fn apply_menus(&self, addin: &str, menus: &[MenuEntry]) -> AddinResult<()>;
    fn remove_menus(&self, addin: &str) -> AddinResult<()>;
}

/// Host event dispatcher registration surface.
pub trait EventRegistrar: Send + Sync {
    fn register_menu_event(&self, binding: &MenuEventBinding) -> AddinResult<()>;

    /// Drop every event binding the addin registered.
    fn unregister_events(&self, addin: &str) -> AddinResult<()>;
}

/// Host form-event handler registration surface.
pub trait FormRegistrar: Send + Sync {
    fn register_forms(&self, addin: &str) -> AddinResult<()>;
    fn unregister_forms(&self, addin: &str) -> AddinResult<()>;
}

/// Everything the host consumes from the embedding application, bundled so
/// constructors stay manageable.
#[derive(Clone)]
pub struct HostCollaborators {
    pub authorizer: Arc<dyn AddinAuthorizer>,
    pub license: Arc<dyn LicenseValidator>,
    pub descriptors: Arc<dyn DescriptorStore>,
    pub payload_sync: Arc<dyn PayloadSync>,
    pub install_state: Arc<dyn InstallStateStore>,
    pub installer: Arc<dyn ResourceInstaller>,
    pub menus: Arc<dyn MenuRegistrar>,
    pub events: Arc<dyn EventRegistrar>,
    pub forms: Arc<dyn FormRegistrar>,
    pub factory: Arc<dyn AddinFactory>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_license_check_constructors() {
        let due = SystemTime::now() + Duration::from_secs(3600);
        let check = LicenseCheck::valid_until(due);
        assert!(check.valid);
        assert_eq!(check.due_date, Some(due));

        let check = LicenseCheck::invalid();
        assert!(!check.valid);
        assert_eq!(check.due_date, None);
    }
}
