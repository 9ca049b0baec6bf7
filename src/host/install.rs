//! Addin install step.
//!
//! Installation runs the addin's declarations through a throwaway
//! isolation context: permissions are applied as discovered, resource
//! documents are sorted so tables land before fields and both before
//! business objects, then applied in that order. The throwaway context is
//! released on every path (drop guard). A failed install explicitly
//! resets the install flag so the next load retries from scratch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::collaborators::HostCollaborators;
use super::context::{BootParams, IsolationContextManager};
use super::descriptor::AddinDescriptor;
use super::error::{AddinError, AddinResult};
use super::scanner::CapabilityScanner;
use super::supervisor::HostHandle;
use super::sync::SignalFlag;

/// Install one addin and flip its install flag accordingly.
pub(crate) fn install_addin(
    contexts: &IsolationContextManager,
    collaborators: &HostCollaborators,
    host: &HostHandle,
    descriptor: &AddinDescriptor,
) -> AddinResult<()> {
    info!(addin = %descriptor.name, "configuring addin");
    match configure_addin(contexts, collaborators, host, descriptor) {
        Ok(()) => {
            collaborators
                .install_state
                .set_installed(&descriptor.code, true)?;
            info!(addin = %descriptor.name, "addin configured");
            Ok(())
        }
        Err(e) => {
            // Explicit reset so the next load attempts a clean re-install.
            if let Err(reset) = collaborators
                .install_state
                .set_installed(&descriptor.code, false)
            {
                warn!(addin = %descriptor.code, error = %reset,
                    "failed to reset install flag");
            }
            Err(AddinError::InstallFailed {
                addin: descriptor.code.clone(),
                message: e.to_string(),
            })
        }
    }
}

fn configure_addin(
    contexts: &IsolationContextManager,
    collaborators: &HostCollaborators,
    host: &HostHandle,
    descriptor: &AddinDescriptor,
) -> AddinResult<()> {
    // Throwaway context: nothing waits on these flags.
    let params = BootParams {
        load_name: descriptor.name.clone(),
        boot: Arc::new(SignalFlag::new()),
        shutdown: Arc::new(SignalFlag::new()),
        host: host.clone(),
    };
    let context = contexts.create_context(descriptor, params)?;
    contexts.instantiate(&context)?;

    let scanner = CapabilityScanner::new(
        Arc::clone(&collaborators.menus),
        Arc::clone(&collaborators.events),
    );
    let declarations = scanner.scan_install(&context)?;

    for permission in &declarations.permissions {
        debug!(addin = %descriptor.code, permission = %permission.id, "applying permission");
        collaborators.installer.apply_permission(permission)?;
    }

    // Tables, then fields, then business objects.
    for resource in declarations.sorted_resources() {
        debug!(addin = %descriptor.code, kind = ?resource.kind, resource = %resource.name,
            "applying resource");
        collaborators.installer.apply_resource(&resource)?;
    }

    contexts.destroy_context(&context);
    Ok(())
}
