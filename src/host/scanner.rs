//! Capability scanning via the explicit registration protocol.
//!
//! The scanner drives an addin's `declare` inside its context's fault
//! boundary and routes what came back: menu-event bindings one by one to
//! the event registrar, menu entries as a single batch to the UI
//! registrar, init hooks invoked immediately. Install scans collect
//! resource and permission declarations without UI side effects.

use std::sync::Arc;

use tracing::debug;

use super::capability::{CapabilityDeclarations, CapabilityRegistrar, MenuEntry};
use super::collaborators::{EventRegistrar, MenuRegistrar};
use super::context::IsolationContext;
use super::error::AddinResult;

pub struct CapabilityScanner {
    menus: Arc<dyn MenuRegistrar>,
    events: Arc<dyn EventRegistrar>,
}

impl CapabilityScanner {
    pub fn new(menus: Arc<dyn MenuRegistrar>, events: Arc<dyn EventRegistrar>) -> Self {
        Self { menus, events }
    }

    /// Run a UI scan for a booting addin.
    ///
    /// Menu-event bindings are registered one by one; menu entries are
    /// applied as one batch per scan; init hooks run immediately, in
    /// declaration order. Returns the menu batch so the caller can cache
    /// it for later re-activation.
    ///
    /// Scanning is idempotent in data but not side-effect-free: running it
    /// twice for the same addin produces duplicate registrations
    /// downstream. Callers own that.
    pub fn scan_ui(&self, context: &IsolationContext) -> AddinResult<Vec<MenuEntry>> {
        let addin = context.descriptor().code.clone();
        let declarations = self.collect(context)?;

        for binding in &declarations.menu_events {
            debug!(addin = %addin, menu = %binding.menu_id, handler = %binding.handler,
                "registering menu event");
            self.events.register_menu_event(binding)?;
        }

        if !declarations.menus.is_empty() {
            debug!(addin = %addin, count = declarations.menus.len(), "applying menu batch");
            self.menus.apply_menus(&addin, &declarations.menus)?;
        }

        for hook in &declarations.init_hooks {
            debug!(addin = %addin, hook = %hook.name, "invoking init hook");
            (hook.hook)()?;
        }

        Ok(declarations.menus)
    }

    /// Collect install-relevant declarations without UI side effects.
    pub fn scan_install(&self, context: &IsolationContext) -> AddinResult<CapabilityDeclarations> {
        self.collect(context)
    }

    fn collect(&self, context: &IsolationContext) -> AddinResult<CapabilityDeclarations> {
        let mut registrar = CapabilityRegistrar::new(context.descriptor().code.clone());
        context.invoke(|addin| addin.declare(&mut registrar))?;
        Ok(registrar.into_declarations())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::capability::{MenuEventBinding, PermissionDeclaration};
    use crate::host::capability::{ResourceDeclaration, ResourceKind};
    use crate::host::collaborators::{Addin, AddinFactory};
    use crate::host::context::{BootParams, IsolationContextManager};
    use crate::host::descriptor::AddinDescriptor;
    use crate::host::error::AddinError;
    use crate::host::supervisor::HostHandle;
    use crate::host::sync::SignalFlag;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct DeclaringAddin {
        init_counter: Arc<AtomicUsize>,
    }

    impl Addin for DeclaringAddin {
        fn declare(&self, registrar: &mut CapabilityRegistrar) -> AddinResult<()> {
            registrar.register_menu(MenuEntry {
                id: "tools.sync".into(),
                title: "Sync".into(),
                parent: None,
                position: None,
            });
            registrar.register_menu(MenuEntry {
                id: "tools.report".into(),
                title: "Report".into(),
                parent: None,
                position: None,
            });
            registrar.register_menu_event("tools.sync", "on_sync", true);
            registrar.register_resource(ResourceDeclaration::new(
                ResourceKind::Table,
                "Orders",
                json!({}),
            ));
            registrar.register_permission(PermissionDeclaration {
                id: "tools.sync".into(),
                name: "Run Sync".into(),
                parent: None,
            });
            let counter = Arc::clone(&self.init_counter);
            registrar.register_init("warm_cache", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Ok(())
        }
    }

    struct DeclaringFactory {
        init_counter: Arc<AtomicUsize>,
    }

    impl AddinFactory for DeclaringFactory {
        fn instantiate(
            &self,
            _descriptor: &AddinDescriptor,
            _params: &BootParams,
        ) -> AddinResult<Box<dyn Addin>> {
            Ok(Box::new(DeclaringAddin {
                init_counter: Arc::clone(&self.init_counter),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingMenus {
        batches: Mutex<Vec<(String, usize)>>,
    }

    impl MenuRegistrar for RecordingMenus {
        fn apply_menus(&self, addin: &str, menus: &[MenuEntry]) -> AddinResult<()> {
            self.batches.lock().push((addin.to_string(), menus.len()));
            Ok(())
        }

        fn remove_menus(&self, _addin: &str) -> AddinResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingEvents {
        bindings: Mutex<Vec<MenuEventBinding>>,
    }

    impl EventRegistrar for RecordingEvents {
        fn register_menu_event(&self, binding: &MenuEventBinding) -> AddinResult<()> {
            self.bindings.lock().push(binding.clone());
            Ok(())
        }

        fn unregister_events(&self, _addin: &str) -> AddinResult<()> {
            Ok(())
        }
    }

    fn build_context(init_counter: Arc<AtomicUsize>) -> IsolationContext {
        let manager = IsolationContextManager::new(
            Arc::new(DeclaringFactory { init_counter }),
            Duration::from_secs(60),
        );
        let descriptor = AddinDescriptor::new("A001", "tools", "acme");
        let params = BootParams {
            load_name: "tools".to_string(),
            boot: Arc::new(SignalFlag::new()),
            shutdown: Arc::new(SignalFlag::new()),
            host: HostHandle::detached(),
        };
        let context = manager.create_context(&descriptor, params).unwrap();
        manager.instantiate(&context).unwrap();
        context
    }

    #[test]
    fn test_scan_ui_batches_menus_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let context = build_context(Arc::clone(&counter));
        let menus = Arc::new(RecordingMenus::default());
        let events = Arc::new(RecordingEvents::default());
        let scanner = CapabilityScanner::new(menus.clone(), events.clone());

        let batch = scanner.scan_ui(&context).unwrap();

        assert_eq!(batch.len(), 2);
        // Two menu entries, one batch call.
        assert_eq!(*menus.batches.lock(), vec![("A001".to_string(), 2)]);
        // Event binding routed individually, addin captured.
        let bindings = events.bindings.lock();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].addin, "A001");
        assert!(bindings[0].before_action);
        // Init hook invoked exactly once per scan.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rescan_duplicates_side_effects() {
        let counter = Arc::new(AtomicUsize::new(0));
        let context = build_context(Arc::clone(&counter));
        let menus = Arc::new(RecordingMenus::default());
        let events = Arc::new(RecordingEvents::default());
        let scanner = CapabilityScanner::new(menus.clone(), events.clone());

        scanner.scan_ui(&context).unwrap();
        scanner.scan_ui(&context).unwrap();

        assert_eq!(menus.batches.lock().len(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scan_install_has_no_ui_side_effects() {
        let counter = Arc::new(AtomicUsize::new(0));
        let context = build_context(Arc::clone(&counter));
        let menus = Arc::new(RecordingMenus::default());
        let events = Arc::new(RecordingEvents::default());
        let scanner = CapabilityScanner::new(menus.clone(), events.clone());

        let declarations = scanner.scan_install(&context).unwrap();

        assert_eq!(declarations.resources.len(), 1);
        assert_eq!(declarations.permissions.len(), 1);
        assert!(menus.batches.lock().is_empty());
        assert!(events.bindings.lock().is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scan_surfaces_declaration_error() {
        struct FailingAddin;

        impl Addin for FailingAddin {
            fn declare(&self, registrar: &mut CapabilityRegistrar) -> AddinResult<()> {
                Err(AddinError::DeclarationRejected {
                    addin: registrar.addin().to_string(),
                    message: "bad menu id".to_string(),
                })
            }
        }

        struct FailingFactory;

        impl AddinFactory for FailingFactory {
            fn instantiate(
                &self,
                _d: &AddinDescriptor,
                _params: &BootParams,
            ) -> AddinResult<Box<dyn Addin>> {
                Ok(Box::new(FailingAddin))
            }
        }

        let manager =
            IsolationContextManager::new(Arc::new(FailingFactory), Duration::from_secs(60));
        let descriptor = AddinDescriptor::new("A002", "broken", "acme");
        let params = BootParams {
            load_name: "broken".to_string(),
            boot: Arc::new(SignalFlag::new()),
            shutdown: Arc::new(SignalFlag::new()),
            host: HostHandle::detached(),
        };
        let context = manager.create_context(&descriptor, params).unwrap();
        manager.instantiate(&context).unwrap();

        let scanner = CapabilityScanner::new(
            Arc::new(RecordingMenus::default()),
            Arc::new(RecordingEvents::default()),
        );
        let err = scanner.scan_ui(&context).unwrap_err();
        assert!(matches!(err, AddinError::DeclarationRejected { .. }));
    }
}
