//! Dedicated per-addin runner thread.
//!
//! Each running addin is owned by exactly one runner: the runner creates
//! the isolation context, boots the addin, publishes it in the registry,
//! then parks on the shutdown flag while renewing the proxy leases on a
//! fixed cadence. Boot failures are handed back to the supervisor through
//! a shared error slot; the boot and done flags are set on every exit
//! path so waiters never hang.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::collaborators::HostCollaborators;
use super::context::{BootParams, ContextProxies, IsolationContextManager};
use super::descriptor::AddinDescriptor;
use super::error::{AddinError, AddinResult};
use super::scanner::CapabilityScanner;
use super::supervisor::{RunningAddin, SharedRegistry};
use super::sync::SignalFlag;

pub(crate) struct AddinRunner {
    pub descriptor: AddinDescriptor,
    pub collaborators: HostCollaborators,
    pub contexts: Arc<IsolationContextManager>,
    pub registry: SharedRegistry,
    pub params: BootParams,
    pub done: Arc<SignalFlag>,
    pub boot_error: Arc<Mutex<Option<AddinError>>>,
    pub renew_interval: Duration,
}

impl AddinRunner {
    /// Thread body. Never panics outward; the context's fault boundary
    /// converts addin panics into errors before they reach this frame.
    pub(crate) fn run(self) {
        let code = self.descriptor.code.clone();
        if let Err(e) = self.serve() {
            debug!(addin = %code, error = %e, "runner exiting with error");
            *self.boot_error.lock() = Some(e);
        }
        // Guarded self-removal: the code may have been reloaded while
        // this thread was tearing down, so only evict the entry if it
        // still belongs to this generation. The `done` flag doubles as
        // the generation identity.
        {
            let mut registry = self.registry.lock();
            if registry
                .get(&code)
                .is_some_and(|entry| Arc::ptr_eq(&entry.done, &self.done))
            {
                registry.shift_remove(&code);
            }
        }
        self.params.boot.set();
        self.done.set();
    }

    fn serve(&self) -> AddinResult<()> {
        let descriptor = &self.descriptor;
        let code = descriptor.code.clone();

        let context = self
            .contexts
            .create_context(descriptor, self.params.clone())?;
        self.contexts.instantiate(&context)?;

        // The load-time check may have gone stale by the time the thread
        // gets here; re-validate inside the context.
        if !self.collaborators.license.validate(&code).valid {
            return Err(AddinError::LicenseInvalid(code));
        }

        let scanner = CapabilityScanner::new(
            Arc::clone(&self.collaborators.menus),
            Arc::clone(&self.collaborators.events),
        );
        let menu_batch = scanner.scan_ui(&context)?;

        let proxies = Arc::new(ContextProxies {
            forms: context.resolve_form_handler(Arc::clone(&self.collaborators.forms)),
            events: context.resolve_event_dispatcher(Arc::clone(&self.collaborators.events)),
            loader: context.resolve_loader(Arc::clone(&self.collaborators.menus)),
        });
        proxies.loader.set_menu_batch(menu_batch);
        proxies.forms.register_forms()?;

        // Publish before signaling boot: a status query that races the
        // boot waiter must already see the addin. A live entry under the
        // same code means this runner lost a restart race and must not
        // displace it.
        {
            let mut registry = self.registry.lock();
            if registry.contains_key(&code) {
                return Err(AddinError::AlreadyRunning(code));
            }
            registry.insert(
                code.clone(),
                RunningAddin {
                    descriptor: descriptor.clone(),
                    shutdown: Arc::clone(&self.params.shutdown),
                    done: Arc::clone(&self.done),
                    proxies: Arc::clone(&proxies),
                    handle: None,
                },
            );
        }
        info!(addin = %descriptor.name, code = %code, "addin booted");
        self.params.boot.set();

        while !self.params.shutdown.wait_timeout(self.renew_interval) {
            proxies.renew_all();
            context.sweep_leases();
        }

        // Binding unregistration is the shutdown initiator's job; the
        // runner only releases its leases and tears the context down.
        info!(addin = %descriptor.name, code = %code, "shutting addin down");
        drop(proxies);
        self.contexts.destroy_context(&context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::capability::{
        CapabilityRegistrar, MenuEntry, MenuEventBinding, PermissionDeclaration,
        ResourceDeclaration,
    };
    use crate::host::collaborators::{
        Addin, AddinAuthorizer, AddinFactory, DescriptorStore, EventRegistrar, FormRegistrar,
        InstallStateStore, LicenseCheck, LicenseValidator, MenuRegistrar, PayloadSync,
        ResourceInstaller,
    };
    use crate::host::descriptor::AddinKind;
    use crate::host::supervisor::HostHandle;
    use indexmap::IndexMap;
    use parking_lot::Mutex as PlMutex;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct CallLog {
        calls: PlMutex<Vec<String>>,
    }

    impl CallLog {
        fn push(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    struct Recorder(Arc<CallLog>);

    impl MenuRegistrar for Recorder {
        fn apply_menus(&self, addin: &str, menus: &[MenuEntry]) -> AddinResult<()> {
            self.0.push(format!("menus:{addin}:{}", menus.len()));
            Ok(())
        }

        fn remove_menus(&self, addin: &str) -> AddinResult<()> {
            self.0.push(format!("remove_menus:{addin}"));
            Ok(())
        }
    }

    impl EventRegistrar for Recorder {
        fn register_menu_event(&self, binding: &MenuEventBinding) -> AddinResult<()> {
            self.0.push(format!("event:{}", binding.menu_id));
            Ok(())
        }

        fn unregister_events(&self, addin: &str) -> AddinResult<()> {
            self.0.push(format!("unregister_events:{addin}"));
            Ok(())
        }
    }

    impl FormRegistrar for Recorder {
        fn register_forms(&self, addin: &str) -> AddinResult<()> {
            self.0.push(format!("register_forms:{addin}"));
            Ok(())
        }

        fn unregister_forms(&self, addin: &str) -> AddinResult<()> {
            self.0.push(format!("unregister_forms:{addin}"));
            Ok(())
        }
    }

    impl ResourceInstaller for Recorder {
        fn apply_resource(&self, _d: &ResourceDeclaration) -> AddinResult<()> {
            Ok(())
        }

        fn apply_permission(&self, _d: &PermissionDeclaration) -> AddinResult<()> {
            Ok(())
        }
    }

    struct Passive {
        license_valid: bool,
    }

    impl AddinAuthorizer for Passive {
        fn addin_enabled(&self, _code: &str) -> bool {
            true
        }
    }

    impl LicenseValidator for Passive {
        fn validate(&self, _code: &str) -> LicenseCheck {
            LicenseCheck {
                valid: self.license_valid,
                due_date: None,
            }
        }
    }

    impl DescriptorStore for Passive {
        fn descriptor(&self, _code: &str) -> Option<AddinDescriptor> {
            None
        }

        fn list(&self, _kind: AddinKind) -> Vec<AddinDescriptor> {
            Vec::new()
        }
    }

    impl PayloadSync for Passive {
        fn sync(&self, _d: &AddinDescriptor, _dir: &Path) -> AddinResult<()> {
            Ok(())
        }
    }

    impl InstallStateStore for Passive {
        fn is_installed(&self, _code: &str) -> AddinResult<bool> {
            Ok(true)
        }

        fn set_installed(&self, _code: &str, _installed: bool) -> AddinResult<()> {
            Ok(())
        }
    }

    struct QuietAddin;

    impl Addin for QuietAddin {
        fn declare(&self, registrar: &mut CapabilityRegistrar) -> AddinResult<()> {
            registrar.register_menu(MenuEntry {
                id: "tools.run".into(),
                title: "Run".into(),
                parent: None,
                position: None,
            });
            Ok(())
        }
    }

    struct QuietFactory;

    impl AddinFactory for QuietFactory {
        fn instantiate(
            &self,
            _d: &AddinDescriptor,
            _params: &BootParams,
        ) -> AddinResult<Box<dyn Addin>> {
            Ok(Box::new(QuietAddin))
        }
    }

    fn build_collaborators(log: Arc<CallLog>, license_valid: bool) -> HostCollaborators {
        let passive = Arc::new(Passive { license_valid });
        HostCollaborators {
            authorizer: passive.clone(),
            license: passive.clone(),
            descriptors: passive.clone(),
            payload_sync: passive.clone(),
            install_state: passive,
            installer: Arc::new(Recorder(log.clone())),
            menus: Arc::new(Recorder(log.clone())),
            events: Arc::new(Recorder(log.clone())),
            forms: Arc::new(Recorder(log)),
            factory: Arc::new(QuietFactory),
        }
    }

    fn build_runner(
        collaborators: HostCollaborators,
        registry: SharedRegistry,
    ) -> (AddinRunner, Arc<SignalFlag>, Arc<SignalFlag>, Arc<SignalFlag>) {
        let boot = Arc::new(SignalFlag::new());
        let shutdown = Arc::new(SignalFlag::new());
        let done = Arc::new(SignalFlag::new());
        let runner = AddinRunner {
            descriptor: AddinDescriptor::new("A001", "tools", "acme"),
            contexts: Arc::new(IsolationContextManager::new(
                Arc::clone(&collaborators.factory),
                Duration::from_secs(60),
            )),
            collaborators,
            registry: Arc::clone(&registry),
            params: BootParams {
                load_name: "tools".to_string(),
                boot: Arc::clone(&boot),
                shutdown: Arc::clone(&shutdown),
                host: HostHandle::detached(),
            },
            done: Arc::clone(&done),
            boot_error: Arc::new(Mutex::new(None)),
            renew_interval: Duration::from_millis(10),
        };
        (runner, boot, shutdown, done)
    }

    #[test]
    fn test_runner_publishes_before_boot_signal_and_cleans_up() {
        let log = Arc::new(CallLog::default());
        let registry: SharedRegistry = Arc::new(Mutex::new(IndexMap::new()));
        let collaborators = build_collaborators(Arc::clone(&log), true);
        let (runner, boot, shutdown, done) = build_runner(collaborators, Arc::clone(&registry));

        let handle = thread::spawn(move || runner.run());
        assert!(boot.wait_timeout(Duration::from_secs(5)));
        // Entry is visible as soon as boot is signaled.
        assert!(registry.lock().contains_key("A001"));

        shutdown.set();
        assert!(done.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();

        assert!(registry.lock().is_empty());
        let calls = log.calls.lock();
        assert!(calls.contains(&"menus:A001:1".to_string()));
        assert!(calls.contains(&"register_forms:A001".to_string()));
    }

    #[test]
    fn test_runner_does_not_displace_live_entry() {
        let log = Arc::new(CallLog::default());
        let registry: SharedRegistry = Arc::new(Mutex::new(IndexMap::new()));
        let collaborators = build_collaborators(Arc::clone(&log), true);

        // A live generation is already registered under the same code.
        let manager = IsolationContextManager::new(
            Arc::clone(&collaborators.factory),
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
        let live_done = Arc::new(SignalFlag::new());
        registry.lock().insert(
            "A001".to_string(),
            RunningAddin {
                descriptor: descriptor.clone(),
                shutdown: Arc::new(SignalFlag::new()),
                done: Arc::clone(&live_done),
                proxies: Arc::new(ContextProxies {
                    forms: context.resolve_form_handler(Arc::clone(&collaborators.forms)),
                    events: context.resolve_event_dispatcher(Arc::clone(&collaborators.events)),
                    loader: context.resolve_loader(Arc::clone(&collaborators.menus)),
                }),
                handle: None,
            },
        );

        let (runner, boot, _shutdown, done) = build_runner(collaborators, Arc::clone(&registry));
        let boot_error = Arc::clone(&runner.boot_error);
        let handle = thread::spawn(move || runner.run());
        assert!(boot.wait_timeout(Duration::from_secs(5)));
        assert!(done.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();

        assert!(matches!(
            boot_error.lock().take(),
            Some(AddinError::AlreadyRunning(_))
        ));
        // The live generation's entry survived both the insert and the
        // loser's self-removal.
        let registry = registry.lock();
        assert!(Arc::ptr_eq(&registry.get("A001").unwrap().done, &live_done));
    }

    #[test]
    fn test_runner_reports_stale_license_through_error_slot() {
        let log = Arc::new(CallLog::default());
        let registry: SharedRegistry = Arc::new(Mutex::new(IndexMap::new()));
        let collaborators = build_collaborators(log, false);
        let (runner, boot, _shutdown, done) = build_runner(collaborators, Arc::clone(&registry));
        let boot_error = Arc::clone(&runner.boot_error);

        let handle = thread::spawn(move || runner.run());
        // Boot is signaled even on failure so waiters never hang.
        assert!(boot.wait_timeout(Duration::from_secs(5)));
        assert!(done.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();

        assert!(registry.lock().is_empty());
        assert!(matches!(
            boot_error.lock().take(),
            Some(AddinError::LicenseInvalid(_))
        ));
    }
}
