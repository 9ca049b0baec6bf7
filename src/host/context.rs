//! Per-addin isolation contexts.
//!
//! An [`IsolationContext`] owns one addin's entry point and provides the
//! fault boundary the host relies on: every call into addin code goes
//! through [`IsolationContext::invoke`], which turns a panic inside the
//! addin into an [`AddinError::ContextFault`] instead of unwinding the
//! host. The only state shared with the host is the explicitly injected
//! [`BootParams`] and the leased proxies resolved from the context.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::capability::MenuEntry;
use super::collaborators::{Addin, AddinFactory, EventRegistrar, FormRegistrar, MenuRegistrar};
use super::descriptor::AddinDescriptor;
use super::error::{AddinError, AddinResult};
use super::lease::{Lease, LeaseTable};
use super::supervisor::HostHandle;
use super::sync::SignalFlag;

/// Named boot parameters injected into a context at creation.
#[derive(Clone)]
pub struct BootParams {
    /// Load name of the addin.
    pub load_name: String,

    /// Set by the runner once in-context boot has finished.
    pub boot: Arc<SignalFlag>,

    /// Set by the supervisor to request cooperative shutdown.
    pub shutdown: Arc<SignalFlag>,

    /// Back-reference to the supervisor for status queries and logging.
    pub host: HostHandle,
}

/// Creates and destroys isolation contexts.
pub struct IsolationContextManager {
    factory: Arc<dyn AddinFactory>,
    lease_ttl: Duration,
}

impl IsolationContextManager {
    pub fn new(factory: Arc<dyn AddinFactory>, lease_ttl: Duration) -> Self {
        Self { factory, lease_ttl }
    }

    /// Create a fresh context for one addin.
    ///
    /// Failures here are fatal to that addin's load attempt and are not
    /// retried.
    pub fn create_context(
        &self,
        descriptor: &AddinDescriptor,
        params: BootParams,
    ) -> AddinResult<IsolationContext> {
        debug!(addin = %descriptor.code, "creating isolation context");
        Ok(IsolationContext {
            descriptor: descriptor.clone(),
            params,
            leases: LeaseTable::default(),
            lease_ttl: self.lease_ttl,
            entry: Mutex::new(None),
        })
    }

    /// Instantiate the entry-point object inside the context, handing it
    /// the context's boot parameters.
    pub fn instantiate(&self, context: &IsolationContext) -> AddinResult<()> {
        let entry = catch_fault(&context.descriptor.code, || {
            self.factory.instantiate(&context.descriptor, &context.params)
        })?;
        *context.entry.lock() = Some(entry);
        Ok(())
    }

    /// Tear a context down. Equivalent to [`IsolationContext::destroy`];
    /// dropping the context has the same effect.
    pub fn destroy_context(&self, context: &IsolationContext) {
        context.destroy();
    }
}

/// One addin's isolated execution environment.
pub struct IsolationContext {
    descriptor: AddinDescriptor,
    params: BootParams,
    leases: LeaseTable,
    lease_ttl: Duration,
    entry: Mutex<Option<Box<dyn Addin>>>,
}

impl IsolationContext {
    pub fn descriptor(&self) -> &AddinDescriptor {
        &self.descriptor
    }

    /// Run a closure against the entry point inside the fault boundary.
    ///
    /// A panic raised by the addin surfaces as
    /// [`AddinError::ContextFault`]; calling into a torn-down context
    /// yields [`AddinError::ContextGone`].
    pub fn invoke<R>(&self, f: impl FnOnce(&dyn Addin) -> AddinResult<R>) -> AddinResult<R> {
        let entry = self.entry.lock();
        let addin = entry
            .as_deref()
            .ok_or_else(|| AddinError::ContextGone(self.descriptor.code.clone()))?;
        catch_fault(&self.descriptor.code, || f(addin))
    }

    /// Resolve the per-addin form handler proxy, wrapped in a keep-alive
    /// lease.
    pub fn resolve_form_handler(
        &self,
        inner: Arc<dyn FormRegistrar>,
    ) -> Lease<FormHandlerProxy> {
        let proxy = Arc::new(FormHandlerProxy {
            addin: self.descriptor.code.clone(),
            inner,
        });
        self.leases.issue(proxy, self.lease_ttl)
    }

    /// Resolve the per-addin event dispatcher proxy.
    pub fn resolve_event_dispatcher(
        &self,
        inner: Arc<dyn EventRegistrar>,
    ) -> Lease<EventDispatcherProxy> {
        let proxy = Arc::new(EventDispatcherProxy {
            addin: self.descriptor.code.clone(),
            inner,
        });
        self.leases.issue(proxy, self.lease_ttl)
    }

    /// Resolve the per-addin loader proxy. Its menu batch is filled in
    /// after the boot scan.
    pub fn resolve_loader(&self, inner: Arc<dyn MenuRegistrar>) -> Lease<AddinLoaderProxy> {
        let proxy = Arc::new(AddinLoaderProxy {
            addin: self.descriptor.code.clone(),
            registrar: inner,
            menu_batch: Mutex::new(Vec::new()),
        });
        self.leases.issue(proxy, self.lease_ttl)
    }

    /// Prune released/expired lease slots; returns the live count.
    pub fn sweep_leases(&self) -> usize {
        self.leases.sweep()
    }

    /// Tear the context down, dropping the entry point.
    ///
    /// Faults raised by the addin during teardown are swallowed; the
    /// context is being discarded either way. Safe to call twice.
    pub fn destroy(&self) {
        let entry = self.entry.lock().take();
        if let Some(entry) = entry {
            if let Err(e) = catch_fault(&self.descriptor.code, || {
                entry.on_stop();
                Ok(())
            }) {
                debug!(addin = %self.descriptor.code, error = %e, "teardown fault ignored");
            }
        }
        let live = self.leases.sweep();
        if live > 0 {
            warn!(
                addin = %self.descriptor.code,
                leases = live,
                "context destroyed with live proxy leases"
            );
        }
    }
}

impl Drop for IsolationContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Per-addin view of the host's form registrar.
pub struct FormHandlerProxy {
    addin: String,
    inner: Arc<dyn FormRegistrar>,
}

impl FormHandlerProxy {
    pub fn register_forms(&self) -> AddinResult<()> {
        self.inner.register_forms(&self.addin)
    }

    pub fn unregister_forms(&self) -> AddinResult<()> {
        self.inner.unregister_forms(&self.addin)
    }
}

/// Per-addin view of the host's event dispatcher.
pub struct EventDispatcherProxy {
    addin: String,
    inner: Arc<dyn EventRegistrar>,
}

impl EventDispatcherProxy {
    pub fn unregister_events(&self) -> AddinResult<()> {
        self.inner.unregister_events(&self.addin)
    }
}

/// Per-addin view of the host's menu surface.
///
/// Caches the menu batch produced by the boot scan so menu activation can
/// be re-applied without re-scanning the addin.
pub struct AddinLoaderProxy {
    addin: String,
    registrar: Arc<dyn MenuRegistrar>,
    menu_batch: Mutex<Vec<MenuEntry>>,
}

impl AddinLoaderProxy {
    pub(crate) fn set_menu_batch(&self, menus: Vec<MenuEntry>) {
        *self.menu_batch.lock() = menus;
    }

    /// Re-apply the cached menu batch to the UI registrar.
    pub fn start_menu(&self) -> AddinResult<()> {
        let batch = self.menu_batch.lock().clone();
        if batch.is_empty() {
            return Ok(());
        }
        self.registrar.apply_menus(&self.addin, &batch)
    }

    pub fn remove_menus(&self) -> AddinResult<()> {
        self.registrar.remove_menus(&self.addin)
    }
}

/// The three leased proxies a runner holds for its addin.
pub struct ContextProxies {
    pub forms: Lease<FormHandlerProxy>,
    pub events: Lease<EventDispatcherProxy>,
    pub loader: Lease<AddinLoaderProxy>,
}

impl ContextProxies {
    pub fn renew_all(&self) {
        self.forms.renew();
        self.events.renew();
        self.loader.renew();
    }
}

fn catch_fault<R>(addin: &str, f: impl FnOnce() -> AddinResult<R>) -> AddinResult<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "opaque panic payload".to_string()
            };
            Err(AddinError::ContextFault(format!("{addin}: {message}")))
        }
    }
}
