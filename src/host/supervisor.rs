//! Top-level addin lifecycle supervisor.
//!
//! The supervisor owns the registry of running addins and drives the full
//! lifecycle: authorize, license-check, sync payload, install on first
//! load, boot a dedicated runner thread per addin, and shut addins down
//! individually or all at once. The registry is a single insertion-ordered
//! map behind one mutex; an addin appears in it exactly while its context
//! is live and its boot handshake has completed.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;

use super::collaborators::HostCollaborators;
use super::context::{BootParams, ContextProxies, IsolationContextManager};
use super::descriptor::AddinDescriptor;
use super::error::{AddinError, AddinResult};
use super::install;
use super::runner::AddinRunner;
use super::sync::SignalFlag;

/// Stable addin key, as issued by the descriptor store.
pub type AddinCode = String;

/// Registry-membership view of an addin. There is no intermediate state:
/// an addin that has not finished its boot handshake is `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddinStatus {
    Running,
    Stopped,
}

pub(crate) type SharedRegistry = Arc<Mutex<IndexMap<AddinCode, RunningAddin>>>;

/// One currently-running addin, as seen from the registry.
pub(crate) struct RunningAddin {
    pub descriptor: AddinDescriptor,
    pub shutdown: Arc<SignalFlag>,
    pub done: Arc<SignalFlag>,
    pub proxies: Arc<ContextProxies>,
    /// Attached by the supervisor once the boot wait succeeds.
    pub handle: Option<thread::JoinHandle<()>>,
}

/// Narrow back-reference handed to isolation contexts.
///
/// Exposes only status queries and error logging; addin code never sees
/// the supervisor itself.
#[derive(Clone)]
pub struct HostHandle {
    registry: SharedRegistry,
}

impl HostHandle {
    /// A handle attached to no supervisor. Every status query answers
    /// `Stopped`. Used for install-time throwaway contexts.
    pub fn detached() -> Self {
        Self {
            registry: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    pub fn addin_status(&self, code: &str) -> AddinStatus {
        if self.registry.lock().contains_key(code) {
            AddinStatus::Running
        } else {
            AddinStatus::Stopped
        }
    }

    pub fn log_error(&self, message: &str) {
        error!("{message}");
    }
}

/// Per-addin logging settings written into the working directory.
#[derive(Serialize)]
struct LogSettings {
    log_file: String,
}

pub struct AddinSupervisor {
    config: HostConfig,
    collaborators: HostCollaborators,
    contexts: Arc<IsolationContextManager>,
    registry: SharedRegistry,
}

impl AddinSupervisor {
    pub fn new(config: HostConfig, collaborators: HostCollaborators) -> Self {
        let contexts = Arc::new(IsolationContextManager::new(
            Arc::clone(&collaborators.factory),
            config.lease_ttl(),
        ));
        Self {
            config,
            collaborators,
            contexts,
            registry: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    /// A narrow handle suitable for handing into isolation contexts.
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            registry: Arc::clone(&self.registry),
        }
    }

    /// Load a batch of candidate addins, in order.
    ///
    /// Disabled addins are skipped silently; a failing addin is logged
    /// once and does not block the rest of the batch. Boot of addin N
    /// completes before addin N+1 is spawned.
    pub fn load_addins(&self, candidates: &[AddinDescriptor]) {
        for descriptor in candidates {
            if !self.collaborators.authorizer.addin_enabled(&descriptor.code) {
                debug!(addin = %descriptor.code, "addin disabled, skipping");
                continue;
            }
            if let Err(e) = self.load_addin(descriptor) {
                error!(addin = %descriptor.code, error = %e, "failed to load addin");
            }
        }
    }

    /// Run the full lifecycle for one addin: license check, payload sync,
    /// install on first load, boot.
    pub fn load_addin(&self, descriptor: &AddinDescriptor) -> AddinResult<()> {
        let code = &descriptor.code;
        if self.registry.lock().contains_key(code) {
            return Err(AddinError::AlreadyRunning(code.clone()));
        }

        let check = self.collaborators.license.validate(code);
        if !check.valid {
            return Err(AddinError::LicenseInvalid(code.clone()));
        }
        if let Some(due) = check.due_date {
            debug!(addin = %code, due = ?due, "license valid");
        }

        let dir = self.config.working_dir(&descriptor.namespace, &descriptor.name);
        fs::create_dir_all(&dir)?;
        self.collaborators.payload_sync.sync(descriptor, &dir)?;

        if !self.collaborators.install_state.is_installed(code)? {
            install::install_addin(&self.contexts, &self.collaborators, &self.handle(), descriptor)?;
        }

        self.start_runner(descriptor)?;

        // The addin is already serving at this point; a failure here must
        // not undo the boot.
        if let Err(e) = self.write_log_settings(descriptor, &dir) {
            warn!(addin = %code, error = %e, "failed to write log settings");
        }
        Ok(())
    }

    /// Run the full load lifecycle for a known addin by code. Unknown
    /// codes are a silent no-op.
    pub fn start_addin(&self, code: &str) -> AddinResult<()> {
        match self.collaborators.descriptors.descriptor(code) {
            Some(descriptor) => self.load_addin(&descriptor),
            None => {
                debug!(addin = %code, "start requested for unknown addin");
                Ok(())
            }
        }
    }

    /// Re-run the install step for a known addin by code, syncing its
    /// payload first. Unknown codes are a silent no-op.
    pub fn install_addin(&self, code: &str) -> AddinResult<()> {
        match self.collaborators.descriptors.descriptor(code) {
            Some(descriptor) => {
                let dir = self.config.working_dir(&descriptor.namespace, &descriptor.name);
                fs::create_dir_all(&dir)?;
                self.collaborators.payload_sync.sync(&descriptor, &dir)?;
                install::install_addin(
                    &self.contexts,
                    &self.collaborators,
                    &self.handle(),
                    &descriptor,
                )
            }
            None => {
                debug!(addin = %code, "install requested for unknown addin");
                Ok(())
            }
        }
    }

    /// Stop one addin: remove it from the registry, unregister its UI
    /// bindings, signal its shutdown flag. Does not wait for the runner
    /// thread. Idempotent; unknown codes are a no-op.
    pub fn shutdown_addin(&self, code: &str) {
        let entry = self.registry.lock().shift_remove(code);
        let Some(entry) = entry else {
            debug!(addin = %code, "shutdown requested for addin that is not running");
            return;
        };
        info!(addin = %entry.descriptor.name, code = %code, "stopping addin");
        unregister_bindings(code, &entry.proxies);
        let RunningAddin { shutdown, .. } = entry;
        shutdown.set();
    }

    /// Stop every running addin and wait (bounded) for each runner to
    /// finish. Runners that miss the deadline are left detached.
    pub fn shutdown_all(&self) {
        let entries: Vec<RunningAddin> = self
            .registry
            .lock()
            .drain(..)
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            let RunningAddin {
                descriptor,
                shutdown,
                done,
                proxies,
                handle,
            } = entry;
            unregister_bindings(&descriptor.code, &proxies);
            drop(proxies);
            shutdown.set();
            if !done.wait_timeout(self.config.shutdown_timeout()) {
                error!(
                    addin = %descriptor.code,
                    waited = ?self.config.shutdown_timeout(),
                    "addin did not stop in time, detaching runner"
                );
                continue;
            }
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(addin = %descriptor.code, "runner thread terminated abnormally");
                }
            }
        }
    }

    pub fn addin_status(&self, code: &str) -> AddinStatus {
        if self.registry.lock().contains_key(code) {
            AddinStatus::Running
        } else {
            AddinStatus::Stopped
        }
    }

    /// Codes of the running addins, in boot order.
    pub fn running_addins(&self) -> Vec<AddinCode> {
        self.registry.lock().keys().cloned().collect()
    }

    pub fn log_error(&self, message: &str) {
        error!("{message}");
    }

    /// Re-apply the cached menu batch and re-register forms for every
    /// running addin. Produces duplicate registrations when the registrars
    /// do not deduplicate, same as re-scanning would.
    pub fn refresh_ui_bindings(&self) {
        let snapshot: Vec<(AddinCode, Arc<ContextProxies>)> = self
            .registry
            .lock()
            .iter()
            .map(|(code, entry)| (code.clone(), Arc::clone(&entry.proxies)))
            .collect();
        for (code, proxies) in snapshot {
            if let Err(e) = proxies.loader.start_menu() {
                warn!(addin = %code, error = %e, "failed to re-apply menus");
            }
            if let Err(e) = proxies.forms.register_forms() {
                warn!(addin = %code, error = %e, "failed to re-register forms");
            }
        }
    }

    /// Spawn the runner thread and wait for the boot handshake.
    fn start_runner(&self, descriptor: &AddinDescriptor) -> AddinResult<()> {
        let code = descriptor.code.clone();
        let boot = Arc::new(SignalFlag::new());
        let shutdown = Arc::new(SignalFlag::new());
        let done = Arc::new(SignalFlag::new());
        let boot_error: Arc<Mutex<Option<AddinError>>> = Arc::new(Mutex::new(None));

        let runner = AddinRunner {
            descriptor: descriptor.clone(),
            collaborators: self.collaborators.clone(),
            contexts: Arc::clone(&self.contexts),
            registry: Arc::clone(&self.registry),
            params: BootParams {
                load_name: descriptor.name.clone(),
                boot: Arc::clone(&boot),
                shutdown: Arc::clone(&shutdown),
                host: self.handle(),
            },
            done: Arc::clone(&done),
            boot_error: Arc::clone(&boot_error),
            renew_interval: self.config.lease_renew_interval(),
        };
        let handle = thread::Builder::new()
            .name(format!("addin-{code}"))
            .spawn(move || runner.run())?;

        if !boot.wait_timeout(self.config.boot_timeout()) {
            // Best effort: ask the stuck runner to stop and leave it
            // detached.
            shutdown.set();
            return Err(AddinError::BootTimeout {
                addin: code,
                waited: self.config.boot_timeout(),
            });
        }
        if let Some(e) = boot_error.lock().take() {
            let _ = handle.join();
            return Err(e);
        }

        let mut registry = self.registry.lock();
        match registry.get_mut(&code) {
            Some(entry) => {
                entry.handle = Some(handle);
                Ok(())
            }
            // Boot signaled with neither an entry nor an error; treat it
            // as a failed boot rather than trusting the runner.
            None => Err(AddinError::BootFailed {
                addin: code,
                message: "runner exited without publishing the addin".to_string(),
            }),
        }
    }

    /// Drop the addin's logging settings file into its working directory,
    /// keeping an existing file untouched.
    fn write_log_settings(&self, descriptor: &AddinDescriptor, dir: &Path) -> AddinResult<()> {
        let path = dir.join(format!("{}.toml", descriptor.name));
        if path.exists() {
            return Ok(());
        }
        let settings = LogSettings {
            log_file: format!("{}.log", descriptor.name),
        };
        let body = toml::to_string_pretty(&settings).map_err(|e| AddinError::ConfigInvalid {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, body)?;
        debug!(addin = %descriptor.code, path = %path.display(), "wrote log settings");
        Ok(())
    }
}

fn unregister_bindings(code: &str, proxies: &ContextProxies) {
    if let Err(e) = proxies.events.unregister_events() {
        warn!(addin = %code, error = %e, "failed to unregister events");
    }
    if let Err(e) = proxies.forms.unregister_forms() {
        warn!(addin = %code, error = %e, "failed to unregister forms");
    }
    if let Err(e) = proxies.loader.remove_menus() {
        warn!(addin = %code, error = %e, "failed to remove menus");
    }
}
