//! Capability declarations and the per-addin accumulation registry.
//!
//! Addins do not expose declarative metadata for the host to introspect;
//! instead their entry point is handed a [`CapabilityRegistrar`] and calls
//! typed registration functions during `declare`. The accumulated
//! declarations are then routed by the scanner: menus to the UI registrar
//! (batched), menu events to the event registrar, resources and
//! permissions to the installer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::AddinResult;

/// A menu entry contributed to the host UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    /// Menu identifier, unique within the host UI.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Identifier of the parent menu, or `None` for a top-level entry.
    #[serde(default)]
    pub parent: Option<String>,

    /// Position among siblings; the UI registrar decides ties.
    #[serde(default)]
    pub position: Option<i32>,
}

/// A handler binding for a menu event.
///
/// The originating addin and handler name are captured at registration so
/// later event dispatch can route back into the right addin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEventBinding {
    /// Menu the handler listens on.
    pub menu_id: String,

    /// Code of the addin that registered the handler.
    pub addin: String,

    /// Handler name inside the addin.
    pub handler: String,

    /// Whether the handler runs before the host's own action.
    #[serde(default)]
    pub before_action: bool,
}

/// Kind of a declared resource.
///
/// The variant order is the dispatch order: tables are materialized before
/// fields, and both before business objects, to satisfy referential
/// dependencies in the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Table,
    Field,
    BusinessObject,
}

/// A typed resource document an addin asks the host store to materialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub kind: ResourceKind,

    /// Resource name, unique per kind within the addin.
    pub name: String,

    /// Store-specific definition document.
    #[serde(default)]
    pub document: Value,
}

impl ResourceDeclaration {
    pub fn new(kind: ResourceKind, name: impl Into<String>, document: Value) -> Self {
        Self {
            kind,
            name: name.into(),
            document,
        }
    }

    /// Ordering key used when sorting a batch for dispatch.
    pub fn ordering_key(&self) -> (ResourceKind, &str) {
        (self.kind, &self.name)
    }
}

/// A permission an addin requires the host to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDeclaration {
    /// Permission identifier in the host's permission tree.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Parent permission node, or `None` for a root entry.
    #[serde(default)]
    pub parent: Option<String>,
}

/// A named zero-argument initializer registered by an addin.
///
/// Invoked by the scanner immediately after declarations are collected, in
/// declaration order.
pub struct InitHook {
    pub name: String,
    pub hook: Box<dyn Fn() -> AddinResult<()> + Send + Sync>,
}

impl fmt::Debug for InitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitHook").field("name", &self.name).finish()
    }
}

/// Everything one addin declared during a single scan.
#[derive(Debug, Default)]
pub struct CapabilityDeclarations {
    pub menus: Vec<MenuEntry>,
    pub menu_events: Vec<MenuEventBinding>,
    pub resources: Vec<ResourceDeclaration>,
    pub permissions: Vec<PermissionDeclaration>,
    pub init_hooks: Vec<InitHook>,
}

impl CapabilityDeclarations {
    /// Resources in dispatch order: tables, then fields, then business
    /// objects; ties broken by name for a stable order.
    pub fn sorted_resources(&self) -> Vec<ResourceDeclaration> {
        let mut sorted = self.resources.clone();
        sorted.sort_by(|a, b| a.ordering_key().cmp(&b.ordering_key()));
        sorted
    }
}

/// Accumulates the declarations one addin makes during `declare`.
pub struct CapabilityRegistrar {
    addin: String,
    declarations: CapabilityDeclarations,
}

impl CapabilityRegistrar {
    pub fn new(addin: impl Into<String>) -> Self {
        Self {
            addin: addin.into(),
            declarations: CapabilityDeclarations::default(),
        }
    }

    /// Code of the addin this registrar collects for.
    pub fn addin(&self) -> &str {
        &self.addin
    }

    pub fn register_menu(&mut self, entry: MenuEntry) {
        self.declarations.menus.push(entry);
    }

    /// Register a menu-event handler, capturing the originating addin.
    pub fn register_menu_event(
        &mut self,
        menu_id: impl Into<String>,
        handler: impl Into<String>,
        before_action: bool,
    ) {
        self.declarations.menu_events.push(MenuEventBinding {
            menu_id: menu_id.into(),
            addin: self.addin.clone(),
            handler: handler.into(),
            before_action,
        });
    }

    pub fn register_resource(&mut self, declaration: ResourceDeclaration) {
        self.declarations.resources.push(declaration);
    }

    pub fn register_permission(&mut self, declaration: PermissionDeclaration) {
        self.declarations.permissions.push(declaration);
    }

    /// Register a named initializer invoked once per scan.
    pub fn register_init<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn() -> AddinResult<()> + Send + Sync + 'static,
    {
        self.declarations.init_hooks.push(InitHook {
            name: name.into(),
            hook: Box::new(hook),
        });
    }

    pub fn into_declarations(self) -> CapabilityDeclarations {
        self.declarations
    }
}
