//! Extension runtime.
//!
//! An [`Extension`] is a compiled-in bundle of chat commands and value
//! substitutions.  Extensions are listed in an [`ExtensionCatalog`] and
//! attached to or detached from the running bot through the
//! [`ExtensionRegistry`], which owns the shared command and value maps.
//!
//! Loading calls [`Extension::register`] with an empty [`Exports`]; every
//! `command`/`value` it records is inserted into the shared maps, replacing
//! any existing entry of the same name (last load wins).  Unloading removes
//! the mappings the extension still owns and every scheduled task whose
//! owner is the extension's name.

pub mod builtin;
mod context;

pub use context::{CommandContext, Services};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::comm::Session;
use crate::scheduler::Scheduler;

/// Character that introduces a value placeholder (`$nick`).
pub const VALUE_SIGIL: char = '$';

// ── Types ────────────────────────────────────────────────────

/// A chat command handler.  Replies go through the context's session.
pub type CommandHandler =
    Arc<dyn Fn(&CommandContext<'_>, &[String]) -> anyhow::Result<()> + Send + Sync>;

/// A value substitution function.
pub type ValueFn = Arc<dyn Fn(&dyn Session) -> String + Send + Sync>;

/// Constructor for a compiled-in extension.
pub type ExtensionFactory = fn() -> Box<dyn Extension>;

/// A loadable unit of chat behaviour.
pub trait Extension: Send + Sync {
    /// Identifier the extension is loaded by.  Must match its catalog key.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Record this extension's commands and values.  An error aborts the
    /// load and nothing is registered.
    fn register(&self, exports: &mut Exports) -> anyhow::Result<()>;
}

/// What an extension exports, collected during [`Extension::register`].
#[derive(Default)]
pub struct Exports {
    commands: Vec<(String, CommandHandler)>,
    values: Vec<(String, ValueFn)>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a command invocable as `name`.
    pub fn command<F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(&CommandContext<'_>, &[String]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.commands.push((name.to_string(), Arc::new(handler)));
        self
    }

    /// Export a value substituted for `$name`.
    pub fn value<F>(&mut self, name: &str, value: F) -> &mut Self
    where
        F: Fn(&dyn Session) -> String + Send + Sync + 'static,
    {
        self.values.push((name.to_string(), Arc::new(value)));
        self
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(|(n, _)| n.as_str())
    }

    pub fn value_names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }
}

/// Errors from loading and unloading extensions.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension `{0}` is already loaded")]
    AlreadyLoaded(String),
    #[error("extension `{0}` not found")]
    NotFound(String),
    #[error("extension `{name}` failed to initialize: {reason}")]
    LoadFailed { name: String, reason: String },
    #[error("extension `{0}` is not loaded")]
    NotLoaded(String),
}

/// Summary of a loaded extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub description: String,
    pub commands: Vec<String>,
    pub values: Vec<String>,
}

// ── Catalog ──────────────────────────────────────────────────

/// The set of extensions that can be loaded, keyed by identifier.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: BTreeMap<String, ExtensionFactory>,
}

impl fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl ExtensionCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the extensions shipped with the bot.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        builtin::add_all(&mut catalog);
        catalog
    }

    /// Add (or replace) a factory under `name`.
    pub fn add(&mut self, name: &str, factory: ExtensionFactory) -> &mut Self {
        self.factories.insert(name.to_string(), factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Identifiers in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Instantiate the extension registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Extension>> {
        self.factories.get(name).map(|factory| factory())
    }
}

// ── Registry ─────────────────────────────────────────────────

struct Owned<T> {
    owner: String,
    item: T,
}

struct LoadedExtension {
    info: ExtensionInfo,
    _instance: Box<dyn Extension>,
}

#[derive(Default)]
struct RegistryState {
    /// Load order.
    extensions: Vec<LoadedExtension>,
    commands: HashMap<String, Owned<CommandHandler>>,
    /// Registration order, which is also substitution order.
    values: Vec<(String, Owned<ValueFn>)>,
}

/// Thread-safe registry of loaded extensions and their exports.
///
/// Handlers run with no registry lock held, so a command may itself load
/// or unload extensions.
pub struct ExtensionRegistry {
    catalog: ExtensionCatalog,
    state: RwLock<RegistryState>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("catalog", &self.catalog)
            .field("loaded", &self.loaded())
            .finish()
    }
}

impl ExtensionRegistry {
    pub fn new(catalog: ExtensionCatalog) -> Self {
        Self {
            catalog,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the extension `name` from the catalog and publish its exports.
    pub fn load(&self, name: &str) -> Result<(), ExtensionError> {
        let mut state = self.write();
        if state.extensions.iter().any(|e| e.info.name == name) {
            warn!(extension = %name, "extension already loaded");
            return Err(ExtensionError::AlreadyLoaded(name.to_string()));
        }

        let Some(instance) = self.catalog.create(name) else {
            error!(extension = %name, "extension not found");
            return Err(ExtensionError::NotFound(name.to_string()));
        };
        if instance.name() != name {
            let reason = format!("catalog entry builds extension `{}`", instance.name());
            error!(extension = %name, error = %reason, "failed to load extension");
            return Err(ExtensionError::LoadFailed {
                name: name.to_string(),
                reason,
            });
        }

        let mut exports = Exports::new();
        let registered = catch_unwind(AssertUnwindSafe(|| instance.register(&mut exports)));
        let reason = match registered {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(_) => Some("panicked during registration".to_string()),
        };
        if let Some(reason) = reason {
            error!(extension = %name, error = %reason, "failed to load extension");
            return Err(ExtensionError::LoadFailed {
                name: name.to_string(),
                reason,
            });
        }

        let info = ExtensionInfo {
            name: name.to_string(),
            description: instance.description().to_string(),
            commands: exports.commands.iter().map(|(n, _)| n.clone()).collect(),
            values: exports.values.iter().map(|(n, _)| n.clone()).collect(),
        };

        for (command, handler) in exports.commands {
            let entry = Owned {
                owner: name.to_string(),
                item: handler,
            };
            if let Some(prev) = state.commands.insert(command.clone(), entry) {
                if prev.owner != name {
                    warn!(command = %command, previous = %prev.owner, extension = %name,
                          "command overwritten by later load");
                }
            }
        }
        for (value, func) in exports.values {
            let entry = Owned {
                owner: name.to_string(),
                item: func,
            };
            match state.values.iter_mut().find(|(n, _)| *n == value) {
                Some((_, slot)) => {
                    warn!(value = %value, previous = %slot.owner, extension = %name,
                          "value overwritten by later load");
                    *slot = entry;
                }
                None => state.values.push((value, entry)),
            }
        }

        info!(extension = %name, commands = info.commands.len(), values = info.values.len(),
              "loaded extension");
        state.extensions.push(LoadedExtension {
            info,
            _instance: instance,
        });
        Ok(())
    }

    /// Detach `name`: revoke the exports it still owns and remove every
    /// task it owns from `scheduler`.  Returns the number of tasks removed.
    ///
    /// The write lock is held throughout, so no command of the extension
    /// can start once unloading has begun.
    pub fn unload(&self, name: &str, scheduler: &Scheduler) -> Result<usize, ExtensionError> {
        let mut state = self.write();
        let Some(index) = state.extensions.iter().position(|e| e.info.name == name) else {
            warn!(extension = %name, "extension not loaded");
            return Err(ExtensionError::NotLoaded(name.to_string()));
        };

        state.commands.retain(|_, entry| entry.owner != name);
        state.values.retain(|(_, entry)| entry.owner != name);
        let removed = scheduler.remove_all_for(name);
        state.extensions.remove(index);

        info!(extension = %name, tasks_removed = removed, "unloaded extension");
        Ok(removed)
    }

    /// Run `command` if some loaded extension exports it.  Returns false,
    /// with no side effects, when nothing matches.
    ///
    /// Handler errors and panics are logged and otherwise swallowed.
    pub fn dispatch(&self, command: &str, ctx: &CommandContext<'_>, args: &[String]) -> bool {
        let found = {
            let state = self.read();
            state
                .commands
                .get(command)
                .map(|e| (Arc::clone(&e.item), e.owner.clone()))
        };
        let Some((handler, owner)) = found else {
            debug!(command = %command, "no handler");
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(ctx, args))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(command = %command, extension = %owner, error = %format!("{e:#}"),
                      "command handler failed");
            }
            Err(_) => {
                error!(command = %command, extension = %owner, "command handler panicked");
            }
        }
        true
    }

    /// Replace each `$name` placeholder in `message` with the matching
    /// value, in registration order.
    pub fn substitute(&self, message: &str, session: &dyn Session) -> String {
        let values: Vec<(String, ValueFn)> = {
            let state = self.read();
            state
                .values
                .iter()
                .map(|(name, entry)| (format!("{VALUE_SIGIL}{name}"), Arc::clone(&entry.item)))
                .collect()
        };

        let mut out = message.to_string();
        for (placeholder, func) in values {
            if out.contains(&placeholder) {
                out = out.replace(&placeholder, &func(session));
            }
        }
        out
    }

    /// Names of loaded extensions, in load order.
    pub fn loaded(&self) -> Vec<String> {
        self.read()
            .extensions
            .iter()
            .map(|e| e.info.name.clone())
            .collect()
    }

    pub fn info(&self, name: &str) -> Option<ExtensionInfo> {
        self.read()
            .extensions
            .iter()
            .find(|e| e.info.name == name)
            .map(|e| e.info.clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.read().extensions.iter().any(|e| e.info.name == name)
    }

    /// All registered command names, sorted.
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Extension currently providing `command`.
    pub fn command_owner(&self, command: &str) -> Option<String> {
        self.read().commands.get(command).map(|e| e.owner.clone())
    }

    /// Registered value names, in substitution order.
    pub fn values(&self) -> Vec<String> {
        self.read().values.iter().map(|(n, _)| n.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::OutboundSession;

    struct Greeter;

    impl Extension for Greeter {
        fn name(&self) -> &str {
            "greeter"
        }

        fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
            exports
                .value("who", |_| "world".to_string())
                .value("greeting", |_| "hello $who".to_string());
            Ok(())
        }
    }

    struct Shadow;

    impl Extension for Shadow {
        fn name(&self) -> &str {
            "shadow"
        }

        fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
            exports.value("who", |s| s.nickname());
            Ok(())
        }
    }

    struct Broken;

    impl Extension for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn register(&self, exports: &mut Exports) -> anyhow::Result<()> {
            exports.command("never", |_, _| Ok(()));
            anyhow::bail!("missing configuration")
        }
    }

    fn registry() -> ExtensionRegistry {
        let mut catalog = ExtensionCatalog::new();
        catalog
            .add("greeter", || Box::new(Greeter))
            .add("shadow", || Box::new(Shadow))
            .add("broken", || Box::new(Broken))
            .add("alias", || Box::new(Greeter));
        ExtensionRegistry::new(catalog)
    }

    #[test]
    fn values_substitute_in_registration_order() {
        let reg = registry();
        reg.load("greeter").unwrap();
        let (session, _rx) = OutboundSession::new(1, "svx");
        // `$who` is replaced before `$greeting` expands, so the expansion's
        // own placeholder survives.
        assert_eq!(reg.substitute("$greeting, $who", &session), "hello $who, world");
    }

    #[test]
    fn overwritten_value_keeps_its_position_and_survives_unload_of_loser() {
        let reg = registry();
        let (scheduler, _events) = Scheduler::new();
        reg.load("greeter").unwrap();
        reg.load("shadow").unwrap();
        let (session, _rx) = OutboundSession::new(1, "svx");
        assert_eq!(reg.values(), vec!["who", "greeting"]);
        assert_eq!(reg.substitute("$who", &session), "svx");

        reg.unload("greeter", &scheduler).unwrap();
        assert_eq!(reg.values(), vec!["who"]);
        assert_eq!(reg.substitute("$who", &session), "svx");
    }

    #[test]
    fn failed_registration_publishes_nothing() {
        let reg = registry();
        let err = reg.load("broken").unwrap_err();
        assert!(matches!(err, ExtensionError::LoadFailed { .. }));
        assert!(err.to_string().contains("missing configuration"));
        assert!(!reg.is_loaded("broken"));
        assert!(reg.commands().is_empty());
    }

    #[test]
    fn catalog_key_must_match_extension_name() {
        let reg = registry();
        match reg.load("alias") {
            Err(ExtensionError::LoadFailed { name, reason }) => {
                assert_eq!(name, "alias");
                assert!(reason.contains("greeter"));
            }
            other => panic!("expected LoadFailed, got {other:?}"),
        }
        assert!(reg.loaded().is_empty());
        assert!(reg.values().is_empty());
    }

    #[test]
    fn unknown_extension_is_not_found() {
        let reg = registry();
        assert!(matches!(reg.load("nope"), Err(ExtensionError::NotFound(_))));
        let (scheduler, _events) = Scheduler::new();
        assert!(matches!(
            reg.unload("nope", &scheduler),
            Err(ExtensionError::NotLoaded(_))
        ));
    }
}
