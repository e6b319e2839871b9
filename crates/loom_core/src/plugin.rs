//! [`LifecycleState`] and [`PluginRecord`] — the installed plug-in's state
//! machine and bookkeeping.
//!
//! A plug-in-owned context would naturally hold two maps: symbols this
//! plug-in has resolved from others, and the usage count other plug-ins
//! hold against symbols this plug-in defines. Since a process has exactly
//! one [`crate::context::Context`] and that bookkeeping is inherently
//! per-consuming-plugin, both maps are folded directly onto the owning
//! plug-in's [`PluginRecord`] rather than modeled as a second, parallel
//! context type.

use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::descriptor::PluginDescriptor;
use crate::ids::PluginId;
use crate::runtime::{InstanceData, LibraryHandle, SymbolPtr};

/// A plug-in's position in the install/resolve/start/stop/uninstall state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Installed but not yet resolved; imports are not guaranteed satisfied.
    Uninstalled,
    /// Freshly installed, dependency graph not yet walked for this plug-in.
    Installed,
    /// Imports satisfied and the dependency graph is consistent; not running.
    Resolved,
    /// Transient: `create`/`start` hooks are executing.
    Starting,
    /// Running; may define and resolve symbols, may be the target of extension lookups.
    Active,
    /// Transient: `stop`/`destroy` hooks are executing.
    Stopping,
}

impl LifecycleState {
    /// Whether a plug-in in this state may be transitioned straight to
    /// `Uninstalled` without visiting `Stopping` first (i.e. it was never
    /// started).
    #[must_use]
    pub fn is_running_or_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }
}

/// A symbol this plug-in defined, along with how many outstanding resolutions
/// other plug-ins currently hold against it.
#[derive(Debug)]
struct DefinedSymbol {
    ptr: SymbolPtr,
    usage: usize,
}

/// Bookkeeping the framework maintains for one installed plug-in.
pub struct PluginRecord {
    /// The immutable descriptor this plug-in was installed from.
    pub descriptor: Arc<PluginDescriptor>,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Plug-ins this one directly imports and whose import was satisfied
    /// during the last successful resolve.
    pub imported: HashSet<PluginId>,
    /// Plug-ins that directly import this one (the reverse edge, maintained
    /// for fast dependent-walks on stop/uninstall).
    pub importing: HashSet<PluginId>,
    /// The loaded runtime library, present once this plug-in has been
    /// resolved (lazily: resolving does not load libraries in every
    /// implementation style, but this one does so at resolve time to fail
    /// fast — see `resolver`).
    pub(crate) library: Option<LibraryHandle>,
    /// The live instance data, present while `Starting`, `Active` or `Stopping`.
    pub(crate) instance: Option<InstanceData>,
    /// Symbols this plug-in has defined via `define_symbol`, keyed by name.
    defined_symbols: HashMap<String, DefinedSymbol>,
    /// Symbols this plug-in has resolved from other plug-ins, keyed by
    /// `(provider, name)` so releasing is unambiguous even if two providers
    /// export the same symbol name under the same string.
    resolved: HashMap<(PluginId, String), ResolvedSymbol>,
    /// Total outstanding resolved-symbol usage this plug-in holds against
    /// each provider, across every symbol name — the count that decides
    /// whether a dynamic dependency edge should exist.
    provider_usage: HashMap<PluginId, usize>,
    /// Providers to which this plug-in holds a dependency edge that was
    /// created by symbol resolution rather than declared as a static import
    /// — withdrawn once `provider_usage` for that provider returns to zero.
    dynamic_providers: HashSet<PluginId>,
    /// Transient mark used by the two-phase resolver to tolerate import
    /// cycles without infinite recursion.
    pub(crate) processed: bool,
}

struct ResolvedSymbol {
    ptr: SymbolPtr,
    usage: usize,
}

impl PluginRecord {
    /// Creates a fresh, `Uninstalled`-adjacent record for a just-installed
    /// descriptor (the framework moves it to `Installed` immediately after
    /// construction; see `install_plugin`).
    #[must_use]
    pub fn new(descriptor: Arc<PluginDescriptor>) -> Self {
        Self {
            descriptor,
            state: LifecycleState::Installed,
            imported: HashSet::new(),
            importing: HashSet::new(),
            library: None,
            instance: None,
            defined_symbols: HashMap::new(),
            resolved: HashMap::new(),
            provider_usage: HashMap::new(),
            dynamic_providers: HashSet::new(),
            processed: false,
        }
    }

    /// This plug-in's identifier.
    #[must_use]
    pub fn id(&self) -> &PluginId {
        &self.descriptor.id
    }

    /// Installation path, if known.
    #[must_use]
    pub fn install_path(&self) -> Option<&PathBuf> {
        self.descriptor.install_path.as_ref()
    }

    /// Defines a symbol under `name`, overwriting any previous definition
    /// (only valid while `Active`, enforced by the caller in `symbols`).
    pub(crate) fn define_symbol(&mut self, name: impl Into<String>, ptr: SymbolPtr) {
        self.defined_symbols
            .insert(name.into(), DefinedSymbol { ptr, usage: 0 });
    }

    /// Looks up a defined symbol by name.
    pub(crate) fn find_defined(&self, name: &str) -> Option<SymbolPtr> {
        self.defined_symbols.get(name).map(|d| d.ptr)
    }

    /// Looks up `name` as a symbol this plug-in's runtime library exports
    /// globally, used by `resolve_symbol` once no context-specific
    /// `define_symbol` entry matches.
    pub(crate) fn global_symbol(&self, name: &str) -> Option<SymbolPtr> {
        self.library.as_ref().and_then(|h| h.runtime.resolve_global_symbol(name))
    }

    /// Increments the usage counter for a symbol this plug-in defines.
    pub(crate) fn bump_usage(&mut self, name: &str) {
        if let Some(def) = self.defined_symbols.get_mut(name) {
            def.usage += 1;
        }
    }

    /// Decrements the usage counter for a symbol this plug-in defines.
    pub(crate) fn drop_usage(&mut self, name: &str) {
        if let Some(def) = self.defined_symbols.get_mut(name) {
            def.usage = def.usage.saturating_sub(1);
        }
    }

    /// Total outstanding usage across every symbol this plug-in defines —
    /// stopping a plug-in while this is nonzero is forbidden.
    #[must_use]
    pub fn total_symbol_usage(&self) -> usize {
        self.defined_symbols.values().map(|d| d.usage).sum()
    }

    /// Clears every defined symbol (called on stop: all of this plug-in's
    /// exported symbols become invalid once it is no longer active).
    pub(crate) fn clear_defined_symbols(&mut self) {
        self.defined_symbols.clear();
    }

    /// Records one additional resolution of `name` from `provider`, and
    /// reports whether this is the first outstanding use of `provider` by
    /// this plug-in (the signal `symbols::resolve_symbol` uses to decide
    /// whether to add a dynamic dependency edge).
    pub(crate) fn record_resolved(&mut self, provider: PluginId, name: String, ptr: SymbolPtr) -> bool {
        self.resolved
            .entry((provider.clone(), name))
            .and_modify(|r| r.usage += 1)
            .or_insert(ResolvedSymbol { ptr, usage: 1 });
        let usage = self.provider_usage.entry(provider).or_insert(0);
        *usage += 1;
        *usage == 1
    }

    /// Removes one unit of usage from a previously recorded resolution,
    /// returning `(symbol fully released, provider usage now zero)`.
    pub(crate) fn release_resolved(&mut self, provider: &PluginId, name: &str) -> (bool, bool) {
        let key = (provider.clone(), name.to_string());
        let symbol_drained = match self.resolved.get_mut(&key) {
            Some(entry) => {
                entry.usage = entry.usage.saturating_sub(1);
                if entry.usage == 0 {
                    self.resolved.remove(&key);
                    true
                } else {
                    false
                }
            }
            None => return (false, false),
        };

        let provider_drained = match self.provider_usage.get_mut(provider) {
            Some(usage) => {
                *usage = usage.saturating_sub(1);
                if *usage == 0 {
                    self.provider_usage.remove(provider);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        (symbol_drained, provider_drained)
    }

    /// Marks `provider` as reached via a dynamically created edge (as
    /// opposed to a static import) for later edge-withdrawal bookkeeping.
    pub(crate) fn mark_dynamic_provider(&mut self, provider: PluginId) {
        self.dynamic_providers.insert(provider);
    }

    /// Whether `provider` was reached via a dynamically created edge.
    pub(crate) fn is_dynamic_provider(&self, provider: &PluginId) -> bool {
        self.dynamic_providers.contains(provider)
    }

    /// Stops tracking `provider` as a dynamic edge (called once the edge is withdrawn).
    pub(crate) fn unmark_dynamic_provider(&mut self, provider: &PluginId) {
        self.dynamic_providers.remove(provider);
    }

    /// Every `(provider, name)` this plug-in currently holds a resolution
    /// against — consulted when this plug-in itself is stopped, so its
    /// resolutions against other plug-ins can be released.
    pub(crate) fn resolved_keys(&self) -> Vec<(PluginId, String)> {
        self.resolved.keys().cloned().collect()
    }

    /// Finds the `(provider, name)` a previously resolved pointer belongs to.
    /// `release_symbol` is keyed by pointer alone, mirroring the governing
    /// contract; a linear scan is acceptable given the small number of
    /// symbols a plug-in typically resolves at once.
    pub(crate) fn find_resolved_by_ptr(&self, ptr: SymbolPtr) -> Option<(PluginId, String)> {
        self.resolved
            .iter()
            .find(|(_, r)| r.ptr == ptr)
            .map(|(k, _)| k.clone())
    }

    /// The pointer currently recorded for a `(provider, name)` resolution, if any.
    pub(crate) fn resolved_ptr(&self, provider: &PluginId, name: &str) -> Option<SymbolPtr> {
        self.resolved.get(&(provider.clone(), name.to_string())).map(|r| r.ptr)
    }
}
