//! The [`Context`]: a container of plug-ins sharing dependency resolution and
//! symbol visibility, and the [`Environment`] it owns.
//!
//! # Locking discipline
//!
//! The context lock is [`parking_lot::ReentrantMutex`] because the resolver
//! and starter re-enter it through their own recursion, and because a
//! plug-in callback (`create`/`start`/`stop`/`destroy`) may call back into
//! the framework from the same thread (e.g. `resolve_symbol`). A
//! [`ReentrantMutex`] only ever hands out a shared `&T`, so the protected
//! state (`Locked`) uses a [`RefCell`] for interior mutability. `RefCell`
//! panics on a nested `borrow_mut()`, so every recursive algorithm in this
//! crate (`resolver`, `lifecycle`, `symbols`) follows one rule: **never hold
//! a `RefMut` across a call that might re-enter the context lock** — read or
//! copy what you need, drop the borrow, then recurse or invoke a user
//! callback, then re-borrow to commit. This is also why the invocation-guard
//! counters below are bumped and dropped as two separate short-lived
//! borrows around each callback rather than with an RAII guard spanning the
//! call: an RAII guard would have to hold the borrow across it.

use std::any::Any;
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::ReentrantMutex;

use crate::descriptor::{ExtensionDecl, ExtensionPointDecl};
use crate::ids::{ExtPointId, PluginId};
use crate::logging::LoggerKey;
use crate::plugin::{LifecycleState, PluginRecord};
use crate::runtime::{InMemoryLoader, LibraryLoader};

/// Opaque, process-unique identifier for a [`Context`].
///
/// Derived from the address of the context's shared core, so two `Context`
/// handles referring to the same context always compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

impl ContextId {
    /// Builds a `ContextId` from an arbitrary numeric value.
    ///
    /// Intended for tests and diagnostics that need a `ContextId` without a
    /// live [`Context`] (e.g. exercising [`crate::logging::LoggerTable`]'s
    /// context filter in isolation).
    #[must_use]
    pub fn for_test(raw: u64) -> Self {
        Self(raw as usize)
    }
}

/// A registered extension point, together with the plug-in that declared it.
#[derive(Debug, Clone)]
pub struct ExtPointEntry {
    /// The declaration itself.
    pub decl: ExtensionPointDecl,
    /// The plug-in that declared it.
    pub owner: PluginId,
}

/// A registered extension, together with the plug-in that contributed it.
#[derive(Debug, Clone)]
pub struct ExtensionEntry {
    /// The declaration itself.
    pub decl: ExtensionDecl,
    /// The plug-in that contributed it.
    pub owner: PluginId,
}

/// A subscribed plug-in-state listener.
pub struct ListenerEntry {
    pub(crate) key: usize,
    pub(crate) callback: Arc<dyn Fn(&PluginId, LifecycleState, LifecycleState) + Send + Sync>,
}

/// Opaque token returned by `add_plugin_listener`, passed to `remove_plugin_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey(pub(crate) usize);

/// Per-context counters preventing re-entrant calls into lifecycle or
/// listener-registration APIs from a user callback running on the same
/// thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvocationGuard {
    pub(crate) in_listener: usize,
    pub(crate) in_start_func: usize,
    pub(crate) in_stop_func: usize,
    pub(crate) in_create_func: usize,
    pub(crate) in_destroy_func: usize,
    pub(crate) in_logger: usize,
}

impl InvocationGuard {
    /// Returns the name of the callback kind currently active, if any.
    ///
    /// Lifecycle-changing and listener-registration APIs call this at entry
    /// and, if it returns `Some`, must route to the fatal handler instead of
    /// proceeding: all lifecycle-changing calls are forbidden from within a
    /// listener or from within `create`/`start`/`stop`/`destroy` invocations
    /// on the same thread.
    #[must_use]
    pub fn active_callback(&self) -> Option<&'static str> {
        if self.in_listener > 0 {
            Some("listener")
        } else if self.in_start_func > 0 {
            Some("start")
        } else if self.in_stop_func > 0 {
            Some("stop")
        } else if self.in_create_func > 0 {
            Some("create")
        } else if self.in_destroy_func > 0 {
            Some("destroy")
        } else if self.in_logger > 0 {
            Some("logger")
        } else {
            None
        }
    }
}

/// The mutable state owned by a host-created context: the plug-in map and
/// the extension-point / extension registries.
#[derive(Default)]
pub struct Environment {
    /// Startup argv, as supplied by the host.
    pub argv: Vec<String>,
    /// Registered plug-in directories, in registration order.
    pub plugin_dirs: Vec<PathBuf>,
    /// All installed plug-ins, keyed by identifier.
    pub plugins: HashMap<PluginId, PluginRecord>,
    /// Plug-ins currently `ACTIVE`, in the order they were started.
    pub started: Vec<PluginId>,
    /// Extension points, keyed by global id. Unique across the environment.
    pub ext_points: HashMap<ExtPointId, ExtPointEntry>,
    /// Extensions, keyed by the extension point they target.
    pub extensions: HashMap<ExtPointId, Vec<ExtensionEntry>>,
}

impl Environment {
    fn new() -> Self {
        Self::default()
    }
}

/// State behind the context lock: the environment, listeners, the
/// invocation guard, and host-attached user data.
pub struct Locked {
    /// The environment this context owns.
    pub env: Environment,
    pub(crate) listeners: Vec<ListenerEntry>,
    pub(crate) guard: InvocationGuard,
    pub(crate) next_listener_key: usize,
    user_data: Option<Box<dyn Any + Send + Sync>>,
}

struct ContextCore {
    lock: ReentrantMutex<RefCell<Locked>>,
    loader: Arc<dyn LibraryLoader>,
}

/// A container of plug-ins that share dependency resolution and symbol
/// visibility. Cloning a `Context` is cheap — it is a handle to shared state.
#[derive(Clone)]
pub struct Context {
    core: Arc<ContextCore>,
}

impl Context {
    /// Creates a new, empty context with a fresh [`Environment`] and an empty
    /// [`InMemoryLoader`] (register runtimes on it, or use
    /// [`Self::with_loader`] for a real shared-library loader).
    #[must_use]
    pub fn new() -> Self {
        Self::with_loader(Arc::new(InMemoryLoader::new()))
    }

    /// Creates a new, empty context using `loader` to resolve plug-in
    /// runtime libraries during `resolve`.
    #[must_use]
    pub fn with_loader(loader: Arc<dyn LibraryLoader>) -> Self {
        let locked = Locked {
            env: Environment::new(),
            listeners: Vec::new(),
            guard: InvocationGuard::default(),
            next_listener_key: 0,
            user_data: None,
        };
        let core = Arc::new(ContextCore {
            lock: ReentrantMutex::new(RefCell::new(locked)),
            loader,
        });
        Self { core }
    }

    /// The loader this context resolves plug-in runtimes through.
    pub(crate) fn loader(&self) -> &Arc<dyn LibraryLoader> {
        &self.core.loader
    }

    /// This context's opaque identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        ContextId(Arc::as_ptr(&self.core) as *const () as usize)
    }

    /// Runs `f` with exclusive access to the locked context state.
    ///
    /// `f` must not itself call back into this context (directly or via a
    /// user callback) — doing so will panic with a `RefCell` borrow error.
    /// For algorithms that must recurse or invoke a callback, take what you
    /// need, return, let the borrow drop, then call `with_locked` again.
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut Locked) -> R) -> R {
        let guard = self.core.lock.lock();
        let mut locked = guard.borrow_mut();
        f(&mut locked)
    }

    /// Convenience over [`Self::with_locked`] for callers that only need the
    /// environment.
    pub fn with_env<R>(&self, f: impl FnOnce(&mut Environment) -> R) -> R {
        self.with_locked(|locked| f(&mut locked.env))
    }

    /// Sets the host-attached user data for this context (`set_context_data`).
    pub fn set_context_data<T: Send + Sync + 'static>(&self, data: T) {
        self.with_locked(|locked| locked.user_data = Some(Box::new(data)));
    }

    /// Retrieves previously attached user data, cloned out via `f`.
    pub fn get_context_data<T: Send + Sync + 'static, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        self.with_locked(|locked| f(locked.user_data.as_ref().and_then(|b| b.downcast_ref())))
    }

    /// Registers a plug-in-state listener, returning a key for later removal.
    ///
    /// # Panics
    ///
    /// Invokes the framework's fatal handler (via the returned `Result`'s
    /// caller) rather than panicking directly; see `add_plugin_listener` on
    /// [`crate::framework::Framework`] for the guarded entry point. This
    /// inherent method performs no guard check and is only called from
    /// there.
    pub(crate) fn add_listener_raw(
        &self,
        callback: Arc<dyn Fn(&PluginId, LifecycleState, LifecycleState) + Send + Sync>,
    ) -> ListenerKey {
        self.with_locked(|locked| {
            let key = locked.next_listener_key;
            locked.next_listener_key += 1;
            locked.listeners.push(ListenerEntry { key, callback });
            ListenerKey(key)
        })
    }

    /// Removes a previously registered listener.
    pub fn remove_plugin_listener(&self, key: ListenerKey) {
        self.with_locked(|locked| locked.listeners.retain(|l| l.key != key.0));
    }

    /// Notifies every registered listener of a state transition, serialized,
    /// with the invocation guard raised for the duration of every callback
    /// invocation (not just while collecting them) — a listener that calls
    /// back into a lifecycle API must observe the guard as active.
    ///
    /// Must be called with no `RefMut` borrow outstanding on this context —
    /// see the module-level locking discipline note.
    pub(crate) fn notify_listeners(&self, id: &PluginId, old: LifecycleState, new: LifecycleState) {
        let callbacks: Vec<_> =
            self.with_locked(|locked| locked.listeners.iter().map(|l| Arc::clone(&l.callback)).collect());

        self.with_locked(|locked| locked.guard.in_listener += 1);
        for callback in &callbacks {
            callback(id, old, new);
        }
        self.with_locked(|locked| locked.guard.in_listener -= 1);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_stable_and_distinct() {
        let a = Context::new();
        let b = Context::new();
        assert_eq!(a.id(), a.id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn context_data_roundtrip() {
        let ctx = Context::new();
        ctx.set_context_data(42u32);
        ctx.get_context_data::<u32, _>(|v| assert_eq!(v, Some(&42)));
    }

    #[test]
    fn listener_receives_notification() {
        let ctx = Context::new();
        let seen: Arc<parking_lot::Mutex<Vec<(LifecycleState, LifecycleState)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        ctx.add_listener_raw(Arc::new(move |_id, old, new| {
            seen2.lock().push((old, new));
        }));
        let id = PluginId::new("p");
        ctx.notify_listeners(&id, LifecycleState::Uninstalled, LifecycleState::Installed);
        assert_eq!(
            *seen.lock(),
            vec![(LifecycleState::Uninstalled, LifecycleState::Installed)]
        );
    }

    #[test]
    fn reentrant_lock_allows_same_thread_relock() {
        let ctx = Context::new();
        ctx.with_locked(|locked| {
            locked.env.argv.push("outer".into());
        });
        // A second, independent critical section from the same thread must
        // not deadlock.
        ctx.with_locked(|locked| {
            locked.env.argv.push("inner".into());
        });
        assert_eq!(ctx.with_env(|env| env.argv.clone()), vec!["outer", "inner"]);
    }
}
