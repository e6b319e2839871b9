//! The plug-in runtime contract and the shared-library loader abstraction.
//!
//! The shared-library loader is modeled as an opaque pair of `open(path) ->
//! handle` / `sym(handle, name) -> pointer` / `close(handle)` operations, and
//! a plug-in's shared library is expected to export a four-slot function
//! table at a well-known symbol. This module models both boundaries as
//! traits plus one concrete, feature-gated implementation ([`DylibLoader`])
//! so the crate is actually runnable, and an in-process [`InMemoryLoader`]
//! test double used throughout this crate's own test suite.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use crate::context::Context;
use crate::error::RuntimeError;

/// Opaque, framework-managed instance-data handle.
///
/// The framework never inspects what a plug-in's `create` hook returns — it
/// only checks it for "non-null" (here, `Option::is_some`) and threads it
/// back through `start`/`stop`/`destroy`.
pub struct InstanceData(Box<dyn Any + Send + Sync>);

impl InstanceData {
    /// Wraps arbitrary instance data.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self(Box::new(value))
    }
}

/// Opaque pointer to a context-specific symbol defined via `define_symbol`.
///
/// Equality and hashing are by address: the framework treats a symbol purely
/// as a token handed back by `resolve_symbol` and returned to `release_symbol`.
#[derive(Clone, Copy)]
pub struct SymbolPtr(*const ());

// SAFETY: a `SymbolPtr` is an opaque token the framework stores and compares
// by address; it is never dereferenced by framework code, so sending it
// across threads (or sharing it) is as safe as sharing any other integer id.
unsafe impl Send for SymbolPtr {}
unsafe impl Sync for SymbolPtr {}

impl SymbolPtr {
    /// Creates a symbol token from a raw, plug-in-owned pointer.
    #[must_use]
    pub fn from_raw(ptr: *const ()) -> Self {
        Self(ptr)
    }

    /// Returns the raw pointer this token wraps.
    #[must_use]
    pub fn as_raw(self) -> *const () {
        self.0
    }
}

impl PartialEq for SymbolPtr {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for SymbolPtr {}

impl core::hash::Hash for SymbolPtr {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        (self.0 as usize).hash(state);
    }
}

impl core::fmt::Debug for SymbolPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SymbolPtr({:p})", self.0)
    }
}

/// The four-slot function table a plug-in's shared library exports:
/// `create` and `destroy` are mandatory, `start`/`stop` are optional and,
/// when absent, the `STARTING`/`STOPPING` transient states are skipped for
/// that plug-in.
pub trait PluginRuntime: Send + Sync {
    /// Instantiates the plug-in. `None` signals failure (a null constructor).
    fn create(&self, ctx: &Context) -> Option<InstanceData>;

    /// Starts the plug-in instance. Absent means the plug-in has no start
    /// hook; the default returns `true` so callers that always invoke this
    /// trait method (rather than checking [`Self::has_start`] first) behave
    /// correctly either way.
    fn start(&self, _instance: &mut InstanceData) -> bool {
        true
    }

    /// Stops the plug-in instance.
    fn stop(&self, _instance: &mut InstanceData) {}

    /// Destroys the plug-in instance, releasing any resources it owns.
    fn destroy(&self, _instance: InstanceData) {}

    /// Whether this runtime declares a `start` hook.
    fn has_start(&self) -> bool {
        true
    }

    /// Whether this runtime declares a `stop` hook.
    fn has_stop(&self) -> bool {
        true
    }

    /// Looks up `name` as a symbol the runtime's shared library exports
    /// globally, outside the context-specific `define_symbol` table. The
    /// default implementation has none; `resolve_symbol` falls back to this
    /// only when no context-specific definition exists.
    fn resolve_global_symbol(&self, _name: &str) -> Option<SymbolPtr> {
        None
    }
}

/// A loaded shared library, kept alive for as long as any plug-in resolved
/// from it is installed.
///
/// The runtime is `Arc`-shared (not boxed) so lifecycle code can clone it out
/// from behind the context lock, drop the lock, then invoke `create`/`start`/
/// `stop`/`destroy` without holding a `RefCell` borrow across a call that may
/// re-enter the context — see the locking discipline note in `context`.
pub struct LibraryHandle {
    pub(crate) runtime: Arc<dyn PluginRuntime>,
}

/// Abstraction over the OS dynamic-library loader: `open`/`sym`/`close`.
///
/// `close` is not a method here — it is simply what dropping the returned
/// [`LibraryHandle`] does.
pub trait LibraryLoader: Send + Sync {
    /// Opens `library_path` and resolves `symbol_name` to a function table,
    /// returning a [`PluginRuntime`] wrapping it.
    fn load(&self, library_path: &Path, symbol_name: &str) -> Result<LibraryHandle, RuntimeError>;
}

/// An in-process [`LibraryLoader`] test double: library paths are arbitrary
/// keys mapping to a pre-registered runtime factory, with no actual
/// filesystem or OS loader involved. This is what this crate's own tests use,
/// and is a reasonable choice for a host's test suite too.
#[derive(Default)]
pub struct InMemoryLoader {
    factories: hashbrown::HashMap<String, Box<dyn Fn() -> Box<dyn PluginRuntime> + Send + Sync>>,
}

impl InMemoryLoader {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runtime factory under `key` (matched against a
    /// descriptor's `symbol_name`, by convention — the library path is
    /// ignored by this loader).
    pub fn register(
        &mut self,
        key: impl Into<String>,
        factory: impl Fn() -> Box<dyn PluginRuntime> + Send + Sync + 'static,
    ) {
        self.factories.insert(key.into(), Box::new(factory));
    }
}

impl LibraryLoader for InMemoryLoader {
    fn load(&self, _library_path: &Path, symbol_name: &str) -> Result<LibraryHandle, RuntimeError> {
        let factory = self
            .factories
            .get(symbol_name)
            .ok_or_else(|| RuntimeError::MissingSymbol {
                symbol: symbol_name.to_string(),
            })?;
        Ok(LibraryHandle {
            runtime: Arc::from(factory()),
        })
    }
}

/// A [`PluginRuntime`] with no code at all: `create` trivially succeeds with
/// unit instance data. Used for plug-ins whose descriptor declares no
/// runtime library.
pub struct NoopRuntime;

impl PluginRuntime for NoopRuntime {
    fn create(&self, _ctx: &Context) -> Option<InstanceData> {
        Some(InstanceData::new(()))
    }

    fn has_start(&self) -> bool {
        false
    }

    fn has_stop(&self) -> bool {
        false
    }
}

#[cfg(feature = "dylib-loader")]
mod dylib {
    use super::{InstanceData, LibraryHandle, LibraryLoader, PluginRuntime, RuntimeError, SymbolPtr};
    use crate::context::Context;
    use std::ffi::c_void;
    use std::path::Path;
    use std::sync::Arc;

    /// The C-ABI shape a plug-in's shared library exports at `symbol_name`:
    /// a `#[repr(C)]` function table matching the four-slot runtime contract.
    #[repr(C)]
    pub struct RawVTable {
        /// `create(ctx) -> instance`. Must be non-null.
        pub create: unsafe extern "C" fn(ctx: *const c_void) -> *mut c_void,
        /// Optional `start(instance) -> bool`.
        pub start: Option<unsafe extern "C" fn(instance: *mut c_void) -> bool>,
        /// Optional `stop(instance)`.
        pub stop: Option<unsafe extern "C" fn(instance: *mut c_void)>,
        /// `destroy(instance)`. Must be non-null.
        pub destroy: unsafe extern "C" fn(instance: *mut c_void),
    }

    /// Loads plug-in runtimes from real OS shared libraries via `libloading`.
    #[derive(Default)]
    pub struct DylibLoader;

    impl DylibLoader {
        /// Creates a loader.
        #[must_use]
        pub fn new() -> Self {
            Self
        }
    }

    struct RawVTableRuntime {
        // Kept alive for as long as any call may still use `vtable`.
        _library: Arc<libloading::Library>,
        vtable: *const RawVTable,
    }

    // SAFETY: the vtable points into the (leaked-for-lifetime) mmap'd shared
    // library, which stays mapped for as long as `_library` is held; the
    // plug-in author is responsible for their functions being `Send + Sync`
    // safe to call from any thread, per the runtime contract.
    unsafe impl Send for RawVTableRuntime {}
    unsafe impl Sync for RawVTableRuntime {}

    impl PluginRuntime for RawVTableRuntime {
        fn create(&self, ctx: &Context) -> Option<InstanceData> {
            // SAFETY: `vtable` is valid for the lifetime of `self`, and
            // `create` is checked non-null when the library was loaded.
            let ptr = unsafe {
                let ctx_token = ctx as *const Context as *const c_void;
                ((*self.vtable).create)(ctx_token)
            };
            if ptr.is_null() {
                None
            } else {
                Some(InstanceData::new(ptr as usize))
            }
        }

        fn start(&self, instance: &mut InstanceData) -> bool {
            let Some(start) = (unsafe { (*self.vtable).start }) else {
                return true;
            };
            let raw = self.raw_ptr(instance);
            unsafe { start(raw) }
        }

        fn stop(&self, instance: &mut InstanceData) {
            let Some(stop) = (unsafe { (*self.vtable).stop }) else {
                return;
            };
            let raw = self.raw_ptr(instance);
            unsafe { stop(raw) }
        }

        fn destroy(&self, instance: InstanceData) {
            let raw = self.raw_ptr(&instance);
            unsafe { ((*self.vtable).destroy)(raw) }
        }

        fn has_start(&self) -> bool {
            unsafe { (*self.vtable).start.is_some() }
        }

        fn has_stop(&self) -> bool {
            unsafe { (*self.vtable).stop.is_some() }
        }

        fn resolve_global_symbol(&self, name: &str) -> Option<SymbolPtr> {
            // SAFETY: `name` is caller-supplied; an absent symbol is simply a
            // lookup miss, not a soundness issue — `libloading` reports it as
            // an error rather than UB.
            let sym: libloading::Symbol<*const ()> = unsafe { self._library.get(name.as_bytes()).ok()? };
            Some(SymbolPtr::from_raw(*sym))
        }
    }

    impl RawVTableRuntime {
        fn raw_ptr(&self, instance: &InstanceData) -> *mut c_void {
            *instance
                .0
                .downcast_ref::<usize>()
                .expect("instance data created by RawVTableRuntime::create") as *mut c_void
        }
    }

    impl LibraryLoader for DylibLoader {
        fn load(&self, library_path: &Path, symbol_name: &str) -> Result<LibraryHandle, RuntimeError> {
            let library = unsafe { libloading::Library::new(library_path) }.map_err(|e| {
                RuntimeError::Load {
                    path: library_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            let library = Arc::new(library);

            // SAFETY: the caller supplies `symbol_name` from a trusted
            // descriptor; the resolved symbol must have the `RawVTable`
            // layout by the runtime contract.
            let vtable: *const RawVTable = unsafe {
                let sym: libloading::Symbol<unsafe extern "C" fn() -> *const RawVTable> = library
                    .get(symbol_name.as_bytes())
                    .map_err(|_| RuntimeError::MissingSymbol {
                        symbol: symbol_name.to_string(),
                    })?;
                sym()
            };

            if vtable.is_null() {
                return Err(RuntimeError::MissingSymbol {
                    symbol: symbol_name.to_string(),
                });
            }

            Ok(LibraryHandle {
                runtime: Arc::new(RawVTableRuntime {
                    _library: library,
                    vtable,
                }),
            })
        }
    }
}

#[cfg(feature = "dylib-loader")]
pub use dylib::{DylibLoader, RawVTable};
