//! The framework-wide reference-counted info-object registry.
//!
//! Every snapshot handed back to a host (a descriptor, a list of
//! descriptors, ...) is registered here under a refcount. Internal code
//! acquires a reference with [`InfoRegistry::acquire_internal`]; hosts
//! release theirs with [`InfoRegistry::release`]. On framework shutdown the
//! registry is drained, dropping every remaining payload exactly once.
//!
//! A raw-pointer registry keyed by address, as a C implementation of the
//! same contract would use, is modeled here as a handle map keyed by an
//! opaque, monotonically increasing id — the safe-Rust equivalent that
//! preserves the same "opaque token the host must hand back" contract
//! without exposing allocator details.

use std::any::Any;

use hashbrown::HashMap;

use crate::error::FatalError;

/// Opaque handle to a registered info object.
///
/// Cloning a handle does **not** increment the refcount — it is just a
/// lightweight reference to the same registry slot. Use
/// [`InfoRegistry::acquire_internal`] to create an owning reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHandle(u64);

struct Entry {
    refcount: usize,
    payload: Box<dyn Any + Send + Sync>,
}

/// Process-global (one per [`crate::framework::Framework`]) registry of
/// reference-counted snapshots.
#[derive(Default)]
pub struct InfoRegistry {
    entries: HashMap<u64, Entry>,
    next_id: u64,
}

impl InfoRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `payload` with an initial refcount of one and returns its handle.
    pub fn register(&mut self, payload: Box<dyn Any + Send + Sync>) -> InfoHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, Entry { refcount: 1, payload });
        InfoHandle(id)
    }

    /// Increments the refcount of an already-registered object.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::UnregisteredInfo`] if `handle` is not registered
    /// — increasing the refcount on an unknown info object is a fatal
    /// condition, not a recoverable one; the caller maps this into the
    /// fatal-handler path.
    pub fn acquire_internal(&mut self, handle: InfoHandle) -> Result<(), FatalError> {
        match self.entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.refcount += 1;
                Ok(())
            }
            None => Err(FatalError::UnregisteredInfo),
        }
    }

    /// Decrements the refcount of `handle`; at zero, drops its payload.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::UnregisteredInfo`] if `handle` is not registered.
    pub fn release(&mut self, handle: InfoHandle) -> Result<(), FatalError> {
        match self.entries.get_mut(&handle.0) {
            Some(entry) => {
                entry.refcount -= 1;
                if entry.refcount == 0 {
                    self.entries.remove(&handle.0);
                }
                Ok(())
            }
            None => Err(FatalError::UnregisteredInfo),
        }
    }

    /// Borrows the payload registered under `handle` as `T`.
    #[must_use]
    pub fn get<T: 'static>(&self, handle: InfoHandle) -> Option<&T> {
        self.entries.get(&handle.0)?.payload.downcast_ref()
    }

    /// Current refcount of `handle`, for tests and introspection.
    #[must_use]
    pub fn refcount(&self, handle: InfoHandle) -> Option<usize> {
        self.entries.get(&handle.0).map(|e| e.refcount)
    }

    /// Drains every entry, dropping each payload exactly once. Called on
    /// framework shutdown.
    pub fn drain(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries, for tests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
