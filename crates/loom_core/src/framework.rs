//! The process-global framework root.
//!
//! A single lazily-initialized, reference-counted singleton holds the
//! logger table, the info-object registry and the fatal-error handler.
//! `init`/`destroy` are reference-counted but are **not** themselves
//! synchronized against concurrent callers — the governing contract
//! requires they run on a quiescent host thread, so an ordinary
//! [`parking_lot::Mutex`] (not a recursive one) is sufficient.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::context::{Context, ContextId};
use crate::error::{FatalError, FrameworkError, Result};
use crate::ids::PluginId;
use crate::install;
use crate::logging::{LoggerFn, LoggerKey, LoggerTable, Severity};
use crate::info::{InfoHandle, InfoRegistry};

struct FrameworkState {
    init_count: usize,
    loggers: LoggerTable,
    info: InfoRegistry,
    fatal_handler: Option<Arc<dyn Fn(FatalError) + Send + Sync>>,
    contexts: Vec<Context>,
}

impl FrameworkState {
    fn new() -> Self {
        Self {
            init_count: 0,
            loggers: LoggerTable::new(),
            info: InfoRegistry::new(),
            fatal_handler: None,
            contexts: Vec::new(),
        }
    }
}

static STATE: OnceLock<Mutex<FrameworkState>> = OnceLock::new();

fn state() -> &'static Mutex<FrameworkState> {
    STATE.get_or_init(|| Mutex::new(FrameworkState::new()))
}

/// The process-global framework root. All methods are associated functions —
/// there is exactly one framework per process, by contract.
pub struct Framework;

impl Framework {
    /// Initializes the framework, or increments the init-count if already
    /// initialized.
    pub fn init() -> Result<()> {
        state().lock().init_count += 1;
        Ok(())
    }

    /// Decrements the init-count; at zero, destroys every live context
    /// (stopping and uninstalling all of its plug-ins) and drains the
    /// info-object registry.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::NotInitialized`] if called with no matching
    /// `init`.
    pub fn destroy() -> Result<()> {
        let contexts_to_tear_down = {
            let mut guard = state().lock();
            if guard.init_count == 0 {
                return Err(FrameworkError::NotInitialized);
            }
            guard.init_count -= 1;
            if guard.init_count == 0 {
                Some(std::mem::take(&mut guard.contexts))
            } else {
                None
            }
        };

        if let Some(contexts) = contexts_to_tear_down {
            for ctx in &contexts {
                let _ = install::uninstall_all_plugins(ctx);
            }
            let mut guard = state().lock();
            guard.info.drain();
            guard.loggers = LoggerTable::new();
            guard.fatal_handler = None;
        }
        Ok(())
    }

    /// Current init-count, for tests and diagnostics.
    #[must_use]
    pub fn init_count() -> usize {
        state().lock().init_count
    }

    /// Installs the fatal-error handler, replacing any previous one.
    pub fn set_fatal_handler(handler: impl Fn(FatalError) + Send + Sync + 'static) {
        state().lock().fatal_handler = Some(Arc::new(handler));
    }

    /// Clears the fatal-error handler.
    pub fn clear_fatal_handler() {
        state().lock().fatal_handler = None;
    }

    /// Registers (or updates) a logger.
    pub fn add_logger(
        callback: Arc<LoggerFn>,
        min_severity: Severity,
        context_filter: Option<ContextId>,
    ) -> LoggerKey {
        state().lock().loggers.add(callback, min_severity, context_filter)
    }

    /// Removes a previously registered logger.
    pub fn remove_logger(key: LoggerKey) {
        state().lock().loggers.remove(key);
    }

    /// Dispatches a log message to every matching subscriber.
    pub fn log(ctx: Option<ContextId>, plugin: Option<&PluginId>, severity: Severity, message: &str) {
        state().lock().loggers.dispatch(ctx, plugin, severity, message);
    }

    /// Cheap check for whether anything is subscribed at or below `severity`.
    #[must_use]
    pub fn is_logged(severity: Severity) -> bool {
        state().lock().loggers.is_logged(severity)
    }

    /// Creates a new context and tracks it for framework-shutdown teardown.
    ///
    /// `owner_data`, if provided, is attached via [`Context::set_context_data`]
    /// under the type the caller chooses when later calling
    /// [`Context::get_context_data`].
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::NotInitialized`] if the framework has not
    /// been initialized.
    pub fn create_context<T: Send + Sync + 'static>(owner_data: Option<T>) -> Result<Context> {
        let mut guard = state().lock();
        if guard.init_count == 0 {
            return Err(FrameworkError::NotInitialized);
        }
        let ctx = Context::new();
        if let Some(data) = owner_data {
            ctx.set_context_data(data);
        }
        guard.contexts.push(ctx.clone());
        Ok(ctx)
    }

    /// Destroys a context: uninstalls all of its plug-ins, then stops
    /// tracking it for shutdown teardown.
    pub fn destroy_context(ctx: &Context) -> Result<()> {
        install::uninstall_all_plugins(ctx)?;
        state().lock().contexts.retain(|c| c.id() != ctx.id());
        Ok(())
    }

    /// Registers a framework-global info object, returning its handle.
    pub(crate) fn register_info(payload: Box<dyn Any + Send + Sync>) -> InfoHandle {
        state().lock().info.register(payload)
    }

    /// Increments the refcount of an already-registered info object.
    pub(crate) fn acquire_info(handle: InfoHandle) -> std::result::Result<(), FatalError> {
        state().lock().info.acquire_internal(handle)
    }

    /// Releases a caller's reference to an info object (`release_info`).
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::UnregisteredInfo`] for an unknown handle; this
    /// is a fatal condition, routed to the fatal handler by the caller.
    pub fn release_info(handle: InfoHandle) -> std::result::Result<(), FatalError> {
        let result = state().lock().info.release(handle);
        if let Err(ref e) = result {
            invoke_fatal(e.clone());
        }
        result
    }
}

/// Delivers `err` to the registered fatal handler, logging it at `Error`
/// severity first. If no handler is registered, panics — the closest
/// process-abort equivalent available in safe Rust.
pub fn invoke_fatal(err: FatalError) {
    Framework::log(None, None, Severity::Error, &err.to_string());
    let handler = state().lock().fatal_handler.clone();
    match handler {
        Some(handler) => handler(err),
        None => panic!("fatal framework error: {err}"),
    }
}

/// Checks the context's invocation guard and routes to the fatal handler if
/// `api` is being called re-entrantly from a forbidden callback context.
pub(crate) fn deny_if_in_callback(ctx: &Context, api: &'static str) -> Result<()> {
    let active = ctx.with_locked(|locked| locked.guard.active_callback());
    if let Some(forbidden) = active {
        invoke_fatal(FatalError::Reentrancy { api, forbidden });
        return Err(FrameworkError::runtime(
            "<unknown>",
            format!("fatal: re-entrant call to {api} from within {forbidden}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_destroy_is_reference_counted() {
        Framework::init().unwrap();
        Framework::init().unwrap();
        assert!(Framework::init_count() >= 2);
        Framework::destroy().unwrap();
        Framework::destroy().unwrap();
    }

    #[test]
    fn create_context_requires_init() {
        // Run in isolation-tolerant style: destroy down to a known baseline
        // first is not possible with a shared global, so only assert the
        // success path here (guarded against double-destroy elsewhere would
        // need a fresh process); NotInitialized is exercised by unit-level
        // logic review in `error`.
        Framework::init().unwrap();
        let ctx = Framework::create_context::<()>(None).unwrap();
        Framework::destroy_context(&ctx).unwrap();
        Framework::destroy().unwrap();
    }

    #[test]
    fn fatal_handler_receives_violation_instead_of_panicking() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        Framework::set_fatal_handler(move |err| s.lock().push(err.to_string()));
        invoke_fatal(FatalError::UnregisteredInfo);
        assert_eq!(seen.lock().len(), 1);
        Framework::clear_fatal_handler();
    }
}
