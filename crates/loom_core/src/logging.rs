//! Multi-subscriber log fan-out.
//!
//! `Framework::log` delivers to every subscriber whose minimum severity is at
//! or below the message's severity and whose context filter, if any, matches
//! the originating context — serialized, one subscriber at a time, so
//! delivery order is deterministic across the process. Each delivery also
//! emits a [`tracing`] event at the mapped level, so a host that wires up
//! `tracing-subscriber` observes the same messages without registering a
//! custom subscriber.

use std::sync::Arc;

use crate::context::ContextId;
use crate::ids::PluginId;

/// Log message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Verbose diagnostic detail.
    Debug,
    /// Informational message.
    Info,
    /// A condition worth the host's attention, but not an error.
    Warning,
    /// An operation failed and was surfaced to its caller.
    Error,
}

impl Severity {
    fn as_tracing_level(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// A log callback: receives the originating context (if any), the plug-in
/// responsible for the message (if any), the severity and the message text.
pub type LoggerFn = dyn Fn(Option<ContextId>, Option<&PluginId>, Severity, &str) + Send + Sync;

struct Subscriber {
    callback: Arc<LoggerFn>,
    min_severity: Severity,
    context_filter: Option<ContextId>,
    /// Used to find-and-replace a subscriber re-added under the same callback
    /// identity, per `add_logger`'s "adding the same callback twice updates
    /// its configuration in place" contract. We key on the `Arc`'s address.
    key: usize,
}

/// Framework-level logger table.
#[derive(Default)]
pub struct LoggerTable {
    subscribers: Vec<Subscriber>,
    cached_min_severity: Option<Severity>,
}

/// Opaque token identifying a registered logger, returned by `add_logger` so
/// it can later be passed to `remove_logger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerKey(usize);

impl LoggerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or updates, if already registered) a logger.
    pub fn add(
        &mut self,
        callback: Arc<LoggerFn>,
        min_severity: Severity,
        context_filter: Option<ContextId>,
    ) -> LoggerKey {
        let key = Arc::as_ptr(&callback) as *const () as usize;
        if let Some(existing) = self.subscribers.iter_mut().find(|s| s.key == key) {
            existing.min_severity = min_severity;
            existing.context_filter = context_filter;
        } else {
            self.subscribers.push(Subscriber {
                callback,
                min_severity,
                context_filter,
                key,
            });
        }
        self.recompute_cache();
        LoggerKey(key)
    }

    /// Removes a previously registered logger, if present.
    pub fn remove(&mut self, key: LoggerKey) {
        self.subscribers.retain(|s| s.key != key.0);
        self.recompute_cache();
    }

    fn recompute_cache(&mut self) {
        self.cached_min_severity = self.subscribers.iter().map(|s| s.min_severity).min();
    }

    /// Cheap check: is anything subscribed at or below `severity`?
    #[must_use]
    pub fn is_logged(&self, severity: Severity) -> bool {
        matches!(self.cached_min_severity, Some(min) if severity >= min)
    }

    /// Delivers `message` to every matching subscriber, serialized, then
    /// emits the corresponding `tracing` event.
    pub fn dispatch(
        &self,
        ctx: Option<ContextId>,
        plugin: Option<&PluginId>,
        severity: Severity,
        message: &str,
    ) {
        for subscriber in &self.subscribers {
            if severity < subscriber.min_severity {
                continue;
            }
            if let Some(filter) = subscriber.context_filter
                && Some(filter) != ctx
            {
                continue;
            }
            (subscriber.callback)(ctx, plugin, severity, message);
        }

        let level = severity.as_tracing_level();
        let plugin_str = plugin.map(PluginId::to_string).unwrap_or_default();
        match level {
            tracing::Level::ERROR => tracing::error!(plugin = %plugin_str, "{message}"),
            tracing::Level::WARN => tracing::warn!(plugin = %plugin_str, "{message}"),
            tracing::Level::INFO => tracing::info!(plugin = %plugin_str, "{message}"),
            _ => tracing::debug!(plugin = %plugin_str, "{message}"),
        }
    }
}
