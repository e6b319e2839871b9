//! Error taxonomy for the plug-in framework.
//!
//! Recoverable failures are surfaced as [`FrameworkError`] and propagated with
//! `?`, mirroring the error variants named in the framework's status-code
//! table. Programmer errors that would otherwise corrupt the framework's
//! bookkeeping are not represented here — see [`crate::framework::FatalError`]
//! and [`crate::framework::Framework::set_fatal_handler`].

use thiserror::Error;

use crate::ids::PluginId;

/// Recoverable error surfaced to a caller of the framework API.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// The framework has not been initialized, or has already been torn down.
    #[error("framework is not initialized")]
    NotInitialized,

    /// Allocation or other OS resource exhaustion.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// A referenced object (plugin, extension point, context) does not exist.
    #[error("unknown identifier: {0}")]
    Unknown(String),

    /// A filesystem error occurred while scanning for plug-ins.
    #[error("I/O error scanning {path}: {source}")]
    Io {
        /// The path being scanned when the error occurred.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A descriptor failed to parse or otherwise violates the descriptor contract.
    #[error("malformed descriptor for {plugin}: {reason}")]
    Malformed {
        /// The offending plugin identifier, when known.
        plugin: String,
        /// A human-readable description of the problem.
        reason: String,
    },

    /// A duplicate plug-in identifier or extension-point global id was registered.
    #[error("conflict installing {plugin}: {reason}")]
    Conflict {
        /// The plugin identifier being installed.
        plugin: String,
        /// A human-readable description of the conflict.
        reason: String,
    },

    /// A mandatory import is missing or its version constraint is unsatisfied.
    #[error("dependency error resolving {plugin}: {reason}")]
    Dependency {
        /// The plugin identifier being resolved.
        plugin: String,
        /// A human-readable description of the unmet dependency.
        reason: String,
    },

    /// The plug-in's runtime library or function table failed to load, or
    /// its `start` hook returned failure.
    #[error("runtime error for {plugin}: {reason}")]
    Runtime {
        /// The plugin identifier whose runtime failed.
        plugin: String,
        /// A human-readable description of the failure.
        reason: String,
    },
}

impl FrameworkError {
    /// Creates a [`FrameworkError::Conflict`] for `plugin`.
    pub fn conflict(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`FrameworkError::Dependency`] for `plugin`.
    pub fn dependency(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dependency {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`FrameworkError::Runtime`] for `plugin`.
    pub fn runtime(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Runtime {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`FrameworkError::Malformed`] for `plugin`.
    pub fn malformed(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`FrameworkError::Unknown`] referencing `id`.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self::Unknown(id.into())
    }

    /// The plugin identifier responsible for this error, when known.
    #[must_use]
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Malformed { plugin, .. }
            | Self::Conflict { plugin, .. }
            | Self::Dependency { plugin, .. }
            | Self::Runtime { plugin, .. } => Some(plugin),
            _ => None,
        }
    }
}

/// Result alias used throughout the framework.
pub type Result<T> = core::result::Result<T, FrameworkError>;

/// Error returned by a [`crate::scanner::DescriptorSource`].
#[derive(Debug, Error)]
pub enum ScanError {
    /// A filesystem error occurred walking a registered plug-in directory.
    #[error("I/O error scanning {path}: {source}")]
    Io {
        /// The directory being scanned.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A candidate descriptor failed to parse.
    #[error("malformed descriptor at {path}: {reason}")]
    Malformed {
        /// The path of the offending descriptor file.
        path: String,
        /// A human-readable description of the problem.
        reason: String,
    },
}

/// Error returned while loading a plug-in's runtime shared library.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The shared library failed to load.
    #[error("failed to load library at {path}: {reason}")]
    Load {
        /// The library path.
        path: String,
        /// A human-readable description of the failure.
        reason: String,
    },
    /// The function-table symbol was not found in the loaded library.
    #[error("symbol {symbol} not found")]
    MissingSymbol {
        /// The symbol name that was looked up.
        symbol: String,
    },
}

/// A violation of the framework's invocation or ownership discipline.
///
/// These indicate programmer errors whose silent continuation would corrupt
/// the framework's bookkeeping. They are never returned from a `Result` —
/// they are delivered to the registered fatal handler.
#[derive(Debug, Error, Clone)]
pub enum FatalError {
    /// A non-null argument was null (modeled in safe Rust as an invalid handle).
    #[error("null argument to {api}")]
    NullArgument {
        /// The API that received the invalid argument.
        api: &'static str,
    },

    /// A lifecycle API was called re-entrantly from a forbidden callback context.
    #[error("re-entrant call to {api} from within {forbidden}")]
    Reentrancy {
        /// The API that was called.
        api: &'static str,
        /// The callback kind the calling thread is already inside.
        forbidden: &'static str,
    },

    /// `release_info` (or an internal refcount increment) targeted an object
    /// not present in the info registry.
    #[error("info object not registered")]
    UnregisteredInfo,

    /// An attempt was made to unlock a mutex not held by the calling thread.
    #[error("unlock of a mutex not held by the caller")]
    NotHeld,

    /// A plug-in was stopped while its outstanding symbol-usage counter was nonzero.
    #[error("cannot stop {plugin}: {usage} outstanding symbol use(s)")]
    SymbolsInUse {
        /// The plugin being stopped.
        plugin: PluginId,
        /// The outstanding usage count observed.
        usage: usize,
    },
}
