//! Plug-in lifecycle engine: context data model, install/resolve/start/stop
//! state machine, extension registry and dynamic symbol resolver.
//!
//! A single process-global [`framework::Framework`] owns the logger table,
//! the fatal-error handler and the info-object registry. A host creates one
//! or more [`context::Context`]s against it, installs [`descriptor::PluginDescriptor`]s
//! into a context, and drives plug-ins through [`plugin::LifecycleState`] via
//! [`lifecycle::start`]/[`lifecycle::stop`]. Plug-ins declare [`descriptor::ExtensionPointDecl`]s
//! and contribute [`descriptor::ExtensionDecl`]s against each other's, and may resolve
//! each other's symbols dynamically through [`symbols::resolve_symbol`].

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod framework;
pub mod ids;
pub mod info;
pub mod install;
pub mod lifecycle;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod scanner;
pub mod symbols;
pub mod version;

/// The common set of types needed to embed the framework.
pub mod prelude {
    pub use crate::config::{ConfigNode, ConfigTree, ConfigTreeBuilder};
    pub use crate::context::{Context, ContextId, ListenerKey};
    pub use crate::descriptor::{DescriptorBuilder, PluginDescriptor};
    pub use crate::error::{FatalError, FrameworkError, Result};
    pub use crate::framework::Framework;
    pub use crate::ids::{ExtPointId, PluginId};
    pub use crate::info::InfoHandle;
    pub use crate::install::{install_plugin, uninstall_all_plugins, uninstall_plugin};
    pub use crate::lifecycle::{start, stop, stop_all};
    pub use crate::logging::Severity;
    pub use crate::plugin::LifecycleState;
    pub use crate::registry::{
        add_plugin_listener, get_ext_points_info, get_extensions_info, get_plugin_info, get_plugin_state,
        get_plugins_info, lookup_cfg_element, lookup_cfg_value, release_info, remove_plugin_listener, PluginInfo,
    };
    pub use crate::scanner::{register_plugin_dir, scan_plugins, unregister_plugin_dir, DescriptorSource, ScanFlags};
    pub use crate::symbols::{define_symbol, release_symbol, resolve_symbol};
    pub use crate::version::{MatchRule, Version};
}
