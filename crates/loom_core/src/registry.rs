//! Inspection and listener operations.
//!
//! Listing operations take a snapshot under the context lock, register it
//! with the framework-global info registry (so the host's `release_info`
//! call is meaningful for these objects too), and return both the handle and
//! the snapshot itself — the snapshot's lifetime in Rust is not actually tied
//! to the refcount the way a raw-pointer return would be, but routing it
//! through the same registry keeps the release discipline uniform.

use std::sync::Arc;

use crate::config::ConfigTree;
use crate::context::{Context, ExtPointEntry, ExtensionEntry, ListenerKey};
use crate::error::{FrameworkError, Result};
use crate::framework::{deny_if_in_callback, Framework};
use crate::ids::{ExtPointId, PluginId};
use crate::info::InfoHandle;
use crate::plugin::LifecycleState;
use crate::version::Version;

/// A snapshot of one plug-in's identity and lifecycle state.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// The plug-in's identifier.
    pub id: PluginId,
    /// Its declared version.
    pub version: Version,
    /// Its declared provider/vendor name, if any.
    pub provider_name: Option<String>,
    /// Its lifecycle state at the moment of the snapshot.
    pub state: LifecycleState,
}

fn snapshot(id: &PluginId, record: &crate::plugin::PluginRecord) -> PluginInfo {
    PluginInfo {
        id: id.clone(),
        version: record.descriptor.version.clone(),
        provider_name: record.descriptor.provider_name.clone(),
        state: record.state,
    }
}

/// Returns a registered snapshot of `id`'s current info.
///
/// # Errors
///
/// Returns [`FrameworkError::Unknown`] if `id` is not installed.
pub fn get_plugin_info(ctx: &Context, id: &PluginId) -> Result<(InfoHandle, PluginInfo)> {
    let info = ctx
        .with_env(|env| env.plugins.get(id).map(|r| snapshot(id, r)))
        .ok_or_else(|| FrameworkError::unknown(id.as_str()))?;
    let handle = Framework::register_info(Box::new(info.clone()));
    Ok((handle, info))
}

/// Returns a registered snapshot of every installed plug-in's info.
pub fn get_plugins_info(ctx: &Context) -> (InfoHandle, Vec<PluginInfo>) {
    let infos = ctx.with_env(|env| env.plugins.iter().map(|(id, r)| snapshot(id, r)).collect::<Vec<_>>());
    let handle = Framework::register_info(Box::new(infos.clone()));
    (handle, infos)
}

/// Returns `id`'s current lifecycle state.
///
/// # Errors
///
/// Returns [`FrameworkError::Unknown`] if `id` is not installed.
pub fn get_plugin_state(ctx: &Context, id: &PluginId) -> Result<LifecycleState> {
    ctx.with_env(|env| env.plugins.get(id).map(|r| r.state))
        .ok_or_else(|| FrameworkError::unknown(id.as_str()))
}

/// Returns a registered snapshot of every registered extension point.
pub fn get_ext_points_info(ctx: &Context) -> (InfoHandle, Vec<ExtPointEntry>) {
    let infos = ctx.with_env(|env| env.ext_points.values().cloned().collect::<Vec<_>>());
    let handle = Framework::register_info(Box::new(infos.clone()));
    (handle, infos)
}

/// Returns a registered snapshot of every extension targeting `ext_point_id`,
/// or of every extension in the environment when `ext_point_id` is `None`.
pub fn get_extensions_info(ctx: &Context, ext_point_id: Option<&ExtPointId>) -> (InfoHandle, Vec<ExtensionEntry>) {
    let infos = ctx.with_env(|env| match ext_point_id {
        Some(target) => env.extensions.get(target).cloned().unwrap_or_default(),
        None => env.extensions.values().flatten().cloned().collect(),
    });
    let handle = Framework::register_info(Box::new(infos.clone()));
    (handle, infos)
}

/// Releases a previously returned info handle.
///
/// # Errors
///
/// Propagates [`crate::error::FatalError::UnregisteredInfo`] (routed through
/// the fatal handler by [`Framework::release_info`]) for an unknown handle.
pub fn release_info(handle: InfoHandle) -> core::result::Result<(), crate::error::FatalError> {
    Framework::release_info(handle)
}

/// Resolves `path` relative to `base` within `tree`, returning the element's
/// node id.
#[must_use]
pub fn lookup_cfg_element(tree: &ConfigTree, base: crate::config::NodeId, path: &str) -> Option<crate::config::NodeId> {
    tree.lookup_element(base, path)
}

/// Resolves `path` relative to `base` within `tree`, returning the element's
/// text or a trailing `@attr`'s value.
#[must_use]
pub fn lookup_cfg_value(tree: &ConfigTree, base: crate::config::NodeId, path: &str) -> Option<String> {
    tree.lookup_value(base, path)
}

/// Registers a plug-in-state listener.
///
/// # Errors
///
/// Returns an error (having first routed a [`crate::error::FatalError::Reentrancy`]
/// to the fatal handler) if called from within a listener or
/// `create`/`start`/`stop`/`destroy` invocation on the same thread.
pub fn add_plugin_listener(
    ctx: &Context,
    callback: Arc<dyn Fn(&PluginId, LifecycleState, LifecycleState) + Send + Sync>,
) -> Result<ListenerKey> {
    deny_if_in_callback(ctx, "add_plugin_listener")?;
    Ok(ctx.add_listener_raw(callback))
}

/// Removes a previously registered plug-in-state listener.
pub fn remove_plugin_listener(ctx: &Context, key: ListenerKey) {
    ctx.remove_plugin_listener(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::install::install_plugin;
    use crate::lifecycle::start;
    use parking_lot::Mutex;

    #[test]
    fn get_plugin_info_reflects_state() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("p", "1.2.3").build()).unwrap();
        let (handle, info) = get_plugin_info(&ctx, &PluginId::new("p")).unwrap();
        assert_eq!(info.state, LifecycleState::Installed);
        assert_eq!(info.version.to_string(), "1.2.3");
        release_info(handle).unwrap();
    }

    #[test]
    fn get_plugin_info_unknown_is_an_error() {
        let ctx = Context::new();
        assert!(get_plugin_info(&ctx, &PluginId::new("missing")).is_err());
    }

    #[test]
    fn get_plugins_info_lists_everything_installed() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("a", "1.0").build()).unwrap();
        install_plugin(&ctx, DescriptorBuilder::new("b", "1.0").build()).unwrap();
        let (handle, infos) = get_plugins_info(&ctx);
        assert_eq!(infos.len(), 2);
        release_info(handle).unwrap();
    }

    #[test]
    fn get_plugin_state_tracks_lifecycle() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        assert_eq!(get_plugin_state(&ctx, &PluginId::new("p")).unwrap(), LifecycleState::Installed);
        start(&ctx, &PluginId::new("p")).unwrap();
        assert_eq!(get_plugin_state(&ctx, &PluginId::new("p")).unwrap(), LifecycleState::Active);
    }

    #[test]
    fn add_listener_inside_listener_is_rejected() {
        let ctx = Context::new();
        let violations = Arc::new(Mutex::new(Vec::new()));
        let v = Arc::clone(&violations);
        Framework::set_fatal_handler(move |err| v.lock().push(err.to_string()));

        let ctx2 = ctx.clone();
        ctx.add_listener_raw(Arc::new(move |_id, _old, _new| {
            let _ = add_plugin_listener(&ctx2, Arc::new(|_, _, _| {}));
        }));

        install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        assert_eq!(violations.lock().len(), 1);

        Framework::clear_fatal_handler();
    }
}
