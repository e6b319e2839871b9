//! Installation and uninstallation.
//!
//! `install_plugin` registers a descriptor's extension points and extensions
//! alongside its [`PluginRecord`], atomically: a duplicate plug-in id or a
//! colliding extension-point global id rolls back every registration made
//! during the same call. `uninstall_plugin` stops the plug-in (recursively,
//! through any active importers) before tearing down its registrations.

use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::PluginDescriptor;
use crate::error::{FrameworkError, Result};
use crate::framework::deny_if_in_callback;
use crate::ids::PluginId;
use crate::lifecycle;
use crate::plugin::{LifecycleState, PluginRecord};

/// Installs `descriptor`, registering its extension points and extensions.
///
/// # Errors
///
/// Returns [`FrameworkError::Conflict`] if `descriptor.id` is already
/// installed, or if any of its extension points collide with an
/// already-registered global id — in either case nothing is registered.
pub fn install_plugin(ctx: &Context, descriptor: PluginDescriptor) -> Result<()> {
    deny_if_in_callback(ctx, "install_plugin")?;
    let id = descriptor.id.clone();
    let descriptor = Arc::new(descriptor);

    ctx.with_env(|env| {
        if env.plugins.contains_key(&id) {
            return Err(FrameworkError::conflict(id.as_str(), "plugin id already installed"));
        }
        for point in &descriptor.extension_points {
            if env.ext_points.contains_key(&point.global_id) {
                return Err(FrameworkError::conflict(
                    id.as_str(),
                    format!("extension point {} already registered", point.global_id),
                ));
            }
        }
        Ok(())
    })?;

    ctx.with_env(|env| {
        for point in &descriptor.extension_points {
            env.ext_points.insert(
                point.global_id.clone(),
                crate::context::ExtPointEntry {
                    decl: point.clone(),
                    owner: id.clone(),
                },
            );
        }
        for extension in &descriptor.extensions {
            env.extensions.entry(extension.extension_point_id.clone()).or_default().push(
                crate::context::ExtensionEntry {
                    decl: extension.clone(),
                    owner: id.clone(),
                },
            );
        }
        env.plugins.insert(id.clone(), PluginRecord::new(descriptor));
    });

    ctx.notify_listeners(&id, LifecycleState::Uninstalled, LifecycleState::Installed);
    Ok(())
}

/// Uninstalls `id`: stops it (recursively, through any active importers),
/// unloads its runtime library, removes its extension-point and extension
/// registrations, and drops its record.
///
/// # Errors
///
/// Returns [`FrameworkError::Unknown`] if `id` is not installed, or
/// propagates a stop failure.
pub fn uninstall_plugin(ctx: &Context, id: &PluginId) -> Result<()> {
    deny_if_in_callback(ctx, "uninstall_plugin")?;
    let exists = ctx.with_env(|env| env.plugins.contains_key(id));
    if !exists {
        return Err(FrameworkError::unknown(id.as_str()));
    }

    let was_running = ctx.with_env(|env| env.plugins.get(id).is_some_and(|r| r.state.is_running_or_transient()));
    if was_running {
        lifecycle::stop(ctx, id)?;
    }

    let state = ctx.with_env(|env| env.plugins.get(id).map(|r| (Arc::clone(&r.descriptor), r.state)));
    let Some((descriptor, prior_state)) = state else {
        return Err(FrameworkError::unknown(id.as_str()));
    };

    ctx.with_env(|env| {
        for point in &descriptor.extension_points {
            env.ext_points.remove(&point.global_id);
            env.extensions.remove(&point.global_id);
        }
        for (_, other) in env.plugins.iter_mut() {
            other.imported.remove(id);
            other.importing.remove(id);
        }
        env.plugins.remove(id);
    });

    ctx.notify_listeners(id, prior_state, LifecycleState::Uninstalled);
    Ok(())
}

/// Uninstalls every plug-in currently registered in `ctx`, stopping any that
/// are running first. Called on context and framework teardown.
///
/// # Errors
///
/// Propagates the first stop failure encountered; plug-ins already
/// uninstalled by a recursive stop are skipped rather than re-reported.
pub fn uninstall_all_plugins(ctx: &Context) -> Result<()> {
    loop {
        let next = ctx.with_env(|env| env.plugins.keys().next().cloned());
        let Some(id) = next else { break };
        match uninstall_plugin(ctx, &id) {
            Ok(()) => {}
            Err(FrameworkError::Unknown(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::descriptor::DescriptorBuilder;
    use crate::ids::ExtPointId;

    #[test]
    fn install_registers_extension_points_and_extensions() {
        let ctx = Context::new();
        install_plugin(
            &ctx,
            DescriptorBuilder::new("host", "1.0")
                .extension_point("ep", "host.ep", "Host Extension Point")
                .build(),
        )
        .unwrap();
        install_plugin(
            &ctx,
            DescriptorBuilder::new("contrib", "1.0")
                .extension("host.ep", "ext", "Contribution", ConfigTree::default())
                .build(),
        )
        .unwrap();

        ctx.with_env(|env| {
            assert!(env.ext_points.contains_key(&ExtPointId::new("host.ep")));
            assert_eq!(env.extensions[&ExtPointId::new("host.ep")].len(), 1);
        });
    }

    #[test]
    fn duplicate_plugin_id_is_rejected() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        let err = install_plugin(&ctx, DescriptorBuilder::new("p", "2.0").build());
        assert!(matches!(err, Err(FrameworkError::Conflict { .. })));
    }

    #[test]
    fn colliding_extension_point_rolls_back_entirely() {
        let ctx = Context::new();
        install_plugin(
            &ctx,
            DescriptorBuilder::new("a", "1.0")
                .extension_point("ep", "shared.ep", "A's Point")
                .build(),
        )
        .unwrap();
        let err = install_plugin(
            &ctx,
            DescriptorBuilder::new("b", "1.0")
                .extension_point("ep", "shared.ep", "B's Point")
                .build(),
        );
        assert!(matches!(err, Err(FrameworkError::Conflict { .. })));
        ctx.with_env(|env| {
            assert!(!env.plugins.contains_key(&PluginId::new("b")));
            assert_eq!(env.ext_points[&ExtPointId::new("shared.ep")].owner, PluginId::new("a"));
        });
    }

    #[test]
    fn uninstall_stops_and_removes() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        lifecycle::start(&ctx, &PluginId::new("p")).unwrap();
        uninstall_plugin(&ctx, &PluginId::new("p")).unwrap();
        ctx.with_env(|env| assert!(!env.plugins.contains_key(&PluginId::new("p"))));
    }

    #[test]
    fn uninstall_stops_active_importers_first() {
        let ctx = Context::new();
        install_plugin(
            &ctx,
            DescriptorBuilder::new("a", "1.0")
                .import("b", "1.0", crate::version::MatchRule::None, false)
                .build(),
        )
        .unwrap();
        install_plugin(&ctx, DescriptorBuilder::new("b", "1.0").build()).unwrap();
        lifecycle::start(&ctx, &PluginId::new("a")).unwrap();

        uninstall_plugin(&ctx, &PluginId::new("b")).unwrap();
        ctx.with_env(|env| {
            assert!(!env.plugins.contains_key(&PluginId::new("b")));
            assert_eq!(env.plugins[&PluginId::new("a")].state, LifecycleState::Resolved);
        });
    }

    #[test]
    fn uninstall_all_plugins_drains_the_environment() {
        let ctx = Context::new();
        install_plugin(&ctx, DescriptorBuilder::new("a", "1.0").build()).unwrap();
        install_plugin(&ctx, DescriptorBuilder::new("b", "1.0").build()).unwrap();
        lifecycle::start(&ctx, &PluginId::new("a")).unwrap();
        uninstall_all_plugins(&ctx).unwrap();
        ctx.with_env(|env| assert!(env.plugins.is_empty()));
    }
}
