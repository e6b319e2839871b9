//! Plug-in discovery.
//!
//! The scanner consumes the environment's registered directory list,
//! discovers candidate descriptors through a [`DescriptorSource`]
//! collaborator, deduplicates by identifier (highest version wins, ties
//! broken by discovery order), and drives `install`/`uninstall` per survivor
//! according to [`ScanFlags`].

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::context::Context;
use crate::descriptor::PluginDescriptor;
use crate::error::{FrameworkError, Result, ScanError};
use crate::ids::PluginId;
use crate::install;
use crate::lifecycle;
use crate::plugin::LifecycleState;

/// Collaborator responsible for walking registered directories and parsing
/// candidate descriptors. The directory walk and descriptor (XML) decoding
/// are this trait's contract; everything downstream of a parsed
/// [`PluginDescriptor`] is the core's job.
pub trait DescriptorSource: Send + Sync {
    /// Discovers every candidate descriptor under `dirs`.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError`] for a filesystem failure or a descriptor that
    /// fails to parse.
    fn discover(&self, dirs: &[PathBuf]) -> core::result::Result<Vec<PluginDescriptor>, ScanError>;
}

/// Behavior flags controlling a [`scan_plugins`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFlags {
    /// Allow replacing an already-installed plug-in with a newer discovered version.
    pub upgrade: bool,
    /// Stop every active plug-in before performing any upgrade this pass makes.
    pub stop_all_on_upgrade: bool,
    /// Stop every active plug-in before installing any new plug-in this pass adds.
    pub stop_all_on_install: bool,
    /// Remember which upgraded plug-ins were active and restart them after the scan.
    pub restart_active: bool,
}

/// Registers `dir` for future [`scan_plugins`] passes, if not already present.
pub fn register_plugin_dir(ctx: &Context, dir: impl Into<PathBuf>) {
    let dir = dir.into();
    ctx.with_env(|env| {
        if !env.plugin_dirs.contains(&dir) {
            env.plugin_dirs.push(dir);
        }
    });
}

/// Stops scanning `dir` in future passes.
pub fn unregister_plugin_dir(ctx: &Context, dir: &Path) {
    ctx.with_env(|env| env.plugin_dirs.retain(|d| d != dir));
}

/// Discovers and installs plug-ins from every registered directory.
///
/// # Errors
///
/// Propagates the [`DescriptorSource`]'s discovery failure, or any
/// `install`/`uninstall`/`start` failure encountered while applying the scan.
pub fn scan_plugins(ctx: &Context, source: &dyn DescriptorSource, flags: ScanFlags) -> Result<()> {
    let dirs = ctx.with_env(|env| env.plugin_dirs.clone());
    let discovered = source
        .discover(&dirs)
        .map_err(|e| FrameworkError::malformed("<scan>", e.to_string()))?;

    let mut by_id: HashMap<PluginId, PluginDescriptor> = HashMap::new();
    for descriptor in discovered {
        by_id
            .entry(descriptor.id.clone())
            .and_modify(|existing| {
                if descriptor.version > existing.version {
                    *existing = descriptor.clone();
                }
            })
            .or_insert(descriptor);
    }

    let mut to_install = Vec::new();
    let mut to_upgrade = Vec::new();
    for descriptor in by_id.into_values() {
        let existing_version =
            ctx.with_env(|env| env.plugins.get(&descriptor.id).map(|r| r.descriptor.version.clone()));
        match existing_version {
            None => to_install.push(descriptor),
            Some(v) if flags.upgrade && descriptor.version > v => to_upgrade.push(descriptor),
            Some(_) => {}
        }
    }

    if to_install.is_empty() && to_upgrade.is_empty() {
        return Ok(());
    }

    let restart_candidates: Vec<PluginId> = if flags.restart_active {
        ctx.with_env(|env| {
            to_upgrade
                .iter()
                .map(|d| d.id.clone())
                .filter(|id| env.plugins.get(id).is_some_and(|r| r.state == LifecycleState::Active))
                .collect()
        })
    } else {
        Vec::new()
    };

    let should_stop_all =
        (flags.stop_all_on_install && !to_install.is_empty()) || (flags.stop_all_on_upgrade && !to_upgrade.is_empty());
    if should_stop_all {
        lifecycle::stop_all(ctx)?;
    }

    for descriptor in to_upgrade {
        let id = descriptor.id.clone();
        install::uninstall_plugin(ctx, &id)?;
        install::install_plugin(ctx, descriptor)?;
    }
    for descriptor in to_install {
        install::install_plugin(ctx, descriptor)?;
    }

    for id in restart_candidates {
        lifecycle::start(ctx, &id)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use parking_lot::Mutex;

    struct FixedSource(Mutex<Vec<PluginDescriptor>>);

    impl DescriptorSource for FixedSource {
        fn discover(&self, _dirs: &[PathBuf]) -> core::result::Result<Vec<PluginDescriptor>, ScanError> {
            Ok(self.0.lock().clone())
        }
    }

    #[test]
    fn dedup_keeps_highest_version_and_first_on_ties() {
        let source = FixedSource(Mutex::new(vec![
            DescriptorBuilder::new("p", "1.0").build(),
            DescriptorBuilder::new("p", "2.0").build(),
            DescriptorBuilder::new("p", "2.0").build(),
        ]));
        let ctx = Context::new();
        scan_plugins(&ctx, &source, ScanFlags::default()).unwrap();
        ctx.with_env(|env| {
            assert_eq!(env.plugins[&PluginId::new("p")].descriptor.version.to_string(), "2.0");
        });
    }

    #[test]
    fn without_upgrade_flag_existing_plugin_is_left_alone() {
        let ctx = Context::new();
        install::install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        let source = FixedSource(Mutex::new(vec![DescriptorBuilder::new("p", "2.0").build()]));
        scan_plugins(&ctx, &source, ScanFlags::default()).unwrap();
        ctx.with_env(|env| {
            assert_eq!(env.plugins[&PluginId::new("p")].descriptor.version.to_string(), "1.0");
        });
    }

    #[test]
    fn upgrade_flag_replaces_with_higher_version() {
        let ctx = Context::new();
        install::install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        let source = FixedSource(Mutex::new(vec![DescriptorBuilder::new("p", "2.0").build()]));
        scan_plugins(
            &ctx,
            &source,
            ScanFlags {
                upgrade: true,
                ..ScanFlags::default()
            },
        )
        .unwrap();
        ctx.with_env(|env| {
            assert_eq!(env.plugins[&PluginId::new("p")].descriptor.version.to_string(), "2.0");
        });
    }

    #[test]
    fn restart_active_restarts_an_upgraded_plugin() {
        let ctx = Context::new();
        install::install_plugin(&ctx, DescriptorBuilder::new("p", "1.0").build()).unwrap();
        lifecycle::start(&ctx, &PluginId::new("p")).unwrap();

        let source = FixedSource(Mutex::new(vec![DescriptorBuilder::new("p", "2.0").build()]));
        scan_plugins(
            &ctx,
            &source,
            ScanFlags {
                upgrade: true,
                restart_active: true,
                ..ScanFlags::default()
            },
        )
        .unwrap();

        ctx.with_env(|env| {
            assert_eq!(env.plugins[&PluginId::new("p")].descriptor.version.to_string(), "2.0");
            assert_eq!(env.plugins[&PluginId::new("p")].state, LifecycleState::Active);
        });
    }

    #[test]
    fn register_and_unregister_plugin_dir_is_idempotent() {
        let ctx = Context::new();
        register_plugin_dir(&ctx, "/plugins/a");
        register_plugin_dir(&ctx, "/plugins/a");
        ctx.with_env(|env| assert_eq!(env.plugin_dirs.len(), 1));
        unregister_plugin_dir(&ctx, Path::new("/plugins/a"));
        ctx.with_env(|env| assert!(env.plugin_dirs.is_empty()));
    }
}
