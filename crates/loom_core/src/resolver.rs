//! Two-phase dependency resolution: INSTALLED → RESOLVED.
//!
//! A recursive pass walks the import graph, tolerating cycles by leaving
//! already-`processed` members alone. If every mandatory import along the
//! way is satisfied and every runtime library resolves, a commit pass flips
//! every touched record to `RESOLVED` and fires one listener event each, in
//! the order their recursive visit completed. Any failure triggers a
//! rollback pass that unloads libraries and clears the `processed` mark
//! without changing any record's observable state.

use hashbrown::HashSet;

use crate::context::Context;
use crate::error::{FrameworkError, Result};
use crate::ids::PluginId;
use crate::plugin::LifecycleState;

/// Resolves `id`, recursively resolving its mandatory imports first.
///
/// No-op (returns `Ok`) if `id` is already `RESOLVED` or later in the state
/// machine.
pub fn resolve(ctx: &Context, id: &PluginId) -> Result<()> {
    let already = ctx.with_locked(|locked| {
        locked
            .env
            .plugins
            .get(id)
            .map(|r| r.state != LifecycleState::Installed)
    });
    match already {
        None => return Err(FrameworkError::unknown(id.as_str())),
        Some(true) => return Ok(()),
        Some(false) => {}
    }

    let mut visiting = HashSet::new();
    let mut touched = Vec::new();
    let outcome = resolve_visit(ctx, id, &mut visiting, &mut touched);

    ctx.with_locked(|locked| {
        for pid in &touched {
            if let Some(record) = locked.env.plugins.get_mut(pid) {
                record.processed = false;
            }
        }
    });

    match outcome {
        Ok(()) => {
            for pid in &touched {
                let transitioned = ctx.with_locked(|locked| {
                    let record = locked.env.plugins.get_mut(pid)?;
                    if record.state == LifecycleState::Installed {
                        record.state = LifecycleState::Resolved;
                        Some(())
                    } else {
                        None
                    }
                });
                if transitioned.is_some() {
                    ctx.notify_listeners(pid, LifecycleState::Installed, LifecycleState::Resolved);
                }
            }
            Ok(())
        }
        Err(e) => {
            ctx.with_locked(|locked| {
                for pid in &touched {
                    if let Some(record) = locked.env.plugins.get_mut(pid) {
                        record.library = None;
                        record.imported.clear();
                    }
                }
                for pid in &touched {
                    for (_, other) in locked.env.plugins.iter_mut() {
                        other.importing.remove(pid);
                    }
                }
            });
            Err(e)
        }
    }
}

fn resolve_visit(
    ctx: &Context,
    id: &PluginId,
    visiting: &mut HashSet<PluginId>,
    touched: &mut Vec<PluginId>,
) -> Result<()> {
    let should_visit = ctx.with_locked(|locked| {
        let record = locked.env.plugins.get_mut(id)?;
        if record.state != LifecycleState::Installed || record.processed {
            return Some(false);
        }
        record.processed = true;
        Some(true)
    });

    match should_visit {
        None => return Err(FrameworkError::unknown(id.as_str())),
        Some(false) => return Ok(()),
        Some(true) => {}
    }

    if !visiting.insert(id.clone()) {
        // Already on the current recursion stack: tolerated cycle.
        return Ok(());
    }
    touched.push(id.clone());

    let descriptor = ctx.with_locked(|locked| locked.env.plugins.get(id).map(|r| r.descriptor.clone()));
    let Some(descriptor) = descriptor else {
        return Err(FrameworkError::unknown(id.as_str()));
    };

    for import in &descriptor.imports {
        let provider_version = ctx.with_locked(|locked| {
            locked
                .env
                .plugins
                .get(&import.plugin_id)
                .map(|r| r.descriptor.version.clone())
        });

        let Some(version) = provider_version else {
            if import.optional {
                continue;
            }
            return Err(FrameworkError::dependency(
                id.as_str(),
                format!("missing mandatory import {}", import.plugin_id),
            ));
        };

        if !import.match_rule.matches(&import.version, &version) {
            if import.optional {
                continue;
            }
            return Err(FrameworkError::dependency(
                id.as_str(),
                format!(
                    "import {} does not satisfy {:?} {} (found {})",
                    import.plugin_id, import.match_rule, import.version, version
                ),
            ));
        }

        resolve_visit(ctx, &import.plugin_id, visiting, touched)?;

        ctx.with_locked(|locked| {
            locked
                .env
                .plugins
                .get_mut(id)
                .expect("record still present")
                .imported
                .insert(import.plugin_id.clone());
            if let Some(provider) = locked.env.plugins.get_mut(&import.plugin_id) {
                provider.importing.insert(id.clone());
            }
        });
    }

    if let Some(runtime_ref) = &descriptor.runtime {
        let loader = ctx.loader().clone();
        let handle = loader
            .load(&runtime_ref.library_path, &runtime_ref.symbol_name)
            .map_err(|e| FrameworkError::runtime(id.as_str(), e.to_string()))?;
        ctx.with_locked(|locked| {
            locked.env.plugins.get_mut(id).expect("record still present").library = Some(handle);
        });
    }

    visiting.remove(id);
    Ok(())
}
