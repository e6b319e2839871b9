//! The starter and stopper: RESOLVED ⇄ ACTIVE.
//!
//! `start` implies `resolve`. Starting recurses depth-first across the
//! resolved import graph; a plug-in already `STARTING` higher up the same
//! call stack is left alone (a tolerated cycle). Stopping recurses in the
//! reverse direction, but only after the target's own outstanding symbol
//! usage is checked: every currently-`ACTIVE` importer is stopped next.
//!
//! A descriptor with no declared runtime library has no lifecycle hooks at
//! all; `STARTING`/`STOPPING` are skipped entirely for it and it transitions
//! straight `RESOLVED` ⇄ `ACTIVE`.

use hashbrown::HashSet;

use crate::context::Context;
use crate::error::{FatalError, FrameworkError, Result};
use crate::framework::{deny_if_in_callback, invoke_fatal};
use crate::ids::PluginId;
use crate::plugin::LifecycleState;
use crate::resolver;
use crate::runtime::PluginRuntime;
use std::sync::Arc;

/// Starts `id`, recursively resolving and starting its import graph first.
pub fn start(ctx: &Context, id: &PluginId) -> Result<()> {
    deny_if_in_callback(ctx, "start_plugin")?;
    let mut stack = HashSet::new();
    start_inner(ctx, id, &mut stack)
}

fn start_inner(ctx: &Context, id: &PluginId, stack: &mut HashSet<PluginId>) -> Result<()> {
    let state = ctx.with_locked(|locked| locked.env.plugins.get(id).map(|r| r.state));
    match state {
        None => return Err(FrameworkError::unknown(id.as_str())),
        Some(LifecycleState::Active) => return Ok(()),
        Some(LifecycleState::Starting) => return Ok(()),
        Some(LifecycleState::Stopping) => {
            return Err(FrameworkError::runtime(id.as_str(), "plugin is stopping"));
        }
        Some(LifecycleState::Installed) => {
            resolver::resolve(ctx, id)?;
        }
        Some(LifecycleState::Resolved) => {}
    }

    if !stack.insert(id.clone()) {
        return Ok(());
    }

    let imports: Vec<PluginId> =
        ctx.with_locked(|locked| locked.env.plugins.get(id).map(|r| r.imported.iter().cloned().collect()).unwrap_or_default());
    for dep in &imports {
        start_inner(ctx, dep, stack)?;
    }

    let has_runtime = ctx.with_locked(|locked| {
        locked
            .env
            .plugins
            .get(id)
            .map(|r| r.descriptor.runtime.is_some())
    });
    let Some(has_runtime) = has_runtime else {
        return Err(FrameworkError::unknown(id.as_str()));
    };

    if !has_runtime {
        transition(ctx, id, LifecycleState::Resolved, LifecycleState::Active);
        ctx.with_locked(|locked| locked.env.started.push(id.clone()));
        return Ok(());
    }

    transition(ctx, id, LifecycleState::Resolved, LifecycleState::Starting);

    let runtime: Arc<dyn PluginRuntime> = ctx
        .with_locked(|locked| {
            locked
                .env
                .plugins
                .get(id)
                .and_then(|r| r.library.as_ref())
                .map(|h| Arc::clone(&h.runtime))
        })
        .ok_or_else(|| FrameworkError::runtime(id.as_str(), "resolved plug-in has no loaded runtime"))?;

    ctx.with_locked(|locked| locked.guard.in_create_func += 1);
    let instance = runtime.create(ctx);
    ctx.with_locked(|locked| locked.guard.in_create_func -= 1);

    let Some(mut instance) = instance else {
        transition(ctx, id, LifecycleState::Starting, LifecycleState::Resolved);
        return Err(FrameworkError::runtime(id.as_str(), "create returned null instance data"));
    };

    let started_ok = if runtime.has_start() {
        ctx.with_locked(|locked| locked.guard.in_start_func += 1);
        let ok = runtime.start(&mut instance);
        ctx.with_locked(|locked| locked.guard.in_start_func -= 1);
        ok
    } else {
        true
    };

    if !started_ok {
        if runtime.has_stop() {
            ctx.with_locked(|locked| locked.guard.in_stop_func += 1);
            runtime.stop(&mut instance);
            ctx.with_locked(|locked| locked.guard.in_stop_func -= 1);
        }
        ctx.with_locked(|locked| locked.guard.in_destroy_func += 1);
        runtime.destroy(instance);
        ctx.with_locked(|locked| locked.guard.in_destroy_func -= 1);

        transition(ctx, id, LifecycleState::Starting, LifecycleState::Resolved);
        return Err(FrameworkError::runtime(id.as_str(), "start hook returned failure"));
    }

    ctx.with_locked(|locked| {
        locked.env.plugins.get_mut(id).expect("record still present").instance = Some(instance);
    });
    transition(ctx, id, LifecycleState::Starting, LifecycleState::Active);
    ctx.with_locked(|locked| locked.env.started.push(id.clone()));
    Ok(())
}

/// Stops `id`. If `id`'s outstanding symbol-usage counter is nonzero this
/// routes to the fatal handler and returns an error without touching
/// anything; otherwise every currently-`ACTIVE` importer of `id` is stopped
/// first.
///
/// # Errors
///
/// Returns a [`FrameworkError::Runtime`] wrapping the fatal condition if the
/// outstanding symbol-usage counter is non-zero — the fatal handler
/// registered via [`crate::framework::Framework::set_fatal_handler`] also
/// observes it.
pub fn stop(ctx: &Context, id: &PluginId) -> Result<()> {
    deny_if_in_callback(ctx, "stop_plugin")?;
    stop_inner(ctx, id)
}

fn stop_inner(ctx: &Context, id: &PluginId) -> Result<()> {
    let state = ctx.with_locked(|locked| locked.env.plugins.get(id).map(|r| r.state));
    match state {
        None => return Err(FrameworkError::unknown(id.as_str())),
        Some(LifecycleState::Active) => {}
        Some(_) => return Ok(()),
    }

    // Checked before the importer cascade: a dynamic symbol consumer is
    // recorded in `importing` alongside real import edges, and stopping it
    // first would drain this outstanding count via `release_all_resolved_by`
    // before we ever observed it.
    let outstanding = ctx
        .with_locked(|locked| locked.env.plugins.get(id).map(|r| r.total_symbol_usage()))
        .unwrap_or(0);
    if outstanding > 0 {
        invoke_fatal(FatalError::SymbolsInUse {
            plugin: id.clone(),
            usage: outstanding,
        });
        return Err(FrameworkError::runtime(
            id.as_str(),
            format!("fatal: {outstanding} outstanding symbol use(s)"),
        ));
    }

    let importers: Vec<PluginId> = ctx.with_locked(|locked| {
        locked
            .env
            .plugins
            .get(id)
            .map(|r| r.importing.iter().cloned().collect())
            .unwrap_or_default()
    });
    for importer in &importers {
        let importer_active = ctx.with_locked(|locked| {
            locked.env.plugins.get(importer).map(|r| r.state == LifecycleState::Active)
        });
        if importer_active == Some(true) {
            stop_inner(ctx, importer)?;
        }
    }

    crate::symbols::release_all_resolved_by(ctx, id);

    let has_runtime = ctx.with_locked(|locked| locked.env.plugins.get(id).map(|r| r.descriptor.runtime.is_some()));
    let has_runtime = has_runtime.unwrap_or(false);

    ctx.with_locked(|locked| locked.env.plugins.get_mut(id).expect("record present").clear_defined_symbols());

    if has_runtime {
        transition(ctx, id, LifecycleState::Active, LifecycleState::Stopping);

        let runtime = ctx.with_locked(|locked| {
            locked
                .env
                .plugins
                .get(id)
                .and_then(|r| r.library.as_ref())
                .map(|h| Arc::clone(&h.runtime))
        });
        let instance = ctx.with_locked(|locked| locked.env.plugins.get_mut(id).and_then(|r| r.instance.take()));

        if let (Some(runtime), Some(mut instance)) = (runtime, instance) {
            if runtime.has_stop() {
                ctx.with_locked(|locked| locked.guard.in_stop_func += 1);
                runtime.stop(&mut instance);
                ctx.with_locked(|locked| locked.guard.in_stop_func -= 1);
            }
            ctx.with_locked(|locked| locked.guard.in_destroy_func += 1);
            runtime.destroy(instance);
            ctx.with_locked(|locked| locked.guard.in_destroy_func -= 1);
        }

        transition(ctx, id, LifecycleState::Stopping, LifecycleState::Resolved);
    } else {
        transition(ctx, id, LifecycleState::Active, LifecycleState::Resolved);
    }

    ctx.with_locked(|locked| locked.env.started.retain(|started| started != id));
    Ok(())
}

/// Stops every currently-`ACTIVE` plug-in, in reverse start order.
pub fn stop_all(ctx: &Context) -> Result<()> {
    loop {
        let next = ctx.with_locked(|locked| locked.env.started.last().cloned());
        let Some(id) = next else { break };
        stop_inner(ctx, &id)?;
    }
    Ok(())
}

fn transition(ctx: &Context, id: &PluginId, from: LifecycleState, to: LifecycleState) {
    ctx.with_locked(|locked| {
        if let Some(record) = locked.env.plugins.get_mut(id) {
            record.state = to;
        }
    });
    ctx.notify_listeners(id, from, to);
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;
    use crate::plugin::PluginRecord;
    use crate::runtime::{InMemoryLoader, InstanceData};
    use crate::version::MatchRule;

    fn install(ctx: &Context, descriptor: crate::descriptor::PluginDescriptor) {
        let id = descriptor.id.clone();
        ctx.with_env(|env| {
            env.plugins.insert(id, PluginRecord::new(Arc::new(descriptor)));
        });
    }

    #[test]
    fn minimal_install_start_stop() {
        let ctx = Context::new();
        install(&ctx, DescriptorBuilder::new("p", "1.0").build());
        start(&ctx, &PluginId::new("p")).unwrap();
        ctx.with_env(|env| assert_eq!(env.plugins[&PluginId::new("p")].state, LifecycleState::Active));
        stop(&ctx, &PluginId::new("p")).unwrap();
        ctx.with_env(|env| assert_eq!(env.plugins[&PluginId::new("p")].state, LifecycleState::Resolved));
    }

    #[test]
    fn missing_dependency_leaves_installed() {
        let ctx = Context::new();
        install(
            &ctx,
            DescriptorBuilder::new("a", "1.0")
                .import("b", "1.0", MatchRule::None, false)
                .build(),
        );
        let err = start(&ctx, &PluginId::new("a")).unwrap_err();
        assert!(matches!(err, FrameworkError::Dependency { .. }));
        ctx.with_env(|env| assert_eq!(env.plugins[&PluginId::new("a")].state, LifecycleState::Installed));
    }

    struct RecordingRuntime {
        events: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl PluginRuntime for RecordingRuntime {
        fn create(&self, _ctx: &Context) -> Option<InstanceData> {
            self.events.lock().push("create");
            Some(InstanceData::new(0u32))
        }
        fn start(&self, _instance: &mut InstanceData) -> bool {
            self.events.lock().push("start");
            true
        }
        fn stop(&self, _instance: &mut InstanceData) {
            self.events.lock().push("stop");
        }
        fn destroy(&self, _instance: InstanceData) {
            self.events.lock().push("destroy");
        }
    }

    #[test]
    fn cycle_starts_both_members_in_order() {
        let events: Arc<parking_lot::Mutex<Vec<(PluginId, LifecycleState, LifecycleState)>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let ctx = Context::new();
        let e = Arc::clone(&events);
        ctx.add_listener_raw(Arc::new(move |id, old, new| {
            e.lock().push((id.clone(), old, new));
        }));

        install(
            &ctx,
            DescriptorBuilder::new("x", "1.0")
                .import("y", "1.0", MatchRule::None, false)
                .build(),
        );
        install(
            &ctx,
            DescriptorBuilder::new("y", "1.0")
                .import("x", "1.0", MatchRule::None, false)
                .build(),
        );

        start(&ctx, &PluginId::new("x")).unwrap();
        ctx.with_env(|env| {
            assert_eq!(env.plugins[&PluginId::new("x")].state, LifecycleState::Active);
            assert_eq!(env.plugins[&PluginId::new("y")].state, LifecycleState::Active);
        });
    }

    #[test]
    fn runtime_hooks_fire_in_order() {
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut loader = InMemoryLoader::new();
        let e = Arc::clone(&events);
        loader.register("entry", move || {
            Box::new(RecordingRuntime { events: Arc::clone(&e) }) as Box<dyn PluginRuntime>
        });
        let ctx = Context::with_loader(Arc::new(loader));
        install(
            &ctx,
            DescriptorBuilder::new("p", "1.0").runtime("lib.so", "entry").build(),
        );
        start(&ctx, &PluginId::new("p")).unwrap();
        stop(&ctx, &PluginId::new("p")).unwrap();
        assert_eq!(*events.lock(), vec!["create", "start", "stop", "destroy"]);
    }

    #[test]
    fn symbols_in_use_blocks_stop() {
        // `stop` on a plug-in with outstanding symbol usage routes to the
        // fatal handler; register one so the default panic-based handler
        // does not fire in this test.
        let violations = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let v = Arc::clone(&violations);
        crate::framework::Framework::set_fatal_handler(move |err| v.lock().push(err.to_string()));

        let ctx = Context::new();
        install(&ctx, DescriptorBuilder::new("u", "1.0").build());
        install(&ctx, DescriptorBuilder::new("v", "1.0").build());
        start(&ctx, &PluginId::new("u")).unwrap();
        start(&ctx, &PluginId::new("v")).unwrap();

        crate::symbols::define_symbol(&ctx, &PluginId::new("v"), "f", crate::runtime::SymbolPtr::from_raw(std::ptr::null())).unwrap();
        crate::symbols::resolve_symbol(&ctx, &PluginId::new("u"), &PluginId::new("v"), "f").unwrap();

        let err = stop(&ctx, &PluginId::new("v"));
        assert!(err.is_err());
        assert_eq!(violations.lock().len(), 1);

        crate::framework::Framework::clear_fatal_handler();
    }
}
