//! The dynamic symbol engine.
//!
//! A symbol a plug-in defines via [`define_symbol`] is visible to any other
//! plug-in in the same context through [`resolve_symbol`], which starts the
//! provider on demand and, on a consuming plug-in's first outstanding use of
//! a provider, adds a dynamic dependency edge — withdrawn automatically once
//! [`release_symbol`] brings that provider's usage back to zero. When no
//! context-specific definition matches, resolution falls back to whatever
//! `name` resolves to as a global symbol exported by the provider's runtime
//! library.

use crate::context::Context;
use crate::error::{FrameworkError, Result};
use crate::framework::deny_if_in_callback;
use crate::ids::PluginId;
use crate::lifecycle;
use crate::plugin::LifecycleState;
use crate::runtime::SymbolPtr;

/// Defines a context-specific symbol. Plug-in-only: valid while `owner` is
/// `ACTIVE`.
///
/// # Errors
///
/// Returns [`FrameworkError::Unknown`] if `owner` does not exist,
/// [`FrameworkError::Runtime`] if `owner` is not `ACTIVE`, and
/// [`FrameworkError::Conflict`] if `name` is already defined.
pub fn define_symbol(ctx: &Context, owner: &PluginId, name: &str, ptr: SymbolPtr) -> Result<()> {
    ctx.with_locked(|locked| {
        let record = locked
            .env
            .plugins
            .get_mut(owner)
            .ok_or_else(|| FrameworkError::unknown(owner.as_str()))?;
        if record.state != LifecycleState::Active {
            return Err(FrameworkError::runtime(owner.as_str(), "define_symbol requires ACTIVE state"));
        }
        if record.find_defined(name).is_some() {
            return Err(FrameworkError::conflict(owner.as_str(), format!("symbol {name} already defined")));
        }
        record.define_symbol(name, ptr);
        Ok(())
    })
}

/// Resolves `name` from `provider` on behalf of `consumer`, starting
/// `provider` if it is not yet `ACTIVE`.
///
/// # Errors
///
/// Returns [`FrameworkError::Unknown`] if `provider` has no such symbol
/// defined and none of its runtime library's globally exported symbols
/// matches `name` either, or propagates a [`FrameworkError::Dependency`] /
/// [`FrameworkError::Runtime`] if starting `provider` fails.
pub fn resolve_symbol(ctx: &Context, consumer: &PluginId, provider: &PluginId, name: &str) -> Result<SymbolPtr> {
    deny_if_in_callback(ctx, "resolve_symbol")?;

    let provider_active = ctx.with_locked(|locked| locked.env.plugins.get(provider).map(|r| r.state == LifecycleState::Active));
    match provider_active {
        None => return Err(FrameworkError::unknown(provider.as_str())),
        Some(false) => lifecycle::start(ctx, provider)?,
        Some(true) => {}
    }

    let ptr = ctx
        .with_locked(|locked| {
            locked
                .env
                .plugins
                .get(provider)
                .and_then(|r| r.find_defined(name).or_else(|| r.global_symbol(name)))
        })
        .ok_or_else(|| FrameworkError::unknown(format!("{provider}::{name}")))?;

    ctx.with_locked(|locked| {
        let static_import = locked
            .env
            .plugins
            .get(consumer)
            .is_some_and(|r| r.imported.contains(provider));

        let first_use = locked
            .env
            .plugins
            .get_mut(consumer)
            .expect("consumer exists")
            .record_resolved(provider.clone(), name.to_string(), ptr);

        if first_use && !static_import {
            locked
                .env
                .plugins
                .get_mut(consumer)
                .expect("consumer exists")
                .mark_dynamic_provider(provider.clone());
            locked
                .env
                .plugins
                .get_mut(consumer)
                .expect("consumer exists")
                .imported
                .insert(provider.clone());
            if let Some(provider_record) = locked.env.plugins.get_mut(provider) {
                provider_record.importing.insert(consumer.clone());
            }
        }

        if let Some(provider_record) = locked.env.plugins.get_mut(provider) {
            provider_record.bump_usage(name);
        }
    });

    Ok(ptr)
}

/// Releases one unit of a previously resolved symbol, withdrawing the
/// dynamic dependency edge if this was the consumer's last outstanding use
/// of that provider.
///
/// # Errors
///
/// Releasing an unknown pointer is logged at `ERROR` and returned as
/// [`FrameworkError::Unknown`] — not fatal.
pub fn release_symbol(ctx: &Context, consumer: &PluginId, ptr: SymbolPtr) -> Result<()> {
    let key = ctx.with_locked(|locked| locked.env.plugins.get(consumer).and_then(|r| r.find_resolved_by_ptr(ptr)));
    let Some((provider, name)) = key else {
        let message = format!("release_symbol: unknown pointer for consumer {consumer}");
        crate::framework::Framework::log(Some(ctx.id()), Some(consumer), crate::logging::Severity::Error, &message);
        return Err(FrameworkError::unknown(message));
    };

    ctx.with_locked(|locked| {
        let (_, provider_drained) = locked
            .env
            .plugins
            .get_mut(consumer)
            .expect("consumer exists")
            .release_resolved(&provider, &name);

        if let Some(provider_record) = locked.env.plugins.get_mut(&provider) {
            provider_record.drop_usage(&name);
        }

        if provider_drained {
            let was_dynamic = locked
                .env
                .plugins
                .get(consumer)
                .is_some_and(|r| r.is_dynamic_provider(&provider));
            if was_dynamic {
                locked
                    .env
                    .plugins
                    .get_mut(consumer)
                    .expect("consumer exists")
                    .unmark_dynamic_provider(&provider);
                locked
                    .env
                    .plugins
                    .get_mut(consumer)
                    .expect("consumer exists")
                    .imported
                    .remove(&provider);
                if let Some(provider_record) = locked.env.plugins.get_mut(&provider) {
                    provider_record.importing.remove(consumer);
                }
            }
        }
    });

    Ok(())
}

/// Releases every symbol `consumer` currently holds against any provider,
/// fully (ignoring individual usage counts) — called when `consumer` itself
/// is stopped, so its own resolved symbols are released, transitively
/// releasing reverse-edge usage on their providers.
pub(crate) fn release_all_resolved_by(ctx: &Context, consumer: &PluginId) {
    loop {
        let next = ctx.with_locked(|locked| {
            let record = locked.env.plugins.get(consumer)?;
            let (provider, name) = record.resolved_keys().into_iter().next()?;
            let ptr = record.resolved_ptr(&provider, &name)?;
            Some((provider, name, ptr))
        });
        let Some((provider, name, ptr)) = next else { break };

        // Drain this (provider, name) entry's full usage count one unit at a
        // time, so the dynamic-edge withdrawal logic in `release_symbol` runs
        // exactly as it would for any other caller.
        loop {
            if release_symbol(ctx, consumer, ptr).is_err() {
                break;
            }
            let still_present = ctx.with_locked(|locked| {
                locked
                    .env
                    .plugins
                    .get(consumer)
                    .is_some_and(|r| r.resolved_ptr(&provider, &name).is_some())
            });
            if !still_present {
                break;
            }
        }
    }
}
