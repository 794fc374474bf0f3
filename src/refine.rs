//! Batched metadata refine.
//!
//! Refine requests are amortized: each capable plugin gets exactly one call
//! per request covering the whole collection, never one call per record.
//! Plugins prune their work against each record's refined-fields mask, so a
//! second refine of an already-refined collection does no work at all.

use crate::app::{QuirkSet, RefineFlags};
use crate::applist::AppList;
use crate::error::LoaderError;
use crate::event::PluginEvent;
use crate::job::JobContext;
use crate::loader::PluginLoader;
use crate::plugin::{Capability, PluginError};

pub(crate) fn run(
    loader: &PluginLoader,
    list: &mut AppList,
    flags: RefineFlags,
    job: &JobContext,
) -> Result<(), LoaderError> {
    expand_wildcards(loader, list, flags, job)?;

    for plugin in loader.eligible(Capability::REFINE) {
        if job.cancellable.is_cancelled() {
            return Err(LoaderError::Cancelled);
        }

        // Requested fields still missing on at least one record. Empty means
        // the collection is fully refined and the remaining plugins can be
        // skipped entirely.
        let mut missing = RefineFlags::NONE;
        for app in list.iter() {
            missing.insert(app.missing_refine_flags(flags));
        }
        if missing.is_empty() {
            break;
        }

        match plugin.refine(list, missing, job) {
            Ok(()) => {}
            Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
            Err(err) => {
                loader.record_event(PluginEvent::new(plugin.name(), "refine", err.to_string()));
            }
        }
    }
    Ok(())
}

/// Replace wildcard records with the concrete matches produced by the
/// wildcard-capable plugins. Plugins create new records; the templates are
/// dropped from the final collection.
fn expand_wildcards(
    loader: &PluginLoader,
    list: &mut AppList,
    flags: RefineFlags,
    job: &JobContext,
) -> Result<(), LoaderError> {
    let wildcards = list.wildcards();
    if wildcards.is_empty() {
        return Ok(());
    }

    let mut expanded = AppList::new();
    for plugin in loader.eligible(Capability::REFINE_WILDCARD) {
        for wildcard in &wildcards {
            if job.cancellable.is_cancelled() {
                return Err(LoaderError::Cancelled);
            }
            let mut out = AppList::new();
            match plugin.refine_wildcard(wildcard, &mut out, flags, job) {
                Ok(()) => expanded.merge(out),
                Err(PluginError::Cancelled) => return Err(LoaderError::Cancelled),
                Err(err) => {
                    loader.record_event(PluginEvent::new(
                        plugin.name(),
                        "refine-wildcard",
                        err.to_string(),
                    ));
                }
            }
        }
    }

    list.retain(|app| !app.has_quirk(QuirkSet::IS_WILDCARD));
    loader.adopt_pass(&expanded);
    list.merge(expanded);
    Ok(())
}
