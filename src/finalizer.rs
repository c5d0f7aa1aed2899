//! Finalizer Lifecycle.
//!
//! Two finalizers participate in a Bundle's lifecycle: the core's own
//! `deleteResources` finalizer, added on first sight of a Bundle and removed only
//! after the deletion cascade has been attempted; and the platform's
//! `foregroundDeletion` finalizer, which the core only ever reads — it is added and
//! removed by the apiserver's garbage collector, never by this crate.
//!
//! Unlike `kube_runtime::finalizer`, which issues its own PATCH against a live
//! `Api<K>`, these helpers only stage an in-memory mutation on the `Bundle` struct:
//! Bundle Sync performs a single whole-object write per pass, so finalizer
//! changes are folded into that one write rather than issued separately.

use crate::types::Bundle;

/// The finalizer this core manages. Blocks the Bundle's deletion until the
/// cascade (or a sighting of the platform's own foreground GC) has run.
pub const DELETE_RESOURCES_FINALIZER: &str = "bundle.example.com/delete-resources";

/// The platform finalizer that drives foreground garbage collection. Owned by the
/// cluster; the core only inspects its presence
pub const FOREGROUND_DELETION_FINALIZER: &str = "foregroundDeletion";

/// `true` iff `bundle` carries `finalizer`.
#[must_use]
pub fn has_finalizer(bundle: &Bundle, finalizer: &str) -> bool {
    bundle
        .metadata
        .finalizers
        .iter()
        .flatten()
        .any(|f| f == finalizer)
}

/// `true` iff the core's own deletion finalizer is present.
#[must_use]
pub fn has_delete_resources_finalizer(bundle: &Bundle) -> bool {
    has_finalizer(bundle, DELETE_RESOURCES_FINALIZER)
}

/// `true` iff the platform's foreground-deletion finalizer is present. While it
/// is, the apiserver is actively cascading the delete itself and the core's own
/// manual cascade is unnecessary.
#[must_use]
pub fn has_foreground_finalizer(bundle: &Bundle) -> bool {
    has_finalizer(bundle, FOREGROUND_DELETION_FINALIZER)
}

/// Stage addition of the deletion finalizer, idempotently.
pub fn stage_add_finalizer(bundle: &mut Bundle) {
    let finalizers = bundle.metadata.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == DELETE_RESOURCES_FINALIZER) {
        finalizers.push(DELETE_RESOURCES_FINALIZER.to_string());
    }
}

/// Stage removal of the deletion finalizer. Callers must only do this after the
/// deletion cascade has been attempted (a lifecycle safety invariant): by the time the
/// finalizer is gone, every controlled object must be either deleted or actively
/// being deleted by the platform.
pub fn stage_remove_finalizer(bundle: &mut Bundle) {
    if let Some(finalizers) = bundle.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != DELETE_RESOURCES_FINALIZER);
    }
}
