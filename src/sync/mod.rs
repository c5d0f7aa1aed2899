//! Resource Sync and Bundle Sync: the two orchestration layers of a
//! reconciliation pass.

pub mod bundle;
pub mod resource;

use std::collections::BTreeSet;

use kube::core::DynamicObject;

use crate::error::SyncError;

/// The per-resource scratch outcome of one pass.
///
/// Modeled as a sealed enum rather than a loose status string: every downstream
/// consumer (Status & Conditions, the deletion sweep) matches on this instead of
/// re-deriving meaning from a string.
#[derive(Debug, Clone)]
pub enum ResourceOutcome {
    /// One or more declared producers were not Ready when this resource was
    /// visited.
    DependenciesNotReady(BTreeSet<String>),
    /// The object was created or updated but is not yet Ready.
    InProgress {
        /// The live object after the write (or after a no-op compare).
        actual: DynamicObject,
    },
    /// The object is Ready: dependents may consume it.
    Ready {
        /// The materialized desired object (post reference resolution).
        desired: DynamicObject,
        /// The live object, confirmed Ready.
        actual: DynamicObject,
    },
    /// Reconciling this resource failed.
    Error {
        /// The classified error; carries its own retriable/terminal verdict.
        err: SyncError,
    },
}

impl ResourceOutcome {
    /// `true` for [`ResourceOutcome::Ready`]. Producers must be Ready before a
    /// consumer may resolve references against them.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, ResourceOutcome::Ready { .. })
    }

    /// The live object this outcome carries, if any (absent for
    /// `DependenciesNotReady` and `Error`).
    #[must_use]
    pub fn live_object(&self) -> Option<&DynamicObject> {
        match self {
            ResourceOutcome::InProgress { actual } | ResourceOutcome::Ready { actual, .. } => {
                Some(actual)
            }
            ResourceOutcome::DependenciesNotReady(_) | ResourceOutcome::Error { .. } => None,
        }
    }
}
