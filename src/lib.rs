//! Reconciliation core for `Bundle` custom resources.
//!
//! A `Bundle` is a namespaced document describing a DAG of cluster objects (and
//! synthesized "plugin" objects) that should exist together. This crate contains the
//! control loop that drives live cluster state toward a `Bundle`'s declared spec: it
//! orders resources by their declared references, resolves cross-resource data,
//! decides create/update/wait/error per resource, sweeps objects that no longer
//! belong, and folds the outcomes into a single `Bundle` status update.
//!
//! What this crate does *not* do is own a work queue, watch the API server, or speak
//! HTTP: those are the controller harness's job. This crate is invoked once per
//! reconciliation pass with a `Bundle` snapshot and a handful of collaborator traits
//! (see [`traits`]) and runs top-to-bottom, synchronously, to produce either an
//! updated `Bundle` or a classified error.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod clock;
pub mod error;
pub mod finalizer;
pub mod graph;
pub mod plugin;
pub mod ready;
pub mod resolver;
pub mod spec_check;
pub mod status;
pub mod sync;
pub mod traits;
pub mod types;

pub use error::{BundleSyncError, GraphError, ResolveError, SyncError};
pub use sync::bundle::{sync_bundle, BundleSyncOutcome};
pub use types::{Bundle, BundleSpec, BundleStatus, ObjectRef, Reference, ResourceSpec};
