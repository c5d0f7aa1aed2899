//! Error vocabulary for the reconciliation core.
//!
//! Every externally-visible failure is a tagged enum variant, never a loose string:
//! a sealed/discriminated type lets callers branch on kind instead of matching
//! messages. Each enum exposes [`retriable`](SyncError::retriable)
//! so Status & Conditions can classify without re-deriving it from an error's text.

use thiserror::Error;

/// Failures from building/sorting the resource graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two resources in one Bundle spec share a name.
    #[error("duplicate resource name: {0}")]
    DuplicateResourceName(String),
    /// A reference names a resource that does not exist in the spec.
    #[error("resource {consumer} references unknown resource {producer}")]
    UnknownReference {
        /// The resource that declared the reference.
        consumer: String,
        /// The resource name it referenced.
        producer: String,
    },
    /// The dependency graph contains a cycle.
    #[error("dependency cycle involving: {0:?}")]
    Cycle(Vec<String>),
}

/// Failures from evaluating a single reference. Always scoped to one resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// `path` did not resolve against the producer's live object. The producer may
    /// still be populating the field, so this is retriable.
    #[error("reference {reference} on resource {resource}: path {path} not found")]
    MissingPath {
        /// The resource being resolved.
        resource: String,
        /// The reference's `name`.
        reference: String,
        /// The path expression that failed to resolve.
        path: String,
    },
    /// An unrecognized `modifier` was declared. Terminal: no retry will fix a typo.
    #[error("reference {reference} on resource {resource}: unknown modifier")]
    UnknownModifier {
        /// The resource being resolved.
        resource: String,
        /// The reference's `name`.
        reference: String,
    },
}

impl ResolveError {
    /// Whether retrying this resource later might succeed.
    #[must_use]
    pub fn retriable(&self) -> bool {
        matches!(self, ResolveError::MissingPath { .. })
    }
}

/// Failures from reconciling a single resource. Carries its own
/// retriable/terminal classification rather than deriving it elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Neither or both of `object`/`plugin` were set, or the spec was otherwise
    /// malformed for this resource. Terminal.
    #[error("invalid resource spec: {0}")]
    InvalidSpec(String),
    /// A declared reference could not be resolved.
    #[error("reference resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    /// The named plugin is not registered. Terminal.
    #[error("no such plugin: {0}")]
    NoSuchPlugin(String),
    /// The plugin panicked or returned an internal error while synthesizing an
    /// object. Terminal for this resource; does not fail the pass.
    #[error("plugin {plugin} failed: {message}")]
    PluginFailed {
        /// The plugin's registered name.
        plugin: String,
        /// The plugin's error message.
        message: String,
    },
    /// The live object exists but is not controlled-by this Bundle. Terminal.
    #[error("object {0} is not controlled by this bundle")]
    ForeignObject(String),
    /// The API server could not be reached, timed out, or returned a transient
    /// 5xx. Retriable.
    #[error("transport error: {0}")]
    Transport(String),
    /// An update lost a resource-version precondition race. Always retriable; at
    /// the Bundle Sync level this short-circuits the whole pass.
    #[error("conflict updating {0}")]
    Conflict(String),
    /// The object was deleted between being fetched and being updated. Retriable.
    #[error("object {0} not found on update")]
    NotFoundOnUpdate(String),
    /// The apiserver rejected the write as invalid, forbidden, or for an
    /// unregistered kind. Terminal.
    #[error("validation/forbidden error: {0}")]
    Validation(String),
}

impl SyncError {
    /// Whether retrying this resource later might succeed's classification
    /// table.
    #[must_use]
    pub fn retriable(&self) -> bool {
        match self {
            SyncError::InvalidSpec(_)
            | SyncError::NoSuchPlugin(_)
            | SyncError::PluginFailed { .. }
            | SyncError::ForeignObject(_)
            | SyncError::Validation(_) => false,
            SyncError::Resolve(e) => e.retriable(),
            SyncError::Transport(_) | SyncError::Conflict(_) | SyncError::NotFoundOnUpdate(_) => {
                true
            }
        }
    }

    /// Whether this error should short-circuit the entire pass (only a Bundle- or
    /// object-level write conflict does).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }
}

/// Failures from a whole reconciliation pass, as opposed to a single
/// resource.
#[derive(Debug, Error)]
pub enum BundleSyncError {
    /// Bundle-level spec validation failed (duplicate names, cycle, unknown
    /// reference). Terminal; reported at the Bundle level since no per-resource
    /// processing order could be established.
    #[error("invalid bundle spec: {0}")]
    InvalidSpec(#[from] GraphError),
    /// The final write of the reconciled Bundle status failed. Adopted as the pass
    /// error and retriable
    #[error("failed to write bundle status: {0}")]
    BundleUpdateFailed(String),
    /// The surrounding context was cancelled or hit its deadline. Non-retriable:
    /// bubbles up without further side effects.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl BundleSyncError {
    /// Whether the controller harness should re-enqueue after this error.
    #[must_use]
    pub fn retriable(&self) -> bool {
        match self {
            BundleSyncError::InvalidSpec(_) | BundleSyncError::Cancelled => false,
            BundleSyncError::BundleUpdateFailed(_) => true,
        }
    }
}
