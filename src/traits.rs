//! Consumed interfaces: the collaborators the controller harness
//! supplies and the core treats as opaque. None of these are implemented in this
//! crate beyond the in-memory test doubles behind `#[cfg(test)]`; production
//! implementations (a typed "smart client" resolving GVKs to REST clients, an
//! informer-cache-backed store, plugin discovery, the service catalog) live
//! outside the core.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::PropagationPolicy;
use kube::core::{DynamicObject, GroupVersionKind};

use crate::error::{BundleSyncError, SyncError};
use crate::plugin::PluginContext;
use crate::types::Bundle;

/// Resolves a `(group, version, kind)` to a REST client and performs mutations
/// against it. All mutating calls the core issues carry UID preconditions;
/// deletions always request foreground propagation.
#[async_trait]
pub trait SmartClient: Send + Sync {
    /// Create `obj` in `namespace`.
    async fn create(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, SyncError>;

    /// Update `obj`, failing with [`SyncError::Conflict`] if `resource_version`
    /// no longer matches the live object.
    async fn update(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        obj: &DynamicObject,
        resource_version: &str,
    ) -> Result<DynamicObject, SyncError>;

    /// Delete the named object, preconditioned on `uid`, with foreground
    /// propagation.
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        uid: &str,
        propagation: PropagationPolicy,
    ) -> Result<DeleteOutcome, SyncError>;
}

/// Outcome of a delete call. `NotFound` and `Conflict` are treated as success by
/// Bundle Sync's deletion sweep: the object is already gone, or was
/// replaced and will be swept on a later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The delete was accepted (object removed, or foreground deletion started).
    Deleted,
    /// The object no longer existed.
    NotFound,
    /// The UID precondition did not match the live object.
    Conflict,
}

/// Read access to the informer cache. Read-only and shared across workers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a single object by GVK/namespace/name.
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, SyncError>;

    /// All objects in `namespace` carrying a controller owner reference to
    /// `bundle_uid`, across all kinds. The source of truth for the deletion sweep;
    /// must be re-evaluated every pass since UIDs can change when an
    /// object is deleted and recreated.
    async fn objects_controlled_by(
        &self,
        namespace: Option<&str>,
        bundle_uid: &str,
    ) -> Result<Vec<DynamicObject>, SyncError>;
}

/// Writes the Bundle's status subresource: the only persistent output of the core.
#[async_trait]
pub trait BundleClient: Send + Sync {
    /// Persist `bundle`, returning the server's version of it (with a bumped
    /// resource version) or a conflict/transport error.
    async fn update(&self, bundle: Bundle) -> Result<Bundle, BundleSyncError>;
}

/// A registered transformer that takes an opaque spec plus resolved dependencies
/// and emits a fully formed cluster object.
pub trait Plugin: Send + Sync {
    /// The GVK this plugin's synthesized objects carry.
    fn describe(&self) -> GroupVersionKind;

    /// Synthesize the desired object. Implementations should be pure functions of
    /// `ctx`; any panic is caught by the caller and reported as
    /// [`SyncError::PluginFailed`] for the owning resource only.
    fn process(&self, ctx: &PluginContext) -> Result<DynamicObject, String>;
}

/// Looks up a plugin by its registered name. Immutable after startup.
pub trait PluginRegistry: Send + Sync {
    /// Find the plugin registered under `name`, if any.
    fn lookup(&self, name: &str) -> Option<Arc<dyn Plugin>>;
}

/// Service-catalog classes/plans lookup. Opaque to the core: consumed by plugins
/// via `PluginContext`, never inspected directly here.
pub trait Catalog: Send + Sync {}
