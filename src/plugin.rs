//! Plugin invocation.
//!
//! Gives `Plugin::process`'s informally-described `(spec, deps)` call shape a
//! concrete, documented contract, and isolates resource synchronization from a
//! misbehaving plugin: a lookup miss or a panic inside `process` is terminal for
//! the owning resource only, never for the pass.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use kube::core::DynamicObject;

use crate::error::SyncError;
use crate::traits::{Catalog, PluginRegistry};
use crate::types::{Bundle, PluginSpec};

/// Everything a plugin needs to synthesize a resource's desired object.
pub struct PluginContext<'a> {
    /// Namespace the synthesized object should live in.
    pub bundle_namespace: Option<&'a str>,
    /// Name of the owning Bundle, for plugins that want it in generated labels.
    pub bundle_name: &'a str,
    /// Name the synthesized object must carry (`PluginSpec::object_name`).
    pub object_name: &'a str,
    /// The opaque, plugin-specific configuration from the spec.
    pub spec: &'a serde_json::Value,
    /// Live objects of this resource's already-Ready dependencies, keyed by
    /// resource name — the plugin equivalent of the Reference Resolver's inputs.
    pub dependencies: &'a BTreeMap<String, DynamicObject>,
    /// The service-catalog collaborator, opaque to the core, available for
    /// plugins that provision catalog-backed resources.
    pub catalog: Option<&'a Arc<dyn Catalog>>,
}

/// Look up and invoke the plugin named in `plugin_spec`, isolating lookup misses
/// and panics as a [`SyncError`] scoped to `resource_name` alone.
pub fn materialize(
    registry: &dyn PluginRegistry,
    bundle: &Bundle,
    plugin_spec: &PluginSpec,
    dependencies: &BTreeMap<String, DynamicObject>,
    catalog: Option<&Arc<dyn Catalog>>,
) -> Result<DynamicObject, SyncError> {
    let plugin = registry
        .lookup(&plugin_spec.name)
        .ok_or_else(|| SyncError::NoSuchPlugin(plugin_spec.name.clone()))?;

    let ctx = PluginContext {
        bundle_namespace: bundle.namespace(),
        bundle_name: bundle.name(),
        object_name: &plugin_spec.object_name,
        spec: &plugin_spec.spec,
        dependencies,
        catalog,
    };

    match catch_unwind(AssertUnwindSafe(|| plugin.process(&ctx))) {
        Ok(Ok(obj)) => Ok(obj),
        Ok(Err(message)) => Err(SyncError::PluginFailed {
            plugin: plugin_spec.name.clone(),
            message,
        }),
        Err(_) => Err(SyncError::PluginFailed {
            plugin: plugin_spec.name.clone(),
            message: "plugin panicked".to_string(),
        }),
    }
}
