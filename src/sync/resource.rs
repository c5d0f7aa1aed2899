//! Resource Sync: reconcile a single resource against its current
//! dependency state, producing a [`ResourceOutcome`].
//!
//! Call order matters: a resource is only visited once every resource it
//! references has already produced an outcome this pass (Bundle Sync walks the
//! resource graph's topological order to guarantee this).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::core::{DynamicObject, GroupVersionKind};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::error::SyncError;
use crate::plugin;
use crate::ready::{self, ReadyState};
use crate::resolver;
use crate::spec_check;
use crate::sync::ResourceOutcome;
use crate::traits::{Catalog, PluginRegistry, SmartClient, Store};
use crate::types::{Bundle, MaterializationKind, ResourceSpec};

/// The GVK this core stamps onto every owner reference it creates. Bundle
/// carries no `TypeMeta` of its own (it is this crate's input type, not a wire
/// object), so the value is fixed here rather than read off `bundle`.
const BUNDLE_API_VERSION: &str = "bundle.example.com/v1alpha1";
const BUNDLE_KIND: &str = "Bundle";

/// Reconcile one resource.
///
/// `outcomes_so_far` must already hold an outcome for every resource named in
/// `resource.references` (Bundle Sync's topological walk guarantees this); any
/// reference whose producer is missing or not `Ready` yields
/// [`ResourceOutcome::DependenciesNotReady`] rather than an error.
pub async fn sync_resource(
    resource: &ResourceSpec,
    bundle: &Bundle,
    outcomes_so_far: &BTreeMap<String, ResourceOutcome>,
    registry: &dyn PluginRegistry,
    catalog: Option<&Arc<dyn Catalog>>,
    store: &dyn Store,
    client: &dyn SmartClient,
) -> ResourceOutcome {
    let mut not_ready = BTreeSet::new();
    let mut live_producers = BTreeMap::new();
    for reference in &resource.references {
        match outcomes_so_far.get(&reference.resource) {
            Some(outcome) if outcome.is_ready() => {
                let live = outcome
                    .live_object()
                    .expect("a Ready outcome always carries a live object")
                    .clone();
                live_producers.insert(reference.resource.clone(), live);
            }
            _ => {
                not_ready.insert(reference.resource.clone());
            }
        }
    }
    if !not_ready.is_empty() {
        return ResourceOutcome::DependenciesNotReady(not_ready);
    }

    let desired = match materialize(resource, bundle, registry, catalog, &live_producers) {
        Ok(obj) => obj,
        Err(err) => return ResourceOutcome::Error { err },
    };

    let Some(gvk) = desired
        .types
        .as_ref()
        .and_then(|tm| GroupVersionKind::try_from(tm).ok())
    else {
        return ResourceOutcome::Error {
            err: SyncError::InvalidSpec(format!(
                "resource {} materialized without a valid apiVersion/kind",
                resource.name
            )),
        };
    };
    let Some(name) = desired.metadata.name.clone() else {
        return ResourceOutcome::Error {
            err: SyncError::InvalidSpec(format!("resource {} materialized without a name", resource.name)),
        };
    };
    let namespace = desired.metadata.namespace.clone();

    let actual = match store.get(&gvk, namespace.as_deref(), &name).await {
        Ok(actual) => actual,
        Err(err) => return ResourceOutcome::Error { err },
    };

    let write_result = match actual {
        None => client.create(&gvk, namespace.as_deref(), &desired).await,
        Some(actual) => {
            let controller_uid = bundle.uid().unwrap_or_default();
            match spec_check::compare(&desired, &actual, controller_uid) {
                Ok(check) if check.update_needed => {
                    let resource_version =
                        check.to_write.metadata.resource_version.clone().unwrap_or_default();
                    client
                        .update(&gvk, namespace.as_deref(), &check.to_write, &resource_version)
                        .await
                }
                Ok(check) => Ok(check.to_write),
                Err(err) => Err(err),
            }
        }
    };

    let actual = match write_result {
        Ok(obj) => obj,
        Err(err) => return ResourceOutcome::Error { err },
    };

    match ready::is_ready(&actual) {
        ReadyState::Ready => ResourceOutcome::Ready { desired, actual },
        ReadyState::NotReady | ReadyState::Unknown => ResourceOutcome::InProgress { actual },
    }
}

/// Produce the post-reference-resolution desired object, stamped with this
/// Bundle's controller owner reference and defaulted into the Bundle's namespace.
fn materialize(
    resource: &ResourceSpec,
    bundle: &Bundle,
    registry: &dyn PluginRegistry,
    catalog: Option<&Arc<dyn Catalog>>,
    live_producers: &BTreeMap<String, DynamicObject>,
) -> Result<DynamicObject, SyncError> {
    let kind = resource
        .materialization_kind()
        .map_err(|msg| SyncError::InvalidSpec(msg.to_string()))?;

    let mut obj = match kind {
        MaterializationKind::Plugin(plugin_spec) => {
            plugin::materialize(registry, bundle, plugin_spec, live_producers, catalog)?
        }
        MaterializationKind::Object(object) => {
            let value = serde_json::to_value(object)
                .map_err(|e| SyncError::InvalidSpec(format!("resource {}: {e}", resource.name)))?;
            let resolved = resolver::resolve_references(resource, &value, live_producers)?;
            serde_json::from_value(resolved)
                .map_err(|e| SyncError::InvalidSpec(format!("resource {}: {e}", resource.name)))?
        }
    };

    stamp_owner_reference(&mut obj, bundle);
    if obj.metadata.namespace.is_none() {
        obj.metadata.namespace = bundle.namespace().map(str::to_string);
    }
    Ok(obj)
}

/// Stamp (idempotently) this Bundle's controller owner reference onto `obj`.
fn stamp_owner_reference(obj: &mut DynamicObject, bundle: &Bundle) {
    let Some(uid) = bundle.uid() else {
        return;
    };
    let owner = OwnerReference {
        api_version: BUNDLE_API_VERSION.to_string(),
        kind: BUNDLE_KIND.to_string(),
        name: bundle.name().to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };
    let refs = obj.metadata.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner);
    }
}
