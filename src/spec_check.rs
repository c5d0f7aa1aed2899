//! Spec Check.
//!
//! Normalizes a desired object relative to its observed live counterpart: fields
//! set in `desired` override; fields unset in `desired` but present in `actual` are
//! preserved, so that server-applied defaults and cluster-managed metadata (the
//! resource version, the UID, injected finalizers, owner references other than this
//! Bundle's controller ref, server-assigned `status`) are never clobbered.

use std::collections::BTreeMap;

use kube::core::DynamicObject;
use serde_json::Value;

use crate::error::SyncError;

/// The result of comparing a desired object against its live counterpart.
#[derive(Debug, Clone)]
pub struct SpecCheckResult {
    /// The object that should be written back, if `update_needed`.
    pub to_write: DynamicObject,
    /// Whether a write is required at all.
    pub update_needed: bool,
}

/// Compare `desired` (post reference-resolution) against `actual` (observed from
/// the cluster), honoring the merge policy above.
///
/// Fails with [`SyncError::ForeignObject`] if `actual` does not carry a controller
/// owner reference pointing at `controller_uid`: such an object is never mutated.
pub fn compare(
    desired: &DynamicObject,
    actual: &DynamicObject,
    controller_uid: &str,
) -> Result<SpecCheckResult, SyncError> {
    if !controlled_by(actual, controller_uid) {
        let name = actual
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string());
        return Err(SyncError::ForeignObject(name));
    }

    let mut to_write = actual.clone();
    to_write.data = merge(&actual.data, &desired.data);
    to_write.metadata.labels = merge_maps(&actual.metadata.labels, &desired.metadata.labels);
    to_write.metadata.annotations =
        merge_maps(&actual.metadata.annotations, &desired.metadata.annotations);

    let update_needed = to_write.data != actual.data
        || to_write.metadata.labels != actual.metadata.labels
        || to_write.metadata.annotations != actual.metadata.annotations;

    Ok(SpecCheckResult {
        to_write,
        update_needed,
    })
}

/// `true` iff `obj` names `controller_uid` as its *controller* owner reference.
fn controlled_by(obj: &DynamicObject, controller_uid: &str) -> bool {
    obj.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.controller == Some(true) && owner.uid == controller_uid)
}

/// Recursively overlay `desired` onto `actual`: object keys in `desired` override
/// (recursively, if both sides are objects at that key); keys only in `actual` are
/// preserved; arrays and scalars in `desired` replace `actual` wholesale, since
/// there is no generic way to merge list elements without type-specific knowledge.
fn merge(actual: &Value, desired: &Value) -> Value {
    match (actual, desired) {
        (Value::Object(actual_map), Value::Object(desired_map)) => {
            let mut merged = actual_map.clone();
            for (key, desired_value) in desired_map {
                let merged_value = match actual_map.get(key) {
                    Some(actual_value) => merge(actual_value, desired_value),
                    None => desired_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, desired) => desired.clone(),
    }
}

fn merge_maps(
    actual: &Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (actual, desired) {
        (None, None) => None,
        (Some(actual), None) => Some(actual.clone()),
        (None, Some(desired)) => Some(desired.clone()),
        (Some(actual), Some(desired)) => {
            let mut merged = actual.clone();
            merged.extend(desired.clone());
            Some(merged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn owned_object(controller_uid: &str) -> DynamicObject {
        let mut obj = DynamicObject::new("thing", &Default::default());
        obj.metadata = ObjectMeta {
            name: Some("thing".into()),
            resource_version: Some("42".into()),
            uid: Some("live-uid".into()),
            owner_references: Some(vec![OwnerReference {
                controller: Some(true),
                uid: controller_uid.into(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        obj.data = serde_json::json!({ "status": { "ready": true }, "spec": { "replicas": 1 } });
        obj
    }

    #[test]
    fn preserves_server_assigned_fields_and_detects_no_update_needed() {
        let actual = owned_object("bundle-uid");
        let mut desired = actual.clone();
        desired.metadata.resource_version = None;
        desired.metadata.uid = None;
        desired.data = serde_json::json!({ "spec": { "replicas": 1 } });

        let result = compare(&desired, &actual, "bundle-uid").unwrap();
        assert!(!result.update_needed);
        assert_json_eq!(
            result.to_write.data,
            serde_json::json!({ "status": { "ready": true }, "spec": { "replicas": 1 } })
        );
        assert_eq!(result.to_write.metadata.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn detects_update_needed_when_desired_diverges() {
        let actual = owned_object("bundle-uid");
        let mut desired = actual.clone();
        desired.data = serde_json::json!({ "spec": { "replicas": 3 } });

        let result = compare(&desired, &actual, "bundle-uid").unwrap();
        assert!(result.update_needed);
        assert_eq!(result.to_write.data["spec"]["replicas"], 3);
        assert_eq!(result.to_write.data["status"]["ready"], true);
    }

    #[test]
    fn foreign_object_is_rejected() {
        let actual = owned_object("someone-elses-uid");
        let desired = actual.clone();
        let err = compare(&desired, &actual, "bundle-uid").unwrap_err();
        assert!(matches!(err, SyncError::ForeignObject(_)));
        assert!(!err.retriable());
    }
}
