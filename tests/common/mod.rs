//! Shared in-memory collaborators for the scenario tests.
//!
//! Mirrors a tiny slice of a real cluster: one shared object list backing both
//! [`Store`] reads and [`SmartClient`] writes, so a test can create a resource
//! through one trait and immediately observe it through the other, the way a
//! real informer cache would.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bundle_reconciler::{BundleSyncError, SyncError};
use bundle_reconciler::traits::{BundleClient, DeleteOutcome, SmartClient, Store};
use bundle_reconciler::Bundle;
use kube::api::PropagationPolicy;
use kube::core::{DynamicObject, GroupVersionKind};

fn gvk_of(obj: &DynamicObject) -> Option<GroupVersionKind> {
    obj.types.as_ref().and_then(|tm| GroupVersionKind::try_from(tm).ok())
}

fn matches(obj: &DynamicObject, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> bool {
    gvk_of(obj).as_ref() == Some(gvk) && obj.metadata.namespace.as_deref() == namespace && obj.metadata.name.as_deref() == Some(name)
}

/// A fake cluster: one shared list of objects, with a counter for deterministic
/// UID/resource-version assignment and a set of names whose next `update` call
/// should fail with a version conflict.
#[derive(Default)]
pub struct ClusterState {
    objects: Arc<Mutex<Vec<DynamicObject>>>,
    next_uid: Arc<Mutex<u64>>,
    conflict_once: Arc<Mutex<HashSet<String>>>,
    fail_delete_once: Arc<Mutex<HashSet<String>>>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cluster with a pre-existing object (e.g. one a prior pass of
    /// this Bundle already created, or a foreign collision).
    pub fn seed(&self, obj: DynamicObject) {
        self.objects.lock().unwrap().push(obj);
    }

    /// The next call to `update` naming `name` fails with `SyncError::Conflict`.
    pub fn fail_next_update_with_conflict(&self, name: &str) {
        self.conflict_once.lock().unwrap().insert(name.to_string());
    }

    /// The next call to `delete` naming `name` fails with `SyncError::Validation`
    /// (a genuine per-object error, as opposed to `NotFound`/`Conflict`) instead
    /// of removing the object.
    pub fn fail_next_delete_with_error(&self, name: &str) {
        self.fail_delete_once.lock().unwrap().insert(name.to_string());
    }

    pub fn names_present(&self) -> BTreeSet<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter_map(|o| o.metadata.name.clone())
            .collect()
    }

    fn fresh_uid(&self) -> String {
        let mut counter = self.next_uid.lock().unwrap();
        *counter += 1;
        format!("uid-{counter}")
    }
}

#[async_trait]
impl Store for ClusterState {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, SyncError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| matches(o, gvk, namespace, name))
            .cloned())
    }

    async fn objects_controlled_by(
        &self,
        namespace: Option<&str>,
        bundle_uid: &str,
    ) -> Result<Vec<DynamicObject>, SyncError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.metadata.namespace.as_deref() == namespace)
            .filter(|o| {
                o.metadata
                    .owner_references
                    .iter()
                    .flatten()
                    .any(|r| r.controller == Some(true) && r.uid == bundle_uid)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SmartClient for ClusterState {
    async fn create(
        &self,
        _gvk: &GroupVersionKind,
        namespace: Option<&str>,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, SyncError> {
        let mut created = obj.clone();
        created.metadata.namespace = namespace.map(str::to_string);
        created.metadata.uid = Some(self.fresh_uid());
        created.metadata.resource_version = Some("1".to_string());
        created.metadata.generation = Some(1);
        self.objects.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        _gvk: &GroupVersionKind,
        _namespace: Option<&str>,
        obj: &DynamicObject,
        _resource_version: &str,
    ) -> Result<DynamicObject, SyncError> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        if self.conflict_once.lock().unwrap().remove(&name) {
            return Err(SyncError::Conflict(name));
        }
        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.iter_mut().find(|o| o.metadata.uid == obj.metadata.uid) else {
            return Err(SyncError::NotFoundOnUpdate(name));
        };
        *existing = obj.clone();
        Ok(existing.clone())
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        uid: &str,
        _propagation: PropagationPolicy,
    ) -> Result<DeleteOutcome, SyncError> {
        if self.fail_delete_once.lock().unwrap().remove(name) {
            return Err(SyncError::Validation(name.to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        let before = objects.len();
        objects.retain(|o| !(matches(o, gvk, namespace, name) && o.metadata.uid.as_deref() == Some(uid)));
        if objects.len() < before {
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }
}

/// Records the last persisted `Bundle`, standing in for the status subresource
/// write.
#[derive(Default)]
pub struct RecordingBundleClient {
    pub persisted: Mutex<Vec<Bundle>>,
}

#[async_trait]
impl BundleClient for RecordingBundleClient {
    async fn update(&self, bundle: Bundle) -> Result<Bundle, BundleSyncError> {
        self.persisted.lock().unwrap().push(bundle.clone());
        Ok(bundle)
    }
}

/// A plugin registry with nothing registered; the scenarios below only
/// exercise `object`-materialized resources.
pub struct EmptyRegistry;

impl bundle_reconciler::traits::PluginRegistry for EmptyRegistry {
    fn lookup(&self, _name: &str) -> Option<Arc<dyn bundle_reconciler::traits::Plugin>> {
        None
    }
}

/// Build a ConfigMap-shaped object (an "unknown kind" to the Ready Checker)
/// whose readiness is governed purely by the ready-path/ready-value
/// annotations, so tests can control readiness without depending on built-in
/// workload semantics.
pub fn ready_gated_object(name: &str, phase: &str) -> DynamicObject {
    use bundle_reconciler::ready::{READY_PATH_ANNOTATION, READY_VALUE_ANNOTATION};
    use kube::core::TypeMeta;
    use std::collections::BTreeMap;

    let mut obj = DynamicObject::new(name, &Default::default());
    obj.types = Some(TypeMeta {
        api_version: "v1".into(),
        kind: "ConfigMap".into(),
    });
    let mut annotations = BTreeMap::new();
    annotations.insert(READY_PATH_ANNOTATION.to_string(), ".status.phase".to_string());
    annotations.insert(READY_VALUE_ANNOTATION.to_string(), "Ready".to_string());
    obj.metadata.annotations = Some(annotations);
    obj.data = serde_json::json!({ "status": { "phase": phase } });
    obj
}
