//! Bundle Sync: the top-level entry point of one reconciliation
//! pass. Guards the finalizer lifecycle, walks the resource graph in
//! topological order driving each resource through Resource Sync,
//! sweeps objects that no longer belong once every resource is Ready, folds
//! everything into a status update, and persists it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kube::api::PropagationPolicy;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::error::{BundleSyncError, SyncError};
use crate::finalizer;
use crate::graph;
use crate::status;
use crate::sync::resource::sync_resource;
use crate::sync::ResourceOutcome;
use crate::traits::{BundleClient, Catalog, PluginRegistry, SmartClient, Store};
use crate::types::{Bundle, ObjectRef};

/// What happened to a Bundle over the course of one pass.
#[derive(Debug)]
pub enum BundleSyncOutcome {
    /// The pass ran (fully or partially) and its status was persisted.
    /// Re-enqueue iff the contained Bundle's own conditions say to.
    Updated(Bundle),
    /// The Bundle's own write lost a concurrent-update race. No status was
    /// persisted; re-enqueue immediately without backoff.
    Conflict,
    /// The pass failed before any write could be attempted, or the status
    /// write itself failed.
    Failed(BundleSyncError),
}

/// Run one reconciliation pass over `bundle`.
#[instrument(skip_all, fields(bundle.name = bundle.name(), bundle.namespace = bundle.namespace()))]
pub async fn sync_bundle(
    mut bundle: Bundle,
    registry: &dyn PluginRegistry,
    catalog: Option<&Arc<dyn Catalog>>,
    store: &dyn Store,
    smart_client: &dyn SmartClient,
    bundle_client: &dyn BundleClient,
    clock: &dyn Clock,
) -> BundleSyncOutcome {
    if bundle.is_deleting() {
        return run_deletion(bundle, store, smart_client, bundle_client, clock).await;
    }

    if !finalizer::has_delete_resources_finalizer(&bundle) {
        debug!("staging delete-resources finalizer on first sight of bundle");
        finalizer::stage_add_finalizer(&mut bundle);
        return persist(bundle, bundle_client).await;
    }

    let order = match graph::topological_order(&bundle.spec) {
        Ok(order) => order,
        Err(err) => {
            warn!(error = %err, "bundle spec rejected before any resource could be processed");
            let message = err.to_string();
            bundle.status =
                status::status_for_fatal_spec_error(&bundle.spec, &bundle.status, message, clock);
            return persist(bundle, bundle_client).await;
        }
    };

    let resources_by_name: BTreeMap<&str, _> = bundle
        .spec
        .resources
        .iter()
        .map(|r| (r.name.as_str(), r))
        .collect();

    let mut outcomes: BTreeMap<String, ResourceOutcome> = BTreeMap::new();
    let mut conflicted = false;
    for name in &order {
        let resource = resources_by_name
            .get(name.as_str())
            .expect("topological_order only emits names present in the spec");
        let outcome = sync_resource(
            resource,
            &bundle,
            &outcomes,
            registry,
            catalog,
            store,
            smart_client,
        )
        .await;

        let is_conflict = matches!(&outcome, ResourceOutcome::Error { err } if err.is_conflict());
        outcomes.insert(name.clone(), outcome);
        if is_conflict {
            debug!(resource = %name, "write conflict; short-circuiting the rest of this pass");
            conflicted = true;
            break;
        }
    }

    let all_ready = !conflicted
        && bundle
            .spec
            .resources
            .iter()
            .all(|r| outcomes.get(&r.name).is_some_and(ResourceOutcome::is_ready));

    let (objects_to_delete, sweep_error) = if all_ready {
        sweep(&bundle, &outcomes, store, smart_client).await
    } else {
        (bundle.status.objects_to_delete.iter().cloned().collect(), None)
    };

    bundle.status = status::compute_status(
        &bundle.spec,
        &outcomes,
        sweep_error.as_ref(),
        &bundle.status,
        objects_to_delete,
        registry,
        clock,
    );

    if conflicted {
        return BundleSyncOutcome::Conflict;
    }

    persist(bundle, bundle_client).await
}

/// Delete every controlled object not named by the spec, once every resource
/// in it is confirmed Ready. Returns the objects identified as unowned,
/// whether or not their delete call has completed, so status accurately
/// reflects what is still being swept, plus the first non-`NotFound`/`Conflict`
/// delete error encountered (per §4.6 step 6, this becomes the pass error,
/// first-wins; every identified object is still attempted regardless).
async fn sweep(
    bundle: &Bundle,
    outcomes: &BTreeMap<String, ResourceOutcome>,
    store: &dyn Store,
    client: &dyn SmartClient,
) -> (BTreeSet<ObjectRef>, Option<SyncError>) {
    let Some(uid) = bundle.uid() else {
        return (BTreeSet::new(), None);
    };

    let owned: BTreeSet<ObjectRef> = outcomes
        .values()
        .filter_map(ResourceOutcome::live_object)
        .filter_map(ObjectRef::from_dynamic)
        .collect();

    let controlled = match store.objects_controlled_by(bundle.namespace(), uid).await {
        Ok(objects) => objects,
        Err(err) => {
            warn!(error = %err, "could not list controlled objects; skipping deletion sweep this pass");
            return (BTreeSet::new(), None);
        }
    };

    let mut to_delete = BTreeSet::new();
    let mut first_error = None;
    for obj in &controlled {
        let Some(obj_ref) = ObjectRef::from_dynamic(obj) else {
            continue;
        };
        if owned.contains(&obj_ref) {
            continue;
        }
        to_delete.insert(obj_ref.clone());
        if let Err(err) = delete_one(obj, &obj_ref, client).await {
            warn!(object = %obj_ref.name, error = %err, "sweep delete failed; will retry next pass");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    (to_delete, first_error)
}

async fn delete_one(obj: &DynamicObject, obj_ref: &ObjectRef, client: &dyn SmartClient) -> Result<(), SyncError> {
    let gvk = GroupVersionKind::gvk(&obj_ref.group, &obj_ref.version, &obj_ref.kind);
    let object_uid = obj.metadata.uid.clone().unwrap_or_default();
    client
        .delete(
            &gvk,
            obj.metadata.namespace.as_deref(),
            &obj_ref.name,
            &object_uid,
            PropagationPolicy::Foreground,
        )
        .await
        .map(|_outcome| ())
}

/// Run the deletion path: cascade-delete controlled objects (unless the
/// platform's own foreground GC is already doing so), then lift this core's
/// finalizer once the cascade has been attempted.
async fn run_deletion(
    mut bundle: Bundle,
    store: &dyn Store,
    smart_client: &dyn SmartClient,
    bundle_client: &dyn BundleClient,
    clock: &dyn Clock,
) -> BundleSyncOutcome {
    if !finalizer::has_delete_resources_finalizer(&bundle) {
        return persist(bundle, bundle_client).await;
    }

    if !finalizer::has_foreground_finalizer(&bundle) {
        if let Err(err) = cascade_delete(&bundle, store, smart_client).await {
            warn!(error = %err, "deletion cascade failed; finalizer retained for retry");
            let message = err.to_string();
            bundle.status =
                status::status_for_fatal_spec_error(&bundle.spec, &bundle.status, message, clock);
            return persist(bundle, bundle_client).await;
        }
    }

    finalizer::stage_remove_finalizer(&mut bundle);
    persist(bundle, bundle_client).await
}

async fn cascade_delete(bundle: &Bundle, store: &dyn Store, client: &dyn SmartClient) -> Result<(), SyncError> {
    let uid = bundle.uid().unwrap_or_default();
    let controlled = store.objects_controlled_by(bundle.namespace(), uid).await?;
    for obj in &controlled {
        let Some(obj_ref) = ObjectRef::from_dynamic(obj) else {
            continue;
        };
        let gvk = GroupVersionKind::gvk(&obj_ref.group, &obj_ref.version, &obj_ref.kind);
        let object_uid = obj.metadata.uid.clone().unwrap_or_default();
        client
            .delete(
                &gvk,
                obj.metadata.namespace.as_deref(),
                &obj_ref.name,
                &object_uid,
                PropagationPolicy::Foreground,
            )
            .await?;
    }
    Ok(())
}

async fn persist(bundle: Bundle, bundle_client: &dyn BundleClient) -> BundleSyncOutcome {
    match bundle_client.update(bundle).await {
        Ok(updated) => BundleSyncOutcome::Updated(updated),
        Err(err) if matches!(err, BundleSyncError::BundleUpdateFailed(_)) => {
            BundleSyncOutcome::Conflict
        }
        Err(err) => BundleSyncOutcome::Failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DeleteOutcome, Plugin};
    use crate::types::{BundleSpec, ResourceSpec};
    use async_trait::async_trait;
    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use kube::core::{DynamicObject, TypeMeta};
    use std::sync::Mutex;

    use crate::clock::FixedClock;

    struct EmptyRegistry;
    impl PluginRegistry for EmptyRegistry {
        fn lookup(&self, _name: &str) -> Option<Arc<dyn Plugin>> {
            None
        }
    }

    struct FakeStore {
        objects: Vec<DynamicObject>,
    }

    #[async_trait]
    impl Store for FakeStore {
        async fn get(
            &self,
            gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            name: &str,
        ) -> Result<Option<DynamicObject>, SyncError> {
            Ok(self
                .objects
                .iter()
                .find(|o| {
                    o.metadata.name.as_deref() == Some(name)
                        && o.types
                            .as_ref()
                            .and_then(|t| GroupVersionKind::try_from(t).ok())
                            .as_ref()
                            == Some(gvk)
                })
                .cloned())
        }

        async fn objects_controlled_by(
            &self,
            _namespace: Option<&str>,
            _bundle_uid: &str,
        ) -> Result<Vec<DynamicObject>, SyncError> {
            Ok(self.objects.clone())
        }
    }

    struct RecordingClient {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SmartClient for RecordingClient {
        async fn create(
            &self,
            _gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, SyncError> {
            let mut created = obj.clone();
            created.metadata.generation = Some(1);
            created.data = serde_json::json!({
                "status": { "observedGeneration": 1, "readyReplicas": 1 },
                "spec": { "replicas": 1 },
            });
            Ok(created)
        }

        async fn update(
            &self,
            _gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            obj: &DynamicObject,
            _resource_version: &str,
        ) -> Result<DynamicObject, SyncError> {
            Ok(obj.clone())
        }

        async fn delete(
            &self,
            _gvk: &GroupVersionKind,
            _namespace: Option<&str>,
            name: &str,
            _uid: &str,
            _propagation: PropagationPolicy,
        ) -> Result<DeleteOutcome, SyncError> {
            self.deleted.lock().unwrap().push(name.to_string());
            Ok(DeleteOutcome::Deleted)
        }
    }

    struct RecordingBundleClient {
        persisted: Mutex<Vec<Bundle>>,
    }

    #[async_trait]
    impl BundleClient for RecordingBundleClient {
        async fn update(&self, bundle: Bundle) -> Result<Bundle, BundleSyncError> {
            self.persisted.lock().unwrap().push(bundle.clone());
            Ok(bundle)
        }
    }

    fn deployment_resource(name: &str) -> ResourceSpec {
        let mut obj = DynamicObject::new(name, &Default::default());
        obj.types = Some(TypeMeta {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
        });
        obj.data = serde_json::json!({ "spec": { "replicas": 1 } });
        ResourceSpec {
            name: name.to_string(),
            references: vec![],
            object: Some(obj),
            plugin: None,
        }
    }

    fn bundle(resources: Vec<ResourceSpec>) -> Bundle {
        Bundle {
            metadata: ObjectMeta {
                name: Some("demo".into()),
                namespace: Some("ns".into()),
                uid: Some("bundle-uid".into()),
                finalizers: Some(vec![finalizer::DELETE_RESOURCES_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: BundleSpec { resources },
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn first_pass_only_adds_finalizer() {
        let mut b = bundle(vec![deployment_resource("app")]);
        b.metadata.finalizers = None;
        let store = FakeStore { objects: vec![] };
        let smart_client = RecordingClient {
            deleted: Mutex::new(vec![]),
        };
        let bundle_client = RecordingBundleClient {
            persisted: Mutex::new(vec![]),
        };
        let clock = FixedClock(Time(Utc::now()));

        let outcome = sync_bundle(
            b,
            &EmptyRegistry,
            None,
            &store,
            &smart_client,
            &bundle_client,
            &clock,
        )
        .await;

        match outcome {
            BundleSyncOutcome::Updated(b) => {
                assert!(finalizer::has_delete_resources_finalizer(&b));
                assert!(b.status.conditions.is_empty());
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_ready_pass_sweeps_unowned_objects() {
        let b = bundle(vec![deployment_resource("app")]);
        let mut orphan = DynamicObject::new("orphan", &Default::default());
        orphan.types = Some(TypeMeta {
            api_version: "v1".into(),
            kind: "ConfigMap".into(),
        });
        orphan.metadata.uid = Some("orphan-uid".into());
        let store = FakeStore {
            objects: vec![orphan],
        };
        let smart_client = RecordingClient {
            deleted: Mutex::new(vec![]),
        };
        let bundle_client = RecordingBundleClient {
            persisted: Mutex::new(vec![]),
        };
        let clock = FixedClock(Time(Utc::now()));

        let outcome = sync_bundle(
            b,
            &EmptyRegistry,
            None,
            &store,
            &smart_client,
            &bundle_client,
            &clock,
        )
        .await;

        match outcome {
            BundleSyncOutcome::Updated(b) => {
                assert_eq!(b.status.objects_to_delete.len(), 1);
                assert_eq!(b.status.objects_to_delete[0].name, "orphan");
            }
            other => panic!("expected Updated, got {other:?}"),
        }
        assert_eq!(smart_client.deleted.lock().unwrap().as_slice(), ["orphan"]);
    }

    #[tokio::test]
    async fn invalid_spec_short_circuits_with_terminal_status() {
        let mut a = deployment_resource("A");
        a.references = vec![crate::types::Reference {
            name: "x".into(),
            resource: "ghost".into(),
            path: ".status.x".into(),
            modifier: None,
            example: None,
        }];
        let b = bundle(vec![a]);
        let store = FakeStore { objects: vec![] };
        let smart_client = RecordingClient {
            deleted: Mutex::new(vec![]),
        };
        let bundle_client = RecordingBundleClient {
            persisted: Mutex::new(vec![]),
        };
        let clock = FixedClock(Time(Utc::now()));

        let outcome = sync_bundle(
            b,
            &EmptyRegistry,
            None,
            &store,
            &smart_client,
            &bundle_client,
            &clock,
        )
        .await;

        match outcome {
            BundleSyncOutcome::Updated(b) => {
                let error = b
                    .status
                    .conditions
                    .iter()
                    .find(|c| c.type_ == crate::types::ConditionType::Error)
                    .unwrap();
                assert_eq!(error.status, crate::types::ConditionStatus::True);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_bundle_cascades_then_lifts_finalizer() {
        let mut b = bundle(vec![]);
        b.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let mut owned = DynamicObject::new("app", &Default::default());
        owned.types = Some(TypeMeta {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
        });
        owned.metadata.uid = Some("app-uid".into());
        let store = FakeStore {
            objects: vec![owned],
        };
        let smart_client = RecordingClient {
            deleted: Mutex::new(vec![]),
        };
        let bundle_client = RecordingBundleClient {
            persisted: Mutex::new(vec![]),
        };
        let clock = FixedClock(Time(Utc::now()));

        let outcome = sync_bundle(
            b,
            &EmptyRegistry,
            None,
            &store,
            &smart_client,
            &bundle_client,
            &clock,
        )
        .await;

        match outcome {
            BundleSyncOutcome::Updated(b) => {
                assert!(!finalizer::has_delete_resources_finalizer(&b));
            }
            other => panic!("expected Updated, got {other:?}"),
        }
        assert_eq!(smart_client.deleted.lock().unwrap().as_slice(), ["app"]);
    }
}
