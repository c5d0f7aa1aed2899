//! The Bundle data model.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

/// A named, namespaced document listing desired cluster resources and their
/// inter-references, plus the status this core maintains for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    /// Standard Kubernetes object metadata: carries `name`, `namespace`, `uid`,
    /// `finalizers`, and `deletion_timestamp`, all of which the core reads.
    pub metadata: ObjectMeta,
    /// The desired resource graph.
    pub spec: BundleSpec,
    /// Last-computed status. Defaulted on first sight of a Bundle.
    #[serde(default)]
    pub status: BundleStatus,
}

impl Bundle {
    /// The stable unique identifier used as the controller-owner reference stamped
    /// on every object this Bundle materializes. Immutable for the Bundle's lifetime.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    /// `true` once the apiserver has recorded a deletion request for this Bundle.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Name this Bundle is known by, defaulting to the empty string if unset (which
    /// only happens for not-yet-persisted objects and should never reach the core).
    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace this Bundle lives in.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }
}

/// Ordered list of resources a Bundle wants to exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleSpec {
    /// The resource entries, in spec order. Order here is the order plugin statuses
    /// are reported in; it is unrelated to the topological processing order.
    pub resources: Vec<ResourceSpec>,
}

/// One entry of a Bundle spec: either a fully inlined object, or a plugin invocation
/// that synthesizes one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Name unique within the Bundle. Duplicates are an `InvalidSpec` error.
    pub name: String,
    /// Declared dependencies on other resources in this Bundle.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// A fully-formed desired object (GVK, name, metadata, and the rest inlined in
    /// the spec). Mutually exclusive with `plugin`.
    #[serde(default)]
    pub object: Option<DynamicObject>,
    /// A plugin invocation that synthesizes the desired object. Mutually exclusive
    /// with `object`.
    #[serde(default)]
    pub plugin: Option<PluginSpec>,
}

impl ResourceSpec {
    /// a resource naming both `object` and `plugin`, or
    /// neither, is a terminal `InvalidSpec` error rather than an implementation
    /// choosing one.
    pub(crate) fn materialization_kind(&self) -> Result<MaterializationKind<'_>, &'static str> {
        match (&self.object, &self.plugin) {
            (Some(obj), None) => Ok(MaterializationKind::Object(obj)),
            (None, Some(plugin)) => Ok(MaterializationKind::Plugin(plugin)),
            (Some(_), Some(_)) => Err("resource declares both `object` and `plugin`"),
            (None, None) => Err("resource declares neither `object` nor `plugin`"),
        }
    }
}

/// Which of the two mutually exclusive materialization paths a resource takes.
pub(crate) enum MaterializationKind<'a> {
    /// The inlined object, before reference resolution.
    Object(&'a DynamicObject),
    /// The plugin invocation.
    Plugin(&'a PluginSpec),
}

/// A plugin invocation: plugin name, the name the synthesized object should carry,
/// and an opaque spec the plugin alone understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Name the plugin is registered under in the `PluginRegistry`.
    pub name: String,
    /// Name the synthesized object should carry.
    pub object_name: String,
    /// Opaque configuration passed through to `Plugin::process` unmodified.
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// A declaration that a consumer resource derives part of its spec from a producer
/// resource, via a path expression over the producer's *live* object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    /// Name of the placeholder token this reference's value is substituted for.
    pub name: String,
    /// Name of the producer resource within this Bundle.
    pub resource: String,
    /// Path-style selector evaluated against the producer's live object.
    pub path: String,
    /// Optional extraction modifier name (e.g. `"bindSecret"` vs. the default raw
    /// extraction). Kept as a raw string rather than a closed enum: an unrecognized
    /// modifier must surface as a per-resource terminal error at resolve time,
    /// not as a Bundle-level spec parse failure.
    #[serde(default)]
    pub modifier: Option<String>,
    /// An example value used only for documentation/dry-run purposes; never
    /// consulted by the resolver.
    #[serde(default)]
    pub example: Option<serde_json::Value>,
}

/// Status this core maintains for a Bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleStatus {
    /// Bundle-level conditions: `InProgress`, `Ready`, `Error`.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Per-resource conditions, keyed by resource name.
    #[serde(default)]
    pub resource_statuses: BTreeMap<String, ResourceStatus>,
    /// One entry per distinct plugin named in the spec, in spec order.
    #[serde(default)]
    pub plugin_statuses: Vec<PluginStatusEntry>,
    /// Objects controlled-by this Bundle but absent from its spec, sorted by
    /// `(group, version, kind, name)`.
    #[serde(default)]
    pub objects_to_delete: Vec<ObjectRef>,
}

/// Per-resource condition set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// `Blocked`, `InProgress`, `Ready`, `Error` conditions for this resource.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A single status condition, following Kubernetes condition conventions with an
/// explicit `last_update_time` in addition to `last_transition_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Which condition this is.
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// Current status.
    pub status: ConditionStatus,
    /// Machine-readable reason for the current status.
    pub reason: String,
    /// Human-readable message elaborating on `reason`.
    pub message: String,
    /// Last time `status` changed. Stable across passes that leave `status`
    /// unchanged.
    pub last_transition_time: Time,
    /// Last time any field other than `last_transition_time` changed.
    pub last_update_time: Time,
}

/// The four condition types a resource or Bundle can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    /// A resource is waiting on one or more dependencies.
    Blocked,
    /// A resource's object has been reconciled but is not yet Ready.
    InProgress,
    /// A resource's object is Ready, or a Bundle's resources are all Ready.
    Ready,
    /// A resource or the Bundle encountered an error.
    Error,
}

/// Tri-state condition status, matching Kubernetes' `ConditionStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition could not be evaluated (e.g. the resource was never visited).
    Unknown,
}

/// One entry of a Bundle's plugin-status list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginStatusEntry {
    /// The plugin's registered name.
    pub plugin_name: String,
    /// Whether the plugin was found in the registry.
    pub status: PluginStatusValue,
    /// The plugin's declared GVK, present only when `status` is `Ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gvk: Option<GroupVersionKind>,
}

/// Plugin lookup outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginStatusValue {
    /// The plugin is registered.
    Ok,
    /// No plugin is registered under the requested name.
    NoSuchPlugin,
}

/// `(group, version, kind, name)`, the key objects-to-delete are sorted and
/// deduplicated by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// API group, empty string for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Kind.
    pub kind: String,
    /// Object name.
    pub name: String,
}

impl ObjectRef {
    /// Build an `ObjectRef` from a materialized dynamic object's own GVK and name.
    ///
    /// Returns `None` if the object is missing `apiVersion`/`kind`/`name`, which
    /// should not happen for anything that has passed through Spec Check.
    #[must_use]
    pub fn from_dynamic(obj: &DynamicObject) -> Option<Self> {
        let types = obj.types.as_ref()?;
        let gvk = GroupVersionKind::try_from(types).ok()?;
        let name = obj.metadata.name.clone()?;
        Some(Self {
            group: gvk.group,
            version: gvk.version,
            kind: gvk.kind,
            name,
        })
    }
}
