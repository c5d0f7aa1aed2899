//! Status & Conditions.
//!
//! Computes bundle-level and per-resource conditions from a pass's
//! [`ResourceOutcome`]s, preserving `lastTransitionTime`/`lastUpdateTime`
//! semantics, and produces the sorted `objects_to_delete` list and
//! plugin-status list.

use std::collections::{BTreeMap, BTreeSet};

use kube::core::GroupVersionKind;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::sync::ResourceOutcome;
use crate::traits::PluginRegistry;
use crate::types::{
    BundleSpec, BundleStatus, Condition, ConditionStatus, ConditionType, ObjectRef,
    PluginStatusEntry, PluginStatusValue, ResourceStatus,
};

/// Reason used for the `Blocked` condition when a resource is waiting on
/// dependencies.
pub const REASON_DEPENDENCIES_NOT_READY: &str = "DependenciesNotReady";
/// Reason used for a resource's `Error` condition when the failure is retriable.
pub const REASON_RETRIABLE_ERROR: &str = "RetriableError";
/// Reason used for a resource's `Error` condition when the failure is terminal.
pub const REASON_TERMINAL_ERROR: &str = "TerminalError";
/// Reason used for the Bundle's `Error` condition when every failing resource is
/// retriable.
pub const REASON_RETRIABLE: &str = "Retriable";
/// Reason used for the Bundle's `Error` condition when any failing resource is
/// terminal.
pub const REASON_TERMINAL: &str = "Terminal";
/// Reason used for a condition that holds with nothing further to say.
const REASON_AS_EXPECTED: &str = "AsExpected";
/// Reason used for conditions on a resource this pass never reached.
const REASON_NOT_PROCESSED: &str = "NotProcessed";

/// Recompute a Bundle's full status from this pass's per-resource outcomes.
///
/// `outcomes` need not cover every spec resource: any resource absent from it
/// (because the pass short-circuited before reaching it, or failed before the walk
/// began) gets the `*not processed*` row — all four conditions `Unknown` — per the
/// table below.
///
/// `sweep_error`, if present, is the first non-`NotFound`/`Conflict` error the
/// deletion sweep hit deleting an unowned object (§4.6 step 6: "any other
/// per-object error becomes the pass error, first-wins"); it folds into the
/// Bundle-level `Error`/`InProgress` conditions alongside any failing resources.
pub fn compute_status(
    spec: &BundleSpec,
    outcomes: &BTreeMap<String, ResourceOutcome>,
    sweep_error: Option<&SyncError>,
    previous: &BundleStatus,
    controlled_objects_to_delete: BTreeSet<ObjectRef>,
    plugin_registry: &dyn PluginRegistry,
    clock: &dyn Clock,
) -> BundleStatus {
    let mut resource_statuses = BTreeMap::new();
    for resource in &spec.resources {
        let previous_conditions = previous
            .resource_statuses
            .get(&resource.name)
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[]);
        let conditions = match outcomes.get(&resource.name) {
            Some(outcome) => resource_conditions(outcome, previous_conditions, clock),
            None => not_processed_conditions(previous_conditions, clock),
        };
        resource_statuses.insert(resource.name.clone(), ResourceStatus { conditions });
    }

    let conditions = bundle_conditions(spec, outcomes, sweep_error, &previous.conditions, clock);
    let plugin_statuses = plugin_statuses(spec, plugin_registry);
    let objects_to_delete = controlled_objects_to_delete.into_iter().collect();

    BundleStatus {
        conditions,
        resource_statuses,
        plugin_statuses,
        objects_to_delete,
    }
}

/// The four conditions (`Blocked`, `InProgress`, `Ready`, `Error`) for one
/// resource's outcome, per the table below.
fn resource_conditions(
    outcome: &ResourceOutcome,
    previous: &[Condition],
    clock: &dyn Clock,
) -> Vec<Condition> {
    let (blocked, in_progress, ready, error) = match outcome {
        ResourceOutcome::DependenciesNotReady(deps) => {
            let names: Vec<&str> = deps.iter().map(String::as_str).collect();
            let message = format!("waiting on: [{}]", names.join(", "));
            (
                (ConditionStatus::True, REASON_DEPENDENCIES_NOT_READY.to_string(), message),
                (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
                (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
                (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            )
        }
        ResourceOutcome::InProgress { .. } => (
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::True, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
        ),
        ResourceOutcome::Ready { .. } => (
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::True, REASON_AS_EXPECTED.to_string(), String::new()),
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
        ),
        ResourceOutcome::Error { err } => {
            let (reason, message) = if err.retriable() {
                (REASON_RETRIABLE_ERROR, err.to_string())
            } else {
                (REASON_TERMINAL_ERROR, err.to_string())
            };
            (
                (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
                (
                    if err.retriable() {
                        ConditionStatus::True
                    } else {
                        ConditionStatus::False
                    },
                    reason.to_string(),
                    message.clone(),
                ),
                (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
                (ConditionStatus::True, reason.to_string(), message),
            )
        }
    };

    vec![
        merge_condition(ConditionType::Blocked, blocked, previous, clock),
        merge_condition(ConditionType::InProgress, in_progress, previous, clock),
        merge_condition(ConditionType::Ready, ready, previous, clock),
        merge_condition(ConditionType::Error, error, previous, clock),
    ]
}

/// All four conditions `Unknown`, for a resource this pass never visited.
fn not_processed_conditions(previous: &[Condition], clock: &dyn Clock) -> Vec<Condition> {
    let unknown = (
        ConditionStatus::Unknown,
        REASON_NOT_PROCESSED.to_string(),
        String::new(),
    );
    vec![
        merge_condition(ConditionType::Blocked, unknown.clone(), previous, clock),
        merge_condition(ConditionType::InProgress, unknown.clone(), previous, clock),
        merge_condition(ConditionType::Ready, unknown.clone(), previous, clock),
        merge_condition(ConditionType::Error, unknown, previous, clock),
    ]
}

/// Apply the condition update rule: `last_transition_time` changes only when
/// `status` changes; `last_update_time` changes when any other field changes.
fn merge_condition(
    type_: ConditionType,
    (status, reason, message): (ConditionStatus, String, String),
    previous: &[Condition],
    clock: &dyn Clock,
) -> Condition {
    let now = clock.now();
    let prev = previous.iter().find(|c| c.type_ == type_);
    match prev {
        Some(prev) if prev.status == status => Condition {
            type_,
            status,
            last_transition_time: prev.last_transition_time.clone(),
            last_update_time: if prev.reason == reason && prev.message == message {
                prev.last_update_time.clone()
            } else {
                now
            },
            reason,
            message,
        },
        _ => Condition {
            type_,
            status,
            reason,
            message,
            last_transition_time: now.clone(),
            last_update_time: now,
        },
    }
}

/// Bundle-level `InProgress`/`Ready`/`Error` conditions.
///
/// `sweep_error` folds the deletion sweep's first-wins per-object error (if any)
/// in alongside any failing resources, per §4.6 step 6.
fn bundle_conditions(
    spec: &BundleSpec,
    outcomes: &BTreeMap<String, ResourceOutcome>,
    sweep_error: Option<&SyncError>,
    previous: &[Condition],
    clock: &dyn Clock,
) -> Vec<Condition> {
    let all_ready = spec
        .resources
        .iter()
        .all(|r| matches!(outcomes.get(&r.name), Some(ResourceOutcome::Ready { .. })));

    let mut failing: Vec<(&str, bool)> = spec
        .resources
        .iter()
        .filter_map(|r| match outcomes.get(&r.name) {
            Some(ResourceOutcome::Error { err }) => Some((r.name.as_str(), err.retriable())),
            _ => None,
        })
        .collect();
    if let Some(err) = sweep_error {
        failing.push(("deletion-sweep", err.retriable()));
    }

    let ready = (
        if all_ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        },
        REASON_AS_EXPECTED.to_string(),
        String::new(),
    );

    let (error, in_progress) = if failing.is_empty() {
        let error = (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new());
        let in_progress = (
            if all_ready {
                ConditionStatus::False
            } else {
                ConditionStatus::True
            },
            REASON_AS_EXPECTED.to_string(),
            String::new(),
        );
        (error, in_progress)
    } else {
        let all_retriable = failing.iter().all(|(_, retriable)| *retriable);
        let names: Vec<&str> = failing.iter().map(|(name, _)| *name).collect();
        let reason = if all_retriable {
            REASON_RETRIABLE
        } else {
            REASON_TERMINAL
        };
        let message = format!("error processing resource(s): [{}]", names.join(", "));
        let error = (ConditionStatus::True, reason.to_string(), message.clone());
        let in_progress = (
            if all_retriable {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            },
            reason.to_string(),
            message,
        );
        (error, in_progress)
    };

    vec![
        merge_condition(ConditionType::InProgress, in_progress, previous, clock),
        merge_condition(ConditionType::Ready, ready, previous, clock),
        merge_condition(ConditionType::Error, error, previous, clock),
    ]
}

/// Bundle-level conditions for a pass that failed before any resource could be
/// visited (e.g. a [`crate::error::GraphError`]): every resource is `Unknown`, and
/// the Bundle itself is a terminal `Error`.
pub fn status_for_fatal_spec_error(
    spec: &BundleSpec,
    previous: &BundleStatus,
    message: String,
    clock: &dyn Clock,
) -> BundleStatus {
    let mut resource_statuses = BTreeMap::new();
    for resource in &spec.resources {
        let previous_conditions = previous
            .resource_statuses
            .get(&resource.name)
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[]);
        resource_statuses.insert(
            resource.name.clone(),
            ResourceStatus {
                conditions: not_processed_conditions(previous_conditions, clock),
            },
        );
    }

    let conditions = vec![
        merge_condition(
            ConditionType::InProgress,
            (ConditionStatus::False, REASON_TERMINAL.to_string(), message.clone()),
            &previous.conditions,
            clock,
        ),
        merge_condition(
            ConditionType::Ready,
            (ConditionStatus::False, REASON_AS_EXPECTED.to_string(), String::new()),
            &previous.conditions,
            clock,
        ),
        merge_condition(
            ConditionType::Error,
            (ConditionStatus::True, REASON_TERMINAL.to_string(), message),
            &previous.conditions,
            clock,
        ),
    ];

    BundleStatus {
        conditions,
        resource_statuses,
        plugin_statuses: previous.plugin_statuses.clone(),
        objects_to_delete: previous.objects_to_delete.clone(),
    }
}

/// One entry per distinct `plugin.name` referenced in the spec, `Ok` if
/// registered else `NoSuchPlugin`, in order of first mention.
fn plugin_statuses(spec: &BundleSpec, registry: &dyn PluginRegistry) -> Vec<PluginStatusEntry> {
    let mut seen = BTreeSet::new();
    let mut entries = Vec::new();
    for resource in &spec.resources {
        let Some(plugin) = &resource.plugin else {
            continue;
        };
        if !seen.insert(plugin.name.clone()) {
            continue;
        }
        let entry = match registry.lookup(&plugin.name) {
            Some(p) => PluginStatusEntry {
                plugin_name: plugin.name.clone(),
                status: PluginStatusValue::Ok,
                gvk: Some(describe(&*p)),
            },
            None => PluginStatusEntry {
                plugin_name: plugin.name.clone(),
                status: PluginStatusValue::NoSuchPlugin,
                gvk: None,
            },
        };
        entries.push(entry);
    }
    entries
}

fn describe(plugin: &dyn crate::traits::Plugin) -> GroupVersionKind {
    plugin.describe()
}
