//! Ready Checker.
//!
//! Determines whether a live object is *Ready*: built-in rules for well-known
//! workload kinds, falling back to an annotation-driven path/value check for
//! everything else. `Unknown` is treated as `NotReady` for scheduling purposes but
//! is not itself an error.

use kube::core::DynamicObject;
use serde_json::Value;

use crate::resolver::evaluate_path;

/// The annotation naming the JSON path to inspect for annotation-driven readiness.
pub const READY_PATH_ANNOTATION: &str = "bundle.example.com/ready-path";
/// The annotation naming the literal value that path must equal to be Ready.
pub const READY_VALUE_ANNOTATION: &str = "bundle.example.com/ready-value";

/// The three-state readiness verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Dependents may consume this object.
    Ready,
    /// The object exists but has not yet converged.
    NotReady,
    /// Readiness could not be evaluated (no built-in rule, no annotation hints).
    Unknown,
}

impl ReadyState {
    /// `Unknown` behaves like `NotReady` for scheduling purposes.
    #[must_use]
    pub fn blocks_dependents(self) -> bool {
        !matches!(self, ReadyState::Ready)
    }
}

/// Evaluate readiness for a live object.
pub fn is_ready(obj: &DynamicObject) -> ReadyState {
    match builtin_kind(obj) {
        Some(BuiltinKind::ReplicaCountWorkload) => builtin_replica_workload_ready(obj),
        None => annotation_ready(obj),
    }
}

enum BuiltinKind {
    /// Deployment, StatefulSet, DaemonSet, ReplicaSet: all expose
    /// `observedGeneration` plus either an `Available` condition or a
    /// ready/desired replica pair.
    ReplicaCountWorkload,
}

fn builtin_kind(obj: &DynamicObject) -> Option<BuiltinKind> {
    let kind = obj.types.as_ref()?.kind.as_str();
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" => {
            Some(BuiltinKind::ReplicaCountWorkload)
        }
        _ => None,
    }
}

fn builtin_replica_workload_ready(obj: &DynamicObject) -> ReadyState {
    let generation = obj.metadata.generation;
    let observed = obj
        .data
        .pointer("/status/observedGeneration")
        .and_then(Value::as_i64);
    if let (Some(generation), Some(observed)) = (generation, observed) {
        if generation != observed {
            return ReadyState::NotReady;
        }
    }

    if let Some(conditions) = obj.data.pointer("/status/conditions").and_then(Value::as_array) {
        let available = conditions
            .iter()
            .find(|c| c.get("type").and_then(Value::as_str) == Some("Available"));
        if let Some(condition) = available {
            return match condition.get("status").and_then(Value::as_str) {
                Some("True") => ReadyState::Ready,
                Some("False") => ReadyState::NotReady,
                _ => ReadyState::Unknown,
            };
        }
    }

    let ready_replicas = obj.data.pointer("/status/readyReplicas").and_then(Value::as_i64);
    let desired_replicas = obj
        .data
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .or_else(|| obj.data.pointer("/status/replicas").and_then(Value::as_i64));
    match (ready_replicas, desired_replicas) {
        (Some(ready), Some(desired)) if ready >= desired => ReadyState::Ready,
        (Some(_), Some(_)) => ReadyState::NotReady,
        _ => ReadyState::Unknown,
    }
}

fn annotation_ready(obj: &DynamicObject) -> ReadyState {
    let Some(annotations) = &obj.metadata.annotations else {
        return ReadyState::Unknown;
    };
    let (Some(path), Some(expected)) = (
        annotations.get(READY_PATH_ANNOTATION),
        annotations.get(READY_VALUE_ANNOTATION),
    ) else {
        return ReadyState::Unknown;
    };

    match evaluate_path(obj, path) {
        Some(Value::String(actual)) if &actual == expected => ReadyState::Ready,
        Some(Value::String(_)) => ReadyState::NotReady,
        Some(other) if other.to_string() == *expected => ReadyState::Ready,
        Some(_) => ReadyState::NotReady,
        None => ReadyState::Unknown,
    }
}
