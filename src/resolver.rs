//! Reference Resolver.
//!
//! Evaluates each of a consumer resource's declared [`Reference`]s against its
//! already-processed dependencies' *live* objects (never their desired specs: the
//! value may be server-assigned) and substitutes the results into the consumer's
//! desired object wherever a placeholder token names that reference.

use std::collections::BTreeMap;
use std::str::FromStr;

use jsonpath_rust::JsonPathInst;
use kube::core::DynamicObject;
use serde_json::Value;

use crate::error::ResolveError;
use crate::types::{Reference, ResourceSpec};

/// Modifier name for plain value extraction; also the default when `modifier` is
/// unset.
const MODIFIER_RAW: &str = "raw";
/// Modifier name for producing a `secretKeyRef`-shaped substitution instead of the
/// plaintext value.
const MODIFIER_BIND_SECRET: &str = "bindSecret";

/// Substitute every reference a resource declares into its desired object.
///
/// `live_producers` must contain a live object for every resource named in
/// `resource.references`; it is the caller's job (Resource Sync) to have already
/// confirmed those producers are Ready before calling this.
pub fn resolve_references(
    resource: &ResourceSpec,
    desired: &Value,
    live_producers: &BTreeMap<String, DynamicObject>,
) -> Result<Value, ResolveError> {
    let mut substitutions = BTreeMap::new();
    for reference in &resource.references {
        let producer = live_producers
            .get(&reference.resource)
            .expect("caller must supply a live object for every ready producer");
        let raw_value = evaluate_path(producer, &reference.path).ok_or_else(|| {
            ResolveError::MissingPath {
                resource: resource.name.clone(),
                reference: reference.name.clone(),
                path: reference.path.clone(),
            }
        })?;
        let value = apply_modifier(resource, reference, producer, raw_value)?;
        substitutions.insert(token(&reference.name), value);
    }
    Ok(substitute(desired, &substitutions))
}

/// The placeholder token a reference's resolved value is substituted for.
fn token(reference_name: &str) -> String {
    format!("!{{{reference_name}}}")
}

fn apply_modifier(
    resource: &ResourceSpec,
    reference: &Reference,
    producer: &DynamicObject,
    raw_value: Value,
) -> Result<Value, ResolveError> {
    match reference.modifier.as_deref().unwrap_or(MODIFIER_RAW) {
        MODIFIER_RAW => Ok(raw_value),
        MODIFIER_BIND_SECRET => {
            let key = reference
                .path
                .rsplit(['.', '/'])
                .next()
                .unwrap_or(&reference.path);
            Ok(serde_json::json!({
                "secretKeyRef": {
                    "name": producer.metadata.name,
                    "key": key,
                }
            }))
        }
        _ => Err(ResolveError::UnknownModifier {
            resource: resource.name.clone(),
            reference: reference.name.clone(),
        }),
    }
}

/// Evaluate a path-style selector against an object's live state.
///
/// `path` is a dot-separated selector (`.status.loadBalancer.ingress[0].hostname`
/// or `status.loadBalancer...`, the leading dot is optional); it is evaluated as a
/// JSONPath expression rooted at `$`.
pub(crate) fn evaluate_path(producer: &DynamicObject, path: &str) -> Option<Value> {
    let root = serde_json::to_value(producer).ok()?;
    let expr = if let Some(stripped) = path.strip_prefix('$') {
        format!("${stripped}")
    } else if let Some(stripped) = path.strip_prefix('.') {
        format!("$.{stripped}")
    } else {
        format!("$.{path}")
    };
    let query = JsonPathInst::from_str(&expr).ok()?;
    let matches = query.find_slice(&root, Default::default());
    matches.first().map(|m| (**m).clone())
}

/// Recursively walk a JSON value, replacing placeholder tokens.
///
/// A string value that is *exactly* one token is replaced by the resolved value
/// verbatim (so a `bindSecret` substitution can inject a whole object in place of
/// a plain field). A string value that merely *contains* tokens has each one
/// interpolated as text.
fn substitute(value: &Value, substitutions: &BTreeMap<String, Value>) -> Value {
    match value {
        Value::String(s) => {
            if let Some(replacement) = substitutions.get(s) {
                replacement.clone()
            } else {
                let mut out = s.clone();
                for (tok, replacement) in substitutions {
                    if out.contains(tok.as_str()) {
                        let as_text = match replacement {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        out = out.replace(tok.as_str(), &as_text);
                    }
                }
                Value::String(out)
            }
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| substitute(v, substitutions)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, substitutions)))
                .collect(),
        ),
        other => other.clone(),
    }
}
