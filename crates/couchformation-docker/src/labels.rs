//! Container and network labels
//!
//! Nodes are labelled with their place in the project hierarchy so they
//! can be found again without consulting the document store.

use couchformation_cloud::ResourceSpec;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Marks resources created by this tool
pub const MANAGED_LABEL: &str = "couch-formation.managed";

const LABEL_PREFIX: &str = "couch-formation";

/// Spec keys copied onto a node container as labels
const NODE_KEYS: [&str; 4] = ["project", "service", "group", "number"];

/// Labels for a node container built from its spec
pub fn node_labels(spec: &ResourceSpec) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    for key in NODE_KEYS {
        if let Some(value) = spec.config.get(key) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            labels.insert(format!("{}.{}", LABEL_PREFIX, key), text);
        }
    }
    labels
}

/// Labels as a JSON object, the shape `ListFilter` matches against
pub fn labels_value(labels: HashMap<String, String>) -> Value {
    Value::Object(
        labels
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}
