use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::resource::{ForProvider, Managed, ResourceKind};

/// A Jenkins build agent
pub type Node = Managed<NodeParameters>;

fn default_executors() -> u32 {
    1
}

/// Configurable fields of a Node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeParameters {
    pub name: String,

    #[serde(default = "default_executors")]
    pub num_executors: u32,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "remoteFS", default)]
    pub remote_fs: String,

    /// Space separated label expression
    #[serde(default)]
    pub label: String,
}

/// Sort and de-duplicate a space separated label list
pub fn normalize_labels(labels: &str) -> String {
    let mut parts: Vec<&str> = labels.split_whitespace().collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join(" ")
}

impl ForProvider for NodeParameters {
    const KIND: ResourceKind = ResourceKind::Node;

    fn name(&self) -> &str {
        &self.name
    }

    fn configuration(&self) -> Value {
        json!({
            "name": self.name,
            "numExecutors": self.num_executors,
            "description": self.description,
            "remoteFS": self.remote_fs,
            "label": self.label,
        })
    }

    /// Jenkins only reports description, executor count and labels for an agent, so drift is
    /// detected on those. Labels may be reported as `labels` (observed) or `label` (desired).
    fn is_up_to_date(&self, observed: &Value) -> bool {
        let description = observed
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let executors = observed.get("numExecutors").and_then(Value::as_u64);
        let labels = observed
            .get("labels")
            .or_else(|| observed.get("label"))
            .and_then(Value::as_str)
            .map(normalize_labels)
            .unwrap_or_default();

        description == self.description
            && executors == Some(u64::from(self.num_executors))
            && labels == normalize_labels(&self.label)
    }
}
