// ABOUTME: Execution context threaded through a task subtree
// ABOUTME: Holds exported context data and subtree-scoped expression arguments

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ambient state for one task instance.
///
/// `data` is the exported context visible to later siblings; `arguments`
/// are expression bindings (loop item, loop index, caught error) that only
/// flow downwards into the subtree. Both are cloned before being handed to a
/// child, so a child never aliases its parent's copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            data: empty_object(),
            arguments: Map::new(),
        }
    }
}

impl ExecutionContext {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            arguments: Map::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Arguments as seen by expressions: the scoped bindings plus `context` and `workflow`.
    pub fn evaluation_arguments(&self, workflow: &Value) -> Map<String, Value> {
        let mut arguments = self.arguments.clone();
        arguments.insert("context".to_string(), self.data.clone());
        arguments.insert("workflow".to_string(), workflow.clone());
        arguments
    }
}

/// Copies back the keys a branch changed relative to the snapshot it started from.
pub fn merge_branch_data(target: &mut Value, snapshot: &Value, branch: &Value) {
    if branch == snapshot {
        return;
    }
    match (target, branch) {
        (Value::Object(target), Value::Object(branch)) => {
            let snapshot = snapshot.as_object();
            for (key, value) in branch {
                let unchanged = snapshot
                    .and_then(|snapshot| snapshot.get(key))
                    .map(|previous| previous == value)
                    .unwrap_or(false);
                if !unchanged {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, branch) => *target = branch.clone(),
    }
}
