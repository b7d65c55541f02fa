use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Output field a branching node writes its chosen clause index into.
pub const SELECTED_FIELD: &str = "selected";

/// Conditional routing of a branching node: clause `i` leaves through port
/// `ports[i]`, no match leaves through `default_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSchema {
    pub ports: Vec<String>,
    pub default_port: String,
}

impl BranchSchema {
    /// Ports named `true`, `true_1`, ... for each clause and `false` for the fallthrough.
    pub fn for_clauses(count: usize) -> Self {
        let ports = (0..count)
            .map(|i| {
                if i == 0 {
                    "true".to_string()
                } else {
                    format!("true_{}", i)
                }
            })
            .collect();
        Self {
            ports,
            default_port: "false".to_string(),
        }
    }

    pub fn has_port(&self, port: &str) -> bool {
        self.default_port == port || self.ports.iter().any(|p| p == port)
    }

    /// Port chosen by a completed branching node's output.
    pub fn resolve_port(&self, output: &HashMap<String, Value>) -> &str {
        output
            .get(SELECTED_FIELD)
            .and_then(Value::as_u64)
            .and_then(|i| self.ports.get(i as usize))
            .map(String::as_str)
            .unwrap_or(self.default_port.as_str())
    }
}
