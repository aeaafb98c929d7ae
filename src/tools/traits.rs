use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::plan::types::Citation;

/// Description of a tool for planning and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// What one tool invocation produced.
///
/// Expected failure modes (network error, no results, bad arguments) come
/// back as `ok = false` with a human-readable error — never as an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub payload: Value,
    pub error: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Monetary amount this invocation cost; zero for free tools.
    #[serde(default)]
    pub cost: f64,
}

impl ToolOutcome {
    pub fn ok(payload: Value) -> Self {
        Self {
            ok: true,
            payload,
            error: None,
            citations: Vec::new(),
            cost: 0.0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            ok: false,
            payload: serde_json::json!({ "error": message }),
            error: Some(message),
            citations: Vec::new(),
            cost: 0.0,
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }
}

/// Core tool trait — implement for any capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in plan steps).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON schema for inputs.
    fn input_schema(&self) -> Value;

    /// Invoke with resolved inputs. Must be safe to run under a timeout.
    async fn invoke(&self, inputs: &BTreeMap<String, Value>) -> anyhow::Result<ToolOutcome>;

    /// Get the full spec for planning.
    fn describe(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes inputs"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn invoke(&self, inputs: &BTreeMap<String, Value>) -> anyhow::Result<ToolOutcome> {
            Ok(ToolOutcome::ok(json!({ "echo": inputs })))
        }
    }

    #[test]
    fn describe_carries_name_and_schema() {
        let spec = EchoTool.describe();
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.input_schema["type"], json!("object"));
    }

    #[test]
    fn error_outcome_mirrors_message_into_payload() {
        let outcome = ToolOutcome::error("no results");
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("no results"));
        assert_eq!(outcome.payload["error"], json!("no results"));
    }

    #[test]
    fn outcome_builders_attach_cost_and_citations() {
        let outcome = ToolOutcome::ok(json!({}))
            .with_cost(0.002)
            .with_citations(vec![Citation::new(
                "datasheet",
                "https://example.com",
                crate::plan::types::Trust::High,
            )]);
        assert!((outcome.cost - 0.002).abs() < f64::EPSILON);
        assert_eq!(outcome.citations.len(), 1);
    }
}
