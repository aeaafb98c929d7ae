use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::specialist::VerificationResult;

/// Prefix marking a step input as a symbolic reference to an upstream
/// step's payload, e.g. `"FROM_search_specs"`.
pub const REF_PREFIX: &str = "FROM_";

// ─── Ordinals ────────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SafetyLevel {
    #[default]
    Normal,
    High,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Trust {
    Low,
    Medium,
    High,
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Step kind. Closed set so executor dispatch is exhaustively checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    ToolCall { tool_name: String },
    SanityCheck,
    SpecialistCall,
    Finalization,
}

/// One node in a plan. Inputs may hold literals or `FROM_<id>` references;
/// every reference must name a step listed in `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub kind: StepKind,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
}

impl PlanStep {
    pub fn tool_call(id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::ToolCall {
                tool_name: tool_name.into(),
            },
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn sanity_check(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::SanityCheck,
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn specialist_call(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::SpecialistCall,
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn finalization(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StepKind::Finalization,
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn depends(mut self, ids: &[&str]) -> Self {
        self.depends_on.extend(ids.iter().map(ToString::to_string));
        self
    }

    /// If `value` is a `FROM_<id>` reference, the referenced step id.
    pub fn reference_target(value: &Value) -> Option<&str> {
        value.as_str().and_then(|s| s.strip_prefix(REF_PREFIX))
    }
}

/// Immutable-after-creation execution plan for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: Uuid,
    pub request: String,
    pub intent: String,
    pub complexity: Complexity,
    pub safety_level: SafetyLevel,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(request: impl Into<String>, intent: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            request: request.into(),
            intent: intent.into(),
            complexity: Complexity::Simple,
            safety_level: SafetyLevel::Normal,
            steps,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety_level = safety;
        self
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    /// True when any step dispatches through the tool registry.
    pub fn has_tool_calls(&self) -> bool {
        self.steps
            .iter()
            .any(|step| matches!(step.kind, StepKind::ToolCall { .. }))
    }

    /// Compact summary handed to the presenter.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "intent": self.intent,
            "complexity": self.complexity.to_string(),
            "safety_level": self.safety_level.to_string(),
            "step_count": self.steps.len(),
        })
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StepStatus {
    Ok,
    Error,
    Skipped,
}

/// A source descriptor attached to a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub label: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "Citation::default_trust")]
    pub trust: Trust,
}

impl Citation {
    fn default_trust() -> Trust {
        Trust::Medium
    }

    pub fn new(label: impl Into<String>, url: impl Into<String>, trust: Trust) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            trust,
        }
    }
}

/// Outcome of a single executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub step_id: String,
    pub status: StepStatus,
    pub payload: Value,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Monetary amount attributed to this step; zero for free tools.
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ToolResult {
    pub fn ok(step_id: impl Into<String>, payload: Value) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Ok,
            payload,
            citations: Vec::new(),
            cost: 0.0,
            elapsed_ms: 0,
        }
    }

    pub fn error(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Error,
            payload: serde_json::json!({ "error": message.into() }),
            citations: Vec::new(),
            cost: 0.0,
            elapsed_ms: 0,
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            payload: serde_json::json!({ "skipped": reason.into() }),
            citations: Vec::new(),
            cost: 0.0,
            elapsed_ms: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }

    /// Human-readable error message, when the step failed.
    pub fn error_message(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }
}

/// Aggregated output of one plan execution, keyed by step id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub tool_results: BTreeMap<String, ToolResult>,
    pub specialist_results: BTreeMap<String, VerificationResult>,
}

impl ExecutionResult {
    /// Steps that failed or were skipped, for degraded-data reporting.
    pub fn degraded_steps(&self) -> Vec<&ToolResult> {
        self.tool_results
            .values()
            .filter(|result| result.status != StepStatus::Ok)
            .collect()
    }
}
