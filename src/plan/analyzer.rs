use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::budget::CostGovernor;
use crate::connector::{Connector, GenerationRequest};
use crate::parse::{ParseStrategy, default_strategies, recover_object};
use crate::plan::types::{Complexity, Plan, PlanStep, SafetyLevel, StepKind};
use crate::tools::ToolSpec;

// ─── Context ─────────────────────────────────────────────────────────────────

/// Optional surrounding context for planning, e.g. recent conversation
/// turns to resolve follow-up questions.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerContext {
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Clone)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

impl AnalyzerContext {
    pub fn with_turn(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.history.push(HistoryTurn {
            role: role.into(),
            content: content.into(),
        });
        self
    }
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

const ANALYZER_SYSTEM_PROMPT: &str = "\
You are a planning brain. Analyze the user's request and produce a \
structured JSON plan describing what needs to be done.

You must NOT answer the request yourself and you must NOT do arithmetic \
yourself. All math routes through the compute tool; all current \
information routes through a retrieval tool.

Respond with a VALID JSON object only. No prose, no markdown fences.

Required structure:
{
  \"intent\": \"short label for what the user wants\",
  \"complexity\": \"simple | moderate | complex\",
  \"safety_level\": \"normal | high\",
  \"steps\": [
    {
      \"id\": \"unique_step_id\",
      \"type\": \"tool_call | sanity_check | specialist_call | finalization\",
      \"tool\": \"tool_name or null\",
      \"inputs\": {},
      \"depends_on\": [\"earlier_step_ids\"]
    }
  ]
}

Rules:
- type \"tool_call\" requires a valid \"tool\" name from the list below.
- compute steps use inputs {\"task\": \"...\", \"variables\": {...}}.
- Add a sanity_check step after every calculation, depending on it.
- End every plan with a finalization step depending on everything above.
- Inputs may reference an earlier step's output as \"FROM_<step_id>\"; the \
referenced step must appear in depends_on.
- If the request asks to verify, show work, or double-check, set \
safety_level to \"high\".
";

// ─── Analyzer ────────────────────────────────────────────────────────────────

/// Turns request text into a typed step graph.
///
/// The underlying generation is free text, so parsing is defended in
/// layers; when nothing structured survives, a rule-based plan built from
/// keyword detection keeps the pipeline moving. `analyze` never errors.
pub struct PlanAnalyzer {
    connector: Arc<dyn Connector>,
    /// Flat per-call price of the planning tier; zero for local models.
    connector_price: f64,
    governor: Arc<CostGovernor>,
    tool_specs: Vec<ToolSpec>,
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl PlanAnalyzer {
    pub fn new(
        connector: Arc<dyn Connector>,
        connector_price: f64,
        governor: Arc<CostGovernor>,
        tool_specs: Vec<ToolSpec>,
    ) -> Self {
        Self {
            connector,
            connector_price,
            governor,
            tool_specs,
            strategies: default_strategies(),
        }
    }

    pub async fn analyze(&self, request_text: &str, context: &AnalyzerContext) -> Plan {
        let generation = GenerationRequest::new(self.build_user_content(request_text, context))
            .with_system(self.build_system_prompt())
            .with_temperature(0.3)
            .with_max_tokens(1500);

        let raw = match self.connector.generate(&generation).await {
            Ok(raw) => {
                if self.connector_price > 0.0 {
                    self.governor.charge(self.connector_price);
                }
                raw
            }
            Err(err) => {
                tracing::warn!("Plan generation failed, using rule-based fallback: {err}");
                return self.fallback_plan(request_text);
            }
        };

        let Some((value, strategy)) = recover_object(&raw, &self.strategies) else {
            tracing::warn!("Plan output had no recoverable structure, using rule-based fallback");
            return self.fallback_plan(request_text);
        };
        if strategy != "direct" {
            tracing::debug!(strategy, "Recovered plan JSON via fallback layer");
        }

        let plan = plan_from_value(&value, request_text);
        tracing::info!(
            intent = plan.intent.as_str(),
            complexity = %plan.complexity,
            steps = plan.steps.len(),
            "Generated plan"
        );
        plan
    }

    fn build_system_prompt(&self) -> String {
        let mut tool_lines = String::new();
        for spec in &self.tool_specs {
            tool_lines.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        format!("{ANALYZER_SYSTEM_PROMPT}\nAvailable tools:\n{tool_lines}")
    }

    fn build_user_content(&self, request_text: &str, context: &AnalyzerContext) -> String {
        if context.history.is_empty() {
            return request_text.to_string();
        }
        let mut content = String::from("Recent conversation:\n");
        for turn in context.history.iter().rev().take(3).rev() {
            let trimmed: String = turn.content.chars().take(200).collect();
            content.push_str(&format!("{}: {}\n", turn.role, trimmed));
        }
        content.push_str(&format!("\nCurrent request: {request_text}"));
        content
    }

    /// Rule-based plan from keyword detection. Conservative but always
    /// usable: at minimum a finalization step.
    pub fn fallback_plan(&self, request_text: &str) -> Plan {
        let profile = QueryProfile::detect(request_text);
        let mut steps = Vec::new();

        if profile.needs_computation {
            steps.push(
                PlanStep::tool_call("compute_1", "compute")
                    .with_input("task", json!("generic_math"))
                    .with_input("variables", json!({ "query": request_text })),
            );
            steps.push(PlanStep::sanity_check("sanity_1").depends(&["compute_1"]));
        }

        if profile.needs_retrieval {
            steps.push(
                PlanStep::tool_call("search_1", "web_search")
                    .with_input("query", json!(request_text)),
            );
        }

        let upstream: Vec<String> = steps.iter().map(|step| step.id.clone()).collect();
        let mut finalize = PlanStep::finalization("finalize");
        finalize.depends_on = upstream.into_iter().collect::<BTreeSet<_>>();
        steps.push(finalize);

        tracing::info!(
            computation = profile.needs_computation,
            retrieval = profile.needs_retrieval,
            "Built rule-based fallback plan"
        );

        Plan::new(request_text, "answer_request", steps)
            .with_complexity(Complexity::Simple)
            .with_safety(profile.safety_level)
    }
}

// ─── Normalization ───────────────────────────────────────────────────────────

/// Shape a recovered JSON object into a valid `Plan`, defaulting and
/// repairing as needed: unknown kinds become tool calls, missing ids are
/// synthesized, dangling dependencies and references are dropped.
fn plan_from_value(value: &Value, request_text: &str) -> Plan {
    let intent = value
        .get("intent")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let complexity = value
        .get("complexity")
        .and_then(Value::as_str)
        .and_then(|raw| Complexity::from_str(raw).ok())
        .unwrap_or(Complexity::Moderate);

    let safety_level = parse_safety(value.get("safety_level").and_then(Value::as_str));

    let raw_steps = value
        .get("steps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw_step) in raw_steps.iter().enumerate() {
        if let Some(step) = step_from_value(raw_step, index) {
            steps.push(step);
        }
    }

    let known_ids: BTreeSet<String> = steps.iter().map(|step| step.id.clone()).collect();
    for step in &mut steps {
        step.depends_on.retain(|dep| known_ids.contains(dep));
        repair_references(step, &known_ids);
    }

    Plan::new(request_text, intent, steps)
        .with_complexity(complexity)
        .with_safety(safety_level)
}

fn parse_safety(raw: Option<&str>) -> SafetyLevel {
    match raw {
        // The stricter upstream "critical" level folds into high.
        Some(raw) if raw.eq_ignore_ascii_case("critical") => SafetyLevel::High,
        Some(raw) => SafetyLevel::from_str(raw).unwrap_or(SafetyLevel::Normal),
        None => SafetyLevel::Normal,
    }
}

fn step_from_value(raw: &Value, index: usize) -> Option<PlanStep> {
    let object = raw.as_object()?;

    let id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map_or_else(|| format!("step_{index}"), ToString::to_string);

    let kind_name = object.get("type").and_then(Value::as_str).unwrap_or("tool_call");
    let kind = match kind_name {
        "sanity_check" => StepKind::SanityCheck,
        // "model_call" is the legacy name for a specialist consultation.
        "specialist_call" | "model_call" => StepKind::SpecialistCall,
        "finalization" => StepKind::Finalization,
        _ => StepKind::ToolCall {
            tool_name: object
                .get("tool")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        },
    };

    let mut step = PlanStep {
        id,
        kind,
        inputs: object
            .get("inputs")
            .or_else(|| object.get("input"))
            .and_then(Value::as_object)
            .map(|map| map.clone().into_iter().collect())
            .unwrap_or_default(),
        depends_on: object
            .get("depends_on")
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    };
    // Self-dependencies are always generation noise.
    let own_id = step.id.clone();
    step.depends_on.remove(&own_id);
    Some(step)
}

/// Enforce the reference invariant on generated steps: a reference to a
/// known step is promoted into `depends_on`; a reference to nothing is
/// dropped.
fn repair_references(step: &mut PlanStep, known_ids: &BTreeSet<String>) {
    let mut dropped = Vec::new();
    for (key, value) in &step.inputs {
        if let Some(target) = PlanStep::reference_target(value) {
            if known_ids.contains(target) && target != step.id {
                step.depends_on.insert(target.to_string());
            } else {
                dropped.push(key.clone());
            }
        }
    }
    for key in dropped {
        tracing::warn!(
            step = step.id.as_str(),
            input = key.as_str(),
            "Dropping input referencing an unknown step"
        );
        step.inputs.remove(&key);
    }
}

// ─── Query profiling ─────────────────────────────────────────────────────────

/// Lightweight keyword/pattern detection over the raw request, used when
/// structured planning is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryProfile {
    pub needs_computation: bool,
    pub needs_retrieval: bool,
    pub safety_level: SafetyLevel,
}

const COMPUTE_KEYWORDS: &[&str] = &[
    "calculate", "compute", "sum", "average", "how many", "how much", "total",
    "percentage", "convert", "range", "capacity", "energy",
];

const COMPUTE_UNITS: &[&str] = &["wh", "kwh", "ah", "mah", "volt", "watt", "mph", "km"];

const RETRIEVAL_KEYWORDS: &[&str] = &[
    "current", "latest", "today", "recent", "news", "compare", "price",
    "weather", "search", "look up", "find information", "happening", "status",
];

const HIGH_SAFETY_KEYWORDS: &[&str] = &[
    "verify", "show your work", "show your steps", "double check", "double-check",
    "prove", "justify", "are you sure", "must be accurate", "critical",
];

impl QueryProfile {
    pub fn detect(request_text: &str) -> Self {
        let lower = request_text.to_lowercase();

        let has_unit_number = COMPUTE_UNITS
            .iter()
            .any(|unit| !crate::textscan::numbers_with_unit(&lower, unit).is_empty());
        let has_pack_notation = crate::textscan::pack_notation(&lower).is_some();

        let needs_computation = has_unit_number
            || has_pack_notation
            || COMPUTE_KEYWORDS.iter().any(|kw| lower.contains(kw));

        let needs_retrieval = RETRIEVAL_KEYWORDS.iter().any(|kw| lower.contains(kw));

        let safety_level = if HIGH_SAFETY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            SafetyLevel::High
        } else {
            SafetyLevel::Normal
        };

        Self {
            needs_computation,
            needs_retrieval,
            safety_level,
        }
    }
}
