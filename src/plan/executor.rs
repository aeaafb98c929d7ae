use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::budget::{BudgetPhase, CostGovernor};
use crate::connector::SpecialistTier;
use crate::error::{Result, ToolError};
use crate::plan::graph::StepGraph;
use crate::plan::types::{
    ExecutionResult, Plan, PlanStep, SafetyLevel, StepKind, StepStatus, ToolResult,
};
use crate::sanity::{SanityChecker, SanityReport};
use crate::specialist::{SpecialistRouter, VerificationResult};
use crate::tools::ToolRegistry;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running suspension-point steps.
    pub max_fanout: usize,
    /// Per-step timeout for tool and specialist dispatch.
    pub step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_fanout: 4,
            step_timeout: Duration::from_secs(30),
        }
    }
}

// ─── Executor ────────────────────────────────────────────────────────────────

/// Dependency-driven plan scheduler.
///
/// Validates the step graph, runs ready steps concurrently under the
/// fan-out limit, resolves symbolic references between step outputs, and
/// applies the tier escalation policy. Step failures are absorbed into
/// result objects; only graph validation and total registry unavailability
/// abort an execution.
pub struct PlanExecutor {
    registry: Arc<ToolRegistry>,
    sanity: SanityChecker,
    router: Arc<SpecialistRouter>,
    governor: Arc<CostGovernor>,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

/// One finished suspension-point step.
type TaskDone = (String, ToolResult, Option<VerificationResult>);

impl PlanExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        router: Arc<SpecialistRouter>,
        governor: Arc<CostGovernor>,
    ) -> Self {
        Self {
            registry,
            sanity: SanityChecker::new(),
            router,
            governor,
            config: ExecutorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Token that aborts in-flight steps and pending dispatch when
    /// cancelled. Amounts already charged to the governor stay charged.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn execute(&self, plan: &Plan) -> Result<ExecutionResult> {
        let mut graph = StepGraph::build(plan)?;

        if plan.has_tool_calls() && self.registry.is_empty() {
            return Err(ToolError::RegistryUnavailable.into());
        }

        tracing::info!(
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            "Executing plan"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_fanout.max(1)));
        let mut tasks: JoinSet<TaskDone> = JoinSet::new();
        let mut task_steps: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut ready: VecDeque<String> = graph.ready_steps().into();
        let mut exec = ExecutionResult::default();

        loop {
            while let Some(step_id) = ready.pop_front() {
                let Some(step) = plan.step(&step_id) else {
                    continue;
                };

                if self.cancel.is_cancelled() {
                    tracing::debug!(step = step_id.as_str(), "Skipping dispatch: cancelled");
                    exec.tool_results
                        .insert(step_id.clone(), ToolResult::error(&step_id, "cancelled"));
                    ready.extend(graph.complete(&step_id));
                    continue;
                }

                match &step.kind {
                    StepKind::SanityCheck => {
                        let result = self.run_sanity(step, plan, &exec.tool_results);
                        exec.tool_results.insert(step_id.clone(), result);
                        ready.extend(graph.complete(&step_id));
                    }
                    StepKind::Finalization => {
                        // Marker step: upstream results are ready for
                        // presentation. The executor generates no text here.
                        exec.tool_results.insert(
                            step_id.clone(),
                            ToolResult::ok(&step_id, json!({ "finalized": true })),
                        );
                        ready.extend(graph.complete(&step_id));
                    }
                    StepKind::ToolCall { tool_name } => {
                        let handle = tasks.spawn(run_tool_step(ToolStepContext {
                            step_id: step_id.clone(),
                            tool_name: tool_name.clone(),
                            inputs: resolve_inputs(step, &exec.tool_results),
                            registry: self.registry.clone(),
                            governor: self.governor.clone(),
                            cancel: self.cancel.clone(),
                            timeout: self.config.step_timeout,
                            semaphore: semaphore.clone(),
                        }));
                        task_steps.insert(handle.id(), step_id);
                    }
                    StepKind::SpecialistCall => {
                        let phase = self.governor.state().phase;
                        let suspicious = sanity_flag(step, &exec.tool_results);
                        match select_tier(plan.safety_level, suspicious, phase) {
                            None => {
                                tracing::warn!(
                                    step = step_id.as_str(),
                                    "Budget hard limit: skipping specialist"
                                );
                                exec.tool_results.insert(
                                    step_id.clone(),
                                    ToolResult::skipped(&step_id, "budget hard limit"),
                                );
                                ready.extend(graph.complete(&step_id));
                            }
                            Some(tier) => {
                                let context = json!({
                                    "plan": plan.summary(),
                                    "tool_results": exec.tool_results,
                                    "sanity_suspicious": suspicious,
                                });
                                let handle = tasks.spawn(run_specialist_step(SpecialistStepContext {
                                    step_id: step_id.clone(),
                                    request: plan.request.clone(),
                                    context,
                                    tier,
                                    router: self.router.clone(),
                                    cancel: self.cancel.clone(),
                                    timeout: self.config.step_timeout,
                                    semaphore: semaphore.clone(),
                                }));
                                task_steps.insert(handle.id(), step_id);
                            }
                        }
                    }
                }
            }

            if tasks.is_empty() {
                break;
            }

            match tasks.join_next().await {
                Some(Ok((step_id, result, verification))) => {
                    if let Some(verification) = verification {
                        exec.specialist_results
                            .insert(step_id.clone(), verification);
                    }
                    exec.tool_results.insert(step_id.clone(), result);
                    ready.extend(graph.complete(&step_id));
                }
                Some(Err(join_err)) => {
                    // A panicking step is recorded like any other failure so
                    // dependents still run with degraded input.
                    let step_id = task_steps
                        .get(&join_err.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::error!(step = step_id.as_str(), "Step task failed: {join_err}");
                    exec.tool_results
                        .insert(step_id.clone(), ToolResult::error(&step_id, join_err.to_string()));
                    ready.extend(graph.complete(&step_id));
                }
                None => break,
            }
        }

        tracing::info!(
            plan_id = %plan.plan_id,
            results = exec.tool_results.len(),
            specialist_results = exec.specialist_results.len(),
            "Plan execution finished"
        );
        Ok(exec)
    }

    fn run_sanity(
        &self,
        step: &PlanStep,
        plan: &Plan,
        results: &BTreeMap<String, ToolResult>,
    ) -> ToolResult {
        let text = collect_context_text(step, results);
        let report = self.sanity.check(&text, &plan.request);
        ToolResult::ok(&step.id, report.to_payload())
    }
}

// ─── Step dispatch ───────────────────────────────────────────────────────────

/// Owned handles for one spawned tool step.
struct ToolStepContext {
    step_id: String,
    tool_name: String,
    inputs: BTreeMap<String, Value>,
    registry: Arc<ToolRegistry>,
    governor: Arc<CostGovernor>,
    cancel: CancellationToken,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

async fn run_tool_step(ctx: ToolStepContext) -> TaskDone {
    let ToolStepContext {
        step_id,
        tool_name,
        inputs,
        registry,
        governor,
        cancel,
        timeout,
        semaphore,
    } = ctx;

    let _permit = semaphore.acquire_owned().await;
    let started = Instant::now();

    let work = async {
        match registry.invoke(&tool_name, &inputs).await {
            Ok(outcome) => {
                if outcome.cost > 0.0 {
                    governor.charge(outcome.cost);
                }
                ToolResult {
                    step_id: step_id.clone(),
                    status: if outcome.ok {
                        StepStatus::Ok
                    } else {
                        StepStatus::Error
                    },
                    payload: outcome.payload,
                    citations: outcome.citations,
                    cost: outcome.cost,
                    elapsed_ms: elapsed_ms(started),
                }
            }
            Err(err) => {
                tracing::error!(tool = tool_name.as_str(), "Tool invocation failed: {err}");
                ToolResult::error(&step_id, err.to_string())
            }
        }
    };

    let result = tokio::select! {
        () = cancel.cancelled() => ToolResult::error(&step_id, "cancelled"),
        outcome = tokio::time::timeout(timeout, work) => match outcome {
            Ok(result) => result,
            Err(_) => timeout_result(&step_id, timeout),
        },
    };
    (step_id, result, None)
}

/// Owned handles for one spawned specialist step.
struct SpecialistStepContext {
    step_id: String,
    request: String,
    context: Value,
    tier: SpecialistTier,
    router: Arc<SpecialistRouter>,
    cancel: CancellationToken,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
}

async fn run_specialist_step(ctx: SpecialistStepContext) -> TaskDone {
    let SpecialistStepContext {
        step_id,
        request,
        context,
        tier,
        router,
        cancel,
        timeout,
        semaphore,
    } = ctx;

    let _permit = semaphore.acquire_owned().await;
    let started = Instant::now();

    let work = async { router.verify(&request, &context, tier).await };

    let (result, verification) = tokio::select! {
        () = cancel.cancelled() => (ToolResult::error(&step_id, "cancelled"), None),
        verification = tokio::time::timeout(timeout, work) => match verification {
            Ok(verification) => {
                let mut result = ToolResult::ok(
                    &step_id,
                    json!({
                        "verdict": verification.verdict.to_string(),
                        "confidence": verification.confidence,
                        "tier": tier.to_string(),
                    }),
                );
                result.cost = router.price_of(tier);
                result.elapsed_ms = elapsed_ms(started);
                (result, Some(verification))
            }
            Err(_) => (timeout_result(&step_id, timeout), None),
        },
    };
    (step_id, result, verification)
}

// ─── Escalation policy ───────────────────────────────────────────────────────

/// Tier selection under the budget phase. The safety flag always wins
/// while the budget is normal; under the soft limit only a suspicious
/// sanity verdict justifies the strong tier; at the hard limit the
/// specialist is skipped outright.
pub fn select_tier(
    safety: SafetyLevel,
    sanity_suspicious: bool,
    phase: BudgetPhase,
) -> Option<SpecialistTier> {
    match phase {
        BudgetPhase::HardLimit => None,
        BudgetPhase::Normal => Some(if safety == SafetyLevel::High || sanity_suspicious {
            SpecialistTier::Strong
        } else {
            SpecialistTier::Fast
        }),
        BudgetPhase::SoftLimit => Some(if sanity_suspicious {
            SpecialistTier::Strong
        } else {
            SpecialistTier::Fast
        }),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Substitute `FROM_<id>` references with the referenced step's payload.
/// Pure over (step, completed results); dependencies are guaranteed
/// complete before dispatch.
fn resolve_inputs(
    step: &PlanStep,
    results: &BTreeMap<String, ToolResult>,
) -> BTreeMap<String, Value> {
    step.inputs
        .iter()
        .map(|(key, value)| {
            if let Some(target) = PlanStep::reference_target(value) {
                if let Some(result) = results.get(target) {
                    return (key.clone(), result.payload.clone());
                }
                tracing::warn!(step = step.id.as_str(), target, "Reference to missing result");
            }
            (key.clone(), value.clone())
        })
        .collect()
}

/// Whether a sanity verdict upstream of `step` flagged the output. Falls
/// back to any recorded sanity report when the step has no sanity
/// dependency of its own.
fn sanity_flag(step: &PlanStep, results: &BTreeMap<String, ToolResult>) -> bool {
    let dep_reports: Vec<SanityReport> = step
        .depends_on
        .iter()
        .filter_map(|dep| results.get(dep))
        .filter_map(|result| SanityReport::from_payload(&result.payload))
        .collect();

    if !dep_reports.is_empty() {
        return dep_reports.iter().any(|report| report.suspicious);
    }
    results
        .values()
        .filter_map(|result| SanityReport::from_payload(&result.payload))
        .any(|report| report.suspicious)
}

/// Text handed to the sanity checker: the human-readable calculation
/// strings of upstream results when present, raw payload JSON otherwise.
fn collect_context_text(step: &PlanStep, results: &BTreeMap<String, ToolResult>) -> String {
    let explicit_ids: Option<Vec<String>> = step
        .inputs
        .get("context_step_ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        });

    let ids: Vec<String> = explicit_ids
        .unwrap_or_else(|| step.depends_on.iter().cloned().collect());

    let mut parts = Vec::new();
    for id in ids {
        let Some(result) = results.get(&id) else {
            continue;
        };
        if !result.is_ok() {
            continue;
        }
        match result.payload.get("calculation").and_then(Value::as_str) {
            Some(calculation) => parts.push(calculation.to_string()),
            None => parts.push(result.payload.to_string()),
        }
    }
    parts.join("\n")
}

fn timeout_result(step_id: &str, timeout: Duration) -> ToolResult {
    let mut result = ToolResult::error(
        step_id,
        format!("timeout after {}s", timeout.as_secs_f64()),
    );
    if let Some(payload) = result.payload.as_object_mut() {
        payload.insert("timeout".into(), json!(true));
    }
    result
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_budget_safety_wins() {
        assert_eq!(
            select_tier(SafetyLevel::High, false, BudgetPhase::Normal),
            Some(SpecialistTier::Strong)
        );
        assert_eq!(
            select_tier(SafetyLevel::Normal, true, BudgetPhase::Normal),
            Some(SpecialistTier::Strong)
        );
        assert_eq!(
            select_tier(SafetyLevel::Normal, false, BudgetPhase::Normal),
            Some(SpecialistTier::Fast)
        );
    }

    #[test]
    fn soft_limit_downgrades_safety_but_not_suspicion() {
        assert_eq!(
            select_tier(SafetyLevel::High, false, BudgetPhase::SoftLimit),
            Some(SpecialistTier::Fast)
        );
        assert_eq!(
            select_tier(SafetyLevel::High, true, BudgetPhase::SoftLimit),
            Some(SpecialistTier::Strong)
        );
        assert_eq!(
            select_tier(SafetyLevel::Normal, true, BudgetPhase::SoftLimit),
            Some(SpecialistTier::Strong)
        );
    }

    #[test]
    fn hard_limit_skips_regardless() {
        assert_eq!(select_tier(SafetyLevel::High, true, BudgetPhase::HardLimit), None);
        assert_eq!(select_tier(SafetyLevel::Normal, false, BudgetPhase::HardLimit), None);
    }

    #[test]
    fn resolve_inputs_substitutes_payloads() {
        let step = PlanStep::tool_call("calc", "compute")
            .with_input("variables", json!("FROM_search"))
            .with_input("task", json!("generic_math"))
            .depends(&["search"]);
        let mut results = BTreeMap::new();
        results.insert(
            "search".to_string(),
            ToolResult::ok("search", json!({ "hits": 3 })),
        );

        let resolved = resolve_inputs(&step, &results);
        assert_eq!(resolved["variables"], json!({ "hits": 3 }));
        assert_eq!(resolved["task"], json!("generic_math"));
    }

    #[test]
    fn resolve_inputs_keeps_literal_on_missing_result() {
        let step = PlanStep::tool_call("calc", "compute")
            .with_input("variables", json!("FROM_search"))
            .depends(&["search"]);
        let resolved = resolve_inputs(&step, &BTreeMap::new());
        assert_eq!(resolved["variables"], json!("FROM_search"));
    }

    #[test]
    fn sanity_flag_prefers_dependency_reports() {
        let mut results = BTreeMap::new();
        results.insert(
            "sanity_other".to_string(),
            ToolResult::ok(
                "sanity_other",
                json!({ "suspicious": true, "issues": ["x"], "severity": "high" }),
            ),
        );
        results.insert(
            "sanity_mine".to_string(),
            ToolResult::ok(
                "sanity_mine",
                json!({ "suspicious": false, "issues": [], "severity": "none" }),
            ),
        );

        let step = PlanStep::specialist_call("verify").depends(&["sanity_mine"]);
        assert!(!sanity_flag(&step, &results));

        let detached = PlanStep::specialist_call("verify2");
        assert!(sanity_flag(&detached, &results));
    }

    #[test]
    fn collect_context_prefers_calculation_strings() {
        let mut results = BTreeMap::new();
        results.insert(
            "calc".to_string(),
            ToolResult::ok(
                "calc",
                json!({ "pack_energy_wh": 636.48, "calculation": "13S4P = 636.48Wh" }),
            ),
        );
        let step = PlanStep::sanity_check("sanity").depends(&["calc"]);
        assert_eq!(collect_context_text(&step, &results), "13S4P = 636.48Wh");
    }

    #[test]
    fn collect_context_skips_failed_dependencies() {
        let mut results = BTreeMap::new();
        results.insert("calc".to_string(), ToolResult::error("calc", "boom"));
        let step = PlanStep::sanity_check("sanity").depends(&["calc"]);
        assert_eq!(collect_context_text(&step, &results), "");
    }

    #[test]
    fn timeout_result_carries_marker() {
        let result = timeout_result("slow", Duration::from_secs(5));
        assert_eq!(result.status, crate::plan::types::StepStatus::Error);
        assert_eq!(result.payload["timeout"], json!(true));
        assert!(result.error_message().unwrap().contains("timeout"));
    }
}
