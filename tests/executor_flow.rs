mod support;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use support::{EventLog, Phase, RecordingTool, events_for, new_event_log};
use tiller::budget::CostGovernor;
use tiller::error::{PlanError, TillerError, ToolError};
use tiller::plan::{ExecutorConfig, Plan, PlanExecutor, PlanStep, StepStatus};
use tiller::specialist::SpecialistRouter;
use tiller::tools::{ComputeTool, ToolRegistry};

fn executor_with(registry: ToolRegistry, config: ExecutorConfig) -> (PlanExecutor, Arc<CostGovernor>) {
    let governor = Arc::new(CostGovernor::with_limit(10.0));
    let router = Arc::new(SpecialistRouter::new(governor.clone()));
    let executor =
        PlanExecutor::new(Arc::new(registry), router, governor.clone()).with_config(config);
    (executor, governor)
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        max_fanout: 4,
        step_timeout: Duration::from_secs(5),
    }
}

/// Scenario A: independent steps run concurrently, the join step runs
/// after both, and the aggregate holds one result per step.
#[tokio::test]
async fn independent_steps_run_concurrently_before_join() {
    let log: EventLog = new_event_log();
    // Both tools block on a shared barrier: the plan only completes if the
    // executor has them in flight at the same time.
    let barrier = Arc::new(tokio::sync::Barrier::new(2));

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        RecordingTool::new("tool_a", log.clone()).with_barrier(barrier.clone()),
    ));
    registry.register(Box::new(
        RecordingTool::new("tool_b", log.clone()).with_barrier(barrier),
    ));
    registry.register(Box::new(RecordingTool::new("tool_c", log.clone())));

    let plan = Plan::new(
        "run a and b then c",
        "parallel_join",
        vec![
            PlanStep::tool_call("a", "tool_a"),
            PlanStep::tool_call("b", "tool_b"),
            PlanStep::tool_call("c", "tool_c").depends(&["a", "b"]),
        ],
    );

    let (executor, _) = executor_with(registry, fast_config());
    let result = executor.execute(&plan).await.unwrap();

    assert_eq!(result.tool_results.len(), 3);
    for id in ["a", "b", "c"] {
        assert_eq!(result.tool_results[id].status, StepStatus::Ok, "step {id}");
    }

    // Ordering property: c starts only after both dependencies finished.
    let c_started = events_for(&log, "tool_c", Phase::Started)[0];
    let a_finished = events_for(&log, "tool_a", Phase::Finished)[0];
    let b_finished = events_for(&log, "tool_b", Phase::Finished)[0];
    assert!(a_finished <= c_started);
    assert!(b_finished <= c_started);
}

/// Scenario B: a 2-cycle aborts the execution before any step runs.
#[tokio::test]
async fn cyclic_plan_aborts_with_zero_steps_run() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RecordingTool::new("tool_a", log.clone())));

    let plan = Plan::new(
        "impossible",
        "cycle",
        vec![
            PlanStep::tool_call("a", "tool_a").depends(&["b"]),
            PlanStep::tool_call("b", "tool_a").depends(&["a"]),
        ],
    );

    let (executor, _) = executor_with(registry, fast_config());
    let err = executor.execute(&plan).await.unwrap_err();
    assert!(matches!(err, TillerError::Plan(PlanError::Cyclic { .. })));
    assert!(events_for(&log, "tool_a", Phase::Started).is_empty());
}

/// Scenario D: an unregistered tool records an error result, execution
/// continues, and finalization still runs.
#[tokio::test]
async fn unknown_tool_degrades_without_aborting() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RecordingTool::new("tool_a", log.clone())));

    let plan = Plan::new(
        "search then finish",
        "degraded",
        vec![
            PlanStep::tool_call("a", "tool_a"),
            PlanStep::tool_call("search", "web_search").with_input("query", json!("latest news")),
            PlanStep::finalization("finalize").depends(&["a", "search"]),
        ],
    );

    let (executor, _) = executor_with(registry, fast_config());
    let result = executor.execute(&plan).await.unwrap();

    assert_eq!(result.tool_results["search"].status, StepStatus::Error);
    assert!(
        result.tool_results["search"]
            .error_message()
            .unwrap()
            .contains("web_search")
    );
    assert_eq!(result.tool_results["finalize"].status, StepStatus::Ok);
    assert_eq!(result.tool_results["finalize"].payload["finalized"], json!(true));
}

#[tokio::test]
async fn empty_registry_with_tool_calls_aborts() {
    let plan = Plan::new(
        "anything",
        "no_tools",
        vec![PlanStep::tool_call("a", "tool_a")],
    );
    let (executor, _) = executor_with(ToolRegistry::new(), fast_config());
    let err = executor.execute(&plan).await.unwrap_err();
    assert!(matches!(
        err,
        TillerError::Tool(ToolError::RegistryUnavailable)
    ));
}

#[tokio::test]
async fn empty_registry_without_tool_calls_is_fine() {
    let plan = Plan::new(
        "just finish",
        "trivial",
        vec![PlanStep::finalization("finalize")],
    );
    let (executor, _) = executor_with(ToolRegistry::new(), fast_config());
    let result = executor.execute(&plan).await.unwrap();
    assert_eq!(result.tool_results["finalize"].status, StepStatus::Ok);
}

#[tokio::test]
async fn slow_step_times_out_and_execution_continues() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        RecordingTool::new("slow", log.clone()).with_delay(Duration::from_secs(30)),
    ));
    registry.register(Box::new(RecordingTool::new("quick", log.clone())));

    let plan = Plan::new(
        "slow and quick",
        "timeout",
        vec![
            PlanStep::tool_call("s", "slow"),
            PlanStep::tool_call("q", "quick"),
            PlanStep::finalization("finalize").depends(&["s", "q"]),
        ],
    );

    let (executor, _) = executor_with(
        registry,
        ExecutorConfig {
            max_fanout: 4,
            step_timeout: Duration::from_millis(100),
        },
    );
    let result = executor.execute(&plan).await.unwrap();

    assert_eq!(result.tool_results["s"].status, StepStatus::Error);
    assert_eq!(result.tool_results["s"].payload["timeout"], json!(true));
    assert_eq!(result.tool_results["q"].status, StepStatus::Ok);
    assert_eq!(result.tool_results["finalize"].status, StepStatus::Ok);
}

#[tokio::test]
async fn references_resolve_to_upstream_payloads() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        RecordingTool::new("producer", log.clone()).with_payload(json!({ "hits": 3 })),
    ));
    registry.register(Box::new(RecordingTool::new("consumer", log.clone())));

    let plan = Plan::new(
        "chain",
        "reference",
        vec![
            PlanStep::tool_call("find", "producer"),
            PlanStep::tool_call("use", "consumer")
                .with_input("data", json!("FROM_find"))
                .with_input("mode", json!("literal"))
                .depends(&["find"]),
        ],
    );

    let (executor, _) = executor_with(registry, fast_config());
    let result = executor.execute(&plan).await.unwrap();

    // RecordingTool echoes its inputs; the reference must have been
    // replaced by the producer's payload.
    let echoed = &result.tool_results["use"].payload["inputs"];
    assert_eq!(echoed["data"]["hits"], json!(3));
    assert_eq!(echoed["mode"], json!("literal"));
}

#[tokio::test]
async fn fanout_limit_serializes_excess_steps() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    for name in ["t1", "t2", "t3"] {
        registry.register(Box::new(
            RecordingTool::new(name, log.clone()).with_delay(Duration::from_millis(80)),
        ));
    }

    let plan = Plan::new(
        "three independent",
        "fanout",
        vec![
            PlanStep::tool_call("s1", "t1"),
            PlanStep::tool_call("s2", "t2"),
            PlanStep::tool_call("s3", "t3"),
        ],
    );

    let (executor, _) = executor_with(
        registry,
        ExecutorConfig {
            max_fanout: 1,
            step_timeout: Duration::from_secs(5),
        },
    );
    let result = executor.execute(&plan).await.unwrap();
    assert_eq!(result.tool_results.len(), 3);

    // With fan-out 1 the three executions must not overlap.
    let mut intervals: Vec<(std::time::Instant, std::time::Instant)> = ["t1", "t2", "t3"]
        .iter()
        .map(|name| {
            (
                events_for(&log, name, Phase::Started)[0],
                events_for(&log, name, Phase::Finished)[0],
            )
        })
        .collect();
    intervals.sort();
    assert!(intervals[0].1 <= intervals[1].0);
    assert!(intervals[1].1 <= intervals[2].0);
}

#[tokio::test]
async fn cancellation_aborts_in_flight_and_pending_steps() {
    let log: EventLog = new_event_log();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        RecordingTool::new("slow", log.clone()).with_delay(Duration::from_secs(30)),
    ));

    let plan = Plan::new(
        "cancel me",
        "cancellation",
        vec![
            PlanStep::tool_call("first", "slow"),
            PlanStep::tool_call("second", "slow").depends(&["first"]),
            PlanStep::finalization("finalize").depends(&["second"]),
        ],
    );

    let governor = Arc::new(CostGovernor::with_limit(10.0));
    governor.charge(0.25);
    let router = Arc::new(SpecialistRouter::new(governor.clone()));
    let executor = PlanExecutor::new(Arc::new(registry), router, governor.clone())
        .with_config(fast_config());

    let token = executor.cancellation_token();
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    };

    let (result, ()) = tokio::join!(executor.execute(&plan), canceller);
    let result = result.unwrap();

    assert_eq!(result.tool_results["first"].status, StepStatus::Error);
    assert_eq!(
        result.tool_results["first"].error_message(),
        Some("cancelled")
    );
    assert_eq!(result.tool_results["second"].status, StepStatus::Error);
    // Spend recorded before cancellation stays charged.
    assert!((governor.state().spent - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn compute_sanity_chain_produces_verdict_payload() {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ComputeTool));

    let plan = Plan::new(
        "energy of a 13S4P pack of 3400mAh cells at 3.6V",
        "pack_energy",
        vec![
            PlanStep::tool_call("calc", "compute")
                .with_input("task", json!("battery_pack_energy"))
                .with_input(
                    "variables",
                    json!({ "query": "13S4P pack of 3400mAh cells at 3.6V" }),
                ),
            PlanStep::sanity_check("sanity").depends(&["calc"]),
            PlanStep::finalization("finalize").depends(&["calc", "sanity"]),
        ],
    );

    let (executor, _) = executor_with(registry, fast_config());
    let result = executor.execute(&plan).await.unwrap();

    assert_eq!(result.tool_results["calc"].payload["pack_energy_wh"], json!(636.48));
    let sanity = &result.tool_results["sanity"].payload;
    assert_eq!(sanity["suspicious"], json!(false));
    assert_eq!(result.tool_results["finalize"].status, StepStatus::Ok);
}
