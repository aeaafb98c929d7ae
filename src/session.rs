use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::budget::CostGovernor;
use crate::error::{Result, TillerError};
use crate::plan::{AnalyzerContext, ExecutionResult, PlanAnalyzer, PlanExecutor};
use crate::plan::types::Citation;
use crate::present::Presenter;

/// Everything the caller needs from one handled request.
#[derive(Debug)]
pub struct SessionReply {
    pub text: String,
    pub citations: Vec<Citation>,
    pub citations_used: Vec<usize>,
    pub intent: String,
    pub execution: ExecutionResult,
    pub cost: Value,
}

/// One conversation session: wires analyzer, executor, and presenter
/// around a shared cost governor.
///
/// The governor's running total is the only state carried between
/// requests; plans and results are per-request values.
pub struct Session {
    analyzer: PlanAnalyzer,
    executor: PlanExecutor,
    presenter: Presenter,
    governor: Arc<CostGovernor>,
}

impl Session {
    pub fn new(
        analyzer: PlanAnalyzer,
        executor: PlanExecutor,
        presenter: Presenter,
        governor: Arc<CostGovernor>,
    ) -> Self {
        Self {
            analyzer,
            executor,
            presenter,
            governor,
        }
    }

    pub fn governor(&self) -> &Arc<CostGovernor> {
        &self.governor
    }

    /// Cancelling this token aborts in-flight steps of the current
    /// execution; spend already charged stays charged.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.executor.cancellation_token()
    }

    pub async fn handle(&self, request: &str, context: &AnalyzerContext) -> Result<SessionReply> {
        let mut plan = self.analyzer.analyze(request, context).await;

        let execution = match self.executor.execute(&plan).await {
            Ok(execution) => execution,
            Err(TillerError::Plan(err)) => {
                // A generated plan can still carry a dependency cycle the
                // normalizer cannot repair; the rule-based plan is acyclic
                // by construction.
                tracing::warn!("Generated plan rejected ({err}), retrying with rule-based plan");
                plan = self.analyzer.fallback_plan(request);
                self.executor.execute(&plan).await?
            }
            Err(other) => return Err(other),
        };

        let presentation = self
            .presenter
            .finalize(
                request,
                &plan.summary(),
                &execution.tool_results,
                &execution.specialist_results,
            )
            .await;

        Ok(SessionReply {
            text: presentation.text,
            citations: presentation.citations,
            citations_used: presentation.citations_used,
            intent: plan.intent,
            execution,
            cost: self.governor.summary(),
        })
    }
}
