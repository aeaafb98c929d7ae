pub mod analyzer;
pub mod executor;
pub mod graph;
pub mod types;

pub use analyzer::{AnalyzerContext, HistoryTurn, PlanAnalyzer, QueryProfile};
pub use executor::{ExecutorConfig, PlanExecutor, select_tier};
pub use graph::StepGraph;
pub use types::{
    Citation, Complexity, ExecutionResult, Plan, PlanStep, SafetyLevel, StepKind, StepStatus,
    ToolResult, Trust,
};
