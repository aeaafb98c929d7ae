use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `tiller`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum TillerError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Plan graph / execution ──────────────────────────────────────────
    #[error("plan: {0}")]
    Plan(#[from] PlanError),

    // ── Tools ───────────────────────────────────────────────────────────
    #[error("tool: {0}")]
    Tool(#[from] ToolError),

    // ── Reasoning-tier connectors ───────────────────────────────────────
    #[error("connector: {0}")]
    Connector(#[from] ConnectorError),

    // ── Budget ──────────────────────────────────────────────────────────
    #[error("budget: {0}")]
    Budget(#[from] BudgetError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Plan errors ────────────────────────────────────────────────────────────

/// Failures that abort an execution before any step runs.
///
/// Everything else the executor encounters is absorbed into step-local
/// result objects; only these graph-validation failures (and
/// [`ToolError::RegistryUnavailable`]) unwind `execute`.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("cycle detected: {path}")]
    Cyclic { path: String },

    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("step id cannot be empty")]
    EmptyStepId,

    #[error("step {step} depends on unknown step: {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step {step} input {key} references {referenced}, which is not in depends_on")]
    UndeclaredReference {
        step: String,
        key: String,
        referenced: String,
    },
}

// ─── Tool errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool {name} not found")]
    NotFound { name: String },

    #[error("no tools registered but plan contains tool calls")]
    RegistryUnavailable,

    #[error("tool {name} execution failed: {message}")]
    Execution { name: String, message: String },
}

// ─── Connector errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector {connector} request failed: {message}")]
    Request { connector: String, message: String },

    #[error("connector {connector} rate-limited")]
    RateLimited { connector: String },

    #[error("no connector configured for tier {tier}")]
    TierUnavailable { tier: String },

    #[error("streaming error: {0}")]
    Streaming(String),
}

// ─── Budget errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("budget exhausted: spent {spent:.4} of {limit:.4}")]
    Exhausted { spent: f64, limit: f64 },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, TillerError>;
