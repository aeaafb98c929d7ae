use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub tiers: TiersConfig,
}

// ── Budget ────────────────────────────────────────────────────────

/// The two externally supplied budget numbers, read once at session
/// start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hard session spend limit in USD.
    #[serde(default = "default_limit_usd")]
    pub limit_usd: f64,
    /// Fraction of the limit at which tier selection degrades.
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: f64,
}

fn default_limit_usd() -> f64 {
    3.0
}

fn default_soft_threshold() -> f64 {
    0.8
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_usd: default_limit_usd(),
            soft_threshold: default_soft_threshold(),
        }
    }
}

// ── Executor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Concurrent step fan-out bound.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
    /// Per-step timeout in seconds for tool and specialist dispatch.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_max_fanout() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    30
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_fanout: default_max_fanout(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

// ── Reasoning tiers ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TiersConfig {
    /// Planning tier; typically a free local model.
    #[serde(default)]
    pub planner: Option<TierConfig>,
    /// Fast verification tier.
    #[serde(default)]
    pub fast: Option<TierConfig>,
    /// Strong verification tier.
    #[serde(default)]
    pub strong: Option<TierConfig>,
    /// Narration tier for the presenter; typically the planner model.
    #[serde(default)]
    pub presenter: Option<TierConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// OpenAI-compatible endpoint base, e.g. "http://localhost:11434/v1".
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; unset means no auth.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Flat estimated price per call in USD; zero for local models.
    #[serde(default)]
    pub price_per_call: f64,
}

impl TierConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// Default config location: `~/.tiller/config.toml`.
    pub fn default_path() -> PathBuf {
        UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".tiller").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".tiller/config.toml"))
    }

    /// Load from `path` (tilde-expanded) or the default location. A
    /// missing file yields defaults rather than an error.
    pub fn load(path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let path = match path {
            Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
            None => Self::default_path(),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> std::result::Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)?;
            toml::from_str::<Self>(&raw)
                .map_err(|err| ConfigError::Load(format!("{}: {err}", path.display())))?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.budget.limit_usd < 0.0 {
            return Err(ConfigError::Validation(format!(
                "budget.limit_usd must be non-negative, got {}",
                self.budget.limit_usd
            )));
        }
        if !(0.0..=1.0).contains(&self.budget.soft_threshold) {
            return Err(ConfigError::Validation(format!(
                "budget.soft_threshold must be within [0, 1], got {}",
                self.budget.soft_threshold
            )));
        }
        if self.executor.max_fanout == 0 {
            return Err(ConfigError::Validation(
                "executor.max_fanout must be at least 1".into(),
            ));
        }
        for (name, tier) in [
            ("planner", &self.tiers.planner),
            ("fast", &self.tiers.fast),
            ("strong", &self.tiers.strong),
            ("presenter", &self.tiers.presenter),
        ] {
            if let Some(tier) = tier {
                if tier.base_url.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "tiers.{name}.base_url must not be empty"
                    )));
                }
                if tier.price_per_call < 0.0 {
                    return Err(ConfigError::Validation(format!(
                        "tiers.{name}.price_per_call must be non-negative"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serialize back to TOML, for `--show-config` style output.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}
