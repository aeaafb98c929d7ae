use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;

use crate::budget::CostGovernor;
use crate::connector::{Connector, GenerationRequest, SpecialistTier};
use crate::parse::{ParseStrategy, default_strategies, recover_object};

// ─── Contract ────────────────────────────────────────────────────────────────

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
pub enum Verdict {
    Pass,
    Fail,
    Uncertain,
}

/// Strict output contract for specialist calls. Specialists never return
/// free prose; anything unrecoverable degrades to `Uncertain` at zero
/// confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_payload: Option<Value>,
    /// Short rationale for logs; not user-facing.
    #[serde(default)]
    pub explanation: String,
    pub confidence: f64,
}

impl VerificationResult {
    pub fn uncertain(explanation: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Uncertain,
            corrected_payload: None,
            explanation: explanation.into(),
            confidence: 0.0,
        }
    }

    pub fn is_suspicious(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}

// ─── Prompt ──────────────────────────────────────────────────────────────────

const VERIFICATION_SYSTEM_PROMPT: &str = "\
You are a verification specialist. You never talk to the user directly; you \
only help the system verify and correct computed results.

You will receive a JSON payload with the original request, the plan, tool \
results, and a sanity report.

Respond with VALID JSON ONLY, no markdown fences, no prose outside JSON, \
matching exactly:
{
  \"verdict\": \"pass | fail | uncertain\",
  \"corrected_payload\": { },
  \"explanation\": \"short rationale, one or two sentences\",
  \"confidence\": 0.0
}

Rules:
- \"verdict\" is \"fail\" when any value is wrong or implausible.
- Put corrected numbers in \"corrected_payload\"; omit it when nothing needs \
correcting.
- If you cannot verify from the provided data, use \"uncertain\" with low \
confidence. Never fabricate values.
";

// ─── Router ──────────────────────────────────────────────────────────────────

/// Routes verification requests to a ranked reasoning tier and parses the
/// strictly-typed result.
pub struct SpecialistRouter {
    fast: Option<Arc<dyn Connector>>,
    strong: Option<Arc<dyn Connector>>,
    fast_price: f64,
    strong_price: f64,
    governor: Arc<CostGovernor>,
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl SpecialistRouter {
    pub fn new(governor: Arc<CostGovernor>) -> Self {
        Self {
            fast: None,
            strong: None,
            fast_price: 0.0,
            strong_price: 0.0,
            governor,
            strategies: default_strategies(),
        }
    }

    pub fn with_fast(mut self, connector: Arc<dyn Connector>, price_per_call: f64) -> Self {
        self.fast = Some(connector);
        self.fast_price = price_per_call;
        self
    }

    pub fn with_strong(mut self, connector: Arc<dyn Connector>, price_per_call: f64) -> Self {
        self.strong = Some(connector);
        self.strong_price = price_per_call;
        self
    }

    pub fn price_of(&self, tier: SpecialistTier) -> f64 {
        match tier {
            SpecialistTier::Fast => self.fast_price,
            SpecialistTier::Strong => self.strong_price,
        }
    }

    /// Send a fixed-schema verification request to `tier`.
    ///
    /// Never errors: a missing connector, a failed call, or unparseable
    /// output all degrade to an `Uncertain` result that says why.
    pub async fn verify(
        &self,
        request: &str,
        structured_context: &Value,
        tier: SpecialistTier,
    ) -> VerificationResult {
        let connector = match tier {
            SpecialistTier::Fast => self.fast.as_ref(),
            SpecialistTier::Strong => self.strong.as_ref(),
        };
        let Some(connector) = connector else {
            tracing::warn!(tier = %tier, "No connector configured for tier, skipping verification");
            return VerificationResult::uncertain(format!("no {tier} connector configured"));
        };

        let payload = json!({
            "task": "verify_and_correct",
            "mode": "json_only",
            "original_request": request,
            "context": structured_context,
            "constraints": {
                "response_format": "json",
                "no_prose": true,
                "strict_fields": true,
            },
        });

        let generation = GenerationRequest::new(payload.to_string())
            .with_system(VERIFICATION_SYSTEM_PROMPT)
            .with_temperature(0.3)
            .with_max_tokens(1000);

        tracing::info!(tier = %tier, connector = connector.name(), "Dispatching verification");
        let raw = match connector.generate(&generation).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(tier = %tier, "Verification call failed: {err}");
                self.governor.charge(self.price_of(tier));
                return VerificationResult::uncertain(format!("verification call failed: {err}"));
            }
        };
        self.governor.charge(self.price_of(tier));

        self.parse_verification(&raw)
    }

    fn parse_verification(&self, raw: &str) -> VerificationResult {
        let Some((value, strategy)) = recover_object(raw, &self.strategies) else {
            tracing::warn!("Specialist returned no recoverable structure");
            return VerificationResult::uncertain("specialist returned no recoverable structure");
        };
        if strategy != "direct" {
            tracing::debug!(strategy, "Recovered verification JSON via fallback layer");
        }
        verification_from_value(&value)
    }
}

/// Shape a recovered JSON object into the strict contract, defaulting
/// missing fields pessimistically.
fn verification_from_value(value: &Value) -> VerificationResult {
    let verdict = value
        .get("verdict")
        .and_then(Value::as_str)
        .and_then(|raw| Verdict::from_str(raw).ok());

    let Some(verdict) = verdict else {
        return VerificationResult::uncertain("specialist output missing a valid verdict");
    };

    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    VerificationResult {
        verdict,
        corrected_payload: value.get("corrected_payload").cloned().filter(|v| !v.is_null()),
        explanation: value
            .get("explanation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        confidence,
    }
}
