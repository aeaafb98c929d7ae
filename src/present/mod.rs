use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::connector::{Connector, GenerationRequest};
use crate::plan::types::{Citation, StepStatus, ToolResult};
use crate::specialist::VerificationResult;

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Presentation {
    pub text: String,
    /// Citation numbers actually referenced by the prose, 1-based.
    pub citations_used: Vec<usize>,
    /// All citations collected from tool results, in numbering order.
    pub citations: Vec<Citation>,
}

// ─── Presenter ───────────────────────────────────────────────────────────────

/// The only component that produces user-facing text.
///
/// Consumes structured step outputs only. Low aggregate confidence turns
/// into hedge language; missing or unverifiable data is acknowledged
/// explicitly; a narration failure falls back to a template assembled from
/// the best available result rather than failing the request.
pub struct Presenter {
    connector: Option<Arc<dyn Connector>>,
}

const HEDGE_THRESHOLD: f64 = 0.5;

const PRESENTER_SYSTEM_PROMPT: &str = "\
You present computed results to the user.

Rules:
- Stick to the facts in the structured input. Never invent values.
- Reference sources with bracketed numbers like [1] where relevant.
- If the input notes missing or unverified data, say so plainly.
- Be concise and conversational.
";

impl Presenter {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    /// Presenter without a narration tier: always uses the template path.
    pub fn offline() -> Self {
        Self { connector: None }
    }

    pub async fn finalize(
        &self,
        request: &str,
        plan_summary: &Value,
        tool_results: &BTreeMap<String, ToolResult>,
        specialist_results: &BTreeMap<String, VerificationResult>,
    ) -> Presentation {
        let citations = collect_citations(tool_results);
        let confidence = aggregate_confidence(tool_results, specialist_results);
        let degraded = degraded_notes(tool_results);

        let narrated = match &self.connector {
            Some(connector) => {
                narrate(
                    connector.as_ref(),
                    request,
                    plan_summary,
                    tool_results,
                    specialist_results,
                    &citations,
                    &degraded,
                )
                .await
            }
            None => None,
        };

        let mut text = narrated
            .unwrap_or_else(|| fallback_text(request, tool_results, specialist_results));

        if confidence < HEDGE_THRESHOLD && !text.starts_with("I'm not fully confident") {
            text = format!(
                "I'm not fully confident in this answer, so treat it as an estimate. {text}"
            );
        }

        if !degraded.is_empty() && !text.contains("could not be") {
            text.push_str(&format!(
                "\n\nNote: some data could not be {}: {}.",
                if degraded.iter().any(|(status, _)| *status == StepStatus::Skipped) {
                    "verified"
                } else {
                    "retrieved"
                },
                degraded
                    .iter()
                    .map(|(_, note)| note.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
        }

        let citations_used = referenced_citations(&text, citations.len());

        Presentation {
            text,
            citations_used,
            citations,
        }
    }
}

// ─── Assembly helpers ────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn narrate(
    connector: &dyn Connector,
    request: &str,
    plan_summary: &Value,
    tool_results: &BTreeMap<String, ToolResult>,
    specialist_results: &BTreeMap<String, VerificationResult>,
    citations: &[Citation],
    degraded: &[(StepStatus, String)],
) -> Option<String> {
    let numbered: Vec<Value> = citations
        .iter()
        .enumerate()
        .map(|(idx, citation)| {
            json!({
                "n": idx + 1,
                "label": citation.label,
                "url": citation.url,
            })
        })
        .collect();

    let digest = json!({
        "request": request,
        "plan": plan_summary,
        "results": tool_results,
        "verification": specialist_results,
        "citations": numbered,
        "missing_data": degraded.iter().map(|(_, note)| note).collect::<Vec<_>>(),
    });

    let generation = GenerationRequest::new(format!(
        "Present these results to the user:\n{digest}"
    ))
    .with_system(PRESENTER_SYSTEM_PROMPT)
    .with_temperature(0.7)
    .with_max_tokens(1024);

    match connector.generate(&generation).await {
        Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Ok(_) => {
            tracing::warn!("Presenter narration came back empty, using template");
            None
        }
        Err(err) => {
            tracing::warn!("Presenter narration failed, using template: {err}");
            None
        }
    }
}

/// Citations from all results, numbered in order of first appearance,
/// deduplicated by label and url.
fn collect_citations(tool_results: &BTreeMap<String, ToolResult>) -> Vec<Citation> {
    let mut seen = std::collections::HashSet::new();
    let mut collected = Vec::new();
    for result in tool_results.values() {
        for citation in &result.citations {
            if seen.insert((citation.label.clone(), citation.url.clone())) {
                collected.push(citation.clone());
            }
        }
    }
    collected
}

/// Aggregate confidence in [0, 1]: the weakest specialist verdict, capped
/// when any step failed or was skipped.
fn aggregate_confidence(
    tool_results: &BTreeMap<String, ToolResult>,
    specialist_results: &BTreeMap<String, VerificationResult>,
) -> f64 {
    let base = specialist_results
        .values()
        .map(|verification| verification.confidence)
        .fold(f64::INFINITY, f64::min);
    let base = if base.is_finite() { base } else { 0.75 };

    let any_degraded = tool_results
        .values()
        .any(|result| result.status != StepStatus::Ok);
    if any_degraded { base.min(0.4) } else { base }
}

fn degraded_notes(tool_results: &BTreeMap<String, ToolResult>) -> Vec<(StepStatus, String)> {
    tool_results
        .values()
        .filter(|result| result.status != StepStatus::Ok)
        .map(|result| {
            let detail = result
                .error_message()
                .or_else(|| result.payload.get("skipped").and_then(Value::as_str))
                .unwrap_or("unavailable");
            (result.status, format!("{} ({detail})", result.step_id))
        })
        .collect()
}

/// Minimal templated response from the highest-confidence successful
/// result, used when narration is unavailable.
fn fallback_text(
    request: &str,
    tool_results: &BTreeMap<String, ToolResult>,
    specialist_results: &BTreeMap<String, VerificationResult>,
) -> String {
    let best = tool_results
        .values()
        .filter(|result| result.is_ok())
        .find(|result| result.payload.get("calculation").is_some())
        .or_else(|| {
            tool_results.values().find(|result| {
                result.is_ok()
                    && result.payload.as_object().is_some_and(|obj| {
                        // Finalization markers carry no presentable data.
                        !obj.is_empty() && !obj.contains_key("finalized")
                    })
            })
        });

    let mut text = match best {
        Some(result) => {
            let body = result
                .payload
                .get("calculation")
                .and_then(Value::as_str)
                .map_or_else(|| result.payload.to_string(), ToString::to_string);
            format!("Here is what I computed for \"{request}\": {body}")
        }
        None => format!(
            "I couldn't produce a reliable answer for \"{request}\" from the available steps."
        ),
    };

    if let Some(correction) = specialist_results
        .values()
        .find_map(|verification| verification.corrected_payload.as_ref())
    {
        text.push_str(&format!("\nVerified correction applied: {correction}"));
    }

    text
}

/// Citation numbers referenced as `[n]` in the prose. When the prose cites
/// nothing explicitly, every collected citation is reported as used so the
/// caller can still render a source list.
fn referenced_citations(text: &str, citation_count: usize) -> Vec<usize> {
    let mut used = Vec::new();
    let bytes = text.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'[' {
            let close = text[idx + 1..].find(']').map(|offset| idx + 1 + offset);
            if let Some(close) = close {
                if let Ok(number) = text[idx + 1..close].parse::<usize>() {
                    if number >= 1 && number <= citation_count && !used.contains(&number) {
                        used.push(number);
                    }
                }
                idx = close + 1;
                continue;
            }
        }
        idx += 1;
    }

    if used.is_empty() {
        (1..=citation_count).collect()
    } else {
        used
    }
}
