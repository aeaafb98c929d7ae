use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::textscan::numbers_with_unit;

// ─── Report ──────────────────────────────────────────────────────────────────

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
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    None,
    Medium,
    High,
}

/// Verdict from a plausibility pass over computed values.
///
/// Consumed by the executor's escalation rule; deliberately not prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanityReport {
    pub suspicious: bool,
    pub issues: Vec<String>,
    pub severity: Severity,
}

impl SanityReport {
    pub fn clean() -> Self {
        Self {
            suspicious: false,
            issues: Vec::new(),
            severity: Severity::None,
        }
    }

    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "suspicious": self.suspicious,
            "issues": self.issues,
            "severity": self.severity.to_string(),
        })
    }

    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

// ─── Checker ─────────────────────────────────────────────────────────────────

/// Detects impossible or wildly implausible values in computed output
/// before they reach the user. Bounded, local, and free: pure pattern
/// scans against known physical limits.
pub struct SanityChecker;

// (min, max) plausible ranges for common quantities.
const LIMIT_21700_CAPACITY_AH: (f64, f64) = (2.5, 6.0);
const LIMIT_18650_CAPACITY_AH: (f64, f64) = (1.5, 3.6);
const LIMIT_EBIKE_RANGE_MILES: (f64, f64) = (10.0, 100.0);
const LIMIT_ESCOOTER_RANGE_MILES: (f64, f64) = (5.0, 60.0);
const LIMIT_PACK_ENERGY_WH: (f64, f64) = (100.0, 10_000.0);

impl SanityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check `response_text` (typically concatenated upstream payloads)
    /// against the request for implausible values.
    pub fn check(&self, response_text: &str, query_text: &str) -> SanityReport {
        let mut issues = Vec::new();

        issues.extend(check_cell_capacities(response_text, query_text));
        issues.extend(check_range_claims(response_text, query_text));
        issues.extend(check_energy_values(response_text));

        let severity = classify_severity(&issues);
        if severity >= Severity::High {
            tracing::warn!(issue_count = issues.len(), "Sanity check flagged output");
        }

        SanityReport {
            suspicious: !issues.is_empty(),
            issues,
            severity,
        }
    }

    /// Whether a report is severe enough to force specialist escalation.
    pub fn should_escalate(report: &SanityReport) -> bool {
        report.suspicious && report.severity == Severity::High
    }
}

impl Default for SanityChecker {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Checks ──────────────────────────────────────────────────────────────────

fn check_cell_capacities(response: &str, query: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let combined_mentions =
        |needle: &str| query.contains(needle) || response.contains(needle);

    if combined_mentions("21700") {
        let (min, max) = LIMIT_21700_CAPACITY_AH;
        for capacity in numbers_with_unit(response, "ah") {
            if capacity > max {
                issues.push(format!(
                    "unrealistic 21700 cell capacity: {capacity}Ah (plausible {min}-{max}Ah; \
                     highest production cells are ~5.5Ah)"
                ));
            } else if capacity < min {
                issues.push(format!(
                    "suspiciously low 21700 cell capacity: {capacity}Ah (typical {min}-{max}Ah)"
                ));
            }
        }
    }

    if combined_mentions("18650") {
        let (min, max) = LIMIT_18650_CAPACITY_AH;
        for capacity in numbers_with_unit(response, "ah") {
            if capacity > max {
                issues.push(format!(
                    "unrealistic 18650 cell capacity: {capacity}Ah (plausible {min}-{max}Ah)"
                ));
            }
        }
    }

    issues
}

fn check_range_claims(response: &str, query: &str) -> Vec<String> {
    let query_lower = query.to_lowercase();
    let is_ebike = ["e-bike", "ebike", "electric bike"]
        .iter()
        .any(|word| query_lower.contains(word));
    let is_scooter = ["scooter", "e-scooter", "escooter"]
        .iter()
        .any(|word| query_lower.contains(word));

    if !is_ebike && !is_scooter {
        return Vec::new();
    }

    let ((min, max), vehicle) = if is_ebike {
        (LIMIT_EBIKE_RANGE_MILES, "e-bike")
    } else {
        (LIMIT_ESCOOTER_RANGE_MILES, "e-scooter")
    };

    let mut miles: Vec<f64> = numbers_with_unit(response, "miles");
    miles.extend(numbers_with_unit(response, "mile"));
    miles.extend(numbers_with_unit(response, "mi"));

    miles
        .into_iter()
        .filter(|range| *range > max)
        .map(|range| {
            format!(
                "unrealistic {vehicle} range: {range} miles (typical {min}-{max}); \
                 double-check battery capacity and motor power"
            )
        })
        .collect()
}

fn check_energy_values(response: &str) -> Vec<String> {
    let (min, max) = LIMIT_PACK_ENERGY_WH;
    numbers_with_unit(response, "wh")
        .into_iter()
        .filter(|wh| *wh > max)
        .map(|wh| {
            format!(
                "unusually high battery capacity: {wh}Wh; verify the calculation \
                 (typical consumer range {min}-{max}Wh)"
            )
        })
        .collect()
}

fn classify_severity(issues: &[String]) -> Severity {
    if issues.is_empty() {
        return Severity::None;
    }
    let any_unrealistic = |topic: &str| {
        issues
            .iter()
            .any(|issue| issue.contains(topic) && issue.contains("unrealistic"))
    };
    if any_unrealistic("cell") || any_unrealistic("range") || issues.len() > 1 {
        Severity::High
    } else {
        Severity::Medium
    }
}
