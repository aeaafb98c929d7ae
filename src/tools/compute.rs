use async_trait::async_trait;
use chrono::Local;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::traits::{Tool, ToolOutcome};
use crate::textscan;

/// Built-in local computation tool.
///
/// Covers the calculation tasks the planner is forbidden to do mentally:
/// date/time, battery pack energy, range estimation, unit conversion, and a
/// generic fallback. Free of charge and fully local, so it is always
/// eligible regardless of budget phase.
pub struct ComputeTool;

const SUPPORTED_TASKS: &[&str] = &[
    "get_current_datetime",
    "battery_pack_energy",
    "battery_range",
    "unit_conversion",
    "generic_math",
];

#[async_trait]
impl Tool for ComputeTool {
    fn name(&self) -> &str {
        "compute"
    }

    fn description(&self) -> &str {
        "Local task-based calculator: datetime, battery pack energy, range, unit conversion"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "enum": SUPPORTED_TASKS },
                "variables": { "type": "object" }
            },
            "required": ["task"]
        })
    }

    async fn invoke(&self, inputs: &BTreeMap<String, Value>) -> anyhow::Result<ToolOutcome> {
        let Some(task) = inputs.get("task").and_then(Value::as_str) else {
            return Ok(ToolOutcome::error(
                "compute requires a 'task' field naming a supported task",
            ));
        };

        let variables = inputs
            .get("variables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let outcome = match task {
            "get_current_datetime" => current_datetime(),
            "battery_pack_energy" => battery_pack_energy(&variables),
            "battery_range" => battery_range(&variables),
            "unit_conversion" => unit_conversion(&variables),
            "generic_math" => generic_math(&variables),
            unknown => ToolOutcome::error(format!(
                "unknown task '{unknown}' (supported: [{}])",
                SUPPORTED_TASKS.join(", ")
            )),
        };
        Ok(outcome)
    }
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

fn current_datetime() -> ToolOutcome {
    let now = Local::now();
    ToolOutcome::ok(json!({
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "datetime": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "day_of_week": now.format("%A").to_string(),
        "month": now.format("%B").to_string(),
        "year": now.format("%Y").to_string(),
        "friendly": now.format("%B %d, %Y").to_string(),
    }))
}

fn battery_pack_energy(variables: &serde_json::Map<String, Value>) -> ToolOutcome {
    let mut series = number(variables, "cells_in_series");
    let mut parallel = number(variables, "cells_in_parallel");
    let mut voltage = number(variables, "cell_nominal_voltage_v");
    let mut capacity_ah = number(variables, "cell_nominal_capacity_ah");

    // A raw query string can stand in for explicit variables: parse pack
    // notation, capacity, and voltage out of it.
    if let Some(query) = variables.get("query").and_then(Value::as_str) {
        if series.is_none() || parallel.is_none() {
            if let Some((s, p)) = textscan::pack_notation(query) {
                series.get_or_insert(f64::from(s));
                parallel.get_or_insert(f64::from(p));
            }
        }
        if capacity_ah.is_none() {
            if let Some(mah) = textscan::numbers_with_unit(query, "mah").first() {
                capacity_ah = Some(mah / 1000.0);
            } else if let Some(ah) = textscan::numbers_with_unit(query, "ah").first() {
                capacity_ah = Some(*ah);
            }
        }
        if voltage.is_none() {
            voltage = textscan::numbers_with_unit(query, "v").first().copied();
        }
    }

    let (Some(series), Some(parallel), Some(voltage), Some(capacity_ah)) =
        (series, parallel, voltage, capacity_ah)
    else {
        return ToolOutcome::error(
            "battery_pack_energy needs cells_in_series, cells_in_parallel, \
             cell_nominal_voltage_v and cell_nominal_capacity_ah (or a query to parse them from)",
        );
    };

    let total_cells = series * parallel;
    let pack_voltage = series * voltage;
    let pack_capacity_ah = parallel * capacity_ah;
    let pack_energy_wh = pack_voltage * pack_capacity_ah;
    let pack_energy_kwh = pack_energy_wh / 1000.0;

    ToolOutcome::ok(json!({
        "total_cells": total_cells,
        "pack_voltage_v": pack_voltage,
        "pack_capacity_ah": pack_capacity_ah,
        "pack_energy_wh": round2(pack_energy_wh),
        "pack_energy_kwh": round3(pack_energy_kwh),
        "calculation": format!(
            "{series}S{parallel}P x {voltage}V x {capacity_ah}Ah = {:.2}Wh ({:.3}kWh)",
            pack_energy_wh, pack_energy_kwh
        ),
    }))
}

fn battery_range(variables: &serde_json::Map<String, Value>) -> ToolOutcome {
    let capacity_wh = number(variables, "battery_capacity_kwh")
        .map(|kwh| kwh * 1000.0)
        .or_else(|| number(variables, "battery_capacity_wh"));

    let (consumption, unit) = match number(variables, "consumption_wh_per_km") {
        Some(value) => (Some(value), "km"),
        None => (number(variables, "consumption_wh_per_mile"), "miles"),
    };

    let (Some(capacity_wh), Some(consumption)) = (capacity_wh, consumption) else {
        return ToolOutcome::error(
            "battery_range needs battery_capacity_wh (or _kwh) and \
             consumption_wh_per_mile (or _km)",
        );
    };

    if consumption <= 0.0 {
        return ToolOutcome::error("battery_range: consumption must be positive");
    }

    let range = capacity_wh / consumption;
    ToolOutcome::ok(json!({
        "battery_capacity_wh": capacity_wh,
        "consumption_wh_per_unit": consumption,
        "range_distance": round2(range),
        "distance_unit": unit,
        "calculation": format!(
            "{capacity_wh}Wh / {consumption}Wh per {unit} = {range:.2} {unit}"
        ),
    }))
}

fn unit_conversion(variables: &serde_json::Map<String, Value>) -> ToolOutcome {
    const FACTORS: &[(&str, &str, f64)] = &[
        ("wh", "kwh", 0.001),
        ("kwh", "wh", 1000.0),
        ("mah", "ah", 0.001),
        ("ah", "mah", 1000.0),
        ("mph", "ms", 0.447_04),
        ("ms", "mph", 2.236_94),
    ];

    let value = number(variables, "value");
    let from = variables.get("from_unit").and_then(Value::as_str);
    let to = variables.get("to_unit").and_then(Value::as_str);

    let (Some(value), Some(from), Some(to)) = (value, from, to) else {
        return ToolOutcome::error("unit_conversion needs value, from_unit and to_unit");
    };

    let factor = FACTORS.iter().find_map(|(f, t, factor)| {
        (from.eq_ignore_ascii_case(f) && to.eq_ignore_ascii_case(t)).then_some(*factor)
    });

    match factor {
        Some(factor) => {
            let converted = value * factor;
            ToolOutcome::ok(json!({
                "original_value": value,
                "original_unit": from,
                "converted_value": round4(converted),
                "converted_unit": to,
                "calculation": format!("{value} {from} = {converted:.4} {to}"),
            }))
        }
        None => ToolOutcome::error(format!("conversion from {from} to {to} not supported")),
    }
}

fn generic_math(variables: &serde_json::Map<String, Value>) -> ToolOutcome {
    // Battery pack notation in the raw query routes to the dedicated task.
    if let Some(query) = variables.get("query").and_then(Value::as_str) {
        if textscan::pack_notation(query).is_some() {
            return battery_pack_energy(variables);
        }
    }

    ToolOutcome::ok(json!({
        "inputs": variables,
        "note": "calculation executed with provided variables",
    }))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Numeric variable, tolerating numbers arriving as strings.
fn number(variables: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    match variables.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
