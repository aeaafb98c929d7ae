#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tiller::connector::{Connector, GenerationRequest};
use tiller::tools::{Tool, ToolOutcome};

// ─── Connectors ──────────────────────────────────────────────────────────────

/// Connector that replays a scripted queue of responses and records every
/// prompt it was asked to generate.
pub struct ScriptedConnector {
    name: String,
    responses: Mutex<VecDeque<Result<String, String>>>,
    pub seen_prompts: Mutex<Vec<String>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    pub fn new(name: &str, responses: Vec<Result<String, String>>) -> Self {
        Self {
            name: name.to_string(),
            responses: Mutex::new(responses.into()),
            seen_prompts: Mutex::new(Vec::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn always(name: &str, response: &str) -> Self {
        Self::new(name, vec![Ok(response.to_string())])
    }

    /// Share the call log, e.g. to assert which tier was consulted.
    pub fn with_call_log(mut self, calls: Arc<Mutex<Vec<String>>>) -> Self {
        self.calls = calls;
        self
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
        self.seen_prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.prompt.clone());
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(self.name.clone());

        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match responses.pop_front() {
            // The last scripted response repeats forever.
            None => anyhow::bail!("script exhausted"),
            Some(Ok(text)) => {
                if responses.is_empty() {
                    responses.push_back(Ok(text.clone()));
                }
                Ok(text)
            }
            Some(Err(message)) => anyhow::bail!(message),
        }
    }
}

// ─── Tools ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Finished,
}

pub type EventLog = Arc<Mutex<Vec<(String, Phase, Instant)>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events_for(log: &EventLog, name: &str, phase: Phase) -> Vec<Instant> {
    log.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .iter()
        .filter(|(event_name, event_phase, _)| event_name == name && *event_phase == phase)
        .map(|(_, _, at)| *at)
        .collect()
}

/// Tool that records start/finish instants, optionally sleeps, optionally
/// waits on a barrier (to prove two steps were in flight together), and
/// returns a fixed payload.
pub struct RecordingTool {
    name: String,
    delay: Duration,
    barrier: Option<Arc<tokio::sync::Barrier>>,
    log: EventLog,
    payload: Value,
}

impl RecordingTool {
    pub fn new(name: &str, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            barrier: None,
            log,
            payload: json!({ "done": true }),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_barrier(mut self, barrier: Arc<tokio::sync::Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    fn record(&self, phase: Phase) {
        self.log
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((self.name.clone(), phase, Instant::now()));
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool that records execution order"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn invoke(&self, inputs: &BTreeMap<String, Value>) -> anyhow::Result<ToolOutcome> {
        self.record(Phase::Started);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.record(Phase::Finished);

        let mut payload = self.payload.clone();
        if let Some(object) = payload.as_object_mut() {
            object.insert("inputs".to_string(), json!(inputs));
        }
        Ok(ToolOutcome::ok(payload))
    }
}

/// Scripted verification responses for specialist connectors.
pub fn verification_json(verdict: &str, confidence: f64) -> String {
    json!({
        "verdict": verdict,
        "explanation": "scripted",
        "confidence": confidence,
    })
    .to_string()
}
