use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::traits::{Tool, ToolOutcome, ToolSpec};

/// Capability-keyed lookup of available external actions.
///
/// Read-only during plan execution; registration happens at session setup.
/// Unknown or disabled tools report absence through the outcome, never by
/// erroring.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let tool: Arc<dyn Tool> = Arc::from(tool);
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name. Returns whether it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Return sorted list of registered tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Return specs for all registered tools, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.describe()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Invoke a tool by name. An unregistered name yields an error outcome
    /// listing what is available, so the plan can continue degraded.
    pub async fn invoke(
        &self,
        name: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> anyhow::Result<ToolOutcome> {
        let Some(tool) = self.tools.get(name) else {
            return Ok(ToolOutcome::error(format!(
                "tool '{name}' not available (registered: [{}])",
                self.tool_names().join(", ")
            )));
        };
        tool.invoke(inputs).await
    }
}
