//! Tool registry — stores tools by name, filters them per bot, and
//! executes calls under a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crewbot_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::{validate_required, Tool};

/// Default per-tool execution timeout.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Stores tools keyed by name and dispatches calls.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry with the default timeout.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Override the per-tool timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name. Returns the removed tool, if any.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(name);
        if removed.is_some() {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// LLM-facing definitions for all registered tools.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Definitions restricted to a bot's permitted tool names.
    pub fn get_definitions_for(&self, permitted: &[String]) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| permitted.iter().any(|p| p == t.name()))
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name with the given parameters.
    ///
    /// The LLM always gets a `String` back, even on failure: unknown
    /// tools, argument validation failures, execution errors, and
    /// timeouts all become error text the model can react to.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return format!("Error: Tool '{name}' not found");
            }
        };

        if let Err(e) = validate_required(&tool.parameters(), &params) {
            warn!(tool = name, error = %e, "invalid tool arguments");
            return format!("Error executing {name}: {e}");
        }

        let timeout = tool.timeout().unwrap_or(self.timeout);
        match tokio::time::timeout(timeout, tool.execute(params)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}")
            }
            Err(_) => {
                warn!(tool = name, timeout = ?timeout, "tool execution timed out");
                format!("Error executing {name}: timed out after {:?}", timeout)
            }
        }
    }

    /// Execute only if the tool is in the bot's permitted set.
    pub async fn execute_for(
        &self,
        permitted: &[String],
        name: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> String {
        if !permitted.iter().any(|p| p == name) {
            warn!(tool = name, "tool not permitted for this bot");
            return format!("Error: Tool '{name}' is not available to this bot");
        }
        self.execute(name, params).await
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
