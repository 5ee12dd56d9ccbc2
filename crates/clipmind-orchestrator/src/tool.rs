use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use clipmind_llm::{ToolCall, ToolDefinition};

// ---------------------------------------------------------------------------
// ToolResult
// ---------------------------------------------------------------------------

/// The caller's answer to one tool call, identified by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            result,
            is_error: false,
        }
    }

    pub fn error(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            result: json!(message.into()),
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool / ToolExecutor
// ---------------------------------------------------------------------------

/// Trait for tools the application exposes to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> clipmind_types::Result<serde_json::Value>;
}

/// Produces a result for a tool call. Never fails: errors become error results.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// Ordered registry of tools. Definitions are offered to the model in
/// registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool, replacing any tool of the same name in place.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.definition().name;
        match self.tools.iter().position(|t| t.definition().name == name) {
            Some(index) => self.tools[index] = Box::new(tool),
            None => self.tools.push(Box::new(tool)),
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.definition().name != name);
        self.tools.len() != before
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.definition().name == name)
            .map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        tracing::debug!(tool = %call.name, id = %call.id, "Executing tool call");
        let Some(tool) = self.get(&call.name) else {
            tracing::debug!(tool = %call.name, "Unknown tool");
            return ToolResult::error(&call.name, format!("Unknown tool: {}", call.name));
        };
        match tool.execute(call.arguments.clone()).await {
            Ok(result) => ToolResult::ok(&call.name, result),
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::error(&call.name, format!("Error: {e}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
