//! Capability handler trait and results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use steward_ai::Content;
use tokio_util::sync::CancellationToken;

/// Result of a capability invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Content to return to the backend
    pub content: Vec<Content>,
    /// Whether the invocation failed
    pub is_error: bool,
    /// Optional structured details for event subscribers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            details: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
            details: None,
        }
    }

    /// Pretty-print a JSON value as a successful result
    pub fn json(value: &serde_json::Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text(text).with_details(value.clone())
    }

    /// Add details to the result
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A named, schema-described operation the agent may invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Capability name (used in API calls), unique within a registry
    fn name(&self) -> &str;

    /// Description shown to the backend
    fn description(&self) -> &str;

    /// JSON Schema for arguments
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the capability. Failures are reported through `ToolResult::error`.
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to the descriptor sent to the backend
pub fn to_api_tool(tool: &dyn Tool) -> steward_ai::Tool {
    steward_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}
