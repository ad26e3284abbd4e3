//! Web search through the Tavily API

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

const TAVILY_SEARCH_URL: &str = "https://api.tavily.com/search";
const DEFAULT_NUM_RESULTS: u64 = 20;
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Contributes `web_search`
pub struct WebSearchProvider {
    api_key: Option<String>,
}

impl WebSearchProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl CapabilityProvider for WebSearchProvider {
    fn name(&self) -> &str {
        "web_search"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        vec![Arc::new(WebSearchTool::new(self.api_key.clone()))]
    }
}

pub struct WebSearchTool {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: TAVILY_SEARCH_URL.to_string(),
        }
    }

    async fn search(&self, api_key: &str, query: &str, num_results: u64) -> Result<serde_json::Value, String> {
        let body = json!({
            "query": query,
            "max_results": num_results,
            "include_images": true,
            "include_answer": "advanced",
            "search_depth": "advanced",
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Search API error ({}): {}", status, text));
        }

        response
            .json()
            .await
            .map_err(|e| format!("Failed to parse search response: {}", e))
    }
}

/// Return the raw response when it carries results or an answer
fn render_response(query: &str, response: serde_json::Value) -> ToolResult {
    let result_count = response
        .get("results")
        .and_then(|r| r.as_array())
        .map(|r| r.len())
        .unwrap_or(0);
    let has_answer = response
        .get("answer")
        .and_then(|a| a.as_str())
        .is_some_and(|a| !a.trim().is_empty());

    tracing::info!(query, results = result_count, has_answer, "web search finished");

    if result_count > 0 || has_answer {
        ToolResult::text(response.to_string()).with_details(response)
    } else {
        ToolResult::text(format!(
            "No search results or answer found for query: '{}'",
            query
        ))
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web using the Tavily API to find relevant and up-to-date information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query. Be specific and include key terms."
                },
                "num_results": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Number of results to return (default 20)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return ToolResult::error("Missing 'query' argument"),
        };
        let num_results = arguments
            .get("num_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_NUM_RESULTS);

        let Some(api_key) = self.api_key.as_deref() else {
            return ToolResult::error(
                "Web search is not configured. Set TAVILY_API_KEY or api_keys.tavily.",
            );
        };

        tracing::info!(query, num_results, "executing web search");

        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Search cancelled"),
            result = self.search(api_key, query, num_results) => match result {
                Ok(response) => render_response(query, response),
                Err(e) => ToolResult::error(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_results() {
        let response = json!({"answer": "", "results": [{"title": "t", "url": "u"}]});
        let result = render_response("rust", response.clone());
        assert!(!result.is_error);
        assert_eq!(result.details, Some(response));
    }

    #[test]
    fn test_render_answer_only() {
        let result = render_response("rust", json!({"answer": "A systems language", "results": []}));
        assert!(result.text_content().contains("A systems language"));
    }

    #[test]
    fn test_render_empty() {
        let result = render_response("nothing", json!({"answer": "  ", "results": []}));
        assert!(!result.is_error);
        assert_eq!(
            result.text_content(),
            "No search results or answer found for query: 'nothing'"
        );
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let tool = WebSearchTool::new(None);
        let result = tool
            .execute("call_1", json!({"query": "rust"}), CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert!(result.text_content().contains("TAVILY_API_KEY"));
    }
}
