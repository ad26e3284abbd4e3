//! Browser automation through an external HTTP service
//!
//! Every capability maps to one endpoint under the service's base URL. Actions
//! are JSON POSTs; `get_browser_state` is a GET.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP client bound to the automation service
pub struct BrowserClient {
    client: Client,
    base_url: String,
}

impl BrowserClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Send one action and return the response body
    pub async fn execute(&self, endpoint: &str, params: Value, method: Method) -> Result<String, String> {
        let url = self.url_for(endpoint);
        let has_params = params.as_object().is_some_and(|m| !m.is_empty());

        let request = if method == Method::GET {
            let request = self.client.get(&url);
            match params.as_object() {
                Some(map) if has_params => request.query(map),
                _ => request,
            }
        } else if has_params {
            self.client.request(method, &url).json(&params)
        } else {
            self.client.request(method, &url)
        };

        let response = request
            .send()
            .await
            .map_err(|e| format!("Browser service request failed: {}", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read browser service response: {}", e))?;
        if !status.is_success() {
            return Err(format!("Browser service error ({}): {}", status, body));
        }
        tracing::debug!(endpoint, "browser automation request completed");
        Ok(body)
    }
}

/// How an action's arguments become request parameters
#[derive(Clone, Copy)]
enum Params {
    /// Forward the listed argument names verbatim
    Forward(&'static [&'static str]),
    /// Either both element selectors or all four coordinates
    DragDrop,
}

/// Static description of one browser action
struct Action {
    name: &'static str,
    endpoint: &'static str,
    description: &'static str,
    method: Method,
    schema: fn() -> Value,
    params: Params,
}

fn no_args() -> Value {
    json!({"type": "object", "properties": {}})
}

fn index_arg(what: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "index": {"type": "integer", "description": what}
        },
        "required": ["index"]
    })
}

fn page_id_arg(what: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "page_id": {"type": "integer", "description": what}
        },
        "required": ["page_id"]
    })
}

fn scroll_arg() -> Value {
    json!({
        "type": "object",
        "properties": {
            "amount": {
                "type": "integer",
                "description": "Pixel amount to scroll (if not specified, scrolls one page)"
            }
        }
    })
}

fn actions() -> Vec<Action> {
    vec![
        Action {
            name: "browser_navigate_to",
            endpoint: "navigate_to",
            description: "Navigate to a specific url",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {"url": {"type": "string", "description": "The url to navigate to"}},
                    "required": ["url"]
                })
            },
            params: Params::Forward(&["url"]),
        },
        Action {
            name: "browser_go_back",
            endpoint: "go_back",
            description: "Navigate back in browser history",
            method: Method::POST,
            schema: no_args,
            params: Params::Forward(&[]),
        },
        Action {
            name: "browser_wait",
            endpoint: "wait",
            description: "Wait for the specified number of seconds",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "seconds": {"type": "integer", "description": "Number of seconds to wait (default 3)"}
                    }
                })
            },
            params: Params::Forward(&["seconds"]),
        },
        Action {
            name: "browser_click_element",
            endpoint: "click_element",
            description: "Click on an element by index",
            method: Method::POST,
            schema: || index_arg("The index of the element to click"),
            params: Params::Forward(&["index"]),
        },
        Action {
            name: "browser_input_text",
            endpoint: "input_text",
            description: "Input text into an element",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer", "description": "The index of the element to input text into"},
                        "text": {"type": "string", "description": "The text to input"}
                    },
                    "required": ["index", "text"]
                })
            },
            params: Params::Forward(&["index", "text"]),
        },
        Action {
            name: "browser_send_keys",
            endpoint: "send_keys",
            description: "Send keyboard keys",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "keys": {"type": "string", "description": "The keys to send (e.g., 'Enter', 'Escape', 'Control+a')"}
                    },
                    "required": ["keys"]
                })
            },
            params: Params::Forward(&["keys"]),
        },
        Action {
            name: "browser_switch_tab",
            endpoint: "switch_tab",
            description: "Switch to a different browser tab",
            method: Method::POST,
            schema: || page_id_arg("The ID of the tab to switch to"),
            params: Params::Forward(&["page_id"]),
        },
        Action {
            name: "browser_close_tab",
            endpoint: "close_tab",
            description: "Close a browser tab",
            method: Method::POST,
            schema: || page_id_arg("The ID of the tab to close"),
            params: Params::Forward(&["page_id"]),
        },
        Action {
            name: "browser_scroll_down",
            endpoint: "scroll_down",
            description: "Scroll down the page",
            method: Method::POST,
            schema: scroll_arg,
            params: Params::Forward(&["amount"]),
        },
        Action {
            name: "browser_scroll_up",
            endpoint: "scroll_up",
            description: "Scroll up the page",
            method: Method::POST,
            schema: scroll_arg,
            params: Params::Forward(&["amount"]),
        },
        Action {
            name: "browser_scroll_to_text",
            endpoint: "scroll_to_text",
            description: "Scroll to specific text on the page",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string", "description": "The text to scroll to"}},
                    "required": ["text"]
                })
            },
            params: Params::Forward(&["text"]),
        },
        Action {
            name: "browser_get_dropdown_options",
            endpoint: "get_dropdown_options",
            description: "Get all options from a dropdown element",
            method: Method::POST,
            schema: || index_arg("The index of the dropdown element"),
            params: Params::Forward(&["index"]),
        },
        Action {
            name: "browser_select_dropdown_option",
            endpoint: "select_dropdown_option",
            description: "Select an option from a dropdown by text",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "index": {"type": "integer", "description": "The index of the dropdown element"},
                        "text": {"type": "string", "description": "The text of the option to select"}
                    },
                    "required": ["index", "text"]
                })
            },
            params: Params::Forward(&["index", "text"]),
        },
        Action {
            name: "browser_drag_drop",
            endpoint: "drag_drop",
            description: "Perform drag and drop between two elements or two coordinates",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "element_source": {"type": "string", "description": "The source element selector"},
                        "element_target": {"type": "string", "description": "The target element selector"},
                        "coord_source_x": {"type": "integer", "description": "The source X coordinate"},
                        "coord_source_y": {"type": "integer", "description": "The source Y coordinate"},
                        "coord_target_x": {"type": "integer", "description": "The target X coordinate"},
                        "coord_target_y": {"type": "integer", "description": "The target Y coordinate"}
                    }
                })
            },
            params: Params::DragDrop,
        },
        Action {
            name: "browser_click_coordinates",
            endpoint: "click_coordinates",
            description: "Click at specific X,Y coordinates on the page",
            method: Method::POST,
            schema: || {
                json!({
                    "type": "object",
                    "properties": {
                        "x": {"type": "integer", "description": "The X coordinate to click"},
                        "y": {"type": "integer", "description": "The Y coordinate to click"}
                    },
                    "required": ["x", "y"]
                })
            },
            params: Params::Forward(&["x", "y"]),
        },
        Action {
            name: "get_browser_state",
            endpoint: "get_browser_state",
            description: "Get the current state of the page",
            method: Method::GET,
            schema: no_args,
            params: Params::Forward(&[]),
        },
    ]
}

/// Build request parameters from the model's arguments
fn build_params(params: Params, arguments: &Value) -> Result<Value, String> {
    let mut out = serde_json::Map::new();
    match params {
        Params::Forward(names) => {
            for name in names {
                if let Some(value) = arguments.get(*name).filter(|v| !v.is_null()) {
                    out.insert((*name).to_string(), value.clone());
                }
            }
        }
        Params::DragDrop => {
            let selector = |key: &str| {
                arguments
                    .get(key)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
            };
            let coords = ["coord_source_x", "coord_source_y", "coord_target_x", "coord_target_y"];

            if let (Some(source), Some(target)) = (selector("element_source"), selector("element_target")) {
                out.insert("element_source".into(), json!(source));
                out.insert("element_target".into(), json!(target));
            } else if coords.iter().all(|k| arguments.get(*k).is_some_and(|v| v.is_i64() || v.is_u64())) {
                for key in coords {
                    if let Some(value) = arguments.get(key) {
                        out.insert(key.to_string(), value.clone());
                    }
                }
            } else {
                return Err(
                    "Must provide either element selectors or coordinates for drag and drop".to_string(),
                );
            }
        }
    }
    Ok(Value::Object(out))
}

/// One browser action exposed as a capability
pub struct BrowserActionTool {
    action: Action,
    client: Arc<BrowserClient>,
}

#[async_trait]
impl Tool for BrowserActionTool {
    fn name(&self) -> &str {
        self.action.name
    }

    fn description(&self) -> &str {
        self.action.description
    }

    fn parameters_schema(&self) -> Value {
        (self.action.schema)()
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let params = match build_params(self.action.params, &arguments) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        tracing::debug!(action = self.action.name, %params, "browser action");

        let call = self
            .client
            .execute(self.action.endpoint, params, self.action.method.clone());
        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Browser action cancelled"),
            result = call => match result {
                Ok(body) => ToolResult::text(body),
                Err(e) => ToolResult::error(e),
            },
        }
    }
}

/// Contributes every browser action
pub struct BrowserProvider {
    client: Arc<BrowserClient>,
}

impl BrowserProvider {
    pub fn new(client: Arc<BrowserClient>) -> Self {
        Self { client }
    }
}

impl CapabilityProvider for BrowserProvider {
    fn name(&self) -> &str {
        "browser"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        actions()
            .into_iter()
            .map(|action| {
                Arc::new(BrowserActionTool {
                    action,
                    client: self.client.clone(),
                }) as BoxedTool
            })
            .collect()
    }
}
