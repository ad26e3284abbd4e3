//! Message expansion and human-in-the-loop capabilities

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use std::io::{BufRead, Write};
use std::sync::Arc;
use steward_agent::blob::SharedBlobStore;
use steward_agent::CapabilityProvider;
use steward_agent::tool::{BoxedTool, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

use super::browser::BrowserClient;

/// Source of answers from the human operator
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Show `prompt` and wait for one line of input
    async fn prompt(&self, prompt: &str) -> std::io::Result<String>;
}

/// Reads answers from the process's stdin
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn prompt(&self, prompt: &str) -> std::io::Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "\n{}", prompt)?;
            write!(stdout, "> ")?;
            stdout.flush()?;
            drop(stdout);

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

/// Contributes expand_message, ask and browser_takeover
pub struct MiscProvider {
    store: SharedBlobStore,
    prompter: Arc<dyn Prompter>,
    browser: Arc<BrowserClient>,
}

impl MiscProvider {
    pub fn new(store: SharedBlobStore, prompter: Arc<dyn Prompter>, browser: Arc<BrowserClient>) -> Self {
        Self {
            store,
            prompter,
            browser,
        }
    }
}

impl CapabilityProvider for MiscProvider {
    fn name(&self) -> &str {
        "misc"
    }

    fn capabilities(&self) -> Vec<BoxedTool> {
        vec![
            Arc::new(ExpandMessageTool(self.store.clone())),
            Arc::new(AskTool(self.prompter.clone())),
            Arc::new(BrowserTakeoverTool {
                prompter: self.prompter.clone(),
                browser: self.browser.clone(),
            }),
        ]
    }
}

/// Text of a parked blob: a stored message, a bare string, or raw JSON
fn stored_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => match serde_json::from_value::<steward_ai::Message>(other.clone()) {
            Ok(message) => message.text(),
            Err(_) => other.to_string(),
        },
    }
}

struct ExpandMessageTool(SharedBlobStore);

#[async_trait]
impl Tool for ExpandMessageTool {
    fn name(&self) -> &str {
        "expand_message"
    }

    fn description(&self) -> &str {
        "Expand a message from the earlier conversation that was truncated. Pass the message_id shown in the truncated message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "message_id": {
                    "type": "string",
                    "description": "The ID of the message to expand"
                }
            },
            "required": ["message_id"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let Some(message_id) = arguments.get("message_id").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing 'message_id' argument");
        };

        let text = self.0.get(message_id).map(stored_text).unwrap_or_default();
        if text.is_empty() {
            ToolResult::text(format!("The message for {} is empty", message_id))
        } else {
            ToolResult::text(text)
        }
    }
}

struct AskTool(Arc<dyn Prompter>);

#[async_trait]
impl Tool for AskTool {
    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for the response. Use it when user input is essential to proceed: ambiguous requirements, confirming high-impact changes, choosing between options, or when research turns up several matching entities. Provide clear context and options when applicable."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Question for the user: what you need, why, and the available options"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(text) = arguments.get("text").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing 'text' argument");
        };

        tokio::select! {
            _ = cancel.cancelled() => ToolResult::error("Question cancelled"),
            answer = self.0.prompt(text) => match answer {
                Ok(answer) => ToolResult::text(answer),
                Err(e) => ToolResult::error(format!("Failed to read answer: {}", e)),
            },
        }
    }
}

struct BrowserTakeoverTool {
    prompter: Arc<dyn Prompter>,
    browser: Arc<BrowserClient>,
}

#[async_trait]
impl Tool for BrowserTakeoverTool {
    fn name(&self) -> &str {
        "browser_takeover"
    }

    fn description(&self) -> &str {
        "Hand the browser to the user for steps automation cannot handle, such as logins, CAPTCHAs or anti-bot checks. Use as a last resort. Returns the browser state once the user is done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Instructions for the user: why takeover is needed and which steps to take"
                }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(text) = arguments.get("text").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing 'text' argument");
        };

        let prompt = format!("{}\nPress enter to continue...", text);
        let waited = tokio::select! {
            _ = cancel.cancelled() => return ToolResult::error("Takeover cancelled"),
            result = self.prompter.prompt(&prompt) => result,
        };
        if let Err(e) = waited {
            return ToolResult::error(format!("Failed to wait for the user: {}", e));
        }

        match self
            .browser
            .execute("get_browser_state", json!({}), Method::GET)
            .await
        {
            Ok(state) => ToolResult::text(state),
            Err(e) => ToolResult::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use steward_agent::MemoryBlobStore;

    /// Answers with a fixed line and records every prompt
    struct Canned {
        answer: &'static str,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Prompter for Canned {
        async fn prompt(&self, prompt: &str) -> std::io::Result<String> {
            self.prompts.lock().push(prompt.to_string());
            Ok(self.answer.to_string())
        }
    }

    fn setup() -> (SharedBlobStore, Arc<Canned>, Vec<BoxedTool>) {
        let store: SharedBlobStore = Arc::new(MemoryBlobStore::new());
        let canned = Arc::new(Canned {
            answer: "blue",
            prompts: Mutex::new(Vec::new()),
        });
        let browser = Arc::new(BrowserClient::new("http://127.0.0.1:9"));
        let tools = MiscProvider::new(store.clone(), canned.clone(), browser).capabilities();
        (store, canned, tools)
    }

    async fn call(tools: &[BoxedTool], name: &str, args: serde_json::Value) -> ToolResult {
        let tool = tools.iter().find(|t| t.name() == name).unwrap();
        tool.execute("call_1", args, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_expand_stored_message() {
        let (store, _, tools) = setup();
        let message = steward_ai::Message::user("the full original text");
        let id = message.id().to_string();
        store.set(&id, serde_json::to_value(&message).unwrap()).unwrap();

        let result = call(&tools, "expand_message", json!({"message_id": id})).await;
        assert_eq!(result.text_content(), "the full original text");
    }

    #[tokio::test]
    async fn test_expand_missing_message() {
        let (_, _, tools) = setup();
        let result = call(&tools, "expand_message", json!({"message_id": "m-1"})).await;
        assert!(!result.is_error);
        assert_eq!(result.text_content(), "The message for m-1 is empty");
    }

    #[test]
    fn test_stored_text_variants() {
        assert_eq!(stored_text(json!("plain")), "plain");
        assert_eq!(stored_text(json!(null)), "");
        assert_eq!(stored_text(json!({"k": 1})), r#"{"k":1}"#);
    }

    #[tokio::test]
    async fn test_ask_returns_answer() {
        let (_, canned, tools) = setup();
        let result = call(&tools, "ask", json!({"text": "Favourite colour?"})).await;
        assert_eq!(result.text_content(), "blue");
        assert_eq!(canned.prompts.lock().as_slice(), ["Favourite colour?"]);
    }

    #[tokio::test]
    async fn test_takeover_prompts_then_reports_unreachable_browser() {
        let (_, canned, tools) = setup();
        let result = call(&tools, "browser_takeover", json!({"text": "Solve the CAPTCHA"})).await;
        assert!(result.is_error);
        assert!(canned.prompts.lock()[0].ends_with("Press enter to continue..."));
    }
}
