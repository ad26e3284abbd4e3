//! OpenAI-compatible Chat Completions provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream},
    types::{
        AssistantMetadata, Content, Context, Message, Model, StopReason, StreamOptions, Usage,
        new_message_id,
    },
};

/// Chat Completions client, usable against any OpenAI-compatible base URL
pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl ChatCompletionsProvider {
    /// Create a provider. Keyless backends such as Ollama pass `None`.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn headers(&self, model: &Model) -> Result<reqwest::header::HeaderMap> {
        use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::InvalidApiKey)?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        for (key, value) in &model.headers {
            if let (Ok(name), Ok(val)) = (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                headers.insert(name, val);
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no base URL configured for model {}",
                model.id
            )));
        }

        let request = build_request(model, context, options);
        let url = format!("{}/chat/completions", model.base_url);
        tracing::debug!(url = %url, messages = request.messages.len(), "opening completion stream");

        let request_builder = self
            .client
            .post(&url)
            .headers(self.headers(model)?)
            .json(&request);

        let mut event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        // Wait for the connection so HTTP failures surface as errors the
        // caller can retry instead of as stream events.
        match event_source.next().await {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(_))) => {
                return Err(Error::UnexpectedResponse(
                    "stream produced data before opening".into(),
                ));
            }
            Some(Err(e)) => {
                event_source.close();
                return Err(map_stream_error(e).await);
            }
            None => return Err(Error::UnexpectedResponse("stream closed before opening".into())),
        }

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

async fn map_stream_error(error: reqwest_eventsource::Error) -> Error {
    use reqwest_eventsource::Error as SseError;

    match error {
        SseError::Transport(e) => Error::Http(e),
        SseError::InvalidStatusCode(status, response) => {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();

            match status.as_u16() {
                401 => Error::InvalidApiKey,
                429 => Error::RateLimited { retry_after },
                code => {
                    let (error_type, message) = match serde_json::from_str::<ApiErrorBody>(&body) {
                        Ok(parsed) => (
                            parsed.error.error_type.unwrap_or_else(|| status_type(code)),
                            parsed.error.message,
                        ),
                        Err(_) => (status_type(code), format!("{} {}", code, body)),
                    };
                    Error::api(error_type, message)
                }
            }
        }
        other => Error::Sse(other.to_string()),
    }
}

fn status_type(code: u16) -> String {
    if code >= 500 {
        "server_error".to_string()
    } else {
        format!("http_{}", code)
    }
}

fn build_request(model: &Model, context: &Context, options: &StreamOptions) -> ChatRequest {
    let messages = context.messages.iter().map(convert_message).collect();

    let tools: Option<Vec<ChatTool>> = if context.tools.is_empty() {
        None
    } else {
        Some(
            context
                .tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function",
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    ChatRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: Some(ChatStreamOptions { include_usage: true }),
        max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
        temperature: options.temperature,
        tool_choice: tools.as_ref().map(|_| serde_json::json!("auto")),
        tools,
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    match msg {
        Message::System { .. } => ChatMessage {
            role: "system",
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::User { .. } => ChatMessage {
            role: "user",
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { content, .. } => {
            let tool_calls: Vec<ChatToolCall> = content
                .iter()
                .filter_map(|c| match c {
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(ChatToolCall {
                        id: id.clone(),
                        call_type: "function",
                        function: ChatFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            let text = msg.text();
            ChatMessage {
                role: "assistant",
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult { tool_call_id, .. } => ChatMessage {
            role: "tool",
            content: Some(msg.text()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
    }
}

/// One tool call being assembled from deltas
#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut calls: Vec<PartialCall> = Vec::new();
        let mut finish_reason: Option<String> = None;
        let mut response_id: Option<String> = None;
        let mut usage = Usage::default();

        yield MessageEvent::Start { message: Message::assistant(vec![]) };

        while let Some(event) = event_source.next().await {
            let msg = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(msg)) => msg,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error { message: format!("SSE error: {}", e) };
                    return;
                }
            };

            if msg.data == "[DONE]" {
                break;
            }

            let chunk: StreamChunk = match serde_json::from_str(&msg.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error { message: format!("Failed to parse chunk: {}", e) };
                    return;
                }
            };

            if response_id.is_none() {
                response_id = chunk.message_id();
            }

            for choice in &chunk.choices {
                if let Some(ref content) = choice.delta.content {
                    if !content.is_empty() {
                        accumulated_text.push_str(content);
                        yield MessageEvent::TextDelta { content_index: 0, delta: content.clone() };
                    }
                }

                for tc in choice.delta.tool_calls.iter().flatten() {
                    let idx = tc.index;
                    while calls.len() <= idx {
                        calls.push(PartialCall::default());
                    }
                    let call = &mut calls[idx];
                    if let Some(ref id) = tc.id {
                        call.id = id.clone();
                    }
                    let Some(ref function) = tc.function else { continue };
                    if let Some(ref name) = function.name {
                        call.name.push_str(name);
                    }
                    // Text occupies slot 0, calls follow it
                    if !call.announced && !call.name.is_empty() {
                        call.announced = true;
                        yield MessageEvent::ToolCallStart {
                            content_index: idx + 1,
                            id: call.id.clone(),
                            name: call.name.clone(),
                        };
                    }
                    if let Some(ref args) = function.arguments {
                        call.arguments.push_str(args);
                        yield MessageEvent::ToolCallDelta { content_index: idx + 1, delta: args.clone() };
                    }
                }

                if let Some(ref reason) = choice.finish_reason {
                    finish_reason = Some(reason.clone());
                }
            }

            if let Some(ref stream_usage) = chunk.usage {
                usage.input = stream_usage.prompt_tokens;
                usage.output = stream_usage.completion_tokens;
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::text(accumulated_text));
        }
        for call in calls {
            if call.name.is_empty() {
                continue;
            }
            let arguments = if call.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null)
            };
            let id = if call.id.is_empty() { new_message_id() } else { call.id };
            content.push(Content::tool_call(id, call.name, arguments));
        }

        let stop_reason = match finish_reason.as_deref() {
            Some("length") => StopReason::Length,
            Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
            _ => StopReason::Stop,
        };

        let final_message = Message::Assistant {
            id: response_id.unwrap_or_else(new_message_id),
            content,
            metadata: AssistantMetadata {
                provider: Some(model.provider),
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason: Some(stop_reason),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done { message: final_message, stop_reason, usage };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ChatStreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatFunction,
}

#[derive(Debug, Serialize)]
struct ChatFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: ChatFunctionCall,
}

#[derive(Debug, Serialize)]
struct ChatFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

impl StreamChunk {
    /// The provider's message id, treating a blank id as absent
    fn message_id(&self) -> Option<String> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}
