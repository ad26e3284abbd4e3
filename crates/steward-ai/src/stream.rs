//! Streaming event types and the assistant message builder

use crate::types::{AssistantMetadata, Content, Message, StopReason, Usage, new_message_id};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a backend response streams in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Initial message structure
    Start { message: Message },
    /// Text content delta
    TextDelta { content_index: usize, delta: String },
    /// Tool call started
    ToolCallStart {
        content_index: usize,
        id: String,
        name: String,
    },
    /// Tool call arguments delta (partial JSON)
    ToolCallDelta { content_index: usize, delta: String },
    /// Message completed successfully
    Done {
        message: Message,
        stop_reason: StopReason,
        usage: Usage,
    },
    /// Error occurred
    Error { message: String },
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

#[derive(Debug)]
enum Buffer {
    Text(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

/// Accumulates streaming deltas into an assistant message
#[derive(Debug, Default)]
pub struct MessageBuilder {
    buffers: Vec<Buffer>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the partial message
    pub fn process_event(&mut self, event: &MessageEvent) {
        match event {
            MessageEvent::TextDelta {
                content_index,
                delta,
            } => match self.slot(*content_index, || Buffer::Text(String::new())) {
                Buffer::Text(text) => text.push_str(delta),
                Buffer::ToolCall { .. } => {}
            },
            MessageEvent::ToolCallStart {
                content_index,
                id,
                name,
            } => {
                *self.slot(*content_index, || Buffer::Text(String::new())) = Buffer::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments_json: String::new(),
                };
            }
            MessageEvent::ToolCallDelta {
                content_index,
                delta,
            } => {
                if let Some(Buffer::ToolCall { arguments_json, .. }) =
                    self.buffers.get_mut(*content_index)
                {
                    arguments_json.push_str(delta);
                }
            }
            MessageEvent::Done {
                stop_reason, usage, ..
            } => {
                self.stop_reason = Some(*stop_reason);
                self.usage = usage.clone();
            }
            MessageEvent::Start { .. } | MessageEvent::Error { .. } => {}
        }
    }

    /// Current partial content, used for progress updates
    pub fn current_content(&self) -> Vec<Content> {
        self.buffers.iter().filter_map(buffer_to_content).collect()
    }

    /// Build the final message
    pub fn build(self) -> Message {
        Message::Assistant {
            id: new_message_id(),
            content: self.buffers.iter().filter_map(buffer_to_content).collect(),
            metadata: AssistantMetadata {
                usage: self.usage,
                stop_reason: self.stop_reason,
                timestamp: chrono::Utc::now().timestamp_millis(),
                ..Default::default()
            },
        }
    }

    fn slot(&mut self, index: usize, fill: impl Fn() -> Buffer) -> &mut Buffer {
        while self.buffers.len() <= index {
            self.buffers.push(fill());
        }
        &mut self.buffers[index]
    }
}

fn buffer_to_content(buffer: &Buffer) -> Option<Content> {
    match buffer {
        Buffer::Text(text) if text.is_empty() => None,
        Buffer::Text(text) => Some(Content::text(text.clone())),
        Buffer::ToolCall {
            id,
            name,
            arguments_json,
        } => {
            let arguments = if arguments_json.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(arguments_json).unwrap_or(serde_json::Value::Null)
            };
            Some(Content::tool_call(id.clone(), name.clone(), arguments))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_accumulates_text_and_tool_calls() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "Reading ".into(),
        });
        builder.process_event(&MessageEvent::TextDelta {
            content_index: 0,
            delta: "now".into(),
        });
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 1,
            id: "call_1".into(),
            name: "read_file".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "{\"file_name\":".into(),
        });
        builder.process_event(&MessageEvent::ToolCallDelta {
            content_index: 1,
            delta: "\"notes.md\"}".into(),
        });

        let msg = builder.build();
        assert_eq!(msg.text(), "Reading now");
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "read_file");
        assert_eq!(calls[0].2, &json!({"file_name": "notes.md"}));
    }

    #[test]
    fn test_tool_call_without_arguments_gets_empty_object() {
        let mut builder = MessageBuilder::new();
        builder.process_event(&MessageEvent::ToolCallStart {
            content_index: 0,
            id: "call_1".into(),
            name: "view_tasks".into(),
        });
        let content = builder.current_content();
        assert_eq!(content, vec![Content::tool_call("call_1", "view_tasks", json!({}))]);
    }
}
