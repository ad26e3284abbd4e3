//! Agent event types

use serde::{Deserialize, Serialize};
use steward_ai::{Message, Usage};

use crate::compression::{CompressionReport, RoleFilter};
use crate::phase::Termination;

/// Events emitted while the control loop runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A query was accepted and the loop started
    AgentStart,

    /// Reasoning phase entered with the current step count
    ReasoningStart { step: u32 },

    /// A compression pass changed the transcript
    Compressed {
        target: RoleFilter,
        report: CompressionReport,
    },

    /// Message streaming started
    MessageStart { message: Message },

    /// Message content updated during streaming
    MessageUpdate { message: Message },

    /// Message completed
    MessageEnd { message: Message },

    /// The backend finished one response
    TurnEnd { message: Message, usage: Usage },

    /// Capability invocation started
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// Capability invocation completed
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },

    /// An acting phase completed and the step counter advanced
    StepEnd { step: u32 },

    /// The loop reached its absorbing state
    Terminated { termination: Termination, steps: u32 },

    /// Error occurred
    Error { message: String },
}
