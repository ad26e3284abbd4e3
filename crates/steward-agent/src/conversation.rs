//! Conversation state: transcript, step counter and step budget.

use steward_ai::{Message, Role, Usage};

/// The unit of execution context for one session
#[derive(Debug, Clone)]
pub struct ConversationState {
    /// Transcript in chronological order, system message first
    pub messages: Vec<Message>,
    step: u32,
    step_budget: u32,
    /// Total usage across all backend calls
    pub total_usage: Usage,
}

impl ConversationState {
    /// Seed a session with its system instruction
    pub fn new(system_prompt: impl Into<String>, step_budget: u32) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            step: 0,
            step_budget,
            total_usage: Usage::default(),
        }
    }

    /// Completed acting phases so far
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn step_budget(&self) -> u32 {
        self.step_budget
    }

    pub fn budget_exhausted(&self) -> bool {
        self.step >= self.step_budget
    }

    /// Record one completed acting phase. Saturates at the budget.
    pub(crate) fn advance_step(&mut self) {
        if self.step < self.step_budget {
            self.step += 1;
        }
    }

    /// Append a non-system message. A second system message is refused.
    pub(crate) fn push(&mut self, message: Message) -> bool {
        if message.role() == Role::System {
            tracing::warn!("refusing to append a second system message");
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop everything but the system message and restart the step count
    pub fn reset(&mut self) {
        self.messages.truncate(1);
        self.step = 0;
        self.total_usage = Usage::default();
    }

    pub(crate) fn add_usage(&mut self, usage: &Usage) {
        self.total_usage.input += usage.input;
        self.total_usage.output += usage.output;
    }
}
