//! steward-ai: the vocabulary shared with the reasoning backend.
//!
//! Messages, content blocks and capability descriptors live here, together
//! with a streaming client for OpenAI-compatible Chat Completions endpoints
//! (OpenAI, Groq, Cerebras, xAI, OpenRouter, Ollama or any custom base URL).

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::MessageEventStream;
pub use types::*;
