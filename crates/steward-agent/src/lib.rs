//! steward-agent: the reasoning/acting control loop
//!
//! This crate holds the conversation state machine, the transcript
//! compressor that keeps it under a token budget, the blob store that parks
//! full message content, and the registry of capabilities the agent can
//! invoke.

pub mod agent;
pub mod blob;
pub mod compression;
pub mod conversation;
pub mod error;
pub mod events;
pub mod phase;
pub mod registry;
pub mod tool;
pub mod transport;

pub use agent::{Agent, AgentConfig, RunOutcome};
pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore, SharedBlobStore};
pub use compression::{CompressionPass, CompressionReport, RoleFilter};
pub use conversation::ConversationState;
pub use error::{Error, Result};
pub use events::AgentEvent;
pub use phase::{Phase, Termination, Transition};
pub use registry::{CapabilityProvider, CapabilityRegistry};
pub use tool::{BoxedTool, Tool, ToolResult};
pub use transport::{ProviderTransport, Transport};
