//! Capability registry
//!
//! The single source of truth for what the agent can do. Providers hand their
//! capabilities over once at startup; the control loop lists them for the
//! backend and invokes them by name. `invoke` never fails: unknown names,
//! schema violations and panicking handlers all come back as error results.
//!
//! Registering a name twice replaces the earlier capability in place (last
//! write wins) and logs a warning.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tool::{BoxedTool, ToolResult, to_api_tool};

/// Upper bound on the error text handed back to the backend
pub const MAX_ERROR_CHARS: usize = 2000;

/// A source of capabilities, registered explicitly at startup
pub trait CapabilityProvider: Send + Sync {
    /// Provider name, for logging
    fn name(&self) -> &str;

    /// The capabilities this provider contributes
    fn capabilities(&self) -> Vec<BoxedTool>;
}

struct Entry {
    tool: BoxedTool,
    validator: Option<Arc<jsonschema::Validator>>,
}

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one capability, compiling its argument schema
    pub fn register(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        let validator = compile_schema(&tool);
        let entry = Entry { tool, validator };

        match self.index.get(&name) {
            Some(&pos) => {
                tracing::warn!(capability = %name, "capability registered twice, replacing");
                self.entries[pos] = entry;
            }
            None => {
                self.index.insert(name, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Register every capability a provider offers
    pub fn register_provider(&mut self, provider: &dyn CapabilityProvider) {
        let tools = provider.capabilities();
        tracing::debug!(provider = provider.name(), count = tools.len(), "registering provider");
        for tool in tools {
            self.register(tool);
        }
    }

    /// Descriptors for binding to the reasoning backend, in registration order
    pub fn list(&self) -> Vec<steward_ai::Tool> {
        self.entries
            .iter()
            .map(|e| to_api_tool(e.tool.as_ref()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tool.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.index.get(name).map(|&pos| &self.entries[pos].tool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up and run a capability. Every failure becomes an error result.
    pub async fn invoke(
        &self,
        tool_call_id: &str,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(entry) = self.index.get(name).map(|&pos| &self.entries[pos]) else {
            return ToolResult::error(bounded(format!("Capability not found: {}", name)));
        };

        if let Some(err) = entry
            .validator
            .as_deref()
            .and_then(|validator| validate_with_validator(&arguments, validator))
        {
            return ToolResult::error(bounded(err));
        }

        let call = entry.tool.execute(tool_call_id, arguments, cancel);
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) if result.is_error => {
                let text = bounded(result.text_content());
                ToolResult {
                    content: vec![steward_ai::Content::text(text)],
                    ..result
                }
            }
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(capability = name, "capability panicked: {}", reason);
                ToolResult::error(bounded(format!("Capability '{}' failed: {}", name, reason)))
            }
        }
    }
}

fn compile_schema(tool: &BoxedTool) -> Option<Arc<jsonschema::Validator>> {
    let schema = tool.parameters_schema();
    match jsonschema::validator_for(&schema) {
        Ok(validator) => Some(Arc::new(validator)),
        Err(e) => {
            tracing::warn!(
                "Invalid parameter schema for '{}', skipping validation: {}",
                tool.name(),
                e
            );
            None
        }
    }
}

/// Validate arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!("Invalid arguments:\n{}", errors.join("\n")))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Truncate error text to `MAX_ERROR_CHARS`, on a char boundary
fn bounded(text: String) -> String {
    match text.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}
