//! Reasoning backend seam

use std::{pin::Pin, sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use steward_ai::{
    Context, Message, Model, Result, StreamOptions,
    providers::{LlmProvider, provider_for},
    stream::{MessageBuilder, MessageEvent, MessageEventStream},
};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Fallback check for errors that only survive as text
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    ["429", "rate limit", "timeout", "timed out", "connection", "overloaded"]
        .iter()
        .any(|p| lower.contains(p))
        || ["500", "502", "503", "504"].iter().any(|c| error.contains(c))
}

/// Per-call settings handed to the transport
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Capability descriptors bound to this call
    pub tools: Vec<steward_ai::Tool>,
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A stream of agent events
pub type AgentEventStream = Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

/// Submits a transcript to the reasoning backend and streams the response.
///
/// A stream ends with `TurnEnd` on success or `Error` on failure.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream>;
}

/// Calls the configured backend directly, retrying transient failures
pub struct ProviderTransport {
    provider: Option<Arc<dyn LlmProvider>>,
    api_key: Option<String>,
    retry_config: RetryConfig,
}

impl ProviderTransport {
    /// Resolve the provider for each call from the model and environment
    pub fn new() -> Self {
        Self {
            provider: None,
            api_key: None,
            retry_config: RetryConfig::default(),
        }
    }

    /// Create with a specific API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::new()
        }
    }

    /// Use a fixed provider instead of resolving one per call
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::new()
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    async fn open_stream(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
    ) -> Result<MessageEventStream> {
        match &self.provider {
            Some(provider) => provider.stream(model, context, options).await,
            None => {
                provider_for(model, self.api_key.as_deref())?
                    .stream(model, context, options)
                    .await
            }
        }
    }

    /// Open the backend stream, backing off between retryable failures
    async fn open_with_retry(
        &self,
        model: &Model,
        context: &Context,
        options: &StreamOptions,
        cancel: &CancellationToken,
    ) -> Result<MessageEventStream> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(steward_ai::Error::Aborted);
            }
            match self.open_stream(model, context, options).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);
                    if attempt >= self.retry_config.max_retries || !retryable {
                        return Err(e);
                    }
                    let delay = match e {
                        steward_ai::Error::RateLimited {
                            retry_after: Some(secs),
                        } => Duration::from_secs(secs).min(self.retry_config.max_delay),
                        _ => self.retry_config.delay_for_attempt(attempt),
                    };
                    tracing::warn!(
                        "Backend request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        error_msg,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(steward_ai::Error::Aborted),
                    }
                }
            }
        }
    }
}

impl Default for ProviderTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn run(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<AgentEventStream> {
        let context = Context {
            messages,
            tools: config.tools.clone(),
        };
        let options = StreamOptions {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        let mut message_stream = self
            .open_with_retry(&config.model, &context, &options, &cancel)
            .await?;

        let event_stream: AgentEventStream = Box::pin(stream! {
            let mut builder = MessageBuilder::new();
            let mut final_message = None;
            let mut final_usage = steward_ai::Usage::default();

            while let Some(event) = message_stream.next().await {
                if cancel.is_cancelled() {
                    yield AgentEvent::Error { message: "Cancelled".to_string() };
                    return;
                }

                builder.process_event(&event);

                match &event {
                    MessageEvent::Start { message } => {
                        yield AgentEvent::MessageStart { message: message.clone() };
                    }
                    MessageEvent::TextDelta { .. } | MessageEvent::ToolCallDelta { .. } => {
                        let partial = Message::assistant(builder.current_content());
                        yield AgentEvent::MessageUpdate { message: partial };
                    }
                    MessageEvent::Done { message, usage, .. } => {
                        final_message = Some(message.clone());
                        final_usage = usage.clone();
                        yield AgentEvent::MessageEnd { message: message.clone() };
                    }
                    MessageEvent::Error { message } => {
                        yield AgentEvent::Error { message: message.clone() };
                        return;
                    }
                    MessageEvent::ToolCallStart { .. } => {}
                }
            }

            match final_message {
                Some(message) => yield AgentEvent::TurnEnd { message, usage: final_usage },
                None => yield AgentEvent::Error {
                    message: "backend stream ended without a response".to_string(),
                },
            }
        });

        Ok(event_stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use steward_ai::{Content, models::resolve_model};

    #[test]
    fn test_delay_backs_off_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_retryable_error_strings() {
        assert!(is_retryable_error("HTTP 429 Too Many Requests"));
        assert!(is_retryable_error("operation timed out"));
        assert!(is_retryable_error("upstream 503"));
        assert!(!is_retryable_error("Invalid or missing API key"));
    }

    /// Fails with the queued errors, then answers
    struct FlakyProvider {
        failures: Mutex<Vec<steward_ai::Error>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn stream(
            &self,
            _model: &Model,
            _context: &Context,
            _options: &StreamOptions,
        ) -> Result<MessageEventStream> {
            *self.calls.lock() += 1;
            if let Some(err) = self.failures.lock().pop() {
                return Err(err);
            }
            let message = Message::assistant(vec![Content::text("pong")]);
            Ok(Box::pin(stream! {
                yield MessageEvent::TextDelta { content_index: 0, delta: "pong".into() };
                yield MessageEvent::Done {
                    message,
                    stop_reason: steward_ai::StopReason::Stop,
                    usage: steward_ai::Usage::default(),
                };
            }))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
        }
    }

    fn run_config() -> RunConfig {
        RunConfig {
            tools: vec![],
            model: resolve_model("openai", "gpt-4o", None),
            max_tokens: None,
            temperature: None,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failure() {
        let provider = Arc::new(FlakyProvider {
            failures: Mutex::new(vec![steward_ai::Error::Sse("reset".into())]),
            calls: Mutex::new(0),
        });
        let transport =
            ProviderTransport::with_provider(provider.clone()).with_retry_config(fast_retry());

        let mut events = transport
            .run(vec![Message::user("ping")], &run_config(), CancellationToken::new())
            .await
            .unwrap();

        let mut ended = None;
        while let Some(event) = events.next().await {
            if let AgentEvent::TurnEnd { message, .. } = event {
                ended = Some(message);
            }
        }
        assert_eq!(ended.unwrap().text(), "pong");
        assert_eq!(*provider.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_propagates() {
        let provider = Arc::new(FlakyProvider {
            failures: Mutex::new(vec![steward_ai::Error::InvalidApiKey]),
            calls: Mutex::new(0),
        });
        let transport =
            ProviderTransport::with_provider(provider.clone()).with_retry_config(fast_retry());

        let result = transport
            .run(vec![Message::user("ping")], &run_config(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(steward_ai::Error::InvalidApiKey)));
        assert_eq!(*provider.calls.lock(), 1);
    }
}
