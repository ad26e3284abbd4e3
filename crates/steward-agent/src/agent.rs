//! The control loop: drives a conversation through reasoning and acting
//! phases until the backend answers directly or the step budget runs out.

use std::sync::Arc;

use futures::future::join_all;
use steward_ai::{Message, Model, Role, Usage};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    blob::SharedBlobStore,
    compression::{self, CompressionPass},
    conversation::ConversationState,
    error::{Error, Result},
    events::AgentEvent,
    phase::{Phase, Termination, Transition},
    registry::CapabilityRegistry,
    transport::{AgentEventStream, RunConfig, Transport},
};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System instruction seeded as the first message
    pub system_prompt: String,
    pub model: Model,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Acting phases allowed for the session
    pub step_budget: u32,
    /// Compression passes applied before every backend call, in order
    pub compression: Vec<CompressionPass>,
    /// Dispatch a batch of capability requests concurrently
    pub parallel_tool_calls: bool,
}

impl AgentConfig {
    pub fn new(system_prompt: impl Into<String>, model: Model) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            model,
            max_tokens: None,
            temperature: None,
            step_budget: 100,
            compression: CompressionPass::default_passes(),
            parallel_tool_calls: false,
        }
    }
}

/// How a call to [`Agent::run`] ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub termination: Termination,
    /// The final backend message when it answered directly
    pub answer: Option<Message>,
    /// Step counter at termination
    pub steps: u32,
}

type PendingCall = (String, String, serde_json::Value);

pub struct Agent {
    config: AgentConfig,
    state: ConversationState,
    phase: Phase,
    registry: Arc<CapabilityRegistry>,
    blobs: SharedBlobStore,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Agent {
    /// Create an idle agent whose transcript holds only the system message
    pub fn new(
        config: AgentConfig,
        registry: Arc<CapabilityRegistry>,
        blobs: SharedBlobStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let state = ConversationState::new(config.system_prompt.clone(), config.step_budget);
        Self {
            config,
            state,
            phase: Phase::Reasoning,
            registry,
            blobs,
            transport,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Token that aborts an in-flight backend call when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Discard the transcript and step count, keeping the system message
    pub fn reset(&mut self) {
        self.state.reset();
        self.phase = Phase::Reasoning;
    }

    /// Submit a user query and drive the loop until it terminates.
    ///
    /// Step counter and transcript carry over between calls. A backend
    /// failure is returned as an error; capability failures never are.
    pub async fn run(&mut self, query: &str) -> Result<RunOutcome> {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        if self.phase.is_terminated() {
            self.transition(Transition::NewQuery)?;
        }

        self.append(Message::user(query));
        let _ = self.event_tx.send(AgentEvent::AgentStart);

        loop {
            match self.phase {
                Phase::Reasoning => {
                    let transition = match self.reason().await {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!("reasoning failed at step {}: {}", self.state.step(), e);
                            let _ = self.event_tx.send(AgentEvent::Error {
                                message: e.to_string(),
                            });
                            return Err(e);
                        }
                    };
                    self.transition(transition)?;
                }
                Phase::Acting => {
                    let transition = self.act().await;
                    self.transition(transition)?;
                }
                Phase::Terminated(termination) => {
                    let steps = self.state.step();
                    let _ = self
                        .event_tx
                        .send(AgentEvent::Terminated { termination, steps });

                    let answer = match termination {
                        Termination::Completed => self.state.last().cloned(),
                        Termination::StepBudgetExhausted => None,
                    };
                    return Ok(RunOutcome {
                        termination,
                        answer,
                        steps,
                    });
                }
            }
        }
    }

    fn transition(&mut self, transition: Transition) -> Result<()> {
        match self.phase.next(transition) {
            Some(next) => {
                tracing::debug!(from = ?self.phase, to = ?next, "phase transition");
                self.phase = next;
                Ok(())
            }
            None => {
                tracing::error!(phase = ?self.phase, ?transition, "invalid phase transition");
                Err(Error::Other(format!(
                    "invalid transition {:?} from {:?}",
                    transition, self.phase
                )))
            }
        }
    }

    /// Reasoning phase: persist, check the budget, compress, ask the backend
    async fn reason(&mut self) -> Result<Transition> {
        if let Some(last) = self.state.last().filter(|m| m.role() != Role::System) {
            self.persist(last);
        }

        if self.state.budget_exhausted() {
            tracing::warn!(
                "run out of steps ({}/{})",
                self.state.step(),
                self.state.step_budget()
            );
            return Ok(Transition::BudgetExhausted);
        }

        let step = self.state.step();
        tracing::info!("Reasoning for step {}", step);
        let _ = self.event_tx.send(AgentEvent::ReasoningStart { step });

        self.compress_transcript();

        let run_config = RunConfig {
            tools: self.registry.list(),
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let mut event_stream = self
            .transport
            .run(self.state.messages.clone(), &run_config, self.cancel.clone())
            .await?;

        let (response, usage, stream_error) = self.process_stream(&mut event_stream).await;
        if let Some(message) = stream_error {
            return Err(Error::Backend(message));
        }
        let response =
            response.ok_or_else(|| Error::Backend("backend returned no message".to_string()))?;

        self.state.add_usage(&usage);
        let requested = response.tool_calls().len();
        tracing::info!(
            requests = requested,
            "Reasoning result: {}",
            preview(&response.text())
        );
        self.append(response);

        Ok(if requested == 0 {
            Transition::DirectAnswer
        } else {
            Transition::CapabilityRequests
        })
    }

    /// Acting phase: run every pending request, append results in order, advance the step
    async fn act(&mut self) -> Transition {
        let calls: Vec<PendingCall> = self
            .state
            .last()
            .map(|msg| {
                msg.tool_calls()
                    .into_iter()
                    .map(|(id, name, args)| (id.to_string(), name.to_string(), args.clone()))
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!("Acting for step {} ({} requests)", self.state.step(), calls.len());

        let results = if self.config.parallel_tool_calls {
            join_all(calls.iter().map(|call| self.invoke(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(self.invoke(call).await);
            }
            results
        };

        for message in results {
            self.append(message);
        }

        self.state.advance_step();
        let step = self.state.step();
        let _ = self.event_tx.send(AgentEvent::StepEnd { step });
        Transition::ActingComplete
    }

    async fn invoke(&self, (id, name, args): &PendingCall) -> Message {
        let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            arguments: args.clone(),
        });
        tracing::debug!(capability = %name, arguments = %args, "invoking capability");

        let result = self
            .registry
            .invoke(id, name, args.clone(), self.cancel.clone())
            .await;

        if result.is_error {
            tracing::warn!(capability = %name, "capability failed: {}", preview(&result.text_content()));
        }
        let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
            result: result.text_content(),
            is_error: result.is_error,
        });

        Message::tool_result(id, name, result.content, result.is_error)
    }

    fn compress_transcript(&mut self) {
        for (target, report) in
            compression::compress_all(&mut self.state.messages, &self.config.compression)
        {
            if report.changed() {
                tracing::info!(
                    ?target,
                    tokens_before = report.tokens_before,
                    tokens_after = report.tokens_after,
                    "compressed transcript"
                );
                let _ = self.event_tx.send(AgentEvent::Compressed { target, report });
            }
        }
    }

    /// Process the event stream, forwarding events to subscribers.
    /// Returns (assistant_message, turn_usage, error_if_any).
    async fn process_stream(
        &self,
        event_stream: &mut AgentEventStream,
    ) -> (Option<Message>, Usage, Option<String>) {
        use futures::StreamExt;

        let mut assistant_message: Option<Message> = None;
        let mut turn_usage = Usage::default();
        let mut error: Option<String> = None;

        while let Some(event) = event_stream.next().await {
            match &event {
                AgentEvent::MessageEnd { message } => {
                    assistant_message = Some(message.clone());
                }
                AgentEvent::TurnEnd { usage, .. } => {
                    turn_usage = usage.clone();
                }
                AgentEvent::Error { message } => {
                    error = Some(message.clone());
                }
                _ => {}
            }
            // Errors are re-emitted by `run` once they propagate
            if !matches!(event, AgentEvent::Error { .. }) {
                let _ = self.event_tx.send(event);
            }
        }

        (assistant_message, turn_usage, error)
    }

    /// Persist a message and add it to the transcript
    fn append(&mut self, message: Message) {
        self.persist(&message);
        self.state.push(message);
    }

    /// Park a message in the blob store under its id. Failures are logged only.
    fn persist(&self, message: &Message) {
        let value = match serde_json::to_value(message) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(id = message.id(), "failed to serialize message: {}", e);
                return;
            }
        };
        if let Err(e) = self.blobs.set(message.id(), value) {
            tracing::warn!(id = message.id(), "failed to persist message: {}", e);
        }
    }
}

/// First line of a log payload, capped for readability
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or("");
    match line.char_indices().nth(200) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobStore, MemoryBlobStore, get_typed};
    use crate::tool::{Tool, ToolResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use steward_ai::{Content, models::resolve_model};

    /// A mock transport that returns canned assistant responses.
    struct MockTransport {
        responses: Mutex<Vec<Message>>,
        /// Returned once `responses` is drained
        fallback: Message,
        /// Transcripts received, one per call
        seen: Mutex<Vec<Vec<Message>>>,
        fail: bool,
    }

    impl MockTransport {
        fn new(responses: Vec<Message>) -> Self {
            Self {
                responses: Mutex::new(responses),
                fallback: Message::assistant(vec![Content::text("done")]),
                seen: Mutex::new(vec![]),
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn run(
            &self,
            messages: Vec<Message>,
            _config: &RunConfig,
            _cancel: CancellationToken,
        ) -> steward_ai::Result<AgentEventStream> {
            self.seen.lock().push(messages);
            let fail = self.fail;
            let msg = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    let mut m = self.fallback.clone();
                    if let Message::Assistant { id, .. } = &mut m {
                        *id = steward_ai::new_message_id();
                    }
                    m
                } else {
                    responses.remove(0)
                }
            };

            let stream: AgentEventStream = Box::pin(async_stream::stream! {
                if fail {
                    yield AgentEvent::Error { message: "backend unavailable".into() };
                    return;
                }
                yield AgentEvent::MessageEnd { message: msg.clone() };
                yield AgentEvent::TurnEnd { message: msg, usage: Usage::default() };
            });
            Ok(stream)
        }
    }

    /// Counts calls and echoes an optional `text` argument after an optional delay.
    struct NoopTool {
        name: &'static str,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "delay_ms": { "type": "integer" },
                    "size": { "type": "integer" }
                }
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = arguments.get("delay_ms").and_then(|v| v.as_u64()) {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if let Some(size) = arguments.get("size").and_then(|v| v.as_u64()) {
                return ToolResult::text("z".repeat(size as usize));
            }
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("ok");
            ToolResult::text(format!("{}:{}", self.name, text))
        }
    }

    struct Harness {
        agent: Agent,
        transport: Arc<MockTransport>,
        blobs: Arc<MemoryBlobStore>,
        calls: Arc<AtomicU32>,
    }

    fn harness(transport: MockTransport, step_budget: u32, parallel: bool) -> Harness {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = CapabilityRegistry::new();
        for name in ["read_file", "web_search"] {
            registry.register(Arc::new(NoopTool {
                name,
                calls: calls.clone(),
            }));
        }

        let mut config = AgentConfig::new("test system", resolve_model("openai", "test", None));
        config.step_budget = step_budget;
        config.parallel_tool_calls = parallel;

        let transport = Arc::new(transport);
        let blobs = Arc::new(MemoryBlobStore::new());
        let agent = Agent::new(
            config,
            Arc::new(registry),
            blobs.clone(),
            transport.clone(),
        );
        Harness {
            agent,
            transport,
            blobs,
            calls,
        }
    }

    fn call(id: &str, name: &str, args: serde_json::Value) -> Content {
        Content::tool_call(id, name, args)
    }

    #[tokio::test]
    async fn test_direct_answer_terminates_without_acting() {
        let mut h = harness(MockTransport::new(vec![]), 10, false);

        let outcome = h.agent.run("hello").await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.steps, 0);
        assert_eq!(outcome.answer.unwrap().text(), "done");
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        let roles: Vec<Role> = h.agent.messages().iter().map(|m| m.role()).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(h.agent.phase(), Phase::Terminated(Termination::Completed));
    }

    #[tokio::test]
    async fn test_two_requests_one_step() {
        let responses = vec![Message::assistant(vec![
            call("c1", "read_file", json!({"text": "a"})),
            call("c2", "web_search", json!({"text": "b"})),
        ])];
        let mut h = harness(MockTransport::new(responses), 10, false);

        let outcome = h.agent.run("do both").await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.steps, 1);
        assert_eq!(h.transport.calls(), 2);

        let messages = h.agent.messages();
        assert_eq!(messages.len(), 6);
        match (&messages[3], &messages[4]) {
            (
                Message::ToolResult {
                    tool_call_id: first,
                    ..
                },
                Message::ToolResult {
                    tool_call_id: second,
                    ..
                },
            ) => {
                assert_eq!(first, "c1");
                assert_eq!(second, "c2");
            }
            other => panic!("expected two tool results, got {:?}", other),
        }
        assert_eq!(messages[3].text(), "read_file:a");
        assert_eq!(messages[4].text(), "web_search:b");
    }

    #[tokio::test]
    async fn test_parallel_dispatch_keeps_request_order() {
        let responses = vec![Message::assistant(vec![
            call("slow", "read_file", json!({"delay_ms": 50})),
            call("fast", "web_search", json!({})),
        ])];
        let mut h = harness(MockTransport::new(responses), 10, true);

        let outcome = h.agent.run("race").await.unwrap();
        assert_eq!(outcome.steps, 1);

        let ids: Vec<&str> = h
            .agent
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_step_budget_exhaustion_skips_backend() {
        let mut transport = MockTransport::new(vec![]);
        transport.fallback = Message::assistant(vec![call("c", "read_file", json!({}))]);
        let mut h = harness(transport, 3, false);

        let outcome = h.agent.run("loop forever").await.unwrap();
        assert_eq!(outcome.termination, Termination::StepBudgetExhausted);
        assert_eq!(outcome.steps, 3);
        assert!(outcome.answer.is_none());
        assert_eq!(h.transport.calls(), 3);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.agent.state().step(), h.agent.state().step_budget());
    }

    #[tokio::test]
    async fn test_unknown_capability_becomes_tool_result() {
        let responses = vec![Message::assistant(vec![call("c1", "teleport", json!({}))])];
        let mut h = harness(MockTransport::new(responses), 5, false);

        let outcome = h.agent.run("go").await.unwrap();
        assert_eq!(outcome.termination, Termination::Completed);

        let result = &h.agent.messages()[3];
        match result {
            Message::ToolResult { is_error, .. } => assert!(*is_error),
            other => panic!("expected tool result, got {:?}", other),
        }
        assert_eq!(result.text(), "Capability not found: teleport");
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut transport = MockTransport::new(vec![]);
        transport.fail = true;
        let mut h = harness(transport, 5, false);

        let err = h.agent.run("hello").await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert!(err.is_backend());
        assert_eq!(h.agent.state().step(), 0);
        assert_eq!(h.agent.messages().len(), 2);
        assert_eq!(h.agent.phase(), Phase::Reasoning);
    }

    #[tokio::test]
    async fn test_resumes_across_queries() {
        let responses = vec![
            Message::assistant(vec![call("c1", "read_file", json!({}))]),
            Message::assistant(vec![Content::text("first answer")]),
            Message::assistant(vec![Content::text("second answer")]),
        ];
        let mut h = harness(MockTransport::new(responses), 10, false);

        h.agent.run("first").await.unwrap();
        assert_eq!(h.agent.state().step(), 1);
        let len_after_first = h.agent.messages().len();

        let outcome = h.agent.run("second").await.unwrap();
        assert_eq!(outcome.steps, 1);
        assert_eq!(outcome.answer.unwrap().text(), "second answer");
        assert_eq!(h.agent.messages().len(), len_after_first + 2);
        assert_eq!(h.agent.messages()[0].role(), Role::System);
    }

    #[tokio::test]
    async fn test_every_non_system_message_is_persisted() {
        let responses = vec![Message::assistant(vec![call("c1", "read_file", json!({}))])];
        let mut h = harness(MockTransport::new(responses), 5, false);
        h.agent.run("persist me").await.unwrap();

        let messages = h.agent.messages();
        assert!(h.blobs.get(messages[0].id()).is_none());
        for msg in &messages[1..] {
            let stored: Message = get_typed(h.blobs.as_ref(), msg.id()).unwrap();
            assert_eq!(stored.id(), msg.id());
        }
        assert_eq!(h.blobs.len(), messages.len() - 1);
    }

    #[tokio::test]
    async fn test_large_result_is_compressed_but_retrievable() {
        let responses = vec![
            Message::assistant(vec![call("c1", "read_file", json!({"size": 200_000}))]),
            Message::assistant(vec![Content::text("summarized")]),
        ];
        let mut h = harness(MockTransport::new(responses), 5, false);
        h.agent.run("read the big file").await.unwrap();

        let seen = h.transport.seen.lock();
        let second_call = &seen[1];
        let tool_msg = second_call
            .iter()
            .find(|m| m.role() == Role::ToolResult)
            .unwrap();
        assert!(tool_msg.text().contains("... (middle truncated) ..."));
        assert!(tool_msg.text().len() < 200_000);

        let stored: Message = get_typed(h.blobs.as_ref(), tool_msg.id()).unwrap();
        assert_eq!(stored.text().len(), 200_000);
    }

    #[tokio::test]
    async fn test_events_end_with_terminated() {
        let mut h = harness(MockTransport::new(vec![]), 5, false);
        let mut rx = h.agent.subscribe();
        h.agent.run("hi").await.unwrap();

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        match last {
            Some(AgentEvent::Terminated { termination, steps }) => {
                assert_eq!(termination, Termination::Completed);
                assert_eq!(steps, 0);
            }
            other => panic!("expected Terminated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_restores_seeded_state() {
        let responses = vec![Message::assistant(vec![call("c1", "read_file", json!({}))])];
        let mut h = harness(MockTransport::new(responses), 5, false);
        h.agent.run("go").await.unwrap();

        h.agent.reset();
        assert_eq!(h.agent.messages().len(), 1);
        assert_eq!(h.agent.state().step(), 0);
        assert_eq!(h.agent.phase(), Phase::Reasoning);
    }
}
