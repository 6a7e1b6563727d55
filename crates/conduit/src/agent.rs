use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{AgentError, ConfigurationError, ProviderError, TurnError};
use crate::events::AgentEvent;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{PendingToolCall, Tool, ToolCall};
use crate::prompt_template::system_prompt;
use crate::providers::base::{Completion, CompletionOptions, Provider, StreamChunk};
use crate::providers::factory::get_provider;
use crate::resolver::ModelResolver;
use crate::tools::{ToolOutput, ToolRegistry};

/// Model calls allowed in a single turn
pub const MAX_LOOPS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
}

/// What a client submits for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub auto_execute: bool,
    #[serde(default)]
    pub approved_tool_call_ids: Vec<String>,
    #[serde(default)]
    pub rejected_tool_call_ids: Vec<String>,
    #[serde(default)]
    pub context: TurnContext,
}

/// The aggregate result of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub messages: Vec<Message>,
    pub pending_tool_calls: Vec<PendingToolCall>,
}

/// Agent drives a model through rounds of tool use, with the tools in its registry
pub struct Agent {
    resolver: ModelResolver,
    registry: Arc<ToolRegistry>,
    max_loops: usize,
    temperature: Option<f32>,
    timeout: Option<Duration>,
}

impl Agent {
    pub fn new(resolver: ModelResolver, registry: Arc<ToolRegistry>) -> Self {
        Self {
            resolver,
            registry,
            max_loops: MAX_LOOPS,
            temperature: None,
            timeout: None,
        }
    }

    pub fn with_max_loops(mut self, max_loops: usize) -> Self {
        self.max_loops = max_loops.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    /// Pick the model for a turn and prepare it. Fails before any model call.
    pub async fn start_turn(&self, request: AgentRequest) -> Result<Turn, ConfigurationError> {
        let resolved = self.resolver.resolve_for_tools().await?;
        let provider = get_provider(&resolved)?;
        tracing::info!(
            provider = provider.name(),
            model = provider.model(),
            ability = %resolved.ability,
            "starting turn"
        );
        Ok(self.turn(provider, request))
    }

    /// Prepare a turn against an already selected provider
    pub fn turn(&self, provider: Arc<dyn Provider>, request: AgentRequest) -> Turn {
        let options = CompletionOptions {
            temperature: self.temperature,
            timeout: self.timeout,
            ..Default::default()
        };
        Turn::new(
            provider,
            Arc::clone(&self.registry),
            options,
            self.max_loops,
            request,
        )
    }

    /// Run a turn and stream its events
    pub async fn reply(
        &self,
        request: AgentRequest,
    ) -> Result<BoxStream<'static, AgentEvent>, ConfigurationError> {
        Ok(self.start_turn(request).await?.stream())
    }

    /// Run a turn to completion
    pub async fn ask(&self, request: AgentRequest) -> Result<TurnOutcome, TurnError> {
        Ok(self.start_turn(request).await?.run().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Execute,
    Cancel,
    Dispatch,
}

/// One client call through the agent loop
pub struct Turn {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    options: CompletionOptions,
    max_loops: usize,
    tools: Vec<Tool>,
    history: Vec<Message>,
    produced: Vec<Message>,
    pending: Vec<PendingToolCall>,
    rounds_used: usize,
    auto_execute: bool,
    approved: HashSet<String>,
    rejected: HashSet<String>,
}

impl Turn {
    fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        options: CompletionOptions,
        max_loops: usize,
        request: AgentRequest,
    ) -> Self {
        let tools = registry.catalogue();
        let mut history = Vec::with_capacity(request.messages.len() + 1);
        match system_prompt(&tools, request.context.current_path.as_deref()) {
            Ok(prompt) => history.push(Message::system(prompt)),
            Err(e) => tracing::warn!(error = %e, "could not render the system prompt"),
        }
        history.extend(request.messages.into_iter().map(|mut message| {
            message.normalize_tool_call_ids();
            message
        }));

        Self {
            provider,
            registry,
            options,
            max_loops,
            tools,
            history,
            produced: Vec::new(),
            pending: Vec::new(),
            rounds_used: 0,
            auto_execute: request.auto_execute,
            approved: request.approved_tool_call_ids.into_iter().collect(),
            rejected: request.rejected_tool_call_ids.into_iter().collect(),
        }
    }

    /// Stream the turn as events, ending with exactly one `done`.
    ///
    /// A failing model call ends the turn with an assistant message describing
    /// the failure. Dropping the stream abandons the turn wherever it is.
    pub fn stream(self) -> BoxStream<'static, AgentEvent> {
        self.events(true)
            .filter_map(|event| future::ready(event.ok()))
            .boxed()
    }

    /// Run the turn without incremental output
    pub async fn run(self) -> Result<TurnOutcome, TurnError> {
        let mut events = self.events(false);
        while let Some(event) = events.next().await {
            if let AgentEvent::Done {
                messages,
                pending_tool_calls,
            } = event?
            {
                return Ok(TurnOutcome {
                    messages,
                    pending_tool_calls: pending_tool_calls.unwrap_or_default(),
                });
            }
        }
        Err(ProviderError::Stream("turn ended without a result".to_string()).into())
    }

    fn events(self, streaming: bool) -> BoxStream<'static, Result<AgentEvent, TurnError>> {
        let mut turn = self;
        Box::pin(async_stream::stream! {
            for (call, resolution) in turn.resolutions() {
                if resolution == Resolution::Dispatch && turn.is_gated(&call) {
                    turn.pending.push(PendingToolCall::from(&call));
                    continue;
                }
                yield Ok(tool_start(&call));
                let message = match resolution {
                    Resolution::Cancel => {
                        tracing::info!(tool = %call.name, tool_call_id = %call.id, "tool call rejected");
                        canceled(&call)
                    }
                    _ => turn.execute(&call).await,
                };
                turn.record(message.clone());
                yield Ok(tool_end(&call, message));
            }

            let mut failure = None;
            while turn.pending.is_empty() && turn.rounds_used < turn.max_loops {
                turn.rounds_used += 1;
                let id = Uuid::new_v4().to_string();
                tracing::info!(
                    provider = turn.provider.name(),
                    model = turn.provider.model(),
                    round = turn.rounds_used,
                    "calling model"
                );
                yield Ok(AgentEvent::AssistantStart { id: id.clone() });

                let completion = if streaming {
                    match turn.provider.stream(&turn.history, &turn.tools, &turn.options).await {
                        Ok(mut chunks) => {
                            let mut outcome: Option<Result<Completion, ProviderError>> = None;
                            while let Some(chunk) = chunks.next().await {
                                match chunk {
                                    Ok(StreamChunk::Delta(delta)) => {
                                        yield Ok(AgentEvent::AssistantDelta { id: id.clone(), delta });
                                    }
                                    Ok(StreamChunk::Done(completion)) => {
                                        outcome = Some(Ok(completion));
                                        break;
                                    }
                                    Err(e) => {
                                        outcome = Some(Err(e));
                                        break;
                                    }
                                }
                            }
                            outcome.unwrap_or_else(|| {
                                Err(ProviderError::Stream(
                                    "stream ended without a final message".to_string(),
                                ))
                            })
                        }
                        Err(e) => Err(e),
                    }
                } else {
                    turn.provider.complete(&turn.history, &turn.tools, &turn.options).await
                };

                let mut message = match completion {
                    Ok(completion) => completion.message,
                    Err(e) => {
                        failure = Some((id, e));
                        break;
                    }
                };
                message.normalize_tool_call_ids();
                turn.record(message.clone());
                yield Ok(AgentEvent::AssistantEnd { id, message: message.clone() });

                let mut appended = 0;
                for call in &message.tool_calls {
                    if turn.is_gated(call) {
                        tracing::info!(tool = %call.name, tool_call_id = %call.id, "tool call awaits confirmation");
                        turn.pending.push(PendingToolCall::from(call));
                        continue;
                    }
                    yield Ok(tool_start(call));
                    let result = turn.execute(call).await;
                    turn.record(result.clone());
                    appended += 1;
                    yield Ok(tool_end(call, result));
                }

                if appended == 0 {
                    break;
                }
            }

            match failure {
                Some((id, error)) if streaming => {
                    tracing::error!(error = %error, "model call failed, ending turn");
                    let apology = Message::assistant().with_text(format!(
                        "Sorry, I could not get a response from the model: {}",
                        error
                    ));
                    turn.record(apology.clone());
                    yield Ok(AgentEvent::AssistantEnd { id, message: apology });
                    yield Ok(turn.done());
                }
                Some((_, error)) => {
                    tracing::error!(error = %error, "model call failed, ending turn");
                    yield Err(TurnError::Upstream(error));
                }
                None => {
                    if !turn.pending.is_empty() {
                        yield Ok(AgentEvent::Pending {
                            pending_tool_calls: turn.pending.clone(),
                        });
                    }
                    yield Ok(turn.done());
                }
            }
        })
    }

    /// Unanswered calls of the most recent assistant message that carries tool calls.
    ///
    /// Rejected ids win over approved ones. Calls the client left unresolved are
    /// dispatched again only while nothing but tool results follows the message.
    fn resolutions(&self) -> Vec<(ToolCall, Resolution)> {
        let Some(position) = self
            .history
            .iter()
            .rposition(|message| message.role == Role::Assistant && message.has_tool_calls())
        else {
            return Vec::new();
        };

        let awaiting_results = self.history[position + 1..]
            .iter()
            .all(|message| message.role == Role::Tool);
        // call_<i> ids repeat across rounds, so only results after the message count
        let answered: HashSet<&str> = self.history[position + 1..]
            .iter()
            .filter(|message| message.role == Role::Tool)
            .filter_map(|message| message.tool_call_id.as_deref())
            .collect();

        self.history[position]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .filter_map(|call| {
                let resolution = if self.rejected.contains(&call.id) {
                    Resolution::Cancel
                } else if self.approved.contains(&call.id) {
                    Resolution::Execute
                } else if awaiting_results {
                    Resolution::Dispatch
                } else {
                    return None;
                };
                Some((call.clone(), resolution))
            })
            .collect()
    }

    fn is_gated(&self, call: &ToolCall) -> bool {
        !self.auto_execute
            && self
                .registry
                .lookup(&call.name)
                .map_or(false, |spec| spec.requires_confirmation)
    }

    /// Run one tool call. Failures come back as an error result.
    async fn execute(&self, call: &ToolCall) -> Message {
        let output = match self.registry.lookup(&call.name) {
            None => ToolOutput::error(AgentError::ToolNotFound(call.name.clone()).to_string()),
            Some(spec) => {
                tracing::info!(tool = %call.name, tool_call_id = %call.id, "executing tool");
                spec.invoke(call)
                    .await
                    .unwrap_or_else(|e| ToolOutput::error(e.to_string()))
            }
        };
        if let ToolOutput::Error(error) = &output {
            tracing::warn!(tool = %call.name, tool_call_id = %call.id, error = %error, "tool failed");
        }
        Message::tool(call.id.clone(), output.render())
    }

    fn record(&mut self, message: Message) {
        self.history.push(message.clone());
        self.produced.push(message);
    }

    fn done(&self) -> AgentEvent {
        AgentEvent::Done {
            messages: self.produced.clone(),
            pending_tool_calls: (!self.pending.is_empty()).then(|| self.pending.clone()),
        }
    }
}

fn canceled(call: &ToolCall) -> Message {
    Message::tool(
        call.id.clone(),
        json!({"canceled": true, "reason": "user_rejected"}).to_string(),
    )
}

fn tool_start(call: &ToolCall) -> AgentEvent {
    AgentEvent::ToolStart {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
    }
}

fn tool_end(call: &ToolCall, message: Message) -> AgentEvent {
    AgentEvent::ToolEnd {
        tool_call_id: call.id.clone(),
        name: call.name.clone(),
        message,
    }
}
