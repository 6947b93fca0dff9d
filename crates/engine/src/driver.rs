//! The step driver — the state machine that runs a chain to its terminal
//! state.
//!
//! One invocation iterates validate → call provider → resolve tools until
//! the chain completes, pauses on externally-resolved tool calls, or fails.
//! The driver owns the event sink for the run and is the only producer on
//! it; terminal events are emitted exactly once, after the loop exits.
//!
//! Provider failures are translated into the stable error taxonomy at this
//! boundary: the gateway speaks [`ProviderFailure`], everything above it
//! speaks [`ChainError`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use stepchain_cache::{PauseCache, ResponseCache, should_cache};
use stepchain_core::cache::CacheStore;
use stepchain_core::chain::{Chain, StepOutput};
use stepchain_core::error::{ChainError, ErrorCode};
use stepchain_core::message::Message;
use stepchain_core::provider::{
    FinishReason, GatewayRequest, ProviderFailure, ProviderMap, ProviderReply, ToolDefinition,
    Usage,
};
use stepchain_core::sink::{RunErrorRecord, RunErrorSink};
use stepchain_core::tool::{ToolCall, ToolResult};
use stepchain_protocol::event::ChainEvent;
use stepchain_protocol::stream::{EventSink, channel};
use stepchain_tools::{
    AGENT_RETURN_TOOL, DocumentStore, ExecutionStrategy, ResolvedTool, ToolEnvironment,
    ToolExchange, ToolHandler, ToolResolver, ToolSources, agent_return_definition, mock_result,
    partition_declarations, resolve_subagent_tools,
};
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::handle::{RunHandle, RunOutcome, RunResult};
use crate::validator::{ValidatedStep, validate_step};

/// Everything a run needs besides the chain itself.
#[derive(Clone)]
pub struct RunOptions {
    /// Identifier for this run; pause entries and error records key on it
    pub run_id: Uuid,

    /// Caller-supplied provider gateways
    pub providers: ProviderMap,

    /// Backing store for the response and pause caches
    pub store: Arc<dyn CacheStore>,

    /// Which kind of run this is; decides how tool calls execute
    pub environment: ToolEnvironment,

    /// Tool definitions supplied out of band (client tools, integration and
    /// provider-native catalogs)
    pub sources: ToolSources,

    /// Inline handlers for background runs
    pub handlers: HashMap<String, Arc<dyn ToolHandler>>,

    /// Exchange interactive tool results are delivered through
    pub exchange: ToolExchange,

    /// Where terminal errors are persisted, when anywhere
    pub error_sink: Option<Arc<dyn RunErrorSink>>,

    /// Document store for sub-agent resolution
    pub document_store: Option<Arc<dyn DocumentStore>>,

    /// Workspace path of the document being run; sub-agent references
    /// resolve relative to it
    pub document_path: String,

    /// Persisted errorable type for error records
    pub errorable_type: String,

    /// Whether this invocation is already a retry; retryable errors on a
    /// retry are not persisted again
    pub is_retry: bool,

    /// Cooperative abort signal
    pub abort: CancellationToken,
}

impl RunOptions {
    pub fn new(providers: ProviderMap, store: Arc<dyn CacheStore>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            providers,
            store,
            environment: ToolEnvironment::Interactive,
            sources: ToolSources::default(),
            handlers: HashMap::new(),
            exchange: ToolExchange::new(),
            error_sink: None,
            document_store: None,
            document_path: String::new(),
            errorable_type: "document_run".into(),
            is_retry: false,
            abort: CancellationToken::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_environment(mut self, environment: ToolEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_sources(mut self, sources: ToolSources) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_handler(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn with_exchange(mut self, exchange: ToolExchange) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn RunErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    pub fn with_document_store(
        mut self,
        store: Arc<dyn DocumentStore>,
        document_path: impl Into<String>,
    ) -> Self {
        self.document_store = Some(store);
        self.document_path = document_path.into();
        self
    }

    pub fn as_retry(mut self) -> Self {
        self.is_retry = true;
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }
}

/// Start a fresh run. Returns immediately; the chain executes on a spawned
/// task and reports through the handle.
pub fn start(chain: Chain, opts: RunOptions) -> RunHandle {
    spawn_run(chain, opts, Vec::new(), 0)
}

/// Spawn the driver task. `feedback` and `seen` are non-zero only when
/// resuming: the tool results to feed in, and how many transcript messages
/// the caller has already observed.
pub(crate) fn spawn_run(
    chain: Chain,
    opts: RunOptions,
    feedback: Vec<Message>,
    seen: usize,
) -> RunHandle {
    let (sink, stream) = channel();
    let (result_tx, result_rx) = oneshot::channel();

    let run_id = opts.run_id;
    let abort = opts.abort.clone();
    let snapshot = Arc::new(Mutex::new(Vec::new()));
    let driver = Driver::new(chain, opts, feedback, seen, Arc::clone(&snapshot));

    tokio::spawn(async move {
        let started = Instant::now();
        let (outcome, last_response) = tokio::select! {
            _ = abort.cancelled() => {
                // Dropping the drive future drops the sink, which closes the
                // event stream without a terminal event.
                info!(run_id = %run_id, "run aborted");
                let messages = snapshot.lock().await.clone();
                (RunOutcome::Aborted { messages }, None)
            }
            result = driver.drive(sink) => result,
        };
        let _ = result_tx.send(RunResult {
            outcome,
            last_response,
            duration: started.elapsed(),
        });
    });

    RunHandle::new(stream, result_rx)
}

enum DriverState {
    /// Advance the chain cursor and validate the next step.
    Validating,
    /// Call the provider for a validated step.
    CallingProvider {
        step: ValidatedStep,
        new_messages: Vec<Message>,
        tools: BTreeMap<String, ResolvedTool>,
    },
    /// Execute the reply's locally-resolvable tool calls.
    ResolvingTools {
        reply: ProviderReply,
        calls: Vec<ToolCall>,
        tools: BTreeMap<String, ResolvedTool>,
    },
    Completed { finish_reason: FinishReason },
    Paused { reply: ProviderReply },
    Failed { error: ChainError },
}

struct Driver {
    run_id: Uuid,
    chain: Chain,
    providers: ProviderMap,
    base_sources: ToolSources,
    resolver: ToolResolver,
    response_cache: ResponseCache,
    pause_cache: PauseCache,
    error_sink: Option<Arc<dyn RunErrorSink>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    document_path: String,
    errorable_type: String,
    is_retry: bool,

    /// Messages produced by the previous iteration, consumed by the next
    /// `Validating`.
    feedback: Vec<Message>,

    /// How many transcript messages the event consumer has already seen.
    seen: usize,

    steps_taken: u32,
    total_usage: Usage,
    last_reply: Option<ProviderReply>,

    /// Live copy of the conversation, read by the abort path.
    snapshot: Arc<Mutex<Vec<Message>>>,
}

impl Driver {
    fn new(
        chain: Chain,
        opts: RunOptions,
        feedback: Vec<Message>,
        seen: usize,
        snapshot: Arc<Mutex<Vec<Message>>>,
    ) -> Self {
        let mut resolver = ToolResolver::new(opts.environment).with_exchange(opts.exchange);
        for (name, handler) in opts.handlers {
            resolver.register_handler(name, handler);
        }

        Self {
            run_id: opts.run_id,
            chain,
            providers: opts.providers,
            base_sources: opts.sources,
            resolver,
            response_cache: ResponseCache::new(Arc::clone(&opts.store)),
            pause_cache: PauseCache::new(opts.store),
            error_sink: opts.error_sink,
            document_store: opts.document_store,
            document_path: opts.document_path,
            errorable_type: opts.errorable_type,
            is_retry: opts.is_retry,
            feedback,
            seen,
            steps_taken: 0,
            total_usage: Usage::zeroed(),
            last_reply: None,
            snapshot,
        }
    }

    /// Run the chain to its terminal state, emitting events along the way.
    async fn drive(mut self, sink: EventSink) -> (RunOutcome, Option<ProviderReply>) {
        sink.emit(ChainEvent::ChainStarted).await;

        let mut state = DriverState::Validating;
        loop {
            state = match state {
                DriverState::Completed { finish_reason } => {
                    self.pause_cache.delete_cached_chain(self.run_id).await;
                    info!(
                        run_id = %self.run_id,
                        steps = self.steps_taken,
                        finish_reason = %finish_reason,
                        "chain completed"
                    );
                    sink.close_with(ChainEvent::ChainCompleted {
                        finish_reason: finish_reason.clone(),
                        token_usage: self.total_usage,
                    })
                    .await;
                    let messages = self.snapshot.lock().await.clone();
                    return (
                        RunOutcome::Completed {
                            messages,
                            finish_reason,
                            token_usage: self.total_usage,
                        },
                        self.last_reply,
                    );
                }
                DriverState::Paused { reply } => {
                    self.pause_cache
                        .cache_chain(self.run_id, &self.chain, &reply)
                        .await;
                    let tools: Vec<ToolCall> =
                        reply.tool_calls.iter().cloned().map(ToolCall::from).collect();
                    info!(
                        run_id = %self.run_id,
                        tools = tools.len(),
                        "chain paused awaiting tool results"
                    );
                    sink.close_with(ChainEvent::ToolsRequested {
                        tools: tools.clone(),
                    })
                    .await;
                    return (RunOutcome::Paused { tools }, self.last_reply);
                }
                DriverState::Failed { error } => {
                    self.persist_error(&error).await;
                    warn!(
                        run_id = %self.run_id,
                        code = %error.code,
                        "chain failed: {}",
                        error.message
                    );
                    sink.close_with(ChainEvent::ChainError {
                        error: error.clone(),
                    })
                    .await;
                    return (RunOutcome::Failed { error }, self.last_reply);
                }
                other => self.advance(other, &sink).await,
            };
        }
    }

    async fn advance(&mut self, state: DriverState, sink: &EventSink) -> DriverState {
        match state {
            DriverState::Validating => self.validate().await,
            DriverState::CallingProvider {
                step,
                new_messages,
                tools,
            } => self.call_step(step, new_messages, tools, sink).await,
            DriverState::ResolvingTools {
                reply,
                calls,
                tools,
            } => self.resolve_tools(reply, calls, tools).await,
            terminal => terminal,
        }
    }

    async fn validate(&mut self) -> DriverState {
        let feedback = std::mem::take(&mut self.feedback);

        let out = if self.chain.completed() {
            // Past the last blueprint the loop keeps going only with fresh
            // feedback to act on: tool results from the final step (or a
            // resume of a final-step pause), or an agent turn. Agent loops
            // continue even without feedback until the return tool fires.
            let config = self.chain.last_step_config();
            if !config.agent && feedback.is_empty() {
                return DriverState::Failed {
                    error: ChainError::new(
                        ErrorCode::ChainCompileError,
                        "chain already completed, no further steps",
                    ),
                };
            }
            let conversation = self.chain.continue_with(&feedback);
            StepOutput {
                completed: true,
                conversation,
                config,
            }
        } else {
            match self.chain.step(&feedback) {
                Ok(out) => out,
                Err(error) => return DriverState::Failed { error },
            }
        };

        // Consumers only ever see the uncorrected transcript; provider rule
        // fixes and agent framing below stay between us and the gateway.
        let new_messages = out.conversation.messages[self.seen..].to_vec();
        self.seen = out.conversation.len();
        *self.snapshot.lock().await = out.conversation.messages.clone();

        let step = match validate_step(out, &self.providers) {
            Ok(step) => step,
            Err(error) => return DriverState::Failed { error },
        };

        let max_steps = step.config.effective_max_steps();
        if self.steps_taken >= max_steps {
            return DriverState::Failed {
                error: ChainError::new(
                    ErrorCode::MaxStepCountExceeded,
                    format!("run reached its step limit of {max_steps}"),
                )
                .with_details(serde_json::json!({
                    "max_steps": max_steps,
                    "steps_taken": self.steps_taken,
                })),
            };
        }

        let sources = match self.step_sources(&step).await {
            Ok(sources) => sources,
            Err(error) => return DriverState::Failed { error },
        };
        let tools = self.resolver.resolve(&sources);

        DriverState::CallingProvider {
            step,
            new_messages,
            tools,
        }
    }

    /// Assemble the tool sources for one step from the config's declarations
    /// plus the out-of-band catalogs.
    async fn step_sources(&self, step: &ValidatedStep) -> Result<ToolSources, ChainError> {
        let (inline, client_refs, subagent_refs, integration_refs) =
            partition_declarations(&step.config.tools);

        let mut sources = self.base_sources.clone();
        sources.client.extend(inline);
        // Plain names refer to client-catalog tools; one without a match
        // resolves to nothing, so flag it rather than dropping it silently.
        for reference in &client_refs {
            if !sources.client.iter().any(|d| &d.name == reference) {
                warn!(tool = %reference, "declared tool not found in the client catalog");
            }
        }
        if step.config.agent {
            sources.platform.push(agent_return_definition());
        }

        sources.subagents = if subagent_refs.is_empty() {
            Vec::new()
        } else {
            let store = self.document_store.as_ref().ok_or_else(|| {
                ChainError::new(
                    ErrorCode::DocumentConfigError,
                    "step references sub-agent tools but no document store is configured",
                )
            })?;
            resolve_subagent_tools(store, &self.document_path, &subagent_refs).await?
        };

        // Integration references must exist in the supplied catalog; a
        // dangling reference is a config error, not a silent no-op.
        sources.integrations = Vec::new();
        for reference in &integration_refs {
            let definition = self
                .base_sources
                .integrations
                .iter()
                .find(|d| d.name == *reference)
                .ok_or_else(|| {
                    ChainError::new(
                        ErrorCode::DocumentConfigError,
                        format!("integration tool '{reference}' is not available"),
                    )
                })?;
            sources.integrations.push(definition.clone());
        }

        Ok(sources)
    }

    async fn call_step(
        &mut self,
        step: ValidatedStep,
        new_messages: Vec<Message>,
        tools: BTreeMap<String, ResolvedTool>,
        sink: &EventSink,
    ) -> DriverState {
        sink.emit(ChainEvent::StepStarted).await;
        sink.emit(ChainEvent::ProviderStarted {
            config: step.config.clone(),
            messages: new_messages,
        })
        .await;

        let definitions: Vec<ToolDefinition> =
            tools.values().map(|t| t.definition.clone()).collect();
        let reply = match self.call_provider(&step, definitions, sink).await {
            Ok(reply) => reply,
            Err(error) => return DriverState::Failed { error },
        };

        self.steps_taken += 1;
        self.total_usage.accumulate(reply.usage);
        sink.emit(ChainEvent::ProviderCompleted {
            response: reply.clone(),
            token_usage: reply.usage,
            finish_reason: reply.finish_reason.clone(),
        })
        .await;
        sink.emit(ChainEvent::StepCompleted).await;

        self.snapshot.lock().await.push(assistant_message(&reply));
        self.last_reply = Some(reply.clone());

        if step.config.agent
            && reply.tool_calls.iter().any(|c| c.name == AGENT_RETURN_TOOL)
        {
            return DriverState::Completed {
                finish_reason: reply.finish_reason,
            };
        }

        // Provider-executed calls were already answered inside the reply;
        // a single unbound call pauses the whole step.
        let mut needs_pause = false;
        let mut local_calls = Vec::new();
        for call in &reply.tool_calls {
            match self.strategy_of(&tools, &call.name) {
                ExecutionStrategy::ProviderExecuted => {}
                ExecutionStrategy::Unbound => needs_pause = true,
                _ => local_calls.push(ToolCall::from(call.clone())),
            }
        }
        if needs_pause {
            return DriverState::Paused { reply };
        }

        // Resolvable calls on the final step still execute; completion is
        // only declared once a reply carries no tool work, so the model
        // always sees its tools' results.
        if !local_calls.is_empty() {
            return DriverState::ResolvingTools {
                reply,
                calls: local_calls,
                tools,
            };
        }

        if step.chain_completed && !step.config.agent {
            return DriverState::Completed {
                finish_reason: reply.finish_reason,
            };
        }

        self.feedback = vec![assistant_message(&reply)];
        DriverState::Validating
    }

    async fn call_provider(
        &self,
        step: &ValidatedStep,
        tools: Vec<ToolDefinition>,
        sink: &EventSink,
    ) -> Result<ProviderReply, ChainError> {
        let memoizable = should_cache(&step.config);
        if memoizable {
            if let Some(hit) = self
                .response_cache
                .get(&step.conversation, &step.config)
                .await
            {
                debug!(run_id = %self.run_id, "replaying memoized provider response");
                return Ok(hit);
            }
        }

        let request = GatewayRequest {
            conversation: step.conversation.clone(),
            config: step.config.clone(),
            tools,
        };
        let mut call = step
            .handle
            .gateway
            .call(request)
            .await
            .map_err(|failure| classify_failure(failure, step.handle.is_default))?;

        while let Some(delta) = call.deltas.recv().await {
            sink.emit(ChainEvent::ProviderRaw { delta }).await;
        }

        let reply = match call.reply.await {
            Ok(Ok(reply)) => reply,
            Ok(Err(failure)) => {
                return Err(classify_failure(failure, step.handle.is_default));
            }
            Err(_) => {
                return Err(ChainError::new(
                    ErrorCode::AiRunError,
                    "provider closed the reply channel without a response",
                ));
            }
        };

        if memoizable {
            self.response_cache
                .set(&step.conversation, &step.config, &reply)
                .await;
        }
        Ok(reply)
    }

    async fn resolve_tools(
        &mut self,
        reply: ProviderReply,
        calls: Vec<ToolCall>,
        tools: BTreeMap<String, ResolvedTool>,
    ) -> DriverState {
        let executions = calls.into_iter().map(|call| {
            let strategy = self.strategy_of(&tools, &call.name);
            execute_call(strategy, call)
        });

        match try_join_all(executions).await {
            Ok(results) => {
                let mut feedback = vec![assistant_message(&reply)];
                feedback.extend(results.into_iter().map(ToolResult::into_message));
                self.feedback = feedback;
                DriverState::Validating
            }
            Err(error) => DriverState::Failed { error },
        }
    }

    fn strategy_of(
        &self,
        tools: &BTreeMap<String, ResolvedTool>,
        name: &str,
    ) -> ExecutionStrategy {
        tools
            .get(name)
            .map(|t| t.strategy.clone())
            .unwrap_or_else(|| self.resolver.strategy_for(name))
    }

    async fn persist_error(&self, error: &ChainError) {
        let Some(error_sink) = &self.error_sink else {
            return;
        };
        if error.is_retryable() && self.is_retry {
            debug!(
                run_id = %self.run_id,
                code = %error.code,
                "retryable error on a retry attempt, not persisted again"
            );
            return;
        }

        let record = RunErrorRecord {
            run_id: self.run_id,
            errorable_type: self.errorable_type.clone(),
            code: error.code,
            message: error.message.clone(),
            details: error.details.clone(),
        };
        if let Err(e) = error_sink.create(record).await {
            warn!(run_id = %self.run_id, error = %e, "failed to persist run error");
        }
    }
}

/// Execute one locally-resolvable tool call. Handler failures come back as
/// error results the model can react to; only a delivery timeout is fatal.
async fn execute_call(
    strategy: ExecutionStrategy,
    call: ToolCall,
) -> Result<ToolResult, ChainError> {
    match strategy {
        ExecutionStrategy::Mock => Ok(mock_result(&call)),
        ExecutionStrategy::Handler(handler) => Ok(match handler.handle(&call).await {
            Ok(value) => ToolResult::ok(call.id, value),
            Err(message) => ToolResult::err(call.id, message),
        }),
        ExecutionStrategy::AwaitDelivery(exchange) => exchange.wait(&call.id).await,
        // Unbound and provider-executed calls are filtered out before
        // execution; reaching here is a driver bug.
        ExecutionStrategy::Unbound | ExecutionStrategy::ProviderExecuted => Err(ChainError::new(
            ErrorCode::Unknown,
            format!("tool '{}' has no local executor", call.name),
        )),
    }
}

/// The assistant message a provider reply contributes to the transcript.
pub(crate) fn assistant_message(reply: &ProviderReply) -> Message {
    if reply.tool_calls.is_empty() {
        Message::assistant(reply.text_content())
    } else {
        Message::assistant_with_tools(reply.text_content(), reply.tool_calls.clone())
    }
}

/// Translate a gateway failure into the stable taxonomy. Quota exhaustion
/// on the workspace default provider gets its own code so billing can react
/// to it.
fn classify_failure(failure: ProviderFailure, is_default_provider: bool) -> ChainError {
    match failure {
        ProviderFailure::RateLimited { retry_after_secs } => ChainError::new(
            ErrorCode::RateLimit,
            format!("provider rate limited the call, retry after {retry_after_secs}s"),
        ),
        ProviderFailure::QuotaExceeded(message) if is_default_provider => {
            ChainError::new(ErrorCode::DefaultProviderExceededQuota, message)
        }
        ProviderFailure::QuotaExceeded(message) => ChainError::new(
            ErrorCode::AiRunError,
            format!("provider quota exhausted: {message}"),
        ),
        ProviderFailure::AuthenticationFailed(message) => ChainError::new(
            ErrorCode::AiProviderConfigError,
            format!("provider rejected the credentials: {message}"),
        ),
        other => ChainError::new(ErrorCode::AiRunError, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_retryable_code() {
        let err = classify_failure(
            ProviderFailure::RateLimited {
                retry_after_secs: 30,
            },
            false,
        );
        assert_eq!(err.code, ErrorCode::RateLimit);
        assert!(err.is_retryable());
    }

    #[test]
    fn quota_code_depends_on_default_flag() {
        let on_default = classify_failure(ProviderFailure::QuotaExceeded("spent".into()), true);
        assert_eq!(on_default.code, ErrorCode::DefaultProviderExceededQuota);
        assert!(on_default.is_retryable());

        let on_custom = classify_failure(ProviderFailure::QuotaExceeded("spent".into()), false);
        assert_eq!(on_custom.code, ErrorCode::AiRunError);
        assert!(!on_custom.is_retryable());
    }

    #[test]
    fn auth_failure_is_a_config_error() {
        let err = classify_failure(
            ProviderFailure::AuthenticationFailed("bad key".into()),
            false,
        );
        assert_eq!(err.code, ErrorCode::AiProviderConfigError);
    }

    #[test]
    fn network_and_api_failures_are_run_errors() {
        let err = classify_failure(ProviderFailure::Network("refused".into()), false);
        assert_eq!(err.code, ErrorCode::AiRunError);

        let err = classify_failure(
            ProviderFailure::Api {
                status_code: 500,
                message: "oops".into(),
            },
            true,
        );
        assert_eq!(err.code, ErrorCode::AiRunError);
    }

    #[test]
    fn assistant_message_carries_tool_calls() {
        let reply = ProviderReply {
            text: Some("checking".into()),
            object: None,
            tool_calls: vec![stepchain_core::message::MessageToolCall {
                id: "call_1".into(),
                name: "get_weather".into(),
                arguments: serde_json::json!({}),
            }],
            usage: Usage::default(),
            finish_reason: FinishReason::ToolCalls,
            provider_call_id: None,
        };
        let msg = assistant_message(&reply);
        assert_eq!(msg.content, "checking");
        assert_eq!(msg.tool_calls.len(), 1);
    }
}
