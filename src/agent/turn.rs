//! Turn controller: streams one answer and guarantees it ends with text.
//!
//! ```text
//! Streaming ─┬─ text ──────────────────────────────────────────────► Complete ─► Done
//!            └─ empty ─► EmptyFallback ─┬─ text ───────────────────► Complete
//!                                       └─ empty ─► RetryOnceIfEmpty ─┬─ text ─► Complete
//!                                                                     └─ empty ─► FinalDeterministicFallback
//! ```
//!
//! After `Done` the user message and the answer are stored, the rolling
//! summary update is spawned, and the turn's retrieval cache is cleared.
//! A caller that drops the event stream cancels the turn: no fallback runs
//! and nothing is stored.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::agentic_loop::{
    LoopLimits, StreamOutcome, StreamingRun, agentic_loop, stream_agentic_loop,
};
use super::client::ProviderPool;
use super::config::AgentConfig;
use super::executor::ToolExecutor;
use super::message::{ChatMessage, ChatRequest, Role, system_message, user_message};
use super::prompt::{PromptSet, build_chat_system_prompt};
use super::provider::LlmProvider;
use super::reconcile::{CanonicalEvent, Reconciler};
use crate::core::{ConversationTurn, Language};
use crate::error::AgentError;
use crate::history::{HistoryStore, SummaryUpdater};
use crate::retrieval::RetrievalCoordinator;
use crate::retrieval::render::contains_result_block;

/// Appended to the utterance for the single retry after an empty answer.
pub const RETRY_INSTRUCTION: &str = "\n\n[IMPORTANT: Please provide a direct, helpful response \
     to the user's message above. Do not remain silent.]";

/// Answer used when every attempt came back empty.
pub const FALLBACK_MESSAGE: &str = "I'm having trouble processing your request right now. \
     Please try again or rephrase your question.";

const EVENT_BUFFER: usize = 64;

/// Finalization states a turn passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Streaming the first answer.
    Streaming,
    /// A non-empty answer was produced.
    Complete,
    /// Streaming produced nothing; one non-streaming completion on the same run.
    EmptyFallback,
    /// Still empty; the whole call is repeated once with an explicit instruction.
    RetryOnceIfEmpty,
    /// Still empty; the fixed fallback message is used.
    FinalDeterministicFallback,
    /// Terminal.
    Done,
}

/// How a turn ended.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Final answer text.
    pub text: String,
    /// States visited, in order. Always ends with [`TurnState::Done`].
    pub path: Vec<TurnState>,
    /// First provider failure seen during the turn.
    pub provider_error: Option<AgentError>,
    /// Whether the caller went away before the turn finished.
    pub cancelled: bool,
}

/// A turn in progress.
pub struct TurnHandle {
    /// Events in order, ending with [`CanonicalEvent::Done`].
    pub events: ReceiverStream<CanonicalEvent>,
    /// Resolves after persistence and cache cleanup.
    pub outcome: JoinHandle<TurnOutcome>,
}

/// Forwards events to the caller and notices when it leaves.
struct Emitter {
    tx: mpsc::Sender<CanonicalEvent>,
    closed: bool,
}

impl Emitter {
    const fn new(tx: mpsc::Sender<CanonicalEvent>) -> Self {
        Self { tx, closed: false }
    }

    async fn emit(&mut self, events: Vec<CanonicalEvent>) -> bool {
        for event in events {
            if self.tx.send(event).await.is_err() {
                self.closed = true;
                return false;
            }
        }
        true
    }

    fn closed(&self) -> bool {
        self.closed || self.tx.is_closed()
    }
}

/// Mutable state of one turn.
struct TurnRun {
    path: Vec<TurnState>,
    reconciler: Reconciler,
    provider_error: Option<AgentError>,
}

/// Runs conversation turns.
pub struct TurnController {
    pool: ProviderPool,
    coordinator: Arc<RetrievalCoordinator>,
    history: Arc<dyn HistoryStore>,
    summary: Option<Arc<dyn SummaryUpdater>>,
    config: AgentConfig,
    prompts: PromptSet,
}

impl TurnController {
    /// Creates a controller with the default prompts and no summary updater.
    #[must_use]
    pub fn new(
        pool: ProviderPool,
        coordinator: Arc<RetrievalCoordinator>,
        history: Arc<dyn HistoryStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            pool,
            coordinator,
            history,
            summary: None,
            config,
            prompts: PromptSet::defaults(),
        }
    }

    /// Spawns `updater` after every stored turn.
    #[must_use]
    pub fn with_summary(mut self, updater: Arc<dyn SummaryUpdater>) -> Self {
        self.summary = Some(updater);
        self
    }

    /// Replaces the prompt set.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Retrieval coordinator shared by this controller's turns.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<RetrievalCoordinator> {
        &self.coordinator
    }

    /// Starts a turn on a background task.
    #[must_use]
    pub fn start(self: &Arc<Self>, turn: ConversationTurn, utterance: impl Into<String>) -> TurnHandle {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let controller = Arc::clone(self);
        let utterance = utterance.into();
        let outcome = tokio::spawn(async move {
            controller
                .run(Arc::new(turn), utterance, Emitter::new(tx))
                .await
        });
        TurnHandle {
            events: ReceiverStream::new(rx),
            outcome,
        }
    }

    async fn run(
        &self,
        turn: Arc<ConversationTurn>,
        utterance: String,
        mut out: Emitter,
    ) -> TurnOutcome {
        let _guard = self.coordinator.begin_turn(turn.turn_id);
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&turn),
        ));
        let mut run = TurnRun {
            path: vec![TurnState::Streaming],
            reconciler: Reconciler::new(),
            provider_error: None,
        };

        match self.pool.select().await {
            Ok(provider) => {
                self.generate(&provider, &turn, &utterance, &executor, &mut run, &mut out)
                    .await;
            }
            Err(e) => {
                warn!(turn_id = %turn.turn_id, error = %e, "no provider for turn");
                run.provider_error = Some(e);
            }
        }

        if out.closed() {
            info!(turn_id = %turn.turn_id, "turn cancelled by caller");
            run.path.push(TurnState::Done);
            return TurnOutcome {
                text: run.reconciler.text().to_string(),
                path: run.path,
                provider_error: run.provider_error,
                cancelled: true,
            };
        }

        if !run.reconciler.has_text() {
            run.path.push(TurnState::FinalDeterministicFallback);
            let events = run.reconciler.append(FALLBACK_MESSAGE.to_string());
            out.emit(events).await;
        }
        out.emit(vec![CanonicalEvent::Done]).await;
        run.path.push(TurnState::Done);

        let text = run.reconciler.text().trim().to_string();
        self.persist(&turn, &utterance, &text).await;
        info!(
            turn_id = %turn.turn_id,
            path = ?run.path,
            chars = text.len(),
            "turn finished"
        );

        TurnOutcome {
            text,
            path: run.path,
            provider_error: run.provider_error,
            cancelled: false,
        }
    }

    /// Streaming attempt, then the empty fallback, then the single retry.
    async fn generate(
        &self,
        provider: &Arc<dyn LlmProvider>,
        turn: &ConversationTurn,
        utterance: &str,
        executor: &Arc<ToolExecutor>,
        run: &mut TurnRun,
        out: &mut Emitter,
    ) {
        let limits = LoopLimits {
            max_iterations: self.config.max_tool_iterations,
            timeout: self.config.timeout,
        };
        let context = self.context_messages(turn).await;

        let request = self.request(provider.name(), &context, utterance, executor);
        let streamed = self
            .stream_attempt(provider, request, executor, limits, run, out)
            .await;
        if out.closed() {
            return;
        }
        let unavailable = self.note_error(streamed.error, run).await;
        if self.settle(executor, turn.language, run, out).await {
            run.path.push(TurnState::Complete);
            return;
        }
        if unavailable {
            return;
        }

        run.path.push(TurnState::EmptyFallback);
        let mut request = streamed.request;
        match agentic_loop(provider.as_ref(), &mut request, executor, limits).await {
            Ok(response) => {
                let events = run.reconciler.append(response.content.trim().to_string());
                out.emit(events).await;
            }
            Err(e) => {
                if self.note_error(Some(e), run).await {
                    return;
                }
            }
        }
        if out.closed() {
            return;
        }
        if self.settle(executor, turn.language, run, out).await {
            run.path.push(TurnState::Complete);
            return;
        }

        run.path.push(TurnState::RetryOnceIfEmpty);
        debug!(turn_id = %turn.turn_id, "answer still empty, retrying once");
        run.reconciler.begin_attempt();
        let retry_text = format!("{utterance}{RETRY_INSTRUCTION}");
        let request = self.request(provider.name(), &context, &retry_text, executor);
        let streamed = self
            .stream_attempt(provider, request, executor, limits, run, out)
            .await;
        if out.closed() {
            return;
        }
        self.note_error(streamed.error, run).await;
        if self.settle(executor, turn.language, run, out).await {
            run.path.push(TurnState::Complete);
        }
    }

    /// Streams one agent run through the reconciler.
    async fn stream_attempt(
        &self,
        provider: &Arc<dyn LlmProvider>,
        request: ChatRequest,
        executor: &Arc<ToolExecutor>,
        limits: LoopLimits,
        run: &mut TurnRun,
        out: &mut Emitter,
    ) -> StreamOutcome {
        let StreamingRun {
            mut chunks,
            outcome,
        } = stream_agentic_loop(
            Arc::clone(provider),
            request.clone(),
            Arc::clone(executor),
            limits,
        );
        while let Some(chunk) = chunks.next().await {
            if !out.emit(run.reconciler.push(chunk)).await {
                break;
            }
        }
        drop(chunks);

        outcome.await.unwrap_or_else(|e| StreamOutcome {
            request,
            error: Some(AgentError::Stream {
                message: format!("stream task failed: {e}"),
            }),
            cancelled: false,
        })
    }

    /// Records a provider failure. Returns whether the provider is unavailable.
    async fn note_error(&self, error: Option<AgentError>, run: &mut TurnRun) -> bool {
        let Some(error) = error else {
            return false;
        };
        warn!(error = %error, "provider call failed during turn");
        let unavailable = error.is_timeout_like();
        if unavailable {
            self.pool.invalidate_preference().await;
        }
        if run.provider_error.is_none() {
            run.provider_error = Some(error);
        }
        unavailable
    }

    /// Appends result cards the answer left out, or the empty-knowledge-base
    /// notice. Returns whether the answer now has text.
    async fn settle(
        &self,
        executor: &ToolExecutor,
        language: Language,
        run: &mut TurnRun,
        out: &mut Emitter,
    ) -> bool {
        let blocks = executor.knowledge_blocks();
        let reconciler = &mut run.reconciler;
        if !blocks.is_empty() && !contains_result_block(reconciler.text()) {
            let mut tail = if reconciler.has_text() {
                "\n\n".to_string()
            } else {
                format!("{}\n\n", language.cards_intro())
            };
            tail.push_str(&blocks.join("\n\n"));
            debug!(blocks = blocks.len(), "appending result cards to answer");
            out.emit(reconciler.append(tail)).await;
        } else if !reconciler.has_text() && executor.knowledge_base_empty() {
            out.emit(reconciler.append(language.empty_knowledge_base().to_string()))
                .await;
        }
        reconciler.has_text()
    }

    /// System prompt plus recent history, without the new utterance.
    async fn context_messages(&self, turn: &ConversationTurn) -> Vec<ChatMessage> {
        let thread = turn.thread_id.as_str();
        let summary = self
            .history
            .latest_summary(thread)
            .await
            .unwrap_or_else(|e| {
                warn!(thread, error = %e, "failed to read conversation summary");
                None
            });
        let entries = self
            .history
            .read_last(thread, self.config.history_limit)
            .await
            .unwrap_or_else(|e| {
                warn!(thread, error = %e, "failed to read history");
                Vec::new()
            });

        let system = build_chat_system_prompt(&self.prompts.chat, turn.language, summary.as_deref());
        let mut messages = vec![system_message(&system)];
        messages.extend(
            entries
                .into_iter()
                .filter(|e| e.role != Role::System)
                .map(|e| ChatMessage::text(e.role, e.text)),
        );
        messages
    }

    fn request(
        &self,
        provider: &str,
        context: &[ChatMessage],
        user_text: &str,
        executor: &ToolExecutor,
    ) -> ChatRequest {
        let mut messages = context.to_vec();
        messages.push(user_message(user_text));
        ChatRequest {
            model: self.config.chat_model_for(provider).to_string(),
            messages,
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.chat_max_tokens),
            json_mode: false,
            stream: true,
            tools: executor.tools().into_definitions(),
        }
    }

    /// Stores the exchange and spawns the summary update.
    async fn persist(&self, turn: &ConversationTurn, utterance: &str, answer: &str) {
        let thread = turn.thread_id.as_str();
        for (role, text) in [(Role::User, utterance), (Role::Assistant, answer)] {
            if let Err(e) = self.history.append(thread, role, text).await {
                warn!(thread, error = %e, "failed to store turn message");
                return;
            }
        }

        if let Some(updater) = &self.summary {
            let updater = Arc::clone(updater);
            let thread = turn.thread_id.clone();
            let language = turn.language;
            tokio::spawn(async move {
                if let Err(e) = updater.update(&thread, language).await {
                    warn!(thread, error = %e, "conversation summary update failed");
                }
            });
        }
    }
}
