//! Agentic tool-calling loops.
//!
//! Drives the model ↔ tool round-trip: send a request, execute any tool
//! calls in the response, append results, and repeat until the model answers
//! without tools or the iteration limit is reached.
//!
//! [`stream_agentic_loop`] does the same over a streamed completion, forwarding
//! every decoded chunk to the caller as it arrives. It hands the conversation
//! state back when done so a non-streaming [`agentic_loop`] can continue the
//! same execution.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::executor::ToolExecutor;
use super::message::{ChatRequest, ChatResponse, assistant_tool_calls_message, tool_message};
use super::provider::{LlmProvider, ProviderChunk, with_timeout};
use super::tool::ToolCall;
use crate::error::AgentError;

const CHUNK_BUFFER: usize = 64;

/// Bounds applied to one loop run.
#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    /// Model round-trips before giving up.
    pub max_iterations: usize,
    /// Deadline for each provider call, and between streamed chunks.
    pub timeout: Duration,
}

/// Runs tool calls and appends the assistant and tool messages to `request`.
async fn run_tools(
    request: &mut ChatRequest,
    text: &str,
    calls: Vec<ToolCall>,
    executor: &ToolExecutor,
    iteration: usize,
) {
    debug!(iteration, tool_count = calls.len(), "executing tool calls");
    request
        .messages
        .push(assistant_tool_calls_message(text, calls.clone()));
    for call in &calls {
        let result = executor.execute(call).await;
        debug!(
            tool = call.name,
            call_id = call.id,
            is_error = result.is_error,
            "tool execution complete"
        );
        request
            .messages
            .push(tool_message(&result.tool_call_id, &result.content));
    }
}

/// Runs a non-streaming agentic loop: model → tool calls → tool results → model → …
///
/// # Errors
///
/// Returns [`AgentError::ToolLoopExceeded`] if the model keeps requesting
/// tools beyond the limit. Propagates provider errors and timeouts.
pub async fn agentic_loop(
    provider: &dyn LlmProvider,
    request: &mut ChatRequest,
    executor: &ToolExecutor,
    limits: LoopLimits,
) -> Result<ChatResponse, AgentError> {
    request.stream = false;
    for iteration in 0..limits.max_iterations {
        let response = with_timeout(provider.name(), limits.timeout, provider.chat(request)).await?;

        if response.tool_calls.is_empty() {
            debug!(iteration, "agentic loop completed with final text response");
            return Ok(response);
        }

        let calls = response.tool_calls.clone();
        run_tools(request, &response.content, calls, executor, iteration).await;
    }

    Err(AgentError::ToolLoopExceeded {
        max_iterations: limits.max_iterations,
    })
}

/// Final state of a streaming run.
#[derive(Debug)]
pub struct StreamOutcome {
    /// Conversation including every tool round that completed.
    pub request: ChatRequest,
    /// Failure that ended the run early, if any.
    pub error: Option<AgentError>,
    /// Whether the receiver went away before the run finished.
    pub cancelled: bool,
}

/// A streaming run in progress.
pub struct StreamingRun {
    /// Decoded chunks in arrival order.
    pub chunks: ReceiverStream<ProviderChunk>,
    /// Resolves once the run ends.
    pub outcome: JoinHandle<StreamOutcome>,
}

/// Starts a streaming agentic loop on a background task.
///
/// Dropping [`StreamingRun::chunks`] stops the run at the next chunk.
#[must_use]
pub fn stream_agentic_loop(
    provider: Arc<dyn LlmProvider>,
    mut request: ChatRequest,
    executor: Arc<ToolExecutor>,
    limits: LoopLimits,
) -> StreamingRun {
    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let outcome = tokio::spawn(async move {
        let result = drive_stream(provider.as_ref(), &mut request, &executor, limits, &tx).await;
        let (error, cancelled) = match result {
            Ok(()) => (None, false),
            Err(StreamStop::Cancelled) => (None, true),
            Err(StreamStop::Failed(e)) => (Some(e), false),
        };
        StreamOutcome {
            request,
            error,
            cancelled,
        }
    });
    StreamingRun {
        chunks: ReceiverStream::new(rx),
        outcome,
    }
}

enum StreamStop {
    Cancelled,
    Failed(AgentError),
}

impl From<AgentError> for StreamStop {
    fn from(e: AgentError) -> Self {
        Self::Failed(e)
    }
}

async fn drive_stream(
    provider: &dyn LlmProvider,
    request: &mut ChatRequest,
    executor: &ToolExecutor,
    limits: LoopLimits,
    tx: &mpsc::Sender<ProviderChunk>,
) -> Result<(), StreamStop> {
    request.stream = true;
    for iteration in 0..limits.max_iterations {
        let mut stream =
            with_timeout(provider.name(), limits.timeout, provider.chat_stream(request)).await?;

        let mut text = String::new();
        let mut calls = Vec::new();
        loop {
            let next = tokio::time::timeout(limits.timeout, stream.next())
                .await
                .map_err(|_| AgentError::Timeout {
                    provider: provider.name().to_string(),
                    secs: limits.timeout.as_secs(),
                })?;
            let Some(item) = next else { break };
            let chunk = item?;
            match &chunk {
                ProviderChunk::Delta(t) => text.push_str(t),
                ProviderChunk::Cumulative(t) | ProviderChunk::Final(t) => text.clone_from(t),
                ProviderChunk::ToolCall(call) => calls.push(call.clone()),
                ProviderChunk::Unknown => {}
            }
            if tx.send(chunk).await.is_err() {
                debug!(iteration, "stream receiver dropped");
                return Err(StreamStop::Cancelled);
            }
        }

        if calls.is_empty() {
            debug!(iteration, "streaming loop completed with final text response");
            return Ok(());
        }
        run_tools(request, &text, calls, executor, iteration).await;
    }

    Err(AgentError::ToolLoopExceeded {
        max_iterations: limits.max_iterations,
    }
    .into())
}
