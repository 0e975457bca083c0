//! Stream reconciliation.
//!
//! Providers stream either incremental deltas or cumulative snapshots (each
//! chunk is the whole response so far), interleaved with tool-call
//! announcements. [`Reconciler`] turns both shapes into [`CanonicalEvent`]s:
//! text deltas, at most one `ToolStarted` per distinct tool per turn, and a
//! closing `Done`.
//!
//! A cumulative snapshot covers only the current model call. A tool call
//! ends that call, so later snapshots are diffed against the text produced
//! after it.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::provider::ProviderChunk;

/// The only event shape callers observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    /// New text since the previous event.
    TextDelta(String),
    /// A tool started running (once per tool name per turn).
    ToolStarted(String),
    /// The turn finished.
    Done,
}

/// Per-turn reconciliation state.
#[derive(Debug, Default)]
pub struct Reconciler {
    accumulated: String,
    /// Byte offset in `accumulated` where the current model call began.
    call_start: usize,
    announced: HashSet<String>,
}

impl Reconciler {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new generation attempt.
    ///
    /// Clears the accumulated text. Tool announcements persist for the whole
    /// turn so a retry does not announce the same tool twice.
    pub fn begin_attempt(&mut self) {
        self.accumulated.clear();
        self.call_start = 0;
    }

    /// Text reconciled so far in the current attempt.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.accumulated
    }

    /// Whether the current attempt has produced visible text.
    #[must_use]
    pub fn has_text(&self) -> bool {
        !self.accumulated.trim().is_empty()
    }

    /// Consumes one chunk, returning the events it produces.
    pub fn push(&mut self, chunk: ProviderChunk) -> Vec<CanonicalEvent> {
        match chunk {
            ProviderChunk::Delta(text) => self.append(text),
            ProviderChunk::Cumulative(snapshot) | ProviderChunk::Final(snapshot) => {
                let delta = self.diff(snapshot);
                self.append(delta)
            }
            ProviderChunk::ToolCall(call) => {
                self.call_start = self.accumulated.len();
                if self.announced.insert(call.name.clone()) {
                    vec![CanonicalEvent::ToolStarted(call.name)]
                } else {
                    debug!(tool = %call.name, "duplicate tool announcement suppressed");
                    Vec::new()
                }
            }
            ProviderChunk::Unknown => {
                debug!("skipping unrecognized stream chunk");
                Vec::new()
            }
        }
    }

    /// Appends `text` as a delta, emitting it unless empty.
    pub fn append(&mut self, text: String) -> Vec<CanonicalEvent> {
        if text.is_empty() {
            return Vec::new();
        }
        self.accumulated.push_str(&text);
        vec![CanonicalEvent::TextDelta(text)]
    }

    /// New suffix of a cumulative snapshot of the current model call.
    ///
    /// A snapshot that does not extend the call's text is taken whole.
    fn diff(&self, snapshot: String) -> String {
        let current = self.accumulated.get(self.call_start..).unwrap_or_default();
        if let Some(rest) = snapshot.strip_prefix(current) {
            return rest.to_string();
        }
        warn!(
            accumulated_len = current.len(),
            chunk_len = snapshot.len(),
            "cumulative chunk does not extend accumulated text, emitting it whole"
        );
        snapshot
    }
}

/// Runs `chunks` through a fresh reconciler and appends `Done`.
#[must_use]
pub fn reconcile(chunks: impl IntoIterator<Item = ProviderChunk>) -> Vec<CanonicalEvent> {
    let mut reconciler = Reconciler::new();
    let mut events: Vec<CanonicalEvent> = chunks
        .into_iter()
        .flat_map(|chunk| reconciler.push(chunk))
        .collect();
    events.push(CanonicalEvent::Done);
    events
}
