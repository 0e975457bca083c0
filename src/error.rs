//! Error types for kb-chat.
//!
//! Each layer owns a focused error enum; [`Error`] aggregates them for the
//! CLI and other callers that cross layers.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Agent, provider, or tool failure.
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Search backend failure.
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    /// Persistent store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// CLI command failure.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by LLM providers, the agent loop, and tool execution.
#[derive(Error, Debug)]
pub enum AgentError {
    /// No API key configured for a provider that requires one.
    #[error("API key missing: set OPENAI_API_KEY or KB_API_KEY")]
    ApiKeyMissing,

    /// Provider name not recognized.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Requested provider name.
        name: String,
    },

    /// Provider rejected or failed the request.
    #[error("API request failed: {message}")]
    ApiRequest {
        /// Error detail.
        message: String,
        /// HTTP status, when known.
        status: Option<u16>,
    },

    /// Streaming transport failed mid-response.
    #[error("stream error: {message}")]
    Stream {
        /// Error detail.
        message: String,
    },

    /// Provider call exceeded its deadline.
    #[error("provider {provider} timed out after {secs}s")]
    Timeout {
        /// Provider name.
        provider: String,
        /// Deadline in seconds.
        secs: u64,
    },

    /// Provider unreachable.
    #[error("connection failed: {message}")]
    Connection {
        /// Error detail.
        message: String,
    },

    /// Every configured provider failed its health check.
    #[error("no healthy provider available (tried: {tried})")]
    NoProvider {
        /// Comma-separated provider names.
        tried: String,
    },

    /// Model kept requesting tools past the iteration limit.
    #[error("tool loop exceeded {max_iterations} iterations")]
    ToolLoopExceeded {
        /// Configured limit.
        max_iterations: usize,
    },

    /// A tool call failed.
    #[error("tool '{name}' failed: {message}")]
    ToolExecution {
        /// Tool name.
        name: String,
        /// Error detail.
        message: String,
    },

    /// Model output could not be interpreted.
    #[error("failed to parse response: {message}")]
    ResponseParse {
        /// Error detail.
        message: String,
        /// Offending content.
        content: String,
    },
}

impl AgentError {
    /// Whether this failure means the provider itself is unavailable.
    ///
    /// Timeouts and connection failures invalidate the preferred-provider
    /// entry so the next turn re-runs provider selection.
    #[must_use]
    pub const fn is_timeout_like(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection { .. })
    }
}

/// Errors raised by a search backend for one scope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// Backend query failed.
    #[error("backend query failed for scope '{scope}': {message}")]
    Backend {
        /// Scope (index) name.
        scope: String,
        /// Error detail.
        message: String,
    },

    /// Pagination cursor was not produced by this backend.
    #[error("invalid batch cursor: {cursor}")]
    InvalidCursor {
        /// Raw cursor token.
        cursor: String,
    },
}

/// Malformed date bound passed to the query planner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateSpecError {
    /// Spec was blank.
    #[error("empty date spec")]
    Empty,

    /// Neither a relative shorthand nor an absolute date.
    #[error("unrecognized date spec: {spec}")]
    Unrecognized {
        /// Raw spec.
        spec: String,
    },

    /// Relative amount too large to represent.
    #[error("date spec out of range: {spec}")]
    OutOfRange {
        /// Raw spec.
        spec: String,
    },
}

/// Errors raised by the `SQLite` store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database file does not exist yet.
    #[error("database not initialized at {path}: run `kb-chat init`")]
    NotInitialized {
        /// Expected database path.
        path: String,
    },

    /// Database directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled.
    #[error("storage task failed: {message}")]
    Task {
        /// Error detail.
        message: String,
    },

    /// Stored row could not be decoded.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Error detail.
        message: String,
    },
}

/// CLI command failures.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Command could not complete.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Argument rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be formatted.
    #[error("output format error: {0}")]
    OutputFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let timeout = AgentError::Timeout {
            provider: "openai".to_string(),
            secs: 30,
        };
        let conn = AgentError::Connection {
            message: "refused".to_string(),
        };
        let api = AgentError::ApiRequest {
            message: "bad request".to_string(),
            status: Some(400),
        };
        assert!(timeout.is_timeout_like());
        assert!(conn.is_timeout_like());
        assert!(!api.is_timeout_like());
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = RetrievalError::InvalidCursor {
            cursor: "x".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Retrieval(_)));
        assert!(err.to_string().contains("invalid batch cursor"));
    }
}
