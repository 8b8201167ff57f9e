//! Error type shared by every stage of the hook pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the mailbox, the capture stages and the archiver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HookError {
    // --- Mailbox ---
    /// The per-key lock could not be taken within the configured wait.
    #[error("timed out after {waited:?} waiting for lock on '{key}'")]
    LockTimeout { key: String, waited: Duration },

    #[error("invalid mailbox key: {0}")]
    InvalidKey(String),

    // --- Correlation ---
    /// Post capture found no pending event. Capture degrades this into a
    /// post-only record; it only surfaces from the lower-level lookup.
    #[error("no pending event for tool '{tool_name}' in session '{session_id}'")]
    NoMatch {
        session_id: String,
        tool_name: String,
    },

    // --- Input validation ---
    #[error("invalid hook request: {0}")]
    InvalidRequest(String),

    #[error("malformed transcript: {0}")]
    MalformedTranscript(String),

    #[error("transcript rejected: {0}")]
    ValidationRejected(String),

    // --- Setup ---
    #[error("configuration error: {0}")]
    Config(String),

    // --- Plumbing ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Convenience type alias for Result with HookError
pub type HookResult<T> = Result<T, HookError>;

impl HookError {
    /// Short machine-readable tag used in logs and error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            HookError::LockTimeout { .. } => "lock_timeout",
            HookError::InvalidKey(_) => "invalid_key",
            HookError::NoMatch { .. } => "no_match",
            HookError::InvalidRequest(_) => "invalid_request",
            HookError::MalformedTranscript(_) => "malformed_transcript",
            HookError::ValidationRejected(_) => "validation_rejected",
            HookError::Config(_) => "config",
            HookError::Io(_) => "io",
            HookError::Serialization(_) => "serialization",
            HookError::Task(_) => "task",
        }
    }
}

impl From<serde_json::Error> for HookError {
    fn from(err: serde_json::Error) -> Self {
        HookError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for HookError {
    fn from(err: toml::de::Error) -> Self {
        HookError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for HookError {
    fn from(err: tokio::task::JoinError) -> Self {
        HookError::Task(err.to_string())
    }
}
