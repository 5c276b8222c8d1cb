//! Error types for the Weft domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator (backend, storage, tools) has its own error enum;
//! the engine's own failure modes live directly on [`Error`].

use thiserror::Error;

/// The top-level error type for all Weft operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Collaborator errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Engine errors (all fatal) ---
    #[error("Loop detected: stage pattern [{}] repeated {count} times", .pattern.join(", "))]
    LoopDetected { pattern: Vec<String>, count: usize },

    #[error("Maximum call stack exceeded after {attempts} attempts: {reason}")]
    ExpectationExhausted { attempts: u32, reason: String },

    #[error("Tool loop detected: {tool} invoked {invocations} times within its own stage")]
    ToolLoop { tool: String, invocations: u32 },

    #[error("Move target not found: {0}")]
    MoveTargetNotFound(String),

    #[error("Branch stage {0} has no matching join stage")]
    BranchWithoutJoin(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is absorbed into the transcript instead of
    /// aborting the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Tool(_))
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Backend closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Chat not found: {0}")]
    NotFound(String),

    #[error("Operation not supported by {backend} storage: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Stored chat is corrupted: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },
}
