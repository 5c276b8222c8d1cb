//! Model backend trait: the abstraction over generative text services.
//!
//! A backend knows how to price messages in tokens and how to turn a request
//! into a stream of response chunks. Tokenization, transport and
//! authentication are the backend's business; the engine only consumes the
//! chunk stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::message::Message;
use crate::token;

/// A tool definition sent to the backend so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One submission to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// The selected context window, in chronological order
    pub messages: Vec<Message>,

    /// Tools the backend may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_budget: Option<u32>,

    /// End-user identifier forwarded to the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// A single chunk in a streaming response.
///
/// The stream ends when the sender side of the channel is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Partial text
    Text { content: String },

    /// A complete tool invocation request
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },

    /// Token accounting, typically once near the end
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
}

/// Receiving side of a backend response stream.
pub type ChunkStream = mpsc::Receiver<std::result::Result<StreamChunk, BackendError>>;

/// The core backend trait.
///
/// The pipeline engine calls `stream()` without knowing which service sits
/// behind it.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Tokens charged for a single message.
    fn token_cost(&self, message: &Message) -> usize {
        token::estimate_message_tokens(message)
    }

    /// Tokens charged for sending `messages` together.
    ///
    /// Backends with per-request or per-message framing overhead override
    /// this; the default is the plain sum of `token_cost`.
    fn window_cost(&self, messages: &[&Message]) -> usize {
        messages.iter().map(|m| self.token_cost(m)).sum()
    }

    /// Submit a request and receive its response as a chunk stream.
    async fn stream(&self, request: BackendRequest) -> std::result::Result<ChunkStream, BackendError>;

    /// Release backend resources.
    async fn close(&self) -> std::result::Result<(), BackendError> {
        Ok(())
    }
}
