//! Pipeline event stream: observability for running pipelines.
//!
//! Every chat open/close, stage boundary, completed message and streamed
//! text fragment is published on an [`EventBus`]. Any number of consumers
//! (console writers, file loggers, test probes) may subscribe; each receives
//! every event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::message::Message;

/// All events a pipeline emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// `execute` started on a chat
    ChatOpened {
        chat_id: String,
        timestamp: DateTime<Utc>,
    },

    /// `execute` finished (successfully or not)
    ChatClosed {
        chat_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A child chat was opened
    SidebarOpened {
        chat_id: String,
        parent_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A child chat finished executing
    SidebarClosed {
        chat_id: String,
        parent_id: String,
        timestamp: DateTime<Utc>,
    },

    StageBegin {
        chat_id: String,
        stage_id: String,
        name: String,
    },

    StageEnd {
        chat_id: String,
        stage_id: String,
        name: String,
    },

    /// A message was appended to the chat
    Message { chat_id: String, message: Message },

    /// A streamed text fragment from the backend
    TextDelta { chat_id: String, content: String },

    /// A fatal error is about to abort the pipeline
    Error {
        chat_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name, suitable for log lines and SSE event types.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChatOpened { .. } => "chat_opened",
            Self::ChatClosed { .. } => "chat_closed",
            Self::SidebarOpened { .. } => "sidebar_opened",
            Self::SidebarClosed { .. } => "sidebar_closed",
            Self::StageBegin { .. } => "stage_begin",
            Self::StageEnd { .. } => "stage_end",
            Self::Message { .. } => "message",
            Self::TextDelta { .. } => "text_delta",
            Self::Error { .. } => "error",
        }
    }
}

/// A broadcast-based event bus for pipeline events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Clones of a
/// pipeline share the bus, so one subscriber observes a whole family of
/// chats.
pub struct EventBus {
    sender: broadcast::Sender<Arc<PipelineEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<PipelineEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
