//! Message and Chat domain types.
//!
//! A chat is an append-only log of tagged messages. Every message carries a
//! [`Visibility`] that decides whether (and how eagerly) it travels with the
//! next prompt, an optional deduplication `key`, and the token cost the
//! backend charged for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chat (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a message may accompany a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Standing instructions; budgeted like optional content
    System,
    /// Included when the budget allows, most recent first
    Optional,
    /// Always included; only shrinks the remaining budget
    Required,
    /// Never sent to the backend
    Exclude,
}

/// Options attached to a prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOptions {
    /// Deduplication key; a later prompt with the same key supersedes this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Overrides the default `Optional` visibility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    /// Maximum tokens the backend may generate in reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_budget: Option<u32>,
}

/// The payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageKind {
    /// Side content pushed into the conversation
    Context { content: String },

    /// A user-directed turn
    Prompt {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_budget: Option<u32>,
    },

    /// Backend text reply
    Response { content: String },

    /// Backend-requested tool invocation
    Function {
        call_id: String,
        name: String,
        arguments: String,
    },

    /// Output of executing a tool
    ToolResult {
        call_id: String,
        name: String,
        output: serde_json::Value,
    },

    /// Standing requirement
    Rule { content: String },

    /// Instruction to the backend
    Instruction { content: String },

    /// Recorded failure, visible to the backend on the next turn
    Error { content: String },
}

impl MessageKind {
    /// Short label for logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Context { .. } => "context",
            Self::Prompt { .. } => "prompt",
            Self::Response { .. } => "response",
            Self::Function { .. } => "function",
            Self::ToolResult { .. } => "tool-result",
            Self::Rule { .. } => "rule",
            Self::Instruction { .. } => "instruction",
            Self::Error { .. } => "error",
        }
    }

    fn default_visibility(&self) -> Visibility {
        match self {
            Self::Rule { .. } => Visibility::Required,
            Self::Instruction { .. } => Visibility::System,
            _ => Visibility::Optional,
        }
    }
}

/// A single message in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// What this message is
    #[serde(flatten)]
    pub kind: MessageKind,

    /// Eligibility for context windows
    pub visibility: Visibility,

    /// Deduplication key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Tokens charged by the backend for this message
    #[serde(default)]
    pub tokens: usize,

    /// IDs of the messages sent alongside this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub window: Vec<String>,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message of the given kind with its default visibility.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            visibility: kind.default_visibility(),
            kind,
            key: None,
            tokens: 0,
            window: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn context(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Context { content: content.into() })
    }

    /// Create a prompt, applying key and visibility from the options.
    pub fn prompt(content: impl Into<String>, options: &PromptOptions) -> Self {
        let mut msg = Self::new(MessageKind::Prompt {
            content: content.into(),
            response_budget: options.response_budget,
        });
        msg.key = options.key.clone();
        if let Some(visibility) = options.visibility {
            msg.visibility = visibility;
        }
        msg
    }

    pub fn response(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Response { content: content.into() })
    }

    pub fn function(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::new(MessageKind::Function {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        })
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        Self::new(MessageKind::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            output,
        })
    }

    pub fn rule(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Rule { content: content.into() })
    }

    pub fn instruction(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Instruction { content: content.into() })
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error { content: content.into() })
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// The text a backend would see for this message.
    pub fn content(&self) -> String {
        match &self.kind {
            MessageKind::Context { content }
            | MessageKind::Prompt { content, .. }
            | MessageKind::Response { content }
            | MessageKind::Rule { content }
            | MessageKind::Instruction { content }
            | MessageKind::Error { content } => content.clone(),
            MessageKind::Function { name, arguments, .. } => format!("{name}({arguments})"),
            MessageKind::ToolResult { output, .. } => match output {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response { .. })
    }

    /// Copy this message under a freshly generated id.
    ///
    /// `window` still refers to the old ids; callers that copy a whole
    /// history remap it afterwards.
    pub fn fresh_copy(&self) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }
}

/// A chat is an ordered log of messages plus session bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Unique chat ID (assigned by storage)
    pub id: ChatId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// Child sessions opened from this chat
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidebar_ids: Vec<String>,

    /// Chat-level metadata (user, parent id, caller data)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Prompt tokens reported by the backend
    #[serde(default)]
    pub input_tokens: u64,

    /// Completion tokens reported by the backend
    #[serde(default)]
    pub output_tokens: u64,

    /// When this chat was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    /// Create an empty chat with the given id.
    pub fn new(id: ChatId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            sidebar_ids: Vec::new(),
            metadata: serde_json::Map::new(),
            input_tokens: 0,
            output_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the chat.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// The most recent backend response, if any.
    pub fn latest_response(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_response())
    }

    /// Parent chat id when this chat is a sidebar.
    pub fn parent_id(&self) -> Option<&str> {
        self.metadata.get("parent_id").and_then(|v| v.as_str())
    }
}
