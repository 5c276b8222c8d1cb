//! # Weft Core
//!
//! Domain types, traits, and error definitions for the Weft prompt pipeline
//! engine. This crate has **no engine logic**; it defines the domain model
//! and the collaborator seams that the other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`ModelBackend`] prices messages and streams responses
//! - [`Storage`] allocates chat ids and persists chats
//!
//! Implementations live elsewhere (or in the caller's code), which keeps the
//! engine backend-agnostic and easy to test with scripted stand-ins.

pub mod backend;
pub mod error;
pub mod event;
pub mod message;
pub mod storage;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendRequest, ChunkStream, ModelBackend, StreamChunk, ToolDefinition};
pub use error::{BackendError, Error, Result, StorageError, ToolError};
pub use event::{EventBus, PipelineEvent};
pub use message::{Chat, ChatId, Message, MessageKind, PromptOptions, Visibility};
pub use storage::Storage;
