//! Storage trait: durable load/save of chats.
//!
//! Storage hands out chat ids and persists whole chats. The engine saves at
//! the end of every `execute`, successful or not.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::message::Chat;

/// The core Storage trait.
///
/// Implementations: none (no-op), in-memory (for testing), JSON files.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The backend name (e.g., "file", "memory", "none").
    fn name(&self) -> &str;

    /// Allocate an id for a new chat.
    fn new_id(&self) -> String;

    /// Load a chat by id.
    async fn get_by_id(&self, id: &str) -> std::result::Result<Chat, StorageError>;

    /// Persist a chat, replacing any previous version.
    async fn save(&self, chat: &Chat) -> std::result::Result<(), StorageError>;
}
