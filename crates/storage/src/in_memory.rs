//! In-memory storage: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use weft_core::error::StorageError;
use weft_core::message::Chat;
use weft_core::storage::Storage;

/// Keeps saved chats in a map keyed by chat id.
pub struct InMemoryStorage {
    chats: Arc<RwLock<HashMap<String, Chat>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            chats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of chats saved so far.
    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chats.read().await.is_empty()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    async fn get_by_id(&self, id: &str) -> Result<Chat, StorageError> {
        self.chats
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn save(&self, chat: &Chat) -> Result<(), StorageError> {
        self.chats
            .write()
            .await
            .insert(chat.id.to_string(), chat.clone());
        Ok(())
    }
}
