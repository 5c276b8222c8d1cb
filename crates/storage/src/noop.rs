//! No-op storage: chats are never persisted.

use async_trait::async_trait;
use uuid::Uuid;
use weft_core::error::StorageError;
use weft_core::message::Chat;
use weft_core::storage::Storage;

/// A storage backend that discards writes and fails every read.
pub struct NoopStorage;

#[async_trait]
impl Storage for NoopStorage {
    fn name(&self) -> &str {
        "none"
    }

    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    async fn get_by_id(&self, _id: &str) -> Result<Chat, StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name().into(),
            operation: "get_by_id".into(),
        })
    }

    async fn save(&self, _chat: &Chat) -> Result<(), StorageError> {
        Ok(())
    }
}
