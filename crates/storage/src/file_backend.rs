//! File-based storage: one JSON document per chat.
//!
//! Storage location: `~/.weft/chats/<chat-id>.json` by default. Files are
//! pretty-printed so transcripts stay human-inspectable.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use weft_core::error::StorageError;
use weft_core::message::Chat;
use weft_core::storage::Storage;

/// A directory of chat documents.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `dir`. The directory is created on
    /// first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StorageError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    async fn get_by_id(&self, id: &str) -> Result<Chat, StorageError> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StorageError::Io(format!("Failed to read {}: {e}", path.display()))),
        };

        serde_json::from_str(&content)
            .map_err(|e| StorageError::Corrupted(format!("{}: {e}", path.display())))
    }

    async fn save(&self, chat: &Chat) -> Result<(), StorageError> {
        let path = self.path_for(chat.id.as_str())?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StorageError::Io(format!("Failed to create chat directory: {e}"))
        })?;

        let json = serde_json::to_string_pretty(chat)
            .map_err(|e| StorageError::Io(format!("Failed to serialize chat: {e}")))?;

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to write {}: {e}", path.display())))?;

        debug!(chat_id = %chat.id, path = %path.display(), messages = chat.messages.len(), "Chat saved");
        Ok(())
    }
}
