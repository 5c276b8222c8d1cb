//! Chat storage implementations for Weft.
//!
//! All backends implement the `weft_core::Storage` trait.
//! [`build_from_config`] selects one from configuration.

pub mod file_backend;
pub mod in_memory;
pub mod noop;

use std::path::PathBuf;
use std::sync::Arc;

pub use file_backend::FileStorage;
pub use in_memory::InMemoryStorage;
pub use noop::NoopStorage;

use weft_config::{StorageConfig, WeftConfig};
use weft_core::storage::Storage;

/// Build the storage backend named in configuration.
///
/// Unknown names fall back to [`NoopStorage`]; configuration validation
/// rejects them before this point.
pub fn build_from_config(config: &StorageConfig) -> Arc<dyn Storage> {
    match config.backend.as_str() {
        "memory" => Arc::new(InMemoryStorage::new()),
        "file" => {
            let dir = config
                .path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(WeftConfig::chats_dir);
            Arc::new(FileStorage::new(dir))
        }
        "none" => Arc::new(NoopStorage),
        other => {
            tracing::warn!(backend = other, "Unknown storage backend, chats will not be persisted");
            Arc::new(NoopStorage)
        }
    }
}
