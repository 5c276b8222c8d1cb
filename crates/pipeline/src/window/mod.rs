//! Context window selection.
//!
//! Before every submission the engine picks which prior messages travel
//! with it. A [`WindowSelector`] makes that choice given the chat history,
//! the backend (which prices messages) and a token budget.

mod budget;
mod latest;

pub use budget::BudgetWindow;
pub use latest::LatestWindow;

use std::sync::Arc;

use weft_config::{WindowConfig, WindowStrategy};
use weft_core::{Message, ModelBackend};

/// Picks the messages that accompany a submission.
pub trait WindowSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Select from `messages` (chronological) under `budget` tokens.
    ///
    /// The result is in chronological order.
    fn select<'m>(
        &self,
        messages: &'m [Message],
        backend: &dyn ModelBackend,
        budget: usize,
    ) -> Vec<&'m Message>;
}

/// Build the selector named in configuration.
pub fn from_config(config: &WindowConfig) -> Arc<dyn WindowSelector> {
    match config.strategy {
        WindowStrategy::Budget => Arc::new(BudgetWindow),
        WindowStrategy::Latest => Arc::new(LatestWindow::new(config.latest_count)),
    }
}
