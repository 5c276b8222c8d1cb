use weft_core::{Message, ModelBackend};

use super::WindowSelector;

/// The last `count` messages, regardless of visibility or budget.
#[derive(Debug, Clone)]
pub struct LatestWindow {
    count: usize,
}

impl LatestWindow {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl WindowSelector for LatestWindow {
    fn name(&self) -> &str {
        "latest"
    }

    fn select<'m>(
        &self,
        messages: &'m [Message],
        _backend: &dyn ModelBackend,
        _budget: usize,
    ) -> Vec<&'m Message> {
        let start = messages.len().saturating_sub(self.count);
        messages[start..].iter().collect()
    }
}
