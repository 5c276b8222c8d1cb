use std::collections::HashMap;

use weft_core::{Message, ModelBackend, Visibility};

use super::WindowSelector;

/// Visibility- and key-aware selection under a token budget.
///
/// 1. Messages sharing a key collapse to the latest one.
/// 2. `Exclude` messages are dropped.
/// 3. `Required` messages are always kept; their cost comes off the budget.
/// 4. The rest are taken newest first while the accepted set still fits.
///    The first message that does not fit ends the scan, so older messages
///    are never pulled in past a gap.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetWindow;

impl WindowSelector for BudgetWindow {
    fn name(&self) -> &str {
        "budget"
    }

    fn select<'m>(
        &self,
        messages: &'m [Message],
        backend: &dyn ModelBackend,
        budget: usize,
    ) -> Vec<&'m Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        // ── Key deduplication ──
        let mut latest_for_key: HashMap<&str, usize> = HashMap::new();
        for (index, message) in messages.iter().enumerate() {
            if let Some(key) = message.key.as_deref() {
                latest_for_key.insert(key, index);
            }
        }

        let (required, optional): (Vec<(usize, &Message)>, Vec<(usize, &Message)>) = messages
            .iter()
            .enumerate()
            .filter(|(index, message)| match message.key.as_deref() {
                Some(key) => latest_for_key.get(key) == Some(index),
                None => true,
            })
            .filter(|(_, message)| message.visibility != Visibility::Exclude)
            .partition(|(_, message)| message.visibility == Visibility::Required);

        // ── Budget ──
        let required_refs: Vec<&Message> = required.iter().map(|(_, m)| *m).collect();
        let remaining = budget as i64 - backend.window_cost(&required_refs) as i64;

        let mut accepted: Vec<&Message> = Vec::new();
        let mut selected = required;
        for (index, message) in optional.into_iter().rev() {
            accepted.push(message);
            if backend.window_cost(&accepted) as i64 > remaining {
                accepted.pop();
                break;
            }
            selected.push((index, message));
        }

        selected.sort_by_key(|(index, _)| *index);
        selected.into_iter().map(|(_, message)| message).collect()
    }
}
