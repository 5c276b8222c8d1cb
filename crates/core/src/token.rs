//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Backends that
//! ship a real tokenizer override [`ModelBackend::token_cost`]; everything
//! else falls back to these estimates.
//!
//! [`ModelBackend::token_cost`]: crate::backend::ModelBackend::token_cost

use crate::message::Message;

/// Per-message overhead for role names, delimiters and framing.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content())
}
