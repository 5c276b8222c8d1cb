//! Response expectations.
//!
//! An `expect` stage runs the latest response through a chain of
//! validators. Each validator sees the raw response text and the value the
//! previous one produced, and either passes along a (possibly refined)
//! value or rejects with a reason.
//!
//! A rejection is fed back to the backend as an error message and the chat
//! is resubmitted, up to `max_call_stack` times. After that the pipeline
//! fails with [`Error::ExpectationExhausted`].

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use weft_core::message::Message;
use weft_core::{Error, Result};

use crate::builder::{EXPECT_STAGE, RESEND_STAGE};
use crate::engine::Pipeline;
use crate::stage::{Stage, StageProcedure};
use crate::turn::ContinueStage;

/// Why a response was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: String,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

pub type Validation = std::result::Result<Value, Rejection>;

/// One link in a validation chain.
///
/// Any `Fn(&str, &Value) -> Validation` closure is a validator.
pub trait Validator: Send + Sync {
    fn validate(&self, response: &str, partial: &Value) -> Validation;
}

impl<F> Validator for F
where
    F: Fn(&str, &Value) -> Validation + Send + Sync,
{
    fn validate(&self, response: &str, partial: &Value) -> Validation {
        self(response, partial)
    }
}

/// Run `response` through every validator in order, threading the value.
///
/// Starts from `Value::Null` and stops at the first rejection.
pub fn run_chain(validators: &[Arc<dyn Validator>], response: &str) -> Validation {
    validators
        .iter()
        .try_fold(Value::Null, |partial, v| v.validate(response, &partial))
}

/// Common validators.
pub mod validators {
    use super::*;

    /// The response must be a JSON document; it becomes the value.
    ///
    /// A surrounding Markdown code fence is tolerated.
    pub fn json() -> impl Validator {
        |response: &str, _partial: &Value| {
            serde_json::from_str::<Value>(strip_fence(response))
                .map_err(|e| Rejection::new(format!("Response is not valid JSON: {e}")))
        }
    }

    /// The response must contain non-whitespace text.
    pub fn non_empty() -> impl Validator {
        |response: &str, partial: &Value| {
            if response.trim().is_empty() {
                Err(Rejection::new("Response is empty"))
            } else if partial.is_null() {
                Ok(Value::String(response.to_string()))
            } else {
                Ok(partial.clone())
            }
        }
    }

    /// The value produced so far must be an object with field `name`.
    pub fn has_field(name: impl Into<String>) -> impl Validator {
        let name = name.into();
        move |_response: &str, partial: &Value| {
            if partial.get(&name).is_some() {
                Ok(partial.clone())
            } else {
                Err(Rejection::new(format!("Response is missing the \"{name}\" field")))
            }
        }
    }

    fn strip_fence(response: &str) -> &str {
        let trimmed = response.trim();
        let Some(body) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        // Drop the info string (e.g. "json") on the opening line
        let body = body.split_once('\n').map(|(_, rest)| rest).unwrap_or(body);
        body.strip_suffix("```").unwrap_or(body).trim()
    }
}

/// Validates the latest response, scheduling a correction on rejection.
pub(crate) struct ExpectStage {
    pub validators: Arc<[Arc<dyn Validator>]>,
    /// Corrections already requested by earlier links of this expectation
    pub attempt: u32,
    /// Corrections allowed; `None` falls back to `engine.max_call_stack`
    pub max_call_stack: Option<u32>,
}

#[async_trait]
impl StageProcedure for ExpectStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        let outcome = match pipeline.chat.latest_response() {
            Some(response) => run_chain(&self.validators, &response.content()),
            None => Err(Rejection::new("No response to validate")),
        };

        let rejection = match outcome {
            Ok(value) => {
                debug!(chat_id = %pipeline.chat.id, attempt = self.attempt, "Expectation met");
                pipeline.expectation = Some(value);
                return Ok(());
            }
            Err(rejection) => rejection,
        };

        let max_call_stack = self
            .max_call_stack
            .unwrap_or(pipeline.config.engine.max_call_stack);
        if self.attempt >= max_call_stack {
            return Err(Error::ExpectationExhausted {
                attempts: self.attempt,
                reason: rejection.reason,
            });
        }

        warn!(
            chat_id = %pipeline.chat.id,
            attempt = self.attempt + 1,
            max_call_stack,
            reason = %rejection,
            "Response rejected, requesting a correction"
        );
        pipeline.append_message(Message::error(rejection.reason));
        pipeline.add_stage(Stage::new(
            RESEND_STAGE,
            ContinueStage {
                response_budget: None,
            },
        ));
        pipeline.add_stage(Stage::new(
            EXPECT_STAGE,
            ExpectStage {
                validators: self.validators.clone(),
                attempt: self.attempt + 1,
                max_call_stack: self.max_call_stack,
            },
        ));
        Ok(())
    }
}
