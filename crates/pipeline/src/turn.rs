//! Submissions to the backend and the tool-call protocol.
//!
//! A submission streams the backend's reply into the chat: text fragments
//! are published as they arrive and collected into one response message,
//! tool requests are appended as function messages and run once the stream
//! ends. If any tool ran, a continuation stage is scheduled so the backend
//! sees the results before the pipeline moves on.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

use weft_core::backend::{BackendRequest, StreamChunk};
use weft_core::event::PipelineEvent;
use weft_core::message::{Message, PromptOptions};
use weft_core::{Error, Result, ToolError};

use crate::engine::Pipeline;
use crate::stage::{Stage, StageProcedure};

/// A tool request collected from the stream.
#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Resubmits the chat after tool results were appended.
///
/// Scheduled under the name of the tool that ran last, which is what lets
/// a tool that keeps calling itself be caught.
pub(crate) struct ContinueStage {
    pub response_budget: Option<u32>,
}

#[async_trait]
impl StageProcedure for ContinueStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.resubmit(self.response_budget).await
    }
}

impl Pipeline {
    /// Append a prompt and submit it with a window of prior messages.
    ///
    /// The prompt's own cost is held back from the window budget, and the
    /// ids of the messages sent with it are recorded on the prompt.
    pub(crate) async fn submit_prompt(&mut self, content: String, options: &PromptOptions) -> Result<()> {
        // A new top-level prompt starts a fresh tool budget
        self.invocations.clear();

        let mut prompt = Message::prompt(content, options);
        prompt.tokens = self.backend.token_cost(&prompt);
        let mut window = self.select_window(prompt.tokens);
        // The new prompt supersedes anything sharing its key
        if let Some(key) = prompt.key.as_deref() {
            window.retain(|m| m.key.as_deref() != Some(key));
        }
        prompt.window = window.iter().map(|m| m.id.clone()).collect();

        window.push(prompt.clone());
        self.append_message(prompt);
        self.submit(window, options.response_budget).await
    }

    /// Submit the chat as it stands, with no new prompt.
    pub(crate) async fn resubmit(&mut self, response_budget: Option<u32>) -> Result<()> {
        let window = self.select_window(0);
        self.submit(window, response_budget).await
    }

    async fn submit(&mut self, messages: Vec<Message>, response_budget: Option<u32>) -> Result<()> {
        let request = BackendRequest {
            messages,
            tools: self.tools.definitions(),
            response_budget: response_budget.or(self.config.engine.response_budget),
            user: self.user.clone(),
        };
        debug!(
            chat_id = %self.chat.id,
            backend = self.backend.name(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Submitting to backend"
        );

        let mut stream = self.backend.stream(request).await?;
        let mut text = String::new();
        let mut calls: Vec<PendingCall> = Vec::new();

        while let Some(chunk) = stream.recv().await {
            match chunk? {
                StreamChunk::Text { content } => {
                    self.events.publish(PipelineEvent::TextDelta {
                        chat_id: self.chat.id.to_string(),
                        content: content.clone(),
                    });
                    text.push_str(&content);
                }
                StreamChunk::ToolCall { id, name, arguments } => {
                    self.append_message(Message::function(&id, &name, &arguments));
                    calls.push(PendingCall { id, name, arguments });
                }
                StreamChunk::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    self.chat.input_tokens += u64::from(input_tokens);
                    self.chat.output_tokens += u64::from(output_tokens);
                }
            }
        }

        if !text.is_empty() {
            self.append_message(Message::response(text));
        }

        let Some(last_tool) = calls.last().map(|c| c.name.clone()) else {
            return Ok(());
        };

        debug!(tool_count = calls.len(), "Executing tool calls");
        for call in calls {
            self.dispatch(call).await?;
        }

        self.add_stage(Stage::new(
            last_tool,
            ContinueStage { response_budget },
        ));
        Ok(())
    }

    /// Run one requested tool and record its outcome.
    ///
    /// Only a tool loop is fatal. Unknown tools, bad arguments and handler
    /// failures become error messages the backend sees on the next turn.
    async fn dispatch(&mut self, call: PendingCall) -> Result<()> {
        let invocations = {
            let count = self.invocations.entry(call.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if invocations > self.config.engine.tool_loop_limit
            && self.current_stage.as_deref() == Some(call.name.as_str())
        {
            warn!(tool = %call.name, invocations, "Tool keeps invoking itself");
            return Err(Error::ToolLoop {
                tool: call.name,
                invocations,
            });
        }

        let Some(tool) = self.tools.get(&call.name) else {
            self.record_tool_error(ToolError::NotFound(call.name));
            return Ok(());
        };

        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(arguments) => arguments,
                Err(e) => {
                    self.record_tool_error(ToolError::InvalidArguments {
                        tool_name: call.name,
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
            }
        };

        let locals = Value::Object(self.locals.clone());
        let start = Instant::now();
        let result = tool.call(arguments, &locals, self).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                info!(tool = %call.name, duration_ms, "Tool executed");
                self.append_message(Message::tool_result(&call.id, &call.name, output));
            }
            Err(e) => self.record_tool_error(e),
        }
        Ok(())
    }

    fn record_tool_error(&mut self, error: ToolError) {
        let error = Error::from(error);
        warn!(chat_id = %self.chat.id, error = %error, "Tool call failed");
        self.append_message(Message::error(error.to_string()));
    }
}
