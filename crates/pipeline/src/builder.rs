//! The builder surface and the built-in stages behind it.
//!
//! Every builder method schedules one stage and returns the pipeline for
//! chaining. Nothing touches the chat until [`Pipeline::execute`] reaches
//! the stage.
//!
//! ```ignore
//! pipeline
//!     .rule("Answer in one word")
//!     .for_each(["red", "green"])
//!     .prompt("Name a fruit that is {{item}}")
//!     .join()
//!     .expect(validators::non_empty());
//! pipeline.execute().await?;
//! ```

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use weft_core::Result;
use weft_core::message::{Message, PromptOptions};

use crate::engine::Pipeline;
use crate::expect::{ExpectStage, Validator};
use crate::stage::{FnStage, Stage, StageProcedure};
use crate::tools::Tool;

// Stage names. Branch expansion matches on the branch and join names.
pub const APPEND_STAGE: &str = "append";
pub const PROMPT_STAGE: &str = "prompt";
pub const PROMPT_FOR_EACH_STAGE: &str = "prompt_for_each";
pub const BRANCH_STAGE: &str = "for_each";
pub const JOIN_STAGE: &str = "join";
pub const ITEM_STAGE: &str = "item";
pub const TOOL_STAGE: &str = "tool";
pub const EXPECT_STAGE: &str = "expect";
pub const RESEND_STAGE: &str = "resend";
pub const PAUSE_STAGE: &str = "pause";
pub const MOVE_TO_STAGE: &str = "move_to";
pub const LOAD_STAGE: &str = "load";
pub const SAVE_STAGE: &str = "save";

/// Substitute `{{name}}` placeholders with values from `locals`.
///
/// Strings are inserted as-is, other values as JSON. Unknown placeholders
/// are left untouched.
pub fn render_template(template: &str, locals: &Map<String, Value>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let mut rendered = template.to_string();
    for (name, value) in locals {
        let placeholder = format!("{{{{{name}}}}}");
        if rendered.contains(&placeholder) {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&placeholder, &text);
        }
    }
    rendered
}

// ── Built-in stages ───────────────────────────────────────────────────────

pub(crate) struct AppendStage {
    pub message: Message,
}

#[async_trait]
impl StageProcedure for AppendStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        // A stage can run more than once (move_to), each run adds a new message
        pipeline.append_message(self.message.fresh_copy());
        Ok(())
    }
}

pub(crate) struct PromptStage {
    pub content: String,
    pub options: PromptOptions,
}

#[async_trait]
impl StageProcedure for PromptStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        let content = render_template(&self.content, &pipeline.locals);
        pipeline.submit_prompt(content, &self.options).await
    }
}

pub(crate) struct PromptForEachStage {
    pub template: String,
    pub items: Vec<Value>,
    pub options: PromptOptions,
}

#[async_trait]
impl StageProcedure for PromptForEachStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        for (index, item) in self.items.iter().enumerate() {
            let mut scope = pipeline.locals.clone();
            scope.insert("item".into(), item.clone());
            scope.insert("index".into(), Value::from(index));
            pipeline.add_stage(Stage::new(
                PROMPT_STAGE,
                PromptStage {
                    content: render_template(&self.template, &scope),
                    options: self.options.clone(),
                },
            ));
        }
        Ok(())
    }
}

pub(crate) struct BranchStage {
    pub items: Vec<Value>,
}

#[async_trait]
impl StageProcedure for BranchStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.expand_branch(&self.items)
    }
}

pub(crate) struct JoinStage;

#[async_trait]
impl StageProcedure for JoinStage {
    async fn run(&self, _pipeline: &mut Pipeline) -> Result<()> {
        Ok(())
    }
}

/// Binds `item` and `index` in locals for one branch iteration.
pub(crate) struct ItemStage {
    pub item: Value,
    pub index: usize,
}

#[async_trait]
impl StageProcedure for ItemStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.locals.insert("item".into(), self.item.clone());
        pipeline.locals.insert("index".into(), Value::from(self.index));
        Ok(())
    }
}

pub(crate) struct ToolStage {
    pub tool: Arc<dyn Tool>,
}

#[async_trait]
impl StageProcedure for ToolStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.register_tool(self.tool.clone());
        Ok(())
    }
}

pub(crate) struct PauseStage;

#[async_trait]
impl StageProcedure for PauseStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.exit(None);
        Ok(())
    }
}

pub(crate) struct MoveToStage {
    pub target: String,
}

#[async_trait]
impl StageProcedure for MoveToStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.jump_to(&self.target)
    }

    fn relink(&self, ids: &HashMap<String, String>) -> Option<Arc<dyn StageProcedure>> {
        let target = ids.get(&self.target)?;
        Some(Arc::new(MoveToStage {
            target: target.clone(),
        }))
    }
}

pub(crate) struct LoadStage {
    pub chat_id: String,
}

#[async_trait]
impl StageProcedure for LoadStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.load_chat(&self.chat_id).await
    }
}

pub(crate) struct SaveStage;

#[async_trait]
impl StageProcedure for SaveStage {
    async fn run(&self, pipeline: &mut Pipeline) -> Result<()> {
        pipeline.save_chat().await
    }
}

// ── Builder methods ───────────────────────────────────────────────────────

impl Pipeline {
    /// Add side content (`Optional`).
    pub fn push(&mut self, content: impl Into<String>) -> &mut Self {
        self.append(Message::context(content))
    }

    /// Add an arbitrary message.
    pub fn append(&mut self, message: Message) -> &mut Self {
        self.add_stage(Stage::new(APPEND_STAGE, AppendStage { message }))
    }

    /// Add a standing rule (`Required`).
    pub fn rule(&mut self, content: impl Into<String>) -> &mut Self {
        self.append(Message::rule(content))
    }

    /// Add an instruction (`System`).
    pub fn instruction(&mut self, content: impl Into<String>) -> &mut Self {
        self.append(Message::instruction(content))
    }

    /// Add a canned response, as if the backend had said it.
    pub fn response(&mut self, content: impl Into<String>) -> &mut Self {
        self.append(Message::response(content))
    }

    /// Submit a prompt. `{{name}}` placeholders are filled from locals when
    /// the stage runs.
    pub fn prompt(&mut self, content: impl Into<String>) -> &mut Self {
        self.prompt_with_options(content, PromptOptions::default())
    }

    pub fn prompt_with_options(
        &mut self,
        content: impl Into<String>,
        options: PromptOptions,
    ) -> &mut Self {
        self.add_stage(Stage::new(
            PROMPT_STAGE,
            PromptStage {
                content: content.into(),
                options,
            },
        ))
    }

    /// One prompt per item, in item order. `{{item}}` and `{{index}}` in
    /// the template are bound per prompt.
    pub fn prompt_for_each(
        &mut self,
        template: impl Into<String>,
        items: impl IntoIterator<Item = impl Into<Value>>,
    ) -> &mut Self {
        self.add_stage(Stage::new(
            PROMPT_FOR_EACH_STAGE,
            PromptForEachStage {
                template: template.into(),
                items: items.into_iter().map(Into::into).collect(),
                options: PromptOptions::default(),
            },
        ))
    }

    /// Open a branch: the stages up to the matching [`join`](Self::join)
    /// run once per item, with `item` and `index` bound in locals.
    pub fn for_each(&mut self, items: impl IntoIterator<Item = impl Into<Value>>) -> &mut Self {
        self.add_stage(Stage::new(
            BRANCH_STAGE,
            BranchStage {
                items: items.into_iter().map(Into::into).collect(),
            },
        ))
    }

    /// Close the innermost open branch.
    pub fn join(&mut self) -> &mut Self {
        self.add_stage(Stage::new(JOIN_STAGE, JoinStage))
    }

    /// Make a tool available to the backend from this point on.
    pub fn tool(&mut self, tool: impl Tool + 'static) -> &mut Self {
        self.add_stage(Stage::new(TOOL_STAGE, ToolStage { tool: Arc::new(tool) }))
    }

    /// Run caller code as a stage.
    pub fn call<F>(&mut self, name: impl Into<String>, procedure: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Pipeline) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.add_stage(Stage::new(name, FnStage(procedure)))
    }

    /// Validate the latest response, asking for corrections on rejection.
    pub fn expect(&mut self, validator: impl Validator + 'static) -> &mut Self {
        let validator: Arc<dyn Validator> = Arc::new(validator);
        self.expect_all(vec![validator])
    }

    /// Validate the latest response against a chain of validators.
    pub fn expect_all(&mut self, validators: Vec<Arc<dyn Validator>>) -> &mut Self {
        self.schedule_expectation(validators, None)
    }

    /// Like [`expect_all`](Self::expect_all), allowing at most
    /// `max_call_stack` corrections instead of the configured number.
    pub fn expect_with_limit(
        &mut self,
        validators: Vec<Arc<dyn Validator>>,
        max_call_stack: u32,
    ) -> &mut Self {
        self.schedule_expectation(validators, Some(max_call_stack))
    }

    fn schedule_expectation(
        &mut self,
        validators: Vec<Arc<dyn Validator>>,
        max_call_stack: Option<u32>,
    ) -> &mut Self {
        debug!(validators = validators.len(), ?max_call_stack, "Expectation scheduled");
        self.add_stage(Stage::new(
            EXPECT_STAGE,
            ExpectStage {
                validators: validators.into(),
                attempt: 0,
                max_call_stack,
            },
        ))
    }

    /// Stop here; the next `execute` carries on from the following stage.
    pub fn pause(&mut self) -> &mut Self {
        self.add_stage(Stage::new(PAUSE_STAGE, PauseStage))
    }

    /// Continue at the stage with id `target` once this stage runs.
    pub fn move_to(&mut self, target: impl Into<String>) -> &mut Self {
        self.add_stage(Stage::new(
            MOVE_TO_STAGE,
            MoveToStage {
                target: target.into(),
            },
        ))
    }

    /// Replace the chat with a stored one when this stage runs.
    pub fn load(&mut self, chat_id: impl Into<String>) -> &mut Self {
        self.add_stage(Stage::new(
            LOAD_STAGE,
            LoadStage {
                chat_id: chat_id.into(),
            },
        ))
    }

    /// Persist the chat when this stage runs.
    pub fn save(&mut self) -> &mut Self {
        self.add_stage(Stage::new(SAVE_STAGE, SaveStage))
    }
}
