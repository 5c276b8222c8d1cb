//! The pipeline engine: an ordered, mutable list of stages plus a cursor.
//!
//! Builder calls (see `builder.rs`) schedule stages. [`Pipeline::execute`]
//! walks them in order. While a stage runs, anything it schedules lands
//! right after it, in call order, so a stage can expand into more work
//! that runs before the rest of the pipeline.
//!
//! The run loop, for each step:
//! 1. Honor a pending exit (pause or abort)
//! 2. Scan the execution trace for repetition
//! 3. Run the stage under the cursor, bracketed by stage events
//! 4. Advance to the next stage, or to a pending `jump_to` target

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weft_config::WeftConfig;
use weft_core::event::{EventBus, PipelineEvent};
use weft_core::message::{Chat, ChatId, Message, MessageKind};
use weft_core::{Error, ModelBackend, Result, Storage};

use crate::builder::{BRANCH_STAGE, ItemStage, JOIN_STAGE, ITEM_STAGE};
use crate::loop_detector::{LoopReport, detect_loop};
use crate::stage::{Stage, replicate_all};
use crate::tools::{Tool, ToolRegistry};
use crate::window::{self, WindowSelector};

/// How a running pipeline was asked to stop.
#[derive(Debug)]
pub(crate) enum ExitSignal {
    /// Stop cleanly; the next `execute` resumes where this one stopped
    Stop,
    /// Stop and fail `execute` with this error
    Abort(Error),
}

/// Which parts of the parent a sidebar starts with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SidebarOptions {
    /// Copy the parent's rule messages
    pub inherit_rules: bool,
    /// Share the parent's registered tools
    pub inherit_tools: bool,
    /// Copy the parent's locals
    pub inherit_locals: bool,
}

impl SidebarOptions {
    /// Inherit rules, tools and locals.
    pub fn inherit_all() -> Self {
        Self {
            inherit_rules: true,
            inherit_tools: true,
            inherit_locals: true,
        }
    }
}

/// A prompt pipeline bound to one chat.
pub struct Pipeline {
    /// Engine instance id (distinct from the chat id)
    pub(crate) id: String,
    pub(crate) config: WeftConfig,
    pub(crate) backend: Arc<dyn ModelBackend>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) window: Arc<dyn WindowSelector>,
    pub(crate) chat: Chat,

    // ── Scheduling ──
    pub(crate) stages: Vec<Stage>,
    /// Index of the stage running now, or of the next one when idle
    pub(crate) position: usize,
    pub(crate) insertion_point: usize,
    pub(crate) running: bool,
    pub(crate) jump: Option<String>,
    pub(crate) exit_signal: Option<ExitSignal>,
    pub(crate) trace: Vec<String>,
    pub(crate) last_added: Option<String>,
    pub(crate) current_stage: Option<String>,

    // ── Turn state ──
    pub(crate) tools: ToolRegistry,
    /// Tool invocations since the last top-level prompt
    pub(crate) invocations: HashMap<String, u32>,
    pub(crate) locals: Map<String, Value>,
    pub(crate) user: Option<String>,
    pub(crate) expectation: Option<Value>,
}

impl Pipeline {
    /// Create a pipeline with default configuration.
    pub fn new(backend: Arc<dyn ModelBackend>, storage: Arc<dyn Storage>) -> Self {
        Self::with_config(backend, storage, WeftConfig::default())
    }

    pub fn with_config(
        backend: Arc<dyn ModelBackend>,
        storage: Arc<dyn Storage>,
        config: WeftConfig,
    ) -> Self {
        let events = Arc::new(EventBus::new(config.engine.event_capacity));
        let window = window::from_config(&config.window);
        Self::assemble(backend, storage, config, events, window)
    }

    /// Create a pipeline whose storage is built from `config.storage`.
    pub fn from_config(backend: Arc<dyn ModelBackend>, config: WeftConfig) -> Self {
        let storage = weft_storage::build_from_config(&config.storage);
        Self::with_config(backend, storage, config)
    }

    /// Create a pipeline from `~/.weft/config.toml` and `WEFT_*` overrides.
    pub fn from_default_config(backend: Arc<dyn ModelBackend>) -> Result<Self> {
        let config = WeftConfig::load().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        Ok(Self::from_config(backend, config))
    }

    fn assemble(
        backend: Arc<dyn ModelBackend>,
        storage: Arc<dyn Storage>,
        config: WeftConfig,
        events: Arc<EventBus>,
        window: Arc<dyn WindowSelector>,
    ) -> Self {
        let chat = Chat::new(ChatId(storage.new_id()));
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            backend,
            storage,
            events,
            window,
            chat,
            stages: Vec::new(),
            position: 0,
            insertion_point: 0,
            running: false,
            jump: None,
            exit_signal: None,
            trace: Vec::new(),
            last_added: None,
            current_stage: None,
            tools: ToolRegistry::new(),
            invocations: HashMap::new(),
            locals: Map::new(),
            user: None,
            expectation: None,
        }
    }

    /// Publish on a caller-supplied event bus instead of a private one.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Replace the configured window selector.
    pub fn with_window(mut self, window: Arc<dyn WindowSelector>) -> Self {
        self.window = window;
        self
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat.id
    }

    pub fn chat(&self) -> &Chat {
        &self.chat
    }

    pub fn messages(&self) -> &[Message] {
        &self.chat.messages
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Index of the running stage, or of the next stage to run when idle.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Ids of executed stages, oldest first.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Id of the most recently scheduled stage.
    pub fn last_stage_id(&self) -> Option<&str> {
        self.last_added.as_deref()
    }

    /// Name of the stage currently running.
    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn locals(&self) -> &Map<String, Value> {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.locals
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The value produced by the last `expect` stage that passed.
    pub fn expectation(&self) -> Option<&Value> {
        self.expectation.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn backend(&self) -> Arc<dyn ModelBackend> {
        self.backend.clone()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.storage.clone()
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    // ── Immediate setters ──────────────────────────────────────────────────

    /// Set the end-user identifier forwarded with every submission.
    pub fn set_user(&mut self, user: impl Into<String>) -> &mut Self {
        let user = user.into();
        self.chat
            .metadata
            .insert("user".into(), Value::String(user.clone()));
        self.user = Some(user);
        self
    }

    /// Replace all locals.
    pub fn set_locals(&mut self, locals: Map<String, Value>) -> &mut Self {
        self.locals = locals;
        self
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.locals.insert(name.into(), value.into());
        self
    }

    /// Set one chat metadata entry.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.chat.metadata.insert(key.into(), value.into());
        self
    }

    /// Register a tool right away, outside the stage list.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        debug!(chat_id = %self.chat.id, tool = tool.name(), "Tool registered");
        self.tools.register(tool);
        self
    }

    // ── Stage scheduling ───────────────────────────────────────────────────

    /// Schedule a stage.
    ///
    /// Idle pipelines append to the end. While a stage is running, new
    /// stages go right after it, after anything it already scheduled.
    pub fn add_stage(&mut self, stage: Stage) -> &mut Self {
        self.last_added = Some(stage.id.clone());
        if self.running {
            self.stages.insert(self.insertion_point, stage);
            self.insertion_point += 1;
        } else {
            self.stages.push(stage);
        }
        self
    }

    /// Move the cursor to the stage with id `target`.
    ///
    /// From inside a running stage this takes effect once the stage
    /// finishes; otherwise the next `execute` starts there.
    pub fn jump_to(&mut self, target: &str) -> Result<()> {
        let index = self.index_of(target)?;
        if self.running {
            self.jump = Some(target.to_string());
        } else {
            self.position = index;
        }
        Ok(())
    }

    /// Stop the run after the current stage.
    ///
    /// `None` stops cleanly and the next `execute` resumes at the following
    /// stage. `Some(error)` fails `execute` with that error.
    pub fn exit(&mut self, error: Option<Error>) {
        self.exit_signal = Some(match error {
            None => ExitSignal::Stop,
            Some(e) => ExitSignal::Abort(e),
        });
    }

    fn index_of(&self, stage_id: &str) -> Result<usize> {
        self.stages
            .iter()
            .position(|s| s.id == stage_id)
            .ok_or_else(|| Error::MoveTargetNotFound(stage_id.to_string()))
    }

    // ── Messages ───────────────────────────────────────────────────────────

    /// Price a message, append it to the chat and announce it.
    ///
    /// Returns the message id.
    pub fn append_message(&mut self, mut message: Message) -> String {
        message.tokens = self.backend.token_cost(&message);
        debug!(
            chat_id = %self.chat.id,
            kind = message.kind.label(),
            tokens = message.tokens,
            "Message appended"
        );
        self.events.publish(PipelineEvent::Message {
            chat_id: self.chat.id.to_string(),
            message: message.clone(),
        });
        let id = message.id.clone();
        self.chat.push(message);
        id
    }

    /// Select prior messages for a submission, holding back `reserve` tokens.
    pub(crate) fn select_window(&self, reserve: usize) -> Vec<Message> {
        let budget = self.config.engine.token_budget.saturating_sub(reserve);
        self.window
            .select(&self.chat.messages, self.backend.as_ref(), budget)
            .into_iter()
            .cloned()
            .collect()
    }

    // ── Persistence ────────────────────────────────────────────────────────

    /// Replace this pipeline's chat with one from storage.
    pub async fn load_chat(&mut self, chat_id: &str) -> Result<()> {
        let chat = self.storage.get_by_id(chat_id).await?;
        info!(
            chat_id = %chat.id,
            messages = chat.messages.len(),
            storage = self.storage.name(),
            "Chat loaded"
        );
        if let Some(user) = chat.metadata.get("user").and_then(|v| v.as_str()) {
            self.user = Some(user.to_string());
        }
        self.chat = chat;
        Ok(())
    }

    pub async fn save_chat(&self) -> Result<()> {
        self.storage.save(&self.chat).await?;
        debug!(chat_id = %self.chat.id, storage = self.storage.name(), "Chat saved");
        Ok(())
    }

    /// Release backend resources.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await?;
        Ok(())
    }

    // ── Execution ──────────────────────────────────────────────────────────

    /// Run stages from the cursor until the list is exhausted, a stage
    /// pauses, or something fails.
    ///
    /// Fatal errors are appended to the chat as an error message. The chat
    /// is saved whether or not the run succeeded.
    pub async fn execute(&mut self) -> Result<&mut Self> {
        info!(
            chat_id = %self.chat.id,
            stages = self.stages.len(),
            position = self.position,
            "Executing pipeline"
        );
        self.publish_opened();

        let outcome = self.run_stages().await;

        if let Err(e) = &outcome {
            warn!(chat_id = %self.chat.id, error = %e, "Pipeline aborted");
            self.append_message(Message::error(e.to_string()));
            self.events.publish(PipelineEvent::Error {
                chat_id: self.chat.id.to_string(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
        }

        let saved = self.save_chat().await;
        self.publish_closed();

        match (outcome, saved) {
            (Err(e), Err(save_error)) => {
                warn!(chat_id = %self.chat.id, error = %save_error, "Failed to save chat");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(self),
        }
    }

    async fn run_stages(&mut self) -> Result<()> {
        let detection = self.config.loop_detection.clone();

        loop {
            match self.exit_signal.take() {
                Some(ExitSignal::Stop) => {
                    info!(chat_id = %self.chat.id, position = self.position, "Pipeline paused");
                    return Ok(());
                }
                Some(ExitSignal::Abort(e)) => return Err(e),
                None => {}
            }

            if let LoopReport::Loop { pattern, count, .. } =
                detect_loop(self.trace.as_slice(), detection.window, detection.max_repeats)
            {
                warn!(chat_id = %self.chat.id, ?pattern, count, "Stage loop detected");
                return Err(Error::LoopDetected { pattern, count });
            }

            let Some(stage) = self.stages.get(self.position).cloned() else {
                debug!(chat_id = %self.chat.id, "No stages left");
                return Ok(());
            };

            debug!(
                chat_id = %self.chat.id,
                stage = %stage.name,
                stage_id = %stage.id,
                position = self.position,
                "Running stage"
            );
            self.running = true;
            self.insertion_point = self.position + 1;
            self.current_stage = Some(stage.name.clone());
            self.publish_stage(&stage, true);

            let result = stage.procedure.run(self).await;

            self.running = false;
            self.current_stage = None;
            self.publish_stage(&stage, false);

            if let Err(e) = result {
                // The failed stage's pending jump and exit must not leak into the next run
                self.jump = None;
                self.exit_signal = None;
                return Err(e);
            }

            self.trace.push(stage.id.clone());

            self.position = match self.jump.take() {
                Some(target) => self.index_of(&target)?,
                None => self.position + 1,
            };
            self.insertion_point = self.position;
        }
    }

    /// Replace the body between the running branch stage and its join with
    /// one copy per item, each preceded by a stage binding the item.
    pub(crate) fn expand_branch(&mut self, items: &[Value]) -> Result<()> {
        let branch_index = self.position;
        let branch_id = self
            .stages
            .get(branch_index)
            .map(|s| s.id.clone())
            .ok_or_else(|| Error::Internal("branch expanded outside a run".into()))?;
        let join_index = self
            .find_join(branch_index)
            .ok_or_else(|| Error::BranchWithoutJoin(branch_id.clone()))?;

        let body: Vec<Stage> = self.stages.drain(branch_index + 1..join_index).collect();
        self.insertion_point = branch_index + 1;
        info!(
            chat_id = %self.chat.id,
            branch = %branch_id,
            items = items.len(),
            body = body.len(),
            "Expanding branch"
        );

        for (index, item) in items.iter().enumerate() {
            self.add_stage(Stage::new(
                ITEM_STAGE,
                ItemStage {
                    item: item.clone(),
                    index,
                },
            ));
            let (copies, _) = replicate_all(&body);
            for stage in copies {
                self.add_stage(stage);
            }
        }
        Ok(())
    }

    /// The join matching the branch at `branch_index`, skipping nested pairs.
    fn find_join(&self, branch_index: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (index, stage) in self.stages.iter().enumerate().skip(branch_index + 1) {
            match stage.name.as_str() {
                BRANCH_STAGE => depth += 1,
                JOIN_STAGE if depth == 0 => return Some(index),
                JOIN_STAGE => depth -= 1,
                _ => {}
            }
        }
        None
    }

    // ── Derived pipelines ──────────────────────────────────────────────────

    /// Open a child pipeline on a new chat that shares this pipeline's
    /// backend, storage and event bus.
    ///
    /// The child's metadata records this chat as its parent and this chat
    /// records the child in `sidebar_ids`.
    pub fn sidebar(&mut self, options: SidebarOptions) -> Pipeline {
        let mut child = Self::assemble(
            self.backend.clone(),
            self.storage.clone(),
            self.config.clone(),
            self.events.clone(),
            self.window.clone(),
        );
        child.chat.metadata.insert(
            "parent_id".into(),
            Value::String(self.chat.id.to_string()),
        );
        child.user = self.user.clone();

        if options.inherit_rules {
            let rules: Vec<Message> = self
                .chat
                .messages
                .iter()
                .filter(|m| matches!(m.kind, MessageKind::Rule { .. }))
                .map(Message::fresh_copy)
                .collect();
            for rule in rules {
                child.append_message(rule);
            }
        }
        if options.inherit_tools {
            child.tools = self.tools.clone();
        }
        if options.inherit_locals {
            child.locals = self.locals.clone();
        }

        self.chat.sidebar_ids.push(child.chat.id.to_string());
        info!(chat_id = %child.chat.id, parent_id = %self.chat.id, "Sidebar opened");
        child
    }

    fn publish_opened(&self) {
        let chat_id = self.chat.id.to_string();
        let timestamp = Utc::now();
        self.events.publish(match self.chat.parent_id() {
            Some(parent) => PipelineEvent::SidebarOpened {
                chat_id,
                parent_id: parent.to_string(),
                timestamp,
            },
            None => PipelineEvent::ChatOpened { chat_id, timestamp },
        });
    }

    fn publish_closed(&self) {
        let chat_id = self.chat.id.to_string();
        let timestamp = Utc::now();
        self.events.publish(match self.chat.parent_id() {
            Some(parent) => PipelineEvent::SidebarClosed {
                chat_id,
                parent_id: parent.to_string(),
                timestamp,
            },
            None => PipelineEvent::ChatClosed { chat_id, timestamp },
        });
    }

    fn publish_stage(&self, stage: &Stage, begin: bool) {
        let chat_id = self.chat.id.to_string();
        let stage_id = stage.id.clone();
        let name = stage.name.clone();
        self.events.publish(if begin {
            PipelineEvent::StageBegin { chat_id, stage_id, name }
        } else {
            PipelineEvent::StageEnd { chat_id, stage_id, name }
        });
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("chat_id", &self.chat.id)
            .field("messages", &self.chat.messages.len())
            .field("stages", &self.stages)
            .field("position", &self.position)
            .finish()
    }
}

/// An independent copy on a new chat.
///
/// Messages and stages get fresh ids; window references, move targets and
/// the execution trace are rewritten to match. Backend, storage, tools and
/// the event bus are shared. Tool invocation counts start over.
impl Clone for Pipeline {
    fn clone(&self) -> Self {
        let mut message_ids: HashMap<String, String> = HashMap::new();
        let mut messages: Vec<Message> = self
            .chat
            .messages
            .iter()
            .map(|m| {
                let copy = m.fresh_copy();
                message_ids.insert(m.id.clone(), copy.id.clone());
                copy
            })
            .collect();
        for message in &mut messages {
            for id in &mut message.window {
                if let Some(new_id) = message_ids.get(id) {
                    *id = new_id.clone();
                }
            }
        }

        let (stages, stage_ids) = replicate_all(&self.stages);
        let remap = |id: &String| stage_ids.get(id).cloned().unwrap_or_else(|| id.clone());

        let mut chat = Chat::new(ChatId(self.storage.new_id()));
        chat.messages = messages;
        chat.metadata = self.chat.metadata.clone();
        chat.input_tokens = self.chat.input_tokens;
        chat.output_tokens = self.chat.output_tokens;

        debug!(from = %self.chat.id, to = %chat.id, "Pipeline cloned");

        Self {
            id: Uuid::new_v4().to_string(),
            config: self.config.clone(),
            backend: self.backend.clone(),
            storage: self.storage.clone(),
            events: self.events.clone(),
            window: self.window.clone(),
            chat,
            stages,
            position: self.position,
            insertion_point: self.insertion_point,
            running: false,
            jump: None,
            exit_signal: None,
            trace: self.trace.iter().map(remap).collect(),
            last_added: self.last_added.as_ref().map(remap),
            current_stage: None,
            tools: self.tools.clone(),
            invocations: HashMap::new(),
            locals: self.locals.clone(),
            user: self.user.clone(),
            expectation: self.expectation.clone(),
        }
    }
}
