//! Tools: capabilities a backend can invoke mid-response.
//!
//! Tools are registered on a pipeline (usually through a `tool` stage) and
//! advertised with every submission. When the backend requests one, the
//! engine runs its handler and appends the result to the chat.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use weft_core::{ToolDefinition, ToolError};

use crate::engine::Pipeline;

/// The core Tool trait.
///
/// Handlers receive the parsed arguments, a snapshot of the pipeline's
/// locals and the pipeline itself, so a tool may append messages or
/// schedule stages of its own.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "lookup", "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the backend).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool.
    async fn call(
        &self,
        arguments: Value,
        locals: &Value,
        pipeline: &mut Pipeline,
    ) -> std::result::Result<Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type SyncHandler = dyn Fn(Value, &Value) -> std::result::Result<Value, ToolError> + Send + Sync;

/// A tool backed by a plain closure over `(arguments, locals)`.
///
/// For handlers that need the pipeline, implement [`Tool`] directly.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Box<SyncHandler>,
}

impl FnTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, &Value) -> std::result::Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(
        &self,
        arguments: Value,
        locals: &Value,
        _pipeline: &mut Pipeline,
    ) -> std::result::Result<Value, ToolError> {
        (self.handler)(arguments, locals)
    }
}

/// Tools registered on a pipeline, keyed by name.
///
/// Cloning is cheap; tools are shared between a pipeline, its clones and
/// sidebars that inherit them.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
