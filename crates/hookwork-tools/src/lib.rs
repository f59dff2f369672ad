//! Tools that hookwork sessions can invoke.
//!
//! Each tool implements the [`Tool`] trait. Built-in tools and tools
//! contributed by plugins live side by side in a [`ToolRegistry`]; a later
//! registration under the same name replaces the earlier one.

pub mod path_guard;
pub mod read;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-call context handed to [`Tool::execute`].
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub call_id: String,
    pub agent: Option<String>,
    pub workspace: PathBuf,
    pub restrict_to_workspace: bool,
    /// Abort signal for the running call. Long-running tools should poll
    /// [`ToolContext::is_aborted`] or await `abort.cancelled()`.
    pub abort: CancellationToken,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        call_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
            agent: None,
            workspace: workspace.into(),
            restrict_to_workspace: true,
            abort: CancellationToken::new(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }
}

/// Result of a tool call, as seen and rewritten by after-hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub title: String,
    pub output: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            title: String::new(),
            output: output.into(),
            metadata: serde_json::Value::Null,
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(output)
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A callable tool. Built-ins and plugin-contributed tools share this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name that calls and hooks address the tool by.
    fn name(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    fn description(&self) -> &str;

    /// Run one call. Recoverable problems come back as [`ToolOutput::error`].
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Name-addressed set of tools, kept in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_builtin_tools(&mut registry);
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    /// Returns the replaced tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => {
                debug!(tool = tool.name(), "Tool replaced");
                Some(std::mem::replace(&mut self.tools[idx], tool))
            }
            None => {
                self.tools.push(tool);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `{name, description, input_schema}` for every tool.
    pub fn to_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name(),
                    "description": t.description(),
                    "input_schema": t.parameters_schema(),
                })
            })
            .collect()
    }
}

/// Register the built-in tools.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(read::ReadTool));
    registry.register(Arc::new(write::WriteTool));
}
