//! Tool execution interceptor: wraps every tool call in the plugins'
//! before and after hooks.

use std::path::PathBuf;
use std::sync::Arc;

use hookwork_bus::{EventBus, catalog};
use hookwork_tools::{Tool, ToolContext, ToolOutput, ToolRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hooks::ToolCallInfo;
use crate::registry::HookRegistry;

/// One tool invocation requested by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub session_id: String,
    pub call_id: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            session_id: "default".into(),
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            agent: None,
            args,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    fn info(&self) -> ToolCallInfo {
        ToolCallInfo {
            tool: self.tool.clone(),
            session_id: self.session_id.clone(),
            call_id: self.call_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolCallError {
    /// A before-hook refused the call; the tool never ran.
    #[error("{message}")]
    Blocked { plugin: String, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool call aborted")]
    Aborted,

    #[error("tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

/// Runs tool calls through the hook registry.
pub struct ToolInterceptor {
    hooks: Arc<HookRegistry>,
    tools: RwLock<ToolRegistry>,
    workspace: PathBuf,
    restrict_to_workspace: bool,
    bus: Option<Arc<EventBus>>,
}

impl ToolInterceptor {
    /// Plugin tools are layered over `builtins` in load order, so a plugin
    /// tool replaces a built-in of the same name and a later plugin's tool
    /// replaces an earlier one.
    pub fn new(hooks: Arc<HookRegistry>, builtins: ToolRegistry, workspace: impl Into<PathBuf>) -> Self {
        let mut tools = builtins;
        for (plugin, tool) in hooks.tools() {
            let name = tool.name().to_string();
            if tools.register(tool).is_some() {
                info!(plugin = %plugin, tool = %name, "Plugin tool replaces an existing tool");
            } else {
                debug!(plugin = %plugin, tool = %name, "Plugin tool registered");
            }
        }
        Self {
            hooks,
            tools: RwLock::new(tools),
            workspace: workspace.into(),
            restrict_to_workspace: true,
            bus: None,
        }
    }

    /// Publish `tool.executed` on `bus` after each call.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn restrict_to_workspace(mut self, restrict: bool) -> Self {
        self.restrict_to_workspace = restrict;
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Names of every callable tool.
    pub async fn tools(&self) -> Vec<String> {
        self.tools
            .read()
            .await
            .list()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn definitions(&self) -> Vec<serde_json::Value> {
        self.tools.read().await.to_definitions()
    }

    /// Add or replace a tool after startup.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().await.register(tool);
    }

    /// Run one tool call: before-hooks, the tool, after-hooks.
    pub async fn execute(
        &self,
        call: ToolCall,
        abort: CancellationToken,
    ) -> Result<ToolOutput, ToolCallError> {
        let info = call.info();

        let args = self
            .hooks
            .tool_before(&info, call.args)
            .await
            .map_err(|failure| {
                warn!(
                    plugin = %failure.plugin,
                    tool = %info.tool,
                    call_id = %info.call_id,
                    error = %failure.message,
                    "Tool call blocked by plugin"
                );
                ToolCallError::Blocked {
                    plugin: failure.plugin,
                    message: failure.message,
                }
            })?;

        let tool = self
            .tools
            .read()
            .await
            .get(&info.tool)
            .ok_or_else(|| ToolCallError::UnknownTool(info.tool.clone()))?;

        if abort.is_cancelled() {
            return Err(ToolCallError::Aborted);
        }

        let mut ctx = ToolContext::new(&info.session_id, &info.call_id, &self.workspace);
        ctx.agent = call.agent;
        ctx.restrict_to_workspace = self.restrict_to_workspace;
        ctx.abort = abort.clone();

        debug!(tool = %info.tool, call_id = %info.call_id, "Executing tool");
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                info!(tool = %info.tool, call_id = %info.call_id, "Tool call aborted");
                return Err(ToolCallError::Aborted);
            }
            result = tool.execute(args, &ctx) => result,
        };
        let output = result.map_err(|e| ToolCallError::Failed {
            tool: info.tool.clone(),
            message: format!("{e:#}"),
        })?;

        let output = self.hooks.tool_after(&info, output).await;
        self.announce(&info, &output).await;
        Ok(output)
    }

    async fn announce(&self, info: &ToolCallInfo, output: &ToolOutput) {
        let Some(bus) = &self.bus else {
            return;
        };
        if !bus.is_defined(catalog::TOOL_EXECUTED).await {
            return;
        }
        let properties = serde_json::json!({
            "tool": info.tool,
            "session_id": info.session_id,
            "call_id": info.call_id,
            "title": output.title,
        });
        if let Err(e) = bus.publish(catalog::TOOL_EXECUTED, properties).await {
            debug!(tool = %info.tool, error = %e, "tool.executed not published");
        }
    }
}
