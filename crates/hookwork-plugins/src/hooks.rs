//! Hook sets: the handlers one plugin factory returns.
//!
//! Every handler is optional. Mutation hooks receive the input by value
//! together with the current output and return the output for the next
//! plugin in the chain.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use hookwork_auth::AuthSpec;
use hookwork_bus::Event;
use hookwork_core::config::HostConfig;
use hookwork_core::types::{
    ChatMessageInput, ChatParams, ChatParamsInput, Message, Permission, PermissionAction,
    TextCompleteInput, TextCompletion,
};
use hookwork_tools::{Tool, ToolOutput};
use serde::{Deserialize, Serialize};

/// Hook points a plugin can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Config,
    Tool,
    Auth,
    Event,
    ChatMessage,
    ChatParams,
    PermissionAsk,
    ToolBefore,
    ToolAfter,
    TextComplete,
}

impl HookKind {
    pub const ALL: [HookKind; 10] = [
        HookKind::Config,
        HookKind::Tool,
        HookKind::Auth,
        HookKind::Event,
        HookKind::ChatMessage,
        HookKind::ChatParams,
        HookKind::PermissionAsk,
        HookKind::ToolBefore,
        HookKind::ToolAfter,
        HookKind::TextComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Tool => "tool",
            Self::Auth => "auth",
            Self::Event => "event",
            Self::ChatMessage => "chat.message",
            Self::ChatParams => "chat.params",
            Self::PermissionAsk => "permission.ask",
            Self::ToolBefore => "tool.execute.before",
            Self::ToolAfter => "tool.execute.after",
            Self::TextComplete => "text.complete",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown hook '{s}'"))
    }
}

/// Identifies the tool call a tool hook runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub tool: String,
    pub session_id: String,
    pub call_id: String,
}

pub type HookFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Receives the config built so far and returns it, possibly extended.
pub type ConfigHook = Box<dyn Fn(HostConfig) -> HookFuture<HostConfig> + Send + Sync>;

/// Observes one bus event.
pub type EventHook = Box<dyn Fn(Event) -> HookFuture<()> + Send + Sync>;

/// Receives an input and the current output; returns the next output.
pub type ChainHook<I, O> = Box<dyn Fn(I, O) -> HookFuture<O> + Send + Sync>;

/// Handlers contributed by one plugin factory. Immutable once built.
#[derive(Default)]
pub struct HookSet {
    pub(crate) config: Option<ConfigHook>,
    pub(crate) tools: Vec<Arc<dyn Tool>>,
    pub(crate) auth: Option<AuthSpec>,
    pub(crate) event: Option<EventHook>,
    pub(crate) chat_message: Option<ChainHook<ChatMessageInput, Message>>,
    pub(crate) chat_params: Option<ChainHook<ChatParamsInput, ChatParams>>,
    pub(crate) permission_ask: Option<ChainHook<Permission, PermissionAction>>,
    pub(crate) tool_before: Option<ChainHook<ToolCallInfo, serde_json::Value>>,
    pub(crate) tool_after: Option<ChainHook<ToolCallInfo, ToolOutput>>,
    pub(crate) text_complete: Option<ChainHook<TextCompleteInput, TextCompletion>>,
}

fn chain<I, O, F, Fut>(f: F) -> ChainHook<I, O>
where
    F: Fn(I, O) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    Box::new(move |input, output| Box::pin(f(input, output)))
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_config<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HostConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HostConfig>> + Send + 'static,
    {
        self.config = Some(Box::new(move |config| Box::pin(f(config))));
        self
    }

    /// Contribute a tool. A later tool with the same name replaces it.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    pub fn auth(mut self, spec: AuthSpec) -> Self {
        self.auth = Some(spec);
        self
    }

    pub fn on_event<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.event = Some(Box::new(move |event| Box::pin(f(event))));
        self
    }

    pub fn on_chat_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ChatMessageInput, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Message>> + Send + 'static,
    {
        self.chat_message = Some(chain(f));
        self
    }

    pub fn on_chat_params<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ChatParamsInput, ChatParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ChatParams>> + Send + 'static,
    {
        self.chat_params = Some(chain(f));
        self
    }

    pub fn on_permission_ask<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Permission, PermissionAction) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PermissionAction>> + Send + 'static,
    {
        self.permission_ask = Some(chain(f));
        self
    }

    /// Runs before a tool executes and may rewrite its arguments.
    /// Returning an error blocks the call.
    pub fn on_tool_before<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolCallInfo, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.tool_before = Some(chain(f));
        self
    }

    pub fn on_tool_after<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolCallInfo, ToolOutput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
    {
        self.tool_after = Some(chain(f));
        self
    }

    pub fn on_text_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TextCompleteInput, TextCompletion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<TextCompletion>> + Send + 'static,
    {
        self.text_complete = Some(chain(f));
        self
    }

    pub fn implements(&self, kind: HookKind) -> bool {
        match kind {
            HookKind::Config => self.config.is_some(),
            HookKind::Tool => !self.tools.is_empty(),
            HookKind::Auth => self.auth.is_some(),
            HookKind::Event => self.event.is_some(),
            HookKind::ChatMessage => self.chat_message.is_some(),
            HookKind::ChatParams => self.chat_params.is_some(),
            HookKind::PermissionAsk => self.permission_ask.is_some(),
            HookKind::ToolBefore => self.tool_before.is_some(),
            HookKind::ToolAfter => self.tool_after.is_some(),
            HookKind::TextComplete => self.text_complete.is_some(),
        }
    }

    /// Hook kinds this set implements, in [`HookKind::ALL`] order.
    pub fn kinds(&self) -> Vec<HookKind> {
        HookKind::ALL
            .into_iter()
            .filter(|k| self.implements(*k))
            .collect()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn auth_spec(&self) -> Option<&AuthSpec> {
        self.auth.as_ref()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("kinds", &self.kinds())
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
