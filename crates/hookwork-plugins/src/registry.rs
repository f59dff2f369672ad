//! Hook registry: every loaded plugin's hook set, in load order, and the
//! dispatch rules for each hook kind.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use hookwork_auth::AuthSpec;
use hookwork_bus::Event;
use hookwork_core::types::{
    ChatMessageInput, ChatParams, ChatParamsInput, Message, Permission, PermissionAction,
    TextCompleteInput, TextCompletion,
};
use hookwork_tools::{Tool, ToolOutput};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hooks::{ChainHook, ConfigHook, HookFuture, HookKind, HookSet, ToolCallInfo};

/// A hook that failed in a chain where failure stops the chain.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookFailure {
    pub plugin: String,
    pub kind: HookKind,
    pub message: String,
}

/// One plugin's hooks, tagged with the plugin id used in logs.
pub struct PluginEntry {
    pub id: String,
    pub hooks: Arc<HookSet>,
}

/// Ordered hook sets of all loaded plugins.
#[derive(Default)]
pub struct HookRegistry {
    entries: Vec<PluginEntry>,
    hook_timeout: Option<Duration>,
}

impl HookRegistry {
    pub fn new(hook_timeout: Option<Duration>) -> Self {
        Self {
            entries: Vec::new(),
            hook_timeout,
        }
    }

    /// Append a plugin's hooks. Dispatch follows push order.
    pub fn push(&mut self, id: impl Into<String>, hooks: HookSet) {
        let id = id.into();
        debug!(plugin = %id, kinds = ?hooks.kinds(), "Hooks registered");
        self.entries.push(PluginEntry {
            id,
            hooks: Arc::new(hooks),
        });
    }

    pub fn entries(&self) -> &[PluginEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout
    }

    /// Number of plugins implementing `kind`.
    pub fn count(&self, kind: HookKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.hooks.implements(kind))
            .count()
    }

    /// Tools contributed by plugins, in load order.
    pub fn tools(&self) -> Vec<(&str, Arc<dyn Tool>)> {
        self.entries
            .iter()
            .flat_map(|e| e.hooks.tools().iter().map(|t| (e.id.as_str(), t.clone())))
            .collect()
    }

    /// Auth providers contributed by plugins, in load order.
    pub fn auth_specs(&self) -> Vec<(&str, AuthSpec)> {
        self.entries
            .iter()
            .filter_map(|e| e.hooks.auth_spec().map(|s| (e.id.as_str(), s.clone())))
            .collect()
    }

    pub(crate) fn config_hooks(&self) -> impl Iterator<Item = (&str, &ConfigHook)> {
        self.entries
            .iter()
            .filter_map(|e| e.hooks.config.as_ref().map(|h| (e.id.as_str(), h)))
    }

    /// Await one hook invocation under the hook deadline.
    pub(crate) async fn guard<T>(
        &self,
        plugin: &str,
        kind: HookKind,
        fut: HookFuture<T>,
    ) -> anyhow::Result<T> {
        guard(self.hook_timeout, plugin, kind, fut).await
    }

    /// Run the event hook of the entry at `index` under the hook deadline.
    /// Entries without an event hook accept every event.
    pub async fn deliver_event(&self, index: usize, event: Event) -> anyhow::Result<()> {
        let Some(entry) = self.entries.get(index) else {
            return Ok(());
        };
        let Some(hook) = entry.hooks.event.as_ref() else {
            return Ok(());
        };
        self.guard(&entry.id, HookKind::Event, hook(event))
            .await
            .with_context(|| format!("event hook of plugin '{}'", entry.id))
    }

    /// Run a chain where a failing hook is logged and skipped; the output
    /// stays as it was before that hook.
    async fn run_chain<I, O, S>(&self, kind: HookKind, select: S, input: &I, mut output: O) -> O
    where
        I: Clone,
        O: Clone,
        S: Fn(&HookSet) -> Option<&ChainHook<I, O>>,
    {
        for entry in &self.entries {
            let Some(hook) = select(&entry.hooks) else {
                continue;
            };
            match self.guard(&entry.id, kind, hook(input.clone(), output.clone())).await {
                Ok(next) => output = next,
                Err(e) => {
                    warn!(plugin = %entry.id, hook = %kind, error = %e, "Hook failed, keeping previous output")
                }
            }
        }
        output
    }

    pub async fn chat_message(&self, input: &ChatMessageInput, message: Message) -> Message {
        self.run_chain(HookKind::ChatMessage, |h| h.chat_message.as_ref(), input, message)
            .await
    }

    pub async fn chat_params(&self, input: &ChatParamsInput, params: ChatParams) -> ChatParams {
        self.run_chain(HookKind::ChatParams, |h| h.chat_params.as_ref(), input, params)
            .await
    }

    /// Decide a permission request, starting from `default`.
    pub async fn permission_ask(
        &self,
        permission: &Permission,
        default: PermissionAction,
    ) -> PermissionAction {
        self.run_chain(
            HookKind::PermissionAsk,
            |h| h.permission_ask.as_ref(),
            permission,
            default,
        )
        .await
    }

    pub async fn text_complete(
        &self,
        input: &TextCompleteInput,
        completion: TextCompletion,
    ) -> TextCompletion {
        self.run_chain(
            HookKind::TextComplete,
            |h| h.text_complete.as_ref(),
            input,
            completion,
        )
        .await
    }

    pub async fn tool_after(&self, info: &ToolCallInfo, output: ToolOutput) -> ToolOutput {
        self.run_chain(HookKind::ToolAfter, |h| h.tool_after.as_ref(), info, output)
            .await
    }

    /// Run the before-hooks; the first failure stops the chain.
    pub async fn tool_before(
        &self,
        info: &ToolCallInfo,
        mut args: serde_json::Value,
    ) -> Result<serde_json::Value, HookFailure> {
        for entry in &self.entries {
            let Some(hook) = entry.hooks.tool_before.as_ref() else {
                continue;
            };
            args = self
                .guard(&entry.id, HookKind::ToolBefore, hook(info.clone(), args))
                .await
                .map_err(|e| HookFailure {
                    plugin: entry.id.clone(),
                    kind: HookKind::ToolBefore,
                    message: format!("{e:#}"),
                })?;
        }
        Ok(args)
    }
}

async fn guard<T>(
    limit: Option<Duration>,
    plugin: &str,
    kind: HookKind,
    fut: HookFuture<T>,
) -> anyhow::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            anyhow!(
                "{kind} hook of plugin '{plugin}' timed out after {}ms",
                limit.as_millis()
            )
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn info() -> ToolCallInfo {
        ToolCallInfo {
            tool: "echo".into(),
            session_id: "s1".into(),
            call_id: "c1".into(),
        }
    }

    fn appender(suffix: &'static str) -> HookSet {
        HookSet::new().on_tool_after(move |_info, mut out: ToolOutput| async move {
            out.output.push_str(suffix);
            Ok(out)
        })
    }

    #[tokio::test]
    async fn test_after_chain_order() {
        let mut registry = HookRegistry::new(None);
        registry.push("a", appender("A"));
        registry.push("b", appender("B"));
        let out = registry.tool_after(&info(), ToolOutput::text("x")).await;
        assert_eq!(out.output, "xAB");
        assert_eq!(registry.count(HookKind::ToolAfter), 2);
        assert_eq!(registry.count(HookKind::ToolBefore), 0);
    }

    #[tokio::test]
    async fn test_failing_hook_keeps_previous_output() {
        let mut registry = HookRegistry::new(None);
        registry.push("a", appender("A"));
        registry.push(
            "broken",
            HookSet::new().on_tool_after(|_info, _out: ToolOutput| async move {
                Err::<ToolOutput, _>(anyhow!("boom"))
            }),
        );
        registry.push("c", appender("C"));
        let out = registry.tool_after(&info(), ToolOutput::text("x")).await;
        assert_eq!(out.output, "xAC");
    }

    #[tokio::test]
    async fn test_timed_out_hook_is_skipped() {
        let mut registry = HookRegistry::new(Some(Duration::from_millis(20)));
        registry.push(
            "slow",
            HookSet::new().on_chat_params(|_input, mut params: ChatParams| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                params.temperature = Some(2.0);
                Ok(params)
            }),
        );
        registry.push(
            "fast",
            HookSet::new().on_chat_params(|_input, mut params: ChatParams| async move {
                params.top_p = Some(0.5);
                Ok(params)
            }),
        );
        let input = ChatParamsInput {
            session_id: "s".into(),
            agent: "build".into(),
            model: hookwork_core::types::ModelRef {
                provider_id: "p".into(),
                model_id: "m".into(),
            },
        };
        let params = registry.chat_params(&input, ChatParams::default()).await;
        assert_eq!(params.temperature, None);
        assert_eq!(params.top_p, Some(0.5));
    }

    #[tokio::test]
    async fn test_before_chain_stops_at_failure() {
        let later = Arc::new(AtomicUsize::new(0));
        let counter = later.clone();
        let mut registry = HookRegistry::new(None);
        registry.push(
            "rewrite",
            HookSet::new().on_tool_before(|_info, mut args: serde_json::Value| async move {
                args["rewritten"] = true.into();
                Ok(args)
            }),
        );
        registry.push(
            "guard",
            HookSet::new().on_tool_before(|_info, args: serde_json::Value| async move {
                if args["path"] == ".env" {
                    Err(anyhow!("Do not read .env files"))
                } else {
                    Ok(args)
                }
            }),
        );
        registry.push(
            "later",
            HookSet::new().on_tool_before(move |_info, args: serde_json::Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(args) }
            }),
        );

        let args = registry
            .tool_before(&info(), serde_json::json!({ "path": "a.txt" }))
            .await
            .unwrap();
        assert_eq!(args["rewritten"], true);
        assert_eq!(later.load(Ordering::SeqCst), 1);

        let failure = registry
            .tool_before(&info(), serde_json::json!({ "path": ".env" }))
            .await
            .unwrap_err();
        assert_eq!(failure.plugin, "guard");
        assert_eq!(failure.to_string(), "Do not read .env files");
        assert_eq!(later.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permission_chain() {
        let mut registry = HookRegistry::new(None);
        registry.push(
            "allow-reads",
            HookSet::new().on_permission_ask(|perm: Permission, action| async move {
                Ok(if perm.kind == "read" { PermissionAction::Allow } else { action })
            }),
        );
        let perm = Permission {
            id: "p1".into(),
            kind: "read".into(),
            pattern: None,
            session_id: "s".into(),
            call_id: None,
            title: "Read file".into(),
            metadata: serde_json::Value::Null,
        };
        assert_eq!(
            registry.permission_ask(&perm, PermissionAction::Ask).await,
            PermissionAction::Allow
        );
    }

    #[tokio::test]
    async fn test_deliver_event_reports_hook_errors() {
        let seen = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new(None);
        registry.push(
            "broken",
            HookSet::new().on_event(|_event| async { Err(anyhow!("nope")) }),
        );
        let counter = seen.clone();
        registry.push(
            "counter",
            HookSet::new().on_event(move |_event| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        );
        registry.push("quiet", HookSet::new());
        let event = Event {
            kind: "file.edited".into(),
            properties: serde_json::json!({ "file": "a" }),
        };

        let err = registry.deliver_event(0, event.clone()).await.unwrap_err();
        assert!(format!("{err:#}").contains("plugin 'broken'"));
        registry.deliver_event(1, event.clone()).await.unwrap();
        registry.deliver_event(2, event.clone()).await.unwrap();
        registry.deliver_event(9, event).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
