//! Plugins whose hooks are served by an external command.
//!
//! The command is run through `sh -c` in the plugin directory once per hook
//! invocation, with `{"hook", "input", "output"}` as JSON on stdin:
//!
//! - Exit 0, empty stdout: the output is kept
//! - Exit 0, stdout `{"output": ...}`: the output is replaced
//! - Exit 1: the hook fails with stderr as the message
//! - Any other exit code, unparseable stdout or timeout: the hook fails

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::hooks::{HookKind, HookSet};
use crate::{PluginFactory, PluginInput};

/// How to run one command export.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

/// Spawns the command for each hook invocation.
#[derive(Debug)]
pub struct CommandRunner {
    spec: CommandSpec,
}

impl CommandRunner {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// Run one hook. `Ok(None)` keeps the current output.
    pub async fn invoke(&self, hook: HookKind, input: Value, output: Value) -> Result<Option<Value>> {
        let payload = serde_json::json!({
            "hook": hook.as_str(),
            "input": input,
            "output": output,
        })
        .to_string();

        debug!(
            plugin = %self.spec.name,
            hook = %hook,
            command = %self.spec.command,
            "Spawning command hook"
        );

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.spec.command)
            .current_dir(&self.spec.cwd)
            .envs(&self.spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.spec.command))?;

        // Feed stdin while collecting output; both count against the deadline.
        let stdin = child.stdin.take();
        let exchange = async {
            let feed = async {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                        if e.kind() != std::io::ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                Ok(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            fed?;
            output
        };
        let result = match self.spec.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.with_context(|| {
                format!(
                    "command '{}' timed out after {}ms",
                    self.spec.name,
                    limit.as_millis()
                )
            })?,
            None => exchange.await,
        }
        .with_context(|| format!("command '{}' failed to complete", self.spec.name))?;

        let code = result.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        debug!(plugin = %self.spec.name, hook = %hook, exit_code = code, "Command hook finished");

        match code {
            0 => {}
            1 if !stderr.trim().is_empty() => bail!("{}", stderr.trim()),
            1 => bail!("command '{}' rejected the {hook} hook", self.spec.name),
            _ => bail!(
                "command '{}' exited with code {code}: {}",
                self.spec.name,
                stderr.trim()
            ),
        }

        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        let mut reply: Value = serde_json::from_str(stdout)
            .with_context(|| format!("command '{}' wrote invalid JSON", self.spec.name))?;
        Ok(reply.get_mut("output").map(Value::take))
    }
}

async fn call_chain<I, O>(runner: Arc<CommandRunner>, hook: HookKind, input: I, output: O) -> Result<O>
where
    I: Serialize,
    O: Serialize + DeserializeOwned,
{
    let reply = runner
        .invoke(hook, serde_json::to_value(&input)?, serde_json::to_value(&output)?)
        .await?;
    match reply {
        Some(value) => serde_json::from_value(value)
            .with_context(|| format!("invalid {hook} output from command plugin")),
        None => Ok(output),
    }
}

async fn call_event(runner: Arc<CommandRunner>, event: hookwork_bus::Event) -> Result<()> {
    runner
        .invoke(HookKind::Event, serde_json::to_value(&event)?, Value::Null)
        .await?;
    Ok(())
}

/// Factory for a manifest `command` export.
#[derive(Debug)]
pub struct CommandFactory {
    runner: Arc<CommandRunner>,
    hooks: Vec<HookKind>,
}

impl CommandFactory {
    /// Tool and auth hooks cannot be served by a command.
    pub fn new(spec: CommandSpec, hooks: Vec<HookKind>) -> Result<Self> {
        if spec.command.trim().is_empty() {
            bail!("command export '{}' has an empty command", spec.name);
        }
        if let Some(kind) = hooks
            .iter()
            .find(|k| matches!(k, HookKind::Tool | HookKind::Auth))
        {
            bail!("command export '{}' cannot provide '{kind}' hooks", spec.name);
        }
        Ok(Self {
            runner: Arc::new(CommandRunner::new(spec)),
            hooks,
        })
    }

    pub fn hooks(&self) -> &[HookKind] {
        &self.hooks
    }
}

#[async_trait]
impl PluginFactory for CommandFactory {
    async fn init(&self, _input: PluginInput) -> Result<Option<HookSet>> {
        if self.hooks.is_empty() {
            return Ok(None);
        }

        let mut set = HookSet::new();
        for kind in &self.hooks {
            let r = self.runner.clone();
            set = match kind {
                HookKind::Config => {
                    set.on_config(move |c| call_chain(r.clone(), HookKind::Config, Value::Null, c))
                }
                HookKind::Event => set.on_event(move |e| call_event(r.clone(), e)),
                HookKind::ChatMessage => {
                    set.on_chat_message(move |i, o| call_chain(r.clone(), HookKind::ChatMessage, i, o))
                }
                HookKind::ChatParams => {
                    set.on_chat_params(move |i, o| call_chain(r.clone(), HookKind::ChatParams, i, o))
                }
                HookKind::PermissionAsk => set.on_permission_ask(move |i, o| {
                    call_chain(r.clone(), HookKind::PermissionAsk, i, o)
                }),
                HookKind::ToolBefore => {
                    set.on_tool_before(move |i, o| call_chain(r.clone(), HookKind::ToolBefore, i, o))
                }
                HookKind::ToolAfter => {
                    set.on_tool_after(move |i, o| call_chain(r.clone(), HookKind::ToolAfter, i, o))
                }
                HookKind::TextComplete => set.on_text_complete(move |i, o| {
                    call_chain(r.clone(), HookKind::TextComplete, i, o)
                }),
                HookKind::Tool | HookKind::Auth => set,
            };
        }
        Ok(Some(set))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use hookwork_tools::ToolOutput;

    use super::*;

    fn runner(command: &str, timeout: Option<Duration>) -> CommandRunner {
        CommandRunner::new(CommandSpec {
            name: "test".into(),
            command: command.into(),
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
            timeout,
        })
    }

    #[tokio::test]
    async fn test_empty_stdout_keeps_output() {
        let out = runner("cat > /dev/null", None)
            .invoke(HookKind::ToolAfter, Value::Null, serde_json::json!(1))
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_output_replaced() {
        let out = runner(r#"cat > /dev/null; echo '{"output": {"n": 2}}'"#, None)
            .invoke(HookKind::ToolAfter, Value::Null, Value::Null)
            .await
            .unwrap();
        assert_eq!(out, Some(serde_json::json!({ "n": 2 })));
    }

    #[tokio::test]
    async fn test_payload_on_stdin() {
        let out = runner(r#"printf '{"output": %s}' "$(cat)""#, None)
            .invoke(HookKind::Config, serde_json::json!("in"), serde_json::json!("out"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out["hook"], "config");
        assert_eq!(out["input"], "in");
        assert_eq!(out["output"], "out");
    }

    #[tokio::test]
    async fn test_exit_one_uses_stderr() {
        let err = runner("cat > /dev/null; echo 'no secrets' >&2; exit 1", None)
            .invoke(HookKind::ToolBefore, Value::Null, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no secrets");
    }

    #[tokio::test]
    async fn test_other_exit_code_and_bad_json() {
        assert!(
            runner("exit 3", None)
                .invoke(HookKind::Event, Value::Null, Value::Null)
                .await
                .is_err()
        );
        assert!(
            runner("echo not-json", None)
                .invoke(HookKind::Event, Value::Null, Value::Null)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = runner("sleep 5", Some(Duration::from_millis(50)))
            .invoke(HookKind::Event, Value::Null, Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_covers_unread_stdin() {
        let large = Value::String("x".repeat(1 << 20));
        let started = std::time::Instant::now();
        let err = runner("sleep 5", Some(Duration::from_millis(200)))
            .invoke(HookKind::Config, large, Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_rejects_tool_hooks() {
        let spec = CommandSpec {
            name: "x".into(),
            command: "true".into(),
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
            timeout: None,
        };
        assert!(CommandFactory::new(spec.clone(), vec![HookKind::Tool]).is_err());
        assert!(CommandFactory::new(spec, vec![HookKind::ToolAfter]).is_ok());
    }

    #[tokio::test]
    async fn test_factory_builds_tool_after_hook() {
        let spec = CommandSpec {
            name: "x".into(),
            command: r#"cat > /dev/null; echo '{"output": {"output": "rewritten"}}'"#.into(),
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
            timeout: None,
        };
        let factory = CommandFactory::new(spec, vec![HookKind::ToolAfter]).unwrap();
        let input = PluginInput::new(std::env::temp_dir(), Arc::new(hookwork_bus::EventBus::new()));
        let set = factory.init(input).await.unwrap().unwrap();
        assert_eq!(set.kinds(), vec![HookKind::ToolAfter]);

        let hook = set.tool_after.as_ref().unwrap();
        let info = crate::hooks::ToolCallInfo {
            tool: "read".into(),
            session_id: "s".into(),
            call_id: "c".into(),
        };
        let out = hook(info, ToolOutput::text("original")).await.unwrap();
        assert_eq!(out.output, "rewritten");
    }
}
