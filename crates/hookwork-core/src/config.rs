//! Host configuration object: commands, agents, MCP servers and model settings.
//!
//! A [`HostConfig`] is built from the settings file, handed through every
//! plugin's config hook, validated after each injection, and finally frozen
//! into a [`FrozenConfig`] for the rest of the session.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HookworkError, Result};
use crate::types::PermissionAction;

/// The mutable configuration object threaded through config hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub command: BTreeMap<String, Command>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub agent: BTreeMap<String, Agent>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mcp: BTreeMap<String, McpServer>,
}

/// Which keyed section of the config an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Command,
    Agent,
    Mcp,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Agent => "agent",
            Self::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HostConfig {
    /// Validate every entry, returning the first offending field.
    pub fn validate(&self) -> Result<()> {
        for (key, command) in &self.command {
            command.validate(key)?;
        }
        for (key, agent) in &self.agent {
            agent.validate(key)?;
        }
        for (key, server) in &self.mcp {
            server.validate(key)?;
        }
        Ok(())
    }

    /// Keys of entries in `self` that are new or differ from `before`.
    pub fn written_keys(&self, before: &HostConfig) -> Vec<(Section, String)> {
        let mut keys = Vec::new();
        keys.extend(changed(&self.command, &before.command).map(|k| (Section::Command, k)));
        keys.extend(changed(&self.agent, &before.agent).map(|k| (Section::Agent, k)));
        keys.extend(changed(&self.mcp, &before.mcp).map(|k| (Section::Mcp, k)));
        keys
    }

    /// Every keyed entry currently present.
    pub fn keys(&self) -> Vec<(Section, String)> {
        let mut keys = Vec::new();
        keys.extend(self.command.keys().map(|k| (Section::Command, k.clone())));
        keys.extend(self.agent.keys().map(|k| (Section::Agent, k.clone())));
        keys.extend(self.mcp.keys().map(|k| (Section::Mcp, k.clone())));
        keys
    }

    /// Freeze the config; no further mutation is possible through the result.
    pub fn freeze(self) -> FrozenConfig {
        FrozenConfig(Arc::new(self))
    }
}

fn changed<'a, V: PartialEq>(
    after: &'a BTreeMap<String, V>,
    before: &'a BTreeMap<String, V>,
) -> impl Iterator<Item = String> + 'a {
    after
        .iter()
        .filter(move |(k, v)| before.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
}

/// Read-only config shared for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct FrozenConfig(Arc<HostConfig>);

impl Deref for FrozenConfig {
    type Target = HostConfig;

    fn deref(&self) -> &HostConfig {
        &self.0
    }
}

impl Serialize for FrozenConfig {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

// --- Commands ---

const ARGUMENTS_PLACEHOLDER: &str = "$ARGUMENTS";

/// A slash-command template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub template: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Force the command to run as a subagent task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask: Option<bool>,
}

impl Command {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            description: None,
            agent: None,
            model: None,
            subtask: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self, key: &str) -> Result<()> {
        let field = format!("command.{key}.template");
        if self.template.trim().is_empty() {
            return Err(HookworkError::validation(field, "template must not be empty"));
        }
        if !has_placeholder(&self.template) {
            return Err(HookworkError::validation(
                field,
                "template must contain $ARGUMENTS or a positional placeholder ($1-$9)",
            ));
        }
        Ok(())
    }

    /// Substitute `$ARGUMENTS` with the full argument string and `$1`..`$9`
    /// with whitespace-separated positional arguments (empty when absent).
    ///
    /// One left-to-right pass over the template: text coming from the
    /// arguments is never scanned again. A digit run outside `1..=9`, such as
    /// `$12`, is left as written.
    pub fn render(&self, arguments: &str) -> String {
        let positional: Vec<&str> = arguments.split_whitespace().collect();
        let mut rendered = String::with_capacity(self.template.len() + arguments.len());
        let mut rest = self.template.as_str();

        while let Some(at) = rest.find('$') {
            rendered.push_str(&rest[..at]);
            let tail = &rest[at..];

            if let Some(after) = tail.strip_prefix(ARGUMENTS_PLACEHOLDER) {
                rendered.push_str(arguments);
                rest = after;
                continue;
            }

            let digits = tail[1..].bytes().take_while(u8::is_ascii_digit).count();
            let token = &tail[..1 + digits];
            match token[1..].parse::<usize>() {
                Ok(n @ 1..=9) if digits == 1 => {
                    rendered.push_str(positional.get(n - 1).copied().unwrap_or_default());
                }
                _ => rendered.push_str(token),
            }
            rest = &tail[token.len()..];
        }
        rendered.push_str(rest);
        rendered
    }
}

fn has_placeholder(template: &str) -> bool {
    if template.contains(ARGUMENTS_PLACEHOLDER) {
        return true;
    }
    let bytes = template.as_bytes();
    bytes.windows(2).enumerate().any(|(i, w)| {
        w[0] == b'$'
            && (b'1'..=b'9').contains(&w[1])
            && !bytes.get(i + 2).is_some_and(u8::is_ascii_digit)
    })
}

// --- Agents ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Subagent,
    Primary,
    #[default]
    All,
}

/// An agent definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub mode: AgentMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Per-tool enable switches.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tools: BTreeMap<String, bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    /// Permission policy per action (e.g. "edit", "bash").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub permission: BTreeMap<String, PermissionAction>,
}

impl Agent {
    pub fn validate(&self, key: &str) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(HookworkError::validation(
                    format!("agent.{key}.temperature"),
                    format!("{t} is outside 0..=2"),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(HookworkError::validation(
                    format!("agent.{key}.top_p"),
                    format!("{p} is outside 0..=1"),
                ));
            }
        }
        if self.max_steps == Some(0) {
            return Err(HookworkError::validation(
                format!("agent.{key}.max_steps"),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

// --- MCP servers ---

fn default_true() -> bool {
    true
}

fn default_mcp_timeout() -> u64 {
    5000
}

/// An MCP server definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpServer {
    Local {
        /// Command and arguments.
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        environment: BTreeMap<String, String>,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default = "default_mcp_timeout")]
        timeout_ms: u64,
    },
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        oauth: Option<McpOAuth>,
        #[serde(default = "default_true")]
        enabled: bool,
        #[serde(default = "default_mcp_timeout")]
        timeout_ms: u64,
    },
}

/// OAuth settings for a remote MCP server: a config object, or `false` to
/// disable automatic OAuth detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpOAuth {
    Config(McpOAuthConfig),
    Toggle(bool),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpOAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl McpServer {
    pub fn local(command: Vec<String>) -> Self {
        Self::Local {
            command,
            environment: BTreeMap::new(),
            enabled: true,
            timeout_ms: default_mcp_timeout(),
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::Remote {
            url: url.into(),
            headers: BTreeMap::new(),
            oauth: None,
            enabled: true,
            timeout_ms: default_mcp_timeout(),
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::Local { enabled, .. } | Self::Remote { enabled, .. } => *enabled,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        match self {
            Self::Local { timeout_ms, .. } | Self::Remote { timeout_ms, .. } => *timeout_ms,
        }
    }

    pub fn validate(&self, key: &str) -> Result<()> {
        match self {
            Self::Local { command, .. } => {
                if command.first().is_none_or(|c| c.trim().is_empty()) {
                    return Err(HookworkError::validation(
                        format!("mcp.{key}.command"),
                        "must name an executable",
                    ));
                }
            }
            Self::Remote { url, oauth, .. } => {
                let parsed = url::Url::parse(url).map_err(|e| {
                    HookworkError::validation(format!("mcp.{key}.url"), e.to_string())
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(HookworkError::validation(
                        format!("mcp.{key}.url"),
                        format!("unsupported scheme '{}'", parsed.scheme()),
                    ));
                }
                if let Some(McpOAuth::Toggle(true)) = oauth {
                    return Err(HookworkError::validation(
                        format!("mcp.{key}.oauth"),
                        "must be an object or false",
                    ));
                }
            }
        }
        if self.timeout_ms() == 0 {
            return Err(HookworkError::validation(
                format!("mcp.{key}.timeout_ms"),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_command_requires_placeholder() {
        assert!(Command::new("Review $ARGUMENTS").validate("review").is_ok());
        assert!(Command::new("Compare $1 with $2").validate("diff").is_ok());

        let err = Command::new("No placeholder here").validate("bad").unwrap_err();
        assert_eq!(err.field(), Some("command.bad.template"));
        assert!(Command::new("Costs $12").validate("price").is_err());

        let err = Command::new("   ").validate("empty").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_command_render() {
        let cmd = Command::new("Fix $1 in $2. Context: $ARGUMENTS");
        assert_eq!(
            cmd.render("bug main.rs"),
            "Fix bug in main.rs. Context: bug main.rs"
        );
        assert_eq!(Command::new("Only $3").render("a b"), "Only ");
    }

    #[test]
    fn test_command_render_does_not_rescan_arguments() {
        assert_eq!(
            Command::new("Echo: $ARGUMENTS").render("$2 world"),
            "Echo: $2 world"
        );
        assert_eq!(Command::new("$1 then $2").render("$ARGUMENTS $1"), "$ARGUMENTS then $1");
        assert_eq!(Command::new("Cost $12 for $1").render("x"), "Cost $12 for x");
        assert_eq!(Command::new("trailing $").render("x"), "trailing $");
    }

    #[test]
    fn test_agent_ranges() {
        let mut agent = Agent {
            temperature: Some(2.0),
            top_p: Some(1.0),
            ..Agent::default()
        };
        assert!(agent.validate("ok").is_ok());

        agent.temperature = Some(2.5);
        let err = agent.validate("hot").unwrap_err();
        assert_eq!(err.field(), Some("agent.hot.temperature"));

        agent.temperature = None;
        agent.top_p = Some(-0.1);
        let err = agent.validate("neg").unwrap_err();
        assert_eq!(err.field(), Some("agent.neg.top_p"));
    }

    #[test]
    fn test_agent_deser_defaults() {
        let agent: Agent = json5::from_str(
            r#"{ prompt: "be terse", permission: { edit: "deny", bash: "ask" } }"#,
        )
        .unwrap();
        assert_eq!(agent.mode, AgentMode::All);
        assert_eq!(agent.permission["edit"], PermissionAction::Deny);
        assert_eq!(agent.permission["bash"], PermissionAction::Ask);
    }

    #[test]
    fn test_mcp_local_defaults() {
        let server: McpServer =
            json5::from_str(r#"{ type: "local", command: ["npx", "mcp-server"] }"#).unwrap();
        assert!(server.enabled());
        assert_eq!(server.timeout_ms(), 5000);
        assert!(server.validate("fs").is_ok());
    }

    #[test]
    fn test_mcp_remote_validation() {
        let server: McpServer = json5::from_str(
            r#"{ type: "remote", url: "https://mcp.example.com", oauth: false }"#,
        )
        .unwrap();
        assert!(server.validate("remote").is_ok());

        let bad = McpServer::remote("ftp://example.com");
        assert_eq!(
            bad.validate("ftp").unwrap_err().field(),
            Some("mcp.ftp.url")
        );

        let server: McpServer = json5::from_str(
            r#"{ type: "remote", url: "https://mcp.example.com", oauth: true }"#,
        )
        .unwrap();
        assert_eq!(
            server.validate("r").unwrap_err().field(),
            Some("mcp.r.oauth")
        );

        let empty = McpServer::local(vec![]);
        assert!(empty.validate("none").is_err());
    }

    #[test]
    fn test_written_keys() {
        let mut before = HostConfig::default();
        before.command.insert("a".into(), Command::new("$ARGUMENTS"));
        before.command.insert("b".into(), Command::new("$1"));

        let mut after = before.clone();
        after.command.insert("a".into(), Command::new("changed $ARGUMENTS"));
        after.agent.insert("helper".into(), Agent::default());

        let written = after.written_keys(&before);
        assert_eq!(
            written,
            vec![
                (Section::Command, "a".to_string()),
                (Section::Agent, "helper".to_string())
            ]
        );
    }

    #[test]
    fn test_frozen_config_derefs() {
        let mut config = HostConfig::default();
        config.model = Some("anthropic/claude".into());
        let frozen = config.freeze();
        let shared = frozen.clone();
        assert_eq!(shared.model.as_deref(), Some("anthropic/claude"));
        assert_eq!(
            serde_json::to_value(&frozen).unwrap()["model"],
            "anthropic/claude"
        );
    }
}
