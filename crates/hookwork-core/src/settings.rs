//! Settings file loading and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::HostConfig;
use crate::error::{HookworkError, Result};

/// Top-level hookwork settings, loaded from `hookwork.json5`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Ordered plugin sources: local paths or `name@version` package ids.
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Deadline for each plugin load step, in milliseconds. `0` disables it.
    #[serde(default = "default_load_timeout_ms")]
    pub plugin_load_timeout_ms: u64,

    /// Per-plugin load deadline overrides, keyed by plugin source string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_timeouts_ms: BTreeMap<String, u64>,

    /// Deadline for each hook invocation, in milliseconds. `0` disables it.
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,

    /// Log a warning when a plugin overwrites a config key written earlier.
    #[serde(default)]
    pub warn_on_override: bool,

    /// Package cache directory (default: `~/.hookwork/cache`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    /// Local mirror that packages are installed from when not cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror_dir: Option<String>,

    /// Credential store path (default: `~/.hookwork/auth.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Base host config that plugins' config hooks build on.
    #[serde(default)]
    pub config: HostConfig,
}

fn default_load_timeout_ms() -> u64 {
    30_000
}

fn default_hook_timeout_ms() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            plugin_load_timeout_ms: default_load_timeout_ms(),
            plugin_timeouts_ms: BTreeMap::new(),
            hook_timeout_ms: default_hook_timeout_ms(),
            warn_on_override: false,
            cache_dir: None,
            mirror_dir: None,
            auth_file: None,
            logging: None,
            config: HostConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "hookwork_plugins=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Convert a millisecond setting into a deadline; `0` means no limit.
pub fn deadline(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| HookworkError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Settings {
    /// Load settings from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse settings from JSON5 text and validate the base host config.
    pub fn parse(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        let settings: Settings =
            json5::from_str(&substituted).map_err(|e| HookworkError::Config(e.to_string()))?;
        settings.config.validate()?;
        Ok(settings)
    }

    /// Default settings file path: `~/.hookwork/hookwork.json5`.
    pub fn default_path() -> PathBuf {
        data_dir().join("hookwork.json5")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("cache"))
    }

    pub fn mirror_dir(&self) -> Option<PathBuf> {
        self.mirror_dir.as_deref().map(expand_path)
    }

    pub fn auth_file(&self) -> PathBuf {
        self.auth_file
            .as_deref()
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("auth.json"))
    }

    /// Load deadline for a plugin source, honoring per-plugin overrides.
    pub fn load_timeout_for(&self, source: &str) -> Option<Duration> {
        let ms = self
            .plugin_timeouts_ms
            .get(source)
            .copied()
            .unwrap_or(self.plugin_load_timeout_ms);
        deadline(ms)
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        deadline(self.hook_timeout_ms)
    }

    /// Get a value by dotted path (e.g. "hook_timeout_ms", "config.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Set a value by dotted path, re-validating the result.
    pub fn set_path(&mut self, path: &str, value: serde_json::Value) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;

        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(HookworkError::Config("Empty path".into()));
        };

        let mut current = &mut json;
        for segment in parents {
            let object = current.as_object_mut().ok_or_else(|| {
                HookworkError::Config(format!("'{segment}' is not inside an object"))
            })?;
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| serde_json::json!({}));
        }

        let object = current
            .as_object_mut()
            .ok_or_else(|| HookworkError::Config(format!("cannot set '{path}'")))?;
        object.insert(last.to_string(), value);

        let updated: Settings = serde_json::from_value(json)?;
        updated.config.validate()?;
        *self = updated;
        Ok(())
    }

    /// Validate settings, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let mut seen = std::collections::HashSet::new();
        for source in &self.plugins {
            if source.trim().is_empty() {
                errors.push("Plugin source cannot be empty".to_string());
            } else if !seen.insert(source) {
                warnings.push(format!("Plugin '{source}' is listed more than once"));
            }
        }

        if self.plugin_load_timeout_ms == 0 {
            warnings.push("Plugin load timeout disabled; a hung plugin will hang startup".into());
        }
        if self.hook_timeout_ms == 0 {
            warnings.push("Hook timeout disabled; a hung hook will stall its caller".into());
        }

        if let Some(mirror) = self.mirror_dir() {
            if !mirror.is_dir() {
                errors.push(format!("Mirror directory not found: {}", mirror.display()));
            }
        }

        if let Err(e) = self.config.validate() {
            errors.push(e.to_string());
        }

        (warnings, errors)
    }

    /// Save settings to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for hookwork data: `~/.hookwork/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hookwork")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_HW_MODEL", "anthropic/sonnet") };
        let result = substitute_env_vars(r#"{"model": "${TEST_HW_MODEL}", "other": "plain"}"#)
            .unwrap();
        assert!(result.contains("anthropic/sonnet"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_HW_MODEL") };
    }

    #[test]
    fn test_env_var_missing() {
        let result = substitute_env_vars(r#"{"key": "${NONEXISTENT_VAR_HW_TEST}"}"#).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.plugins.is_empty());
        assert_eq!(settings.load_timeout_for("anything"), Some(Duration::from_secs(30)));
        assert_eq!(settings.hook_timeout(), Some(Duration::from_secs(10)));
        assert!(!settings.warn_on_override);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json5")).unwrap();
        assert_eq!(settings.hook_timeout_ms, 10_000);
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::parse(
            r#"{
                // comments are fine in JSON5
                plugins: ["./plugins/audit", "hookwork-logging@1.0.0"],
                plugin_timeouts_ms: { "./plugins/audit": 0 },
                hook_timeout_ms: 250,
                warn_on_override: true,
                config: {
                    model: "anthropic/sonnet",
                    command: { review: { template: "Review $ARGUMENTS" } },
                    mcp: { fs: { type: "local", command: ["mcp-fs"] } },
                },
            }"#,
        )
        .unwrap();
        assert_eq!(settings.plugins.len(), 2);
        assert_eq!(settings.load_timeout_for("./plugins/audit"), None);
        assert_eq!(
            settings.load_timeout_for("hookwork-logging@1.0.0"),
            Some(Duration::from_secs(30))
        );
        assert_eq!(settings.hook_timeout(), Some(Duration::from_millis(250)));
        assert!(settings.config.command.contains_key("review"));
        assert!(settings.config.mcp["fs"].enabled());
    }

    #[test]
    fn test_parse_rejects_invalid_base_config() {
        let err = Settings::parse(r#"{ config: { command: { x: { template: "static" } } } }"#)
            .unwrap_err();
        assert_eq!(err.field(), Some("command.x.template"));
    }

    #[test]
    fn test_get_and_set_path() {
        let mut settings = Settings::default();
        settings
            .set_path("config.model", serde_json::json!("openai/gpt"))
            .unwrap();
        assert_eq!(settings.config.model.as_deref(), Some("openai/gpt"));
        assert_eq!(
            settings.get_path("config.model"),
            Some(serde_json::json!("openai/gpt"))
        );

        settings
            .set_path("hook_timeout_ms", serde_json::json!(5))
            .unwrap();
        assert_eq!(settings.hook_timeout_ms, 5);

        assert!(settings.set_path("", serde_json::json!(1)).is_err());
        assert!(
            settings
                .set_path("hook_timeout_ms", serde_json::json!("not a number"))
                .is_err()
        );
    }

    #[test]
    fn test_validate_duplicates_and_timeouts() {
        let settings = Settings {
            plugins: vec!["a@1".into(), "a@1".into(), " ".into()],
            hook_timeout_ms: 0,
            ..Settings::default()
        };
        let (warnings, errors) = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("more than once")));
        assert!(warnings.iter().any(|w| w.contains("Hook timeout disabled")));
        assert!(errors.iter().any(|e| e.contains("empty")));
    }

    #[test]
    fn test_logging_config_defaults() {
        let settings = Settings::parse(r#"{ logging: {} }"#).unwrap();
        let logging = settings.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/hookwork.json5");
        let settings = Settings {
            plugins: vec!["./p".into()],
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.plugins, vec!["./p".to_string()]);
    }
}
