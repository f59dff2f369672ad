//! `plugin.json5` manifests for plugins that live on disk.
//!
//! ```json5
//! {
//!   name: "audit",
//!   version: "1.0.0",
//!   exports: [
//!     { name: "AuditPlugin", kind: "command", command: "./audit.sh",
//!       hooks: ["config", "tool.execute.before"], timeout_ms: 5000 },
//!     { name: "AuditOptions", kind: "type" },
//!   ],
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use hookwork_core::settings::deadline;
use serde::Deserialize;

use crate::command_plugin::{CommandFactory, CommandSpec};
use crate::hooks::HookKind;
use crate::module::{Export, PluginModule};

pub const MANIFEST_FILES: [&str; 2] = ["plugin.json5", "plugin.json"];

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub exports: Vec<ManifestExport>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestExport {
    pub name: String,
    #[serde(flatten)]
    pub spec: ExportSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportSpec {
    Command {
        command: String,
        #[serde(default)]
        hooks: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Per-invocation deadline; `0` or absent means none beyond the hook deadline.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Type,
    Value {
        #[serde(default)]
        value: serde_json::Value,
    },
}

/// Find the manifest for `path`: the file itself, or a manifest inside the directory.
pub fn locate(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        bail!("plugin path not found: {}", path.display());
    }
    MANIFEST_FILES
        .iter()
        .map(|f| path.join(f))
        .find(|p| p.is_file())
        .with_context(|| {
            format!(
                "no {} in {}",
                MANIFEST_FILES.join(" or "),
                path.display()
            )
        })
}

impl PluginManifest {
    pub fn parse(raw: &str) -> Result<Self> {
        let manifest: Self = json5::from_str(raw).context("invalid plugin manifest")?;
        if manifest.name.trim().is_empty() {
            bail!("plugin manifest has an empty name");
        }
        let mut seen = std::collections::HashSet::new();
        for export in &manifest.exports {
            if !seen.insert(export.name.as_str()) {
                bail!("duplicate export '{}'", export.name);
            }
        }
        Ok(manifest)
    }

    /// Read the manifest at or inside `path`. Returns it with its directory.
    pub fn load(path: &Path) -> Result<(Self, PathBuf)> {
        let file = locate(path)?;
        let raw = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let manifest =
            Self::parse(&raw).with_context(|| format!("in {}", file.display()))?;
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok((manifest, dir))
    }

    /// Build the module. Command exports run with `dir` as working directory.
    pub fn into_module(self, dir: &Path) -> Result<PluginModule> {
        let mut module = PluginModule::new(self.name.clone());
        for export in self.exports {
            let item = match export.spec {
                ExportSpec::Command {
                    command,
                    hooks,
                    env,
                    timeout_ms,
                } => {
                    let kinds = hooks
                        .iter()
                        .map(|h| h.parse::<HookKind>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| anyhow::anyhow!("export '{}': {e}", export.name))?;
                    let spec = CommandSpec {
                        name: format!("{}#{}", self.name, export.name),
                        command,
                        cwd: dir.to_path_buf(),
                        env,
                        timeout: timeout_ms.and_then(deadline),
                    };
                    Export::Factory(Arc::new(CommandFactory::new(spec, kinds)?))
                }
                ExportSpec::Type => Export::Type,
                ExportSpec::Value { value } => Export::Value(value),
            };
            module = module.export(export.name, item);
        }
        Ok(module)
    }
}
