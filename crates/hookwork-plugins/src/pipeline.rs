//! Config pipeline: threads the host config through every plugin's config
//! hook in load order, validating after each one, then freezes it.

use std::collections::HashMap;

use hookwork_core::config::{FrozenConfig, HostConfig, Section};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hooks::HookKind;
use crate::registry::HookRegistry;

/// Writer name recorded for keys that come from the settings file.
pub const BASE_WRITER: &str = "settings";

/// A config hook whose result was discarded.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub plugin: String,
    pub reason: String,
    /// Offending field, when validation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// A key written by one writer and overwritten by a later plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Override {
    pub section: String,
    pub key: String,
    pub previous: String,
    pub plugin: String,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub config: FrozenConfig,
    pub rejected: Vec<Rejection>,
    pub overrides: Vec<Override>,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPipeline {
    warn_on_override: bool,
}

impl ConfigPipeline {
    pub fn new(warn_on_override: bool) -> Self {
        Self { warn_on_override }
    }

    /// Run every config hook over `base`. A hook that errors, times out or
    /// leaves the config invalid is rejected and the config from before it
    /// is kept.
    pub async fn run(&self, base: HostConfig, registry: &HookRegistry) -> PipelineOutcome {
        let mut writers: HashMap<(Section, String), String> = base
            .keys()
            .into_iter()
            .map(|key| (key, BASE_WRITER.to_string()))
            .collect();
        let mut rejected = Vec::new();
        let mut overrides = Vec::new();
        let mut config = base;

        for (plugin, hook) in registry.config_hooks() {
            let staged = match registry.guard(plugin, HookKind::Config, hook(config.clone())).await {
                Ok(staged) => staged,
                Err(e) => {
                    warn!(plugin = %plugin, hook = %HookKind::Config, error = %e, "Config hook failed, keeping previous config");
                    rejected.push(Rejection {
                        plugin: plugin.to_string(),
                        reason: format!("{e:#}"),
                        field: None,
                    });
                    continue;
                }
            };

            if let Err(e) = staged.validate() {
                warn!(
                    plugin = %plugin,
                    hook = %HookKind::Config,
                    field = e.field().unwrap_or_default(),
                    error = %e,
                    "Rejected invalid config injection"
                );
                rejected.push(Rejection {
                    plugin: plugin.to_string(),
                    reason: e.to_string(),
                    field: e.field().map(str::to_string),
                });
                continue;
            }

            for (section, key) in staged.written_keys(&config) {
                debug!(plugin = %plugin, section = %section, key = %key, "Config key written");
                let previous = writers.insert((section, key.clone()), plugin.to_string());
                let Some(previous) = previous else {
                    continue;
                };
                if previous != plugin && self.warn_on_override {
                    warn!(
                        plugin = %plugin,
                        section = %section,
                        key = %key,
                        previous = %previous,
                        "Config key overridden"
                    );
                    overrides.push(Override {
                        section: section.to_string(),
                        key,
                        previous,
                        plugin: plugin.to_string(),
                    });
                }
            }
            config = staged;
        }

        info!(
            commands = config.command.len(),
            agents = config.agent.len(),
            mcp = config.mcp.len(),
            rejected = rejected.len(),
            "Config finalized"
        );
        PipelineOutcome {
            config: config.freeze(),
            rejected,
            overrides,
        }
    }
}
