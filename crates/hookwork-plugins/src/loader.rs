//! Plugin loader: resolves, imports and initializes plugins in order.
//!
//! Loading is all-or-nothing. The first failing step aborts the load and
//! later plugins are never touched.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hookwork_core::settings::{Settings, deadline};
use thiserror::Error;
use tracing::{debug, info};

use crate::hooks::HookSet;
use crate::module::PluginModule;
use crate::resolver::{ModuleResolver, ResolvedPlugin};
use crate::source::PluginSource;
use crate::PluginInput;

/// Default deadline for each load step.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// The load step a plugin was in when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStage {
    Resolve,
    Import,
    Invoke { export: String },
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => f.write_str("resolve"),
            Self::Import => f.write_str("import"),
            Self::Invoke { export } => write!(f, "invoke {export}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid plugin source '{raw}': {reason}")]
    InvalidSource { raw: String, reason: String },

    #[error("plugin '{plugin}' failed at {stage}: {cause:#}")]
    Failed {
        plugin: String,
        stage: LoadStage,
        cause: anyhow::Error,
    },

    #[error("plugin '{plugin}' timed out at {stage} after {}ms", .limit.as_millis())]
    TimedOut {
        plugin: String,
        stage: LoadStage,
        limit: Duration,
    },
}

impl LoadError {
    /// The plugin source the error is about.
    pub fn plugin(&self) -> &str {
        match self {
            Self::InvalidSource { raw, .. } => raw,
            Self::Failed { plugin, .. } | Self::TimedOut { plugin, .. } => plugin,
        }
    }

    pub fn stage(&self) -> Option<&LoadStage> {
        match self {
            Self::InvalidSource { .. } => None,
            Self::Failed { stage, .. } | Self::TimedOut { stage, .. } => Some(stage),
        }
    }
}

/// What was loaded for one source.
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub source: PluginSource,
    pub resolved: ResolvedPlugin,
    pub module: PluginModule,
    /// Factory exports that were invoked, in order.
    pub invoked: Vec<String>,
    /// Type and value exports, never invoked.
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    /// `(export name, hooks)` for each factory that returned hooks.
    pub hook_sets: Vec<(String, HookSet)>,
}

impl LoadedPlugin {
    /// Registry id for one export: `<source>#<export>`.
    pub fn hook_id(&self, export: &str) -> String {
        format!("{}#{export}", self.descriptor.source)
    }
}

pub struct PluginLoader {
    resolver: Arc<dyn ModuleResolver>,
    default_timeout: Option<Duration>,
    per_plugin: BTreeMap<String, Option<Duration>>,
}

impl PluginLoader {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            resolver,
            default_timeout: Some(DEFAULT_LOAD_TIMEOUT),
            per_plugin: BTreeMap::new(),
        }
    }

    /// Loader with the deadlines from `settings`.
    pub fn from_settings(resolver: Arc<dyn ModuleResolver>, settings: &Settings) -> Self {
        let mut loader =
            Self::new(resolver).with_timeout(deadline(settings.plugin_load_timeout_ms));
        for (source, ms) in &settings.plugin_timeouts_ms {
            loader = loader.with_plugin_timeout(source.clone(), deadline(*ms));
        }
        loader
    }

    /// Deadline for each load step; `None` means no limit.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.default_timeout = limit;
        self
    }

    /// Deadline override for one source, as written in the settings.
    pub fn with_plugin_timeout(mut self, source: impl Into<String>, limit: Option<Duration>) -> Self {
        self.per_plugin.insert(source.into(), limit);
        self
    }

    fn timeout_for(&self, raw: &str) -> Option<Duration> {
        self.per_plugin
            .get(raw)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Load every source in order.
    pub async fn load(
        &self,
        sources: &[String],
        input: &PluginInput,
    ) -> Result<Vec<LoadedPlugin>, LoadError> {
        let mut loaded = Vec::with_capacity(sources.len());
        for raw in sources {
            let plugin = self.load_one(raw, input).await?;
            info!(
                plugin = %raw,
                module = %plugin.descriptor.module.name,
                invoked = ?plugin.descriptor.invoked,
                "Plugin loaded"
            );
            loaded.push(plugin);
        }
        Ok(loaded)
    }

    async fn load_one(&self, raw: &str, input: &PluginInput) -> Result<LoadedPlugin, LoadError> {
        let source = PluginSource::parse(raw).map_err(|reason| LoadError::InvalidSource {
            raw: raw.to_string(),
            reason,
        })?;
        let limit = self.timeout_for(raw);

        debug!(plugin = %raw, "Resolving plugin");
        let resolved = step(raw, LoadStage::Resolve, limit, self.resolver.resolve(&source)).await?;

        debug!(plugin = %raw, resolved = %resolved, "Importing plugin");
        let module = step(raw, LoadStage::Import, limit, self.resolver.import(&resolved)).await?;

        let mut invoked = Vec::new();
        let mut hook_sets = Vec::new();
        for (export, factory) in module.factories() {
            debug!(plugin = %raw, export, "Invoking plugin factory");
            let stage = LoadStage::Invoke {
                export: export.to_string(),
            };
            let hooks = step(raw, stage, limit, factory.init(input.clone())).await?;
            invoked.push(export.to_string());
            if let Some(hooks) = hooks {
                hook_sets.push((export.to_string(), hooks));
            }
        }

        let skipped = module
            .exports()
            .iter()
            .filter(|(_, export)| !matches!(export, crate::module::Export::Factory(_)))
            .map(|(name, _)| name.clone())
            .collect();

        Ok(LoadedPlugin {
            descriptor: PluginDescriptor {
                source,
                resolved,
                module,
                invoked,
                skipped,
            },
            hook_sets,
        })
    }
}

async fn step<T>(
    plugin: &str,
    stage: LoadStage,
    limit: Option<Duration>,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, LoadError> {
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                return Err(LoadError::TimedOut {
                    plugin: plugin.to_string(),
                    stage,
                    limit,
                });
            }
        },
        None => fut.await,
    };
    result.map_err(|cause| LoadError::Failed {
        plugin: plugin.to_string(),
        stage,
        cause,
    })
}
