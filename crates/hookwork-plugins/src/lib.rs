//! Plugin runtime for hookwork.
//!
//! Plugins are modules whose factory exports are invoked once at startup
//! with a [`PluginInput`]. Each factory returns a [`HookSet`]: config,
//! event, chat, permission and tool hooks, tools, and auth providers.
//! The [`Host`] loads plugins in order, runs the config pipeline, wires
//! event hooks to the bus and wraps tool calls in the interceptor.

pub mod command_plugin;
pub mod hooks;
pub mod host;
pub mod interceptor;
pub mod loader;
pub mod logging_plugin;
pub mod manifest;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod source;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hookwork_bus::EventBus;

pub use hooks::{HookKind, HookSet, ToolCallInfo};
pub use host::{Host, HostError};
pub use interceptor::{ToolCall, ToolCallError, ToolInterceptor};
pub use loader::{LoadError, LoadStage, LoadedPlugin, PluginDescriptor, PluginLoader};
pub use module::{Export, ModuleCatalog, PluginModule};
pub use pipeline::{ConfigPipeline, Override, PipelineOutcome, Rejection};
pub use registry::{HookFailure, HookRegistry};
pub use resolver::{
    DefaultResolver, MirrorInstaller, ModuleResolver, PackageInstaller, ResolvedPlugin,
};
pub use source::PluginSource;

/// Context handed to every plugin factory.
#[derive(Clone)]
pub struct PluginInput {
    pub project_id: String,
    /// Directory the host was started in.
    pub directory: PathBuf,
    /// Root of the project worktree.
    pub worktree: PathBuf,
    /// Event bus of this host instance.
    pub bus: Arc<EventBus>,
}

impl PluginInput {
    pub fn new(directory: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        let directory = directory.into();
        let project_id = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "global".into());
        Self {
            project_id,
            worktree: directory.clone(),
            directory,
            bus,
        }
    }

    /// The serializable part, as sent to command plugins.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "project_id": self.project_id,
            "directory": self.directory,
            "worktree": self.worktree,
        })
    }
}

/// A callable plugin export.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    /// Build this plugin's hooks. `None` contributes nothing.
    async fn init(&self, input: PluginInput) -> anyhow::Result<Option<HookSet>>;
}

struct FnFactory<F>(F);

#[async_trait]
impl<F, Fut> PluginFactory for FnFactory<F>
where
    F: Fn(PluginInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<HookSet>>> + Send + 'static,
{
    async fn init(&self, input: PluginInput) -> anyhow::Result<Option<HookSet>> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a plugin factory.
pub fn factory<F, Fut>(f: F) -> Arc<dyn PluginFactory>
where
    F: Fn(PluginInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<HookSet>>> + Send + 'static,
{
    Arc::new(FnFactory(f))
}
