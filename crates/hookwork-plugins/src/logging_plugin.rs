//! Built-in logging plugin: logs events, tool calls and config hook runs via
//! `tracing`. It never changes anything it sees.

use std::sync::Arc;

use hookwork_core::config::HostConfig;

use crate::hooks::HookSet;
use crate::module::{Export, PluginModule};
use crate::{PluginFactory, PluginInput, factory};

/// Catalog package name.
pub const PACKAGE: &str = "hookwork-logging";

pub const PLUGIN_ID: &str = "builtin.logging";

/// The module exported under [`PACKAGE`].
pub fn module() -> PluginModule {
    PluginModule::new(PLUGIN_ID)
        .factory("LoggingPlugin", logging_factory())
        .export("LoggingOptions", Export::Type)
}

fn logging_factory() -> Arc<dyn PluginFactory> {
    factory(|input: PluginInput| async move {
        tracing::info!(plugin = PLUGIN_ID, project = %input.project_id, "Logging plugin initialized");
        Ok(Some(hooks()))
    })
}

pub fn hooks() -> HookSet {
    HookSet::new()
        .on_config(|config: HostConfig| async move {
            tracing::info!(
                plugin = PLUGIN_ID,
                commands = config.command.len(),
                agents = config.agent.len(),
                mcp = config.mcp.len(),
                "Hook: config"
            );
            Ok(config)
        })
        .on_event(|event| async move {
            tracing::info!(plugin = PLUGIN_ID, event = %event.kind, "Hook: event");
            Ok(())
        })
        .on_tool_before(|info, args| async move {
            tracing::info!(
                plugin = PLUGIN_ID,
                tool = %info.tool,
                session = %info.session_id,
                call_id = %info.call_id,
                "Hook: tool.execute.before"
            );
            Ok(args)
        })
        .on_tool_after(|info, output| async move {
            tracing::info!(
                plugin = PLUGIN_ID,
                tool = %info.tool,
                call_id = %info.call_id,
                is_error = output.is_error,
                "Hook: tool.execute.after"
            );
            Ok(output)
        })
}
