//! Built-in `write` tool.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::path_guard::resolve_write;
use crate::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Write to a sibling `.partial` file, then rename it over `path`.
async fn replace_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut staging = path.as_os_str().to_owned();
    staging.push(".partial");
    let staging = Path::new(&staging).to_path_buf();

    tokio::fs::write(&staging, content).await?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }
    Ok(())
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace. Missing parent directories are created."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to write" },
                "content": { "type": "string", "description": "Full new contents" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: WriteArgs = serde_json::from_value(params)?;

        let path = match resolve_write(&args.path, &context.workspace, context.restrict_to_workspace) {
            Ok(path) => path,
            Err(e) => return Ok(ToolOutput::error(format!("Path error: {e}"))),
        };
        if context.is_aborted() {
            anyhow::bail!("write of {} aborted", args.path);
        }

        if let Err(e) = replace_file(&path, &args.content).await {
            return Ok(ToolOutput::error(format!("Write error: {e}")));
        }

        let bytes = args.content.len();
        Ok(ToolOutput::text(format!("Wrote {bytes} bytes to {}", path.display()))
            .with_title(args.path)
            .with_metadata(json!({ "bytes": bytes })))
    }
}
