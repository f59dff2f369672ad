//! Built-in `read` tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::path_guard::resolve_read;
use crate::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

/// Renders `lines[offset..offset + limit]` numbered from one.
fn numbered(content: &str, offset: usize, limit: Option<usize>) -> (String, usize, usize) {
    let total = content.lines().count();
    let window = content
        .lines()
        .enumerate()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX));

    let mut shown = 0;
    let mut out = String::new();
    for (index, line) in window {
        out.push_str(&format!("{:>6}\t{line}\n", index + 1));
        shown += 1;
    }
    (out, shown, total)
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file from the workspace. Lines are numbered; use offset and limit to page through large files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to read" },
                "offset": { "type": "integer", "minimum": 0, "description": "First line, counted from zero" },
                "limit": { "type": "integer", "minimum": 1, "description": "Number of lines" }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let args: ReadArgs = serde_json::from_value(params)?;

        let path = match resolve_read(&args.path, &context.workspace, context.restrict_to_workspace) {
            Ok(path) => path,
            Err(e) => return Ok(ToolOutput::error(format!("Path error: {e}"))),
        };
        if !path.is_file() {
            return Ok(ToolOutput::error(format!("File not found: {}", path.display())));
        }

        let content = tokio::select! {
            _ = context.abort.cancelled() => anyhow::bail!("read of {} aborted", args.path),
            read = tokio::fs::read_to_string(&path) => match read {
                Ok(content) => content,
                Err(e) => return Ok(ToolOutput::error(format!("Read error: {e}"))),
            },
        };

        let (mut output, shown, total) = numbered(&content, args.offset, args.limit);
        if shown == 0 {
            output = format!("(no lines at offset {}; file has {total})", args.offset);
        }

        Ok(ToolOutput::text(output)
            .with_title(args.path)
            .with_metadata(json!({ "lines": shown, "total_lines": total })))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn numbering_respects_window() {
        let (out, shown, total) = numbered("a\nb\nc\nd", 1, Some(2));
        assert_eq!(out, "     2\tb\n     3\tc\n");
        assert_eq!((shown, total), (2, 4));
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "first\nsecond\nthird").unwrap();
        let ctx = ToolContext::new("s1", "c1", dir.path());

        let out = ReadTool
            .execute(json!({"path": "notes.md"}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
        assert!(out.output.contains("\tfirst\n"));
        assert!(out.output.contains("\tthird\n"));
        assert_eq!(out.title, "notes.md");
        assert_eq!(out.metadata["total_lines"], 3);
    }

    #[tokio::test]
    async fn offset_past_end_reports_empty_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("short.txt"), "only").unwrap();
        let ctx = ToolContext::new("s1", "c1", dir.path());

        let out = ReadTool
            .execute(json!({"path": "short.txt", "offset": 10}), &ctx)
            .await
            .unwrap();
        assert!(out.output.contains("no lines at offset 10"));
        assert_eq!(out.metadata["lines"], 0);
    }

    #[tokio::test]
    async fn missing_file_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", "c1", dir.path());

        let out = ReadTool
            .execute(json!({"path": "absent.txt"}), &ctx)
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.output.contains("not found"));
    }

    #[tokio::test]
    async fn missing_path_argument_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("s1", "c1", dir.path());
        assert!(ReadTool.execute(json!({}), &ctx).await.is_err());
    }
}
