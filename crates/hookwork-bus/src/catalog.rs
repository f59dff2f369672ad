//! Built-in event types and their payload schemas.
//!
//! These are the stable contracts plugin event hooks can rely on.

use serde_json::{Value, json};

use crate::{BusError, EventBus};

pub const SERVER_CONNECTED: &str = "server.connected";
pub const SESSION_CREATED: &str = "session.created";
pub const SESSION_UPDATED: &str = "session.updated";
pub const SESSION_DELETED: &str = "session.deleted";
pub const SESSION_IDLE: &str = "session.idle";
pub const SESSION_ERROR: &str = "session.error";
pub const MESSAGE_UPDATED: &str = "message.updated";
pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";
pub const FILE_EDITED: &str = "file.edited";
pub const PERMISSION_UPDATED: &str = "permission.updated";
pub const PERMISSION_REPLIED: &str = "permission.replied";
pub const COMMAND_EXECUTED: &str = "command.executed";
pub const TOOL_EXECUTED: &str = "tool.executed";
pub const TODO_UPDATED: &str = "todo.updated";
pub const INSTALLATION_UPDATED: &str = "installation.updated";

fn object(properties: Value, required: &[&str]) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn session_info() -> Value {
    object(
        json!({
            "id": { "type": "string" },
            "title": { "type": "string" },
            "parent_id": { "type": "string" },
        }),
        &["id"],
    )
}

/// Every built-in event type with its payload schema.
pub fn builtin() -> Vec<(&'static str, Value)> {
    vec![
        (SERVER_CONNECTED, json!({ "type": "object" })),
        (SESSION_CREATED, object(json!({ "info": session_info() }), &["info"])),
        (SESSION_UPDATED, object(json!({ "info": session_info() }), &["info"])),
        (SESSION_DELETED, object(json!({ "info": session_info() }), &["info"])),
        (
            SESSION_IDLE,
            object(json!({ "session_id": { "type": "string" } }), &["session_id"]),
        ),
        (
            SESSION_ERROR,
            object(
                json!({
                    "session_id": { "type": "string" },
                    "error": object(json!({ "name": { "type": "string" }, "message": { "type": "string" } }), &["name"]),
                }),
                &[],
            ),
        ),
        (
            MESSAGE_UPDATED,
            object(
                json!({
                    "info": object(
                        json!({
                            "id": { "type": "string" },
                            "session_id": { "type": "string" },
                            "role": { "enum": ["user", "assistant"] },
                        }),
                        &["id", "session_id", "role"],
                    ),
                }),
                &["info"],
            ),
        ),
        (
            MESSAGE_PART_UPDATED,
            object(
                json!({
                    "part": object(
                        json!({
                            "id": { "type": "string" },
                            "message_id": { "type": "string" },
                            "session_id": { "type": "string" },
                            "type": { "type": "string" },
                        }),
                        &["id", "message_id", "session_id", "type"],
                    ),
                }),
                &["part"],
            ),
        ),
        (
            FILE_EDITED,
            object(json!({ "file": { "type": "string" } }), &["file"]),
        ),
        (
            PERMISSION_UPDATED,
            object(
                json!({
                    "id": { "type": "string" },
                    "type": { "type": "string" },
                    "session_id": { "type": "string" },
                    "title": { "type": "string" },
                }),
                &["id", "type", "session_id", "title"],
            ),
        ),
        (
            PERMISSION_REPLIED,
            object(
                json!({
                    "session_id": { "type": "string" },
                    "permission_id": { "type": "string" },
                    "response": { "enum": ["once", "always", "reject"] },
                }),
                &["session_id", "permission_id", "response"],
            ),
        ),
        (
            COMMAND_EXECUTED,
            object(
                json!({
                    "name": { "type": "string" },
                    "session_id": { "type": "string" },
                    "arguments": { "type": "string" },
                }),
                &["name", "session_id", "arguments"],
            ),
        ),
        (
            TOOL_EXECUTED,
            object(
                json!({
                    "tool": { "type": "string" },
                    "session_id": { "type": "string" },
                    "call_id": { "type": "string" },
                    "title": { "type": "string" },
                }),
                &["tool", "session_id", "call_id"],
            ),
        ),
        (
            TODO_UPDATED,
            object(
                json!({
                    "session_id": { "type": "string" },
                    "todos": {
                        "type": "array",
                        "items": object(
                            json!({
                                "id": { "type": "string" },
                                "content": { "type": "string" },
                                "status": { "enum": ["pending", "in_progress", "completed", "cancelled"] },
                            }),
                            &["id", "content", "status"],
                        ),
                    },
                }),
                &["session_id", "todos"],
            ),
        ),
        (
            INSTALLATION_UPDATED,
            object(json!({ "version": { "type": "string" } }), &["version"]),
        ),
    ]
}

/// Define every built-in event type on `bus`.
pub async fn define_builtin(bus: &EventBus) -> Result<(), BusError> {
    for (kind, schema) in builtin() {
        bus.define(kind, schema).await?;
    }
    Ok(())
}
