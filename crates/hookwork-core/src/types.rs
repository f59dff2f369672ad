use serde::{Deserialize, Serialize};

/// Permission decision for an action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    #[default]
    Ask,
    Allow,
    Deny,
}

/// A permission request raised before a sensitive action runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    /// Action kind, e.g. "edit", "bash", "webfetch".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Provider + model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Content part of a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    File {
        url: String,
        mime: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// A chat message as seen by `chat.message` hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Message {
    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::File { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Input to `chat.message` hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageInput {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

/// Input to `chat.params` hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParamsInput {
    pub session_id: String,
    pub agent: String,
    pub model: ModelRef,
}

/// Sampling parameters that `chat.params` hooks may rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Provider-specific options.
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// Input to `text.complete` hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCompleteInput {
    pub session_id: String,
    pub message_id: String,
    pub part_id: String,
}

/// Completed text that `text.complete` hooks may rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextCompletion {
    pub text: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_skips_files() {
        let msg = Message {
            id: "m1".into(),
            session_id: "s1".into(),
            role: Role::User,
            parts: vec![
                Part::Text { text: "hello ".into() },
                Part::File {
                    url: "file:///a.png".into(),
                    mime: "image/png".into(),
                    filename: None,
                },
                Part::Text { text: "world".into() },
            ],
        };
        assert_eq!(msg.text(), "hello world");
    }

    #[test]
    fn test_permission_serializes_type_field() {
        let perm = Permission {
            id: "p1".into(),
            kind: "bash".into(),
            pattern: Some("git *".into()),
            session_id: "s1".into(),
            call_id: None,
            title: "Run git status".into(),
            metadata: serde_json::Value::Null,
        };
        let json = serde_json::to_value(&perm).unwrap();
        assert_eq!(json["type"], "bash");
        assert!(json.get("call_id").is_none());
    }
}
