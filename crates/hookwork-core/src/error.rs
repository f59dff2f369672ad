use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookworkError {
    #[error("Config error: {0}")]
    Config(String),

    /// A value failed schema validation. `field` is a dotted path such as
    /// `command.review.template`.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HookworkError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The offending field path, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, HookworkError>;
