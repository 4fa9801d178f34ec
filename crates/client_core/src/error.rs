use serde::{Deserialize, Serialize};
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

/// Coarse classification a host can branch on without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("no local account; register first")]
    NoAccount,
    #[error("credentials rejected: {0}")]
    Unauthorized(String),
    #[error("backend did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("local storage failure: {0}")]
    Storage(String),
}

impl CommandError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CommandError::Validation(_) | CommandError::Forbidden(_) => ErrorCategory::Validation,
            CommandError::NotFound(_) | CommandError::NoAccount => ErrorCategory::NotFound,
            CommandError::Conflict(_) => ErrorCategory::Conflict,
            CommandError::Timeout(_) | CommandError::Unavailable(_) => ErrorCategory::Unavailable,
            CommandError::Unauthorized(_) | CommandError::Storage(_) => ErrorCategory::Internal,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Validation(_) => "validation",
            CommandError::NotFound(_) => "not_found",
            CommandError::Conflict(_) => "conflict",
            CommandError::Forbidden(_) => "forbidden",
            CommandError::NoAccount => "no_account",
            CommandError::Unauthorized(_) => "unauthorized",
            CommandError::Timeout(_) => "timeout",
            CommandError::Unavailable(_) => "unavailable",
            CommandError::Storage(_) => "storage",
        }
    }

    pub fn reply(&self) -> ErrorReply {
        ErrorReply {
            category: self.category(),
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serialized failure as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub category: ErrorCategory,
    pub kind: String,
    pub message: String,
}

impl From<ApiError> for CommandError {
    fn from(err: ApiError) -> Self {
        match err.code {
            ErrorCode::Validation => CommandError::Validation(err.message),
            ErrorCode::NotFound => CommandError::NotFound(err.message),
            ErrorCode::Conflict => CommandError::Conflict(err.message),
            ErrorCode::Forbidden => CommandError::Forbidden(err.message),
            ErrorCode::Unauthorized => CommandError::Unauthorized(err.message),
            ErrorCode::Internal => CommandError::Unavailable(err.message),
        }
    }
}
