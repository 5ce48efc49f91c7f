//! Error type shared by the store, auth and handler layers.
//!
//! Every variant maps onto a stable wire code so the UI can decide what to
//! show (a toast, a redirect to sign-in, a field highlight).

use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadParams(String),

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("sign in required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("select a workspace first")]
    NoWorkspace,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Db(#[from] rusqlite::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadParams(_) => "bad_params",
            AppError::Validation { .. } => "validation_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::NoWorkspace => "no_workspace",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::Db(e) if is_constraint_violation(e) => "conflict",
            AppError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation { field, .. } => Some(json!({ "field": field })),
            AppError::Unauthenticated => Some(json!({ "redirect": "/auth" })),
            AppError::Forbidden(_) => Some(json!({ "redirect": "/dashboard" })),
            _ => None,
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}
