use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt::Write;
use thiserror::Error;

/// Formats an error and its entire source chain with each error on a new line
///
/// This produces output like:
/// ```
/// Error message
///   Caused by: First cause
///   Caused by: Second cause
///   Caused by: Root cause
/// ```
pub fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut output = String::new();
    write!(&mut output, "{}", err).ok();

    let mut source = err.source();
    while let Some(err) = source {
        write!(&mut output, "\n  Caused by: {}", err).ok();
        source = err.source();
    }

    output
}

/// Formats an anyhow::Error with its full chain
pub fn format_anyhow_chain(err: &anyhow::Error) -> String {
    let mut output = String::new();

    let chain: Vec<_> = err.chain().collect();

    if let Some((first, rest)) = chain.split_first() {
        write!(&mut output, "{}", first).ok();
        for cause in rest {
            write!(&mut output, "\n  Caused by: {}", cause).ok();
        }
    }

    output
}

/// Central application error type
///
/// The first group is the taxonomy shared with clients; the rest are
/// infrastructure errors that surface as internal failures.
#[derive(Error, Debug)]
pub enum AppError {
    /// Entity, ident or session lookup misses
    #[error("Not found: {domain}/{key}")]
    NotFound { domain: String, key: String },

    /// Revision mismatch, duplicate ident, or more than one result where
    /// exactly one was required
    #[error("Conflict in {domain}: {message}")]
    Conflict { domain: String, message: String },

    /// Input that must not be retried as-is
    #[error("Validation failure ({code}): {message}")]
    Validation { code: String, message: String },

    /// Session TTL exceeded
    #[error("Expired: {0}")]
    Expired(String),

    /// An RPC peer returned a categorized error
    #[error("Remote error [{category}/{code}]: {message}")]
    Remote {
        category: String,
        code: String,
        message: String,
    },

    /// Underlying stream closed or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// Attribute not declared, or declared with a different kind
    #[error("Schema error: {0}")]
    Schema(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    #[error("Database migration error: {0}")]
    DatabaseMigration(String),

    /// Serialization/Deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Chrono parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// Generic internal errors with context
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(domain: impl Into<String>, key: impl Into<String>) -> Self {
        AppError::NotFound {
            domain: domain.into(),
            key: key.into(),
        }
    }

    pub fn conflict(domain: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Conflict {
            domain: domain.into(),
            message: message.into(),
        }
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// Re-tags a remote error into the local taxonomy at the SDK boundary.
    pub fn from_remote(category: &str, code: &str, message: &str) -> Self {
        match category {
            "not-found" => AppError::not_found(code, message),
            "conflict" => AppError::conflict(code, message),
            "validation" => AppError::validation(code, message),
            "expired" => AppError::Expired(message.to_string()),
            "transport" => AppError::Transport(message.to_string()),
            _ => AppError::Remote {
                category: category.to_string(),
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

impl PartialEq for AppError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        log::error!("HTTP error response: {}", self);

        let status_code = self.status_code();
        let error_message = self.to_string();

        let body = serde_json::json!({
            "error": error_message,
            "status": status_code.as_u16(),
        });

        HttpResponse::build(status_code)
            .content_type("application/json")
            .json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            AppError::Conflict { .. } => StatusCode::CONFLICT,

            AppError::Validation { .. } | AppError::Schema(_) => StatusCode::BAD_REQUEST,

            AppError::Expired(_) => StatusCode::GONE,

            AppError::Transport(_) => StatusCode::BAD_GATEWAY,

            AppError::Remote { .. }
            | AppError::Database(_)
            | AppError::DatabasePool(_)
            | AppError::DatabaseMigration(_)
            | AppError::Json(_)
            | AppError::Io(_)
            | AppError::ChronoParse(_)
            | AppError::EnvVar(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Internal(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Internal(s.to_string())
    }
}
