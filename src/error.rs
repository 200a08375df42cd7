use std::collections::BTreeMap;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// Field-level validation messages, keyed by the request field that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationFailure {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut failure = Self::default();
        failure.add(field, message);
        failure
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationFailure) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// First message overall, used as the top-level response message.
    pub fn first_message(&self) -> &str {
        self.errors
            .values()
            .flat_map(|messages| messages.iter())
            .next()
            .map(String::as_str)
            .unwrap_or("The given data was invalid.")
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl From<validator::ValidationErrors> for ValidationFailure {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut failure = Self::default();
        for (field, field_errors) in errors.field_errors() {
            for error in field_errors.iter() {
                let message = error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("The {} field is invalid ({}).", field, error.code));
                failure.add(field.to_string(), message);
            }
        }
        failure
    }
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A storage fault during a multi-statement write. The transaction has
    /// been rolled back and the caller may resubmit.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(ValidationFailure::field(field, message))
    }

    /// Collapse infrastructure faults raised inside a transaction into
    /// `Transient`. Domain errors pass through untouched.
    pub fn into_transient(self) -> Self {
        match self {
            AppError::Database(e) => AppError::Transient(e.to_string()),
            AppError::Pool(e) => AppError::Transient(e.to_string()),
            AppError::Io(e) => AppError::Transient(e.to_string()),
            AppError::Internal(msg) => AppError::Transient(msg),
            other => other,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(failure) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "message": failure.first_message(),
                    "errors": failure.errors,
                }),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "message": "Not found" })),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                json!({ "message": "This action is unauthorized." }),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "message": "Unauthenticated." }),
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "message": msg })),
            AppError::Multipart(e) => {
                tracing::warn!("Multipart error: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    json!({ "message": "Malformed multipart body" }),
                )
            }
            AppError::Transient(msg) => {
                tracing::error!("Transaction rolled back: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "message": "Something went wrong try again." }),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                internal_error()
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                internal_error()
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                internal_error()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                internal_error()
            }
        };

        (status, Json(body)).into_response()
    }
}

fn internal_error() -> (StatusCode, serde_json::Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "message": "Internal server error" }),
    )
}

pub type AppResult<T> = Result<T, AppError>;
