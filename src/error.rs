use opentelemetry_semantic_conventions::{attribute::OTEL_STATUS_CODE, trace::ERROR_TYPE};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{Span, error, warn};

/// Why an authenticated caller was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub reason: String,
    pub required_permission: Option<String>,
    pub current_permissions: Vec<String>,
}

impl Denial {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            required_permission: None,
            current_permissions: Vec::new(),
        }
    }

    pub fn missing_permission(required: &str, current: Vec<String>) -> Self {
        Self {
            reason: format!("Missing permission '{}'", required),
            required_permission: Some(required.to_string()),
            current_permissions: current,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication error: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {}", .0.reason)]
    Forbidden(Denial),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid {field} '{value}'. Valid values: {}", .valid.join(", "))]
    InvalidReference {
        field: &'static str,
        value: String,
        valid: Vec<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        AppError::Forbidden(Denial::new(reason))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "internal_error",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidReference { .. } => "invalid_reference",
        }
    }

    pub fn log_and_record(&self, ctx: &str) {
        let current_span = Span::current();
        let message = self.to_string();

        match self {
            AppError::Database(err) => {
                error!(error = %message, context = %ctx, db_error = %err, "Database error")
            }
            AppError::Internal(msg) => {
                error!(message = %msg, context = %ctx, "Internal server error")
            }
            _ => warn!(message = %message, kind = self.kind(), context = %ctx, "Request failed"),
        }

        if !current_span.is_none() {
            current_span.record("error", tracing::field::display(true));
            current_span.record(ERROR_TYPE, tracing::field::display(self.kind()));
            current_span.record("error.message", tracing::field::display(&message));

            if matches!(self, AppError::Database(_) | AppError::Internal(_)) {
                current_span.record(OTEL_STATUS_CODE, tracing::field::display("ERROR"));
            }
        }
    }

    pub fn status_code(&self) -> Status {
        match self {
            AppError::Database(_) => Status::InternalServerError,
            AppError::Unauthenticated(_) => Status::Unauthorized,
            AppError::Forbidden(_) => Status::Forbidden,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Validation(_) => Status::BadRequest,
            AppError::Conflict(_) => Status::Conflict,
            AppError::InvalidReference { .. } => Status::BadRequest,
            AppError::Internal(_) => Status::InternalServerError,
        }
    }

    /// JSON body sent to the client. Storage details never leave the process.
    pub fn body(&self) -> Value {
        let message = match self {
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::Unauthenticated(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::Forbidden(denial) => denial.reason.clone(),
            AppError::InvalidReference { .. } => self.to_string(),
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message,
        });

        match self {
            AppError::Forbidden(denial) => {
                if let Some(required) = &denial.required_permission {
                    body["required_permission"] = json!(required);
                    body["current_permissions"] = json!(denial.current_permissions);
                }
            }
            AppError::InvalidReference { field, valid, .. } => {
                body["field"] = json!(field);
                body["valid_values"] = json!(valid);
            }
            _ => {}
        }

        body
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        self.log_and_record(&format!("Request to {} {}", req.method(), req.uri()));
        Custom(self.status_code(), Json(self.body())).respond_to(req)
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(error: bcrypt::BcryptError) -> Self {
        AppError::Internal(format!("Cryptography error: {}", error))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        AppError::Internal(format!("Token signing error: {}", error))
    }
}

/// True when the storage layer rejected a write on a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
