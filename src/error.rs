//! Error handler for callboard.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::{Error as SQLxError, postgres::PgDatabaseError};
use thiserror::Error;
use validator::ValidationErrors;

use crate::account::Role;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    /// Uniqueness or role collision on an existing account.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials, bad or expired OTP/token.
    #[error("{0}")]
    Auth(String),

    /// Valid credentials used against the wrong role endpoint.
    #[error("only {0}s are allowed to sign in here")]
    RoleScope(Role),

    #[error("{0}")]
    NotFound(String),

    /// Outbound collaborator (mail broker, identity provider) failed.
    #[error("dependency failed: {details}")]
    Dependency {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Generic sign-in failure. Never reveals which field was wrong.
    pub fn invalid_credentials() -> Self {
        Self::Auth("invalid credentials".into())
    }

    pub fn dependency<E>(details: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Dependency {
            details: details.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Response envelope for failed requests.
///
/// Every error response carries at least `message`; field-level issues
/// from `validator` are listed under `errors`.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
    #[serde(skip)]
    status: StatusCode,
}

impl ResponseError {
    /// Update error status code.
    fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Update `message` field.
    fn message(mut self, message: &str) -> Self {
        self.message = message.into();
        self
    }

    /// Automatically add `errors` field.
    fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            message: "internal server error".to_owned(),
            errors: None,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

/// Whether a sqlx error is a unique index violation.
///
/// The unique indexes on `email` and `mobile_number` are the backstop
/// against concurrent duplicate registrations; a violation surfaces to
/// the caller exactly like the check-then-act conflict path.
pub fn is_unique_violation(err: &SQLxError) -> bool {
    err.as_database_error()
        .and_then(|e| e.try_downcast_ref::<PgDatabaseError>())
        .is_some_and(|e| e.code() == UNIQUE_VIOLATION)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .message(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Sql(err) if is_unique_violation(err) => response
                .message("an account with this email or mobile number already exists"),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "sql request failed");
                ResponseError::default()
            },

            ServerError::RoleScope(_) => {
                response.status(StatusCode::FORBIDDEN)
            },

            ServerError::Dependency { details, source } => {
                tracing::error!(err = ?source, %details, "dependency failed");
                ResponseError::default()
                    .message("a required service is unavailable, please retry later")
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");
                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "message": "internal server error",
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("internal server error".into()))
}
