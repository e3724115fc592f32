use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use sea_orm::{DbErr, SqlErr};
use serde_json::json;
use thiserror::Error;

/// Startup failures surfaced from `main`.
#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("Database error: {0}")]
    #[diagnostic(
        code(tokenward::db),
        help("Check `database.url` and that the database is reachable")
    )]
    Db(#[from] DbErr),
}

/// Failures raised by a token store adapter. Carries no policy.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Record conflicts with an existing row: {0}")]
    #[diagnostic(code(tokenward::store::conflict))]
    Conflict(String),

    /// The record points at a row that does not exist, such as an unknown user.
    #[error("Record references a missing row: {0}")]
    #[diagnostic(code(tokenward::store::missing_reference))]
    MissingReference(String),

    #[error("Token store unavailable: {0}")]
    #[diagnostic(
        code(tokenward::store::unavailable),
        help("Check database connectivity; the caller may retry")
    )]
    Unavailable(String),
}

impl From<DbErr> for StoreError {
    fn from(value: DbErr) -> Self {
        match value.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => StoreError::Conflict(detail),
            Some(SqlErr::ForeignKeyConstraintViolation(detail)) => {
                StoreError::MissingReference(detail)
            }
            _ => StoreError::Unavailable(value.to_string()),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum TokenError {
    #[error("Failed to generate refresh token: {0}")]
    #[diagnostic(code(tokenward::token::generation))]
    Generation(String),

    #[error("Refresh token not found")]
    #[diagnostic(code(tokenward::token::not_found))]
    NotFound,

    #[error("Refresh token expired or revoked")]
    #[diagnostic(code(tokenward::token::expired_or_revoked))]
    ExpiredOrRevoked,

    #[error("Refresh token owner does not exist")]
    #[diagnostic(code(tokenward::token::unknown_user))]
    UnknownUser,

    #[error("Token store unavailable: {0}")]
    #[diagnostic(code(tokenward::token::store_unavailable))]
    StoreUnavailable(String),
}

impl TokenError {
    /// True for outcomes that mean "bad credential" rather than infrastructure failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TokenError::NotFound | TokenError::ExpiredOrRevoked | TokenError::UnknownUser
        )
    }
}

impl From<StoreError> for TokenError {
    fn from(value: StoreError) -> Self {
        match value {
            // A digest collision on insert is a generation failure, never a logical error
            StoreError::Conflict(detail) => {
                TokenError::Generation(format!("token hash collision: {detail}"))
            }
            StoreError::MissingReference(_) => TokenError::UnknownUser,
            StoreError::Unavailable(detail) => TokenError::StoreUnavailable(detail),
        }
    }
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        match self {
            TokenError::NotFound | TokenError::ExpiredOrRevoked | TokenError::UnknownUser => {
                unauthorized()
            }
            TokenError::StoreUnavailable(_) => service_unavailable(),
            TokenError::Generation(_) => server_error(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum IdentityError {
    #[error("User not found")]
    #[diagnostic(code(tokenward::identity::user_not_found))]
    UserNotFound,

    #[error("User account is disabled")]
    #[diagnostic(code(tokenward::identity::disabled))]
    Disabled,

    #[error("Identity store unavailable: {0}")]
    #[diagnostic(code(tokenward::identity::store_unavailable))]
    StoreUnavailable(String),
}

impl From<DbErr> for IdentityError {
    fn from(value: DbErr) -> Self {
        IdentityError::StoreUnavailable(value.to_string())
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        match self {
            IdentityError::UserNotFound | IdentityError::Disabled => unauthorized(),
            IdentityError::StoreUnavailable(_) => service_unavailable(),
        }
    }
}

/// The single rejection body for every credential failure.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

pub fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "temporarily_unavailable" })),
    )
        .into_response()
}

pub fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "server_error" })),
    )
        .into_response()
}
