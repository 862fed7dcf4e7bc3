//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a request was turned away by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No `Authorization` header at all
    NotAuthenticated,
    /// Header present but no bearer token in it
    MissingToken,
    /// Valid signature, past expiry
    TokenExpired,
    /// Bad signature, malformed, or wrong token type
    InvalidToken,
    InsufficientRole,
    /// The resource being authorized against does not exist
    NotFound,
    LookupFailed,
}

/// API authentication errors, rendered as `{error}` JSON.
#[derive(Debug)]
pub struct ApiAuthError {
    kind: AuthErrorKind,
}

impl ApiAuthError {
    pub(crate) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> AuthErrorKind {
        self.kind
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::NotAuthenticated
            | AuthErrorKind::MissingToken
            | AuthErrorKind::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthErrorKind::InvalidToken | AuthErrorKind::InsufficientRole => StatusCode::FORBIDDEN,
            AuthErrorKind::NotFound => StatusCode::NOT_FOUND,
            AuthErrorKind::LookupFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::NotAuthenticated => "Unauthorized",
            AuthErrorKind::MissingToken => "Missing token",
            AuthErrorKind::TokenExpired => "Token expired",
            AuthErrorKind::InvalidToken => "Invalid token",
            AuthErrorKind::InsufficientRole => "Insufficient permissions",
            AuthErrorKind::NotFound => "Not found",
            AuthErrorKind::LookupFailed => "Database error",
        }
    }
}

impl From<AuthErrorKind> for ApiAuthError {
    fn from(kind: AuthErrorKind) -> Self {
        Self::new(kind)
    }
}

impl std::fmt::Display for ApiAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}
