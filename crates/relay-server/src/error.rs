use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use relay_auth::TokenError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not authenticated. Open /auth/device to connect a GitHub account.")]
    NotAuthenticated,

    #[error("Stored GitHub credential was rejected. Re-authenticate via /auth/device.")]
    InvalidCredential,

    #[error("Failed to refresh the Copilot API token (HTTP {0})")]
    TokenRefreshFailed(u16),

    #[error("Path '{0}' is not allowed")]
    PathNotAllowed(String),

    #[error("Upstream request failed")]
    UpstreamTransport,

    #[error("Bundle generation failed")]
    BundleGeneration,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct JsonError {
    message: String,
    r#type: String,
}

#[derive(Serialize)]
struct JsonErrorWrapper {
    error: JsonError,
}

impl AppError {
    fn error_type(&self) -> &'static str {
        match self {
            AppError::NotAuthenticated | AppError::InvalidCredential => "authentication_error",
            AppError::PathNotAllowed(_) => "permission_error",
            AppError::TokenRefreshFailed(_) | AppError::UpstreamTransport => "upstream_error",
            AppError::BadRequest(_) => "invalid_request_error",
            AppError::BundleGeneration => "api_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AppError::TokenRefreshFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::PathNotAllowed(_) => StatusCode::FORBIDDEN,
            AppError::UpstreamTransport => StatusCode::BAD_GATEWAY,
            AppError::BundleGeneration => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_response = JsonErrorWrapper {
            error: JsonError {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
            },
        };
        HttpResponse::build(self.status_code()).json(error_response)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotAuthenticated => AppError::NotAuthenticated,
            TokenError::InvalidCredential => AppError::InvalidCredential,
            TokenError::RefreshFailed { status } => AppError::TokenRefreshFailed(status),
            TokenError::Transport | TokenError::MalformedResponse => AppError::UpstreamTransport,
        }
    }
}
