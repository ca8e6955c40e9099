//! OAuth 2.0 error types for the token-exchange surface.
//!
//! Implements OAuth 2.0 error responses as defined in RFC 6749, extended
//! with the `request_unauthorized` kind used when a subject token cannot be
//! resolved.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the token-exchange handler.
///
/// Each error maps to an OAuth 2.0 error code and HTTP status, and carries a
/// hint for the `error_description` field of the response.
#[derive(Debug, Error)]
pub enum OauthError {
    /// This handler is not responsible for the request; the surrounding
    /// framework should try its other token-endpoint handlers.
    #[error("invalid_request: The handler is not responsible for this request.")]
    UnknownRequest,

    /// The request is missing a parameter or carries an unsupported value.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// The presented grant is invalid or was issued to another client.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// The authenticated client is not allowed to use this grant type.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// The original grant does not permit this exchange.
    #[error("access_denied: {0}")]
    AccessDenied(String),

    /// The subject token could not be resolved or validated.
    #[error("request_unauthorized: {0}")]
    RequestUnauthorized(String),

    /// An internal invariant was violated.
    #[error("server_error: {0}")]
    ServerError(String),
}

impl OauthError {
    /// Returns the OAuth 2.0 error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownRequest | Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::AccessDenied(_) => "access_denied",
            Self::RequestUnauthorized(_) => "request_unauthorized",
            Self::ServerError(_) => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::UnknownRequest
            | Self::InvalidRequest(_)
            | Self::InvalidGrant(_)
            | Self::UnauthorizedClient(_) => 400,
            Self::RequestUnauthorized(_) => 401,
            Self::AccessDenied(_) => 403,
            Self::ServerError(_) => 500,
        }
    }

    /// Returns the hint carried by this error.
    #[must_use]
    pub fn hint(&self) -> &str {
        match self {
            Self::UnknownRequest => "The handler is not responsible for this request.",
            Self::InvalidRequest(hint)
            | Self::InvalidGrant(hint)
            | Self::UnauthorizedClient(hint)
            | Self::AccessDenied(hint)
            | Self::RequestUnauthorized(hint)
            | Self::ServerError(hint) => hint,
        }
    }

    /// Creates an error response for the token endpoint.
    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: Some(self.hint().to_string()),
            error_uri: None,
        }
    }
}

/// OAuth 2.0 error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,

    /// Human-readable error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// URI with more information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

/// Result type for token-exchange operations.
pub type OauthResult<T> = Result<T, OauthError>;
