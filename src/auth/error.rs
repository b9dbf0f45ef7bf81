//! Error taxonomy for the authentication and authorization pipeline.

use std::fmt;

use http::StatusCode;

/// Errors raised while authenticating or authorizing a request.
///
/// Token and identity internals are carried for logging only; the HTTP layer
/// replaces them with [`AuthError::public_message`] before responding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// `Authorization` header present but not `Bearer <token>`
    MalformedHeader,
    /// Bad structure, signature, algorithm or expiry, or undecodable claims
    InvalidToken(String),
    /// Valid identity with an insufficient role or unverified email,
    /// or a guard used without the authenticated stage before it
    Unauthorized,
    /// The directory timed out or failed while resolving the identity
    DirectoryUnavailable(String),
    /// No such identity
    NotFound,
    /// Explicit permission denial (e.g. caller does not own the resource)
    Forbidden,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader => {
                write!(f, "Authorization header format must be Bearer {{token}}")
            }
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::DirectoryUnavailable(msg) => write!(f, "Directory unavailable: {}", msg),
            Self::NotFound => write!(f, "Identity not found"),
            Self::Forbidden => write!(f, "Forbidden"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Result type for auth pipeline operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// HTTP status class for this failure.
    ///
    /// Every authentication or authorization failure maps to 401, including
    /// insufficient roles. Directory outages are reported as 503.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedHeader | Self::InvalidToken(_) | Self::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            Self::DirectoryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedHeader | Self::InvalidToken(_) => "invalid_token",
            Self::Unauthorized => "unauthorized",
            Self::DirectoryUnavailable(_) => "directory_unavailable",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
        }
    }

    /// Generic message that is safe to return to callers.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MalformedHeader | Self::InvalidToken(_) => "The provided token is invalid",
            Self::Unauthorized => "You are not authorized to access this resource",
            Self::DirectoryUnavailable(_) => "The identity directory is currently unavailable",
            Self::NotFound => "The requested user does not exist",
            Self::Forbidden => "Access to this resource is forbidden",
        }
    }
}
