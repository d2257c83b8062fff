//! Standardized error types following the `error-authd-<domain>-<number>` format.

use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE};
use serde_json::json;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-authd-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when PORT cannot be parsed
    #[error("error-authd-config-2 Parsing PORT into u16 failed: {0:?}")]
    PortParsingFailed(std::num::ParseIntError),

    /// Error when version information is not available
    #[error("error-authd-config-3 One of GIT_HASH or CARGO_PKG_VERSION must be set")]
    VersionNotSet,

    /// Error when duration string cannot be parsed
    #[error("error-authd-config-4 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-authd-config-5 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a URL setting cannot be parsed
    #[error("error-authd-config-6 Invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
}

/// OAuth 2.0 / OpenID Connect protocol errors.
///
/// Each variant corresponds to one standard `error` code on the wire.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Unknown or inactive client, or a confidential client secret mismatch
    #[error("error-authd-oauth-1 Invalid client: {0}")]
    InvalidClient(String),

    /// Unknown, expired, wrong-type or already used grant
    #[error("error-authd-oauth-2 Invalid grant: {0}")]
    InvalidGrant(String),

    /// Unsupported grant type
    #[error("error-authd-oauth-3 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Malformed request
    #[error("error-authd-oauth-4 Invalid request: {0}")]
    InvalidRequest(String),

    /// Unsupported response type
    #[error("error-authd-oauth-5 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// No authenticated principal is available
    #[error("error-authd-oauth-6 Login required: {0}")]
    LoginRequired(String),

    /// Bearer token could not be verified
    #[error("error-authd-oauth-7 Invalid token: {0}")]
    InvalidToken(String),

    /// Internal invariant violated or a dependency failed
    #[error("error-authd-oauth-8 Server error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// The standard OAuth 2.0 error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::UnsupportedResponseType(_) => "unsupported_response_type",
            OAuthError::LoginRequired(_) => "login_required",
            OAuthError::InvalidToken(_) => "invalid_token",
            OAuthError::ServerError(_) => "server_error",
        }
    }

    /// The HTTP status used when this error is returned directly to a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) | OAuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Human readable description without the internal error prefix.
    ///
    /// Server errors are reported generically; their detail is only logged.
    pub fn description(&self) -> &str {
        match self {
            OAuthError::InvalidClient(value)
            | OAuthError::InvalidGrant(value)
            | OAuthError::UnsupportedGrantType(value)
            | OAuthError::InvalidRequest(value)
            | OAuthError::UnsupportedResponseType(value)
            | OAuthError::LoginRequired(value)
            | OAuthError::InvalidToken(value) => value,
            OAuthError::ServerError(_) => "The server encountered an internal error",
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "oauth request failed");
        } else {
            tracing::debug!(error = %self, "oauth request rejected");
        }

        let body = Json(json!({
            "error": self.error_code(),
            "error_description": self.description(),
        }));

        let mut response = (status, body).into_response();
        if let OAuthError::InvalidToken(_) = self {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }
        response
    }
}

impl From<StorageError> for OAuthError {
    fn from(err: StorageError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

impl From<KeyError> for OAuthError {
    fn from(err: KeyError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

impl From<FormRejection> for OAuthError {
    fn from(rejection: FormRejection) -> Self {
        OAuthError::InvalidRequest(rejection.body_text())
    }
}

/// Signing key material errors
#[derive(Debug, Error)]
pub enum KeyError {
    /// RSA key generation failed
    #[error("error-authd-key-1 Key generation failed: {0}")]
    GenerationFailed(String),

    /// Stored JWK could not be turned back into an RSA key
    #[error("error-authd-key-2 Invalid key material for {0}: {1}")]
    InvalidKeyMaterial(String, String),

    /// JWT signing failed
    #[error("error-authd-key-3 Signing failed: {0}")]
    SigningFailed(String),

    /// JWT verification failed
    #[error("error-authd-key-4 Verification failed: {0}")]
    VerificationFailed(String),

    /// No key with the given kid is available for verification
    #[error("error-authd-key-5 Unknown key id: {0}")]
    UnknownKeyId(String),

    /// Key storage failed
    #[error("error-authd-key-6 Key storage failed: {0}")]
    Storage(#[from] StorageError),

    /// The active signing key cannot be given an expiry
    #[error("error-authd-key-7 Key {0} is active and cannot be expired")]
    ActiveKey(String),
}

/// Illegal transitions of the token state machine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenStateError {
    /// Only valid tokens can be redeemed
    #[error("error-authd-token-1 Token {0} cannot be redeemed from state {1}")]
    NotRedeemable(String, String),

    /// Only valid tokens can be revoked
    #[error("error-authd-token-2 Token {0} cannot be revoked from state {1}")]
    NotRevocable(String, String),
}

/// One-time token broker errors
#[derive(Debug, Error)]
pub enum OneTimeTokenError {
    /// Backing cache is unavailable
    #[error("error-authd-ott-1 Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Payload could not be encoded or decoded
    #[error("error-authd-ott-2 Payload serialization failed: {0}")]
    SerializationFailed(String),
}

impl From<OneTimeTokenError> for OAuthError {
    fn from(err: OneTimeTokenError) -> Self {
        OAuthError::ServerError(err.to_string())
    }
}

/// Database/storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when database connection fails
    #[error("error-authd-storage-1 Database connection failed: {0}")]
    ConnectionFailed(String),

    /// Error when query execution fails
    #[error("error-authd-storage-2 Query execution failed: {0}")]
    QueryFailed(String),

    /// Error when data serialization fails
    #[error("error-authd-storage-3 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when database operation fails
    #[error("error-authd-storage-4 Database error: {0}")]
    DatabaseError(String),

    /// Error when data validation fails
    #[error("error-authd-storage-5 Invalid data: {0}")]
    InvalidData(String),

    /// Error when requested resource is not found
    #[error("error-authd-storage-6 Not found: {0}")]
    NotFound(String),

    /// Error when a unique constraint would be violated
    #[error("error-authd-storage-7 Duplicate entry: {0}")]
    Duplicate(String),
}
