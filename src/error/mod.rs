// Error types for the homeboard dashboard backend

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stored token for '{0}' could not be decrypted")]
    VaultCorrupt(String),

    #[error("No stored token for '{0}'")]
    VaultAbsent(String),

    #[error("Authorization was not completed within {0} seconds")]
    AuthorizationTimeout(u64),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Refresh token rejected: {0}")]
    RefreshDenied(String),

    #[error("Token exchange failed: {0}")]
    AuthExchange(String),

    #[error("Service '{service}' unavailable: {source}")]
    ServiceUnavailable {
        service: String,
        #[source]
        source: Box<BoardError>,
    },

    #[error("Upstream API error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Stable, machine-readable identifier for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            BoardError::Config(_) | BoardError::ConfigParsing(_) => "config_error",
            BoardError::VaultCorrupt(_) => "vault_corrupt",
            BoardError::VaultAbsent(_) => "vault_absent",
            BoardError::AuthorizationTimeout(_) => "authorization_timeout",
            BoardError::AuthorizationDenied(_) => "authorization_denied",
            BoardError::RefreshDenied(_) => "refresh_denied",
            BoardError::AuthExchange(_) => "auth_exchange_error",
            BoardError::ServiceUnavailable { .. } => "service_unavailable",
            BoardError::Upstream { .. } | BoardError::Http(_) => "upstream_error",
            BoardError::Io(_) | BoardError::Json(_) | BoardError::Internal(_) => "internal_error",
        }
    }

    /// Human-readable remediation hint shown next to the error.
    pub fn hint(&self) -> &'static str {
        match self {
            BoardError::Config(_) | BoardError::ConfigParsing(_) => {
                "Check the encryption key and provider credential environment variables."
            }
            BoardError::VaultCorrupt(_) | BoardError::VaultAbsent(_) => {
                "The stored token will be replaced on the next authorization."
            }
            BoardError::AuthorizationTimeout(_) => {
                "Restart with --login and complete the consent page in time."
            }
            BoardError::AuthorizationDenied(_) => {
                "Consent was refused; restart with --login to authorize again."
            }
            BoardError::RefreshDenied(_) => "The refresh token was revoked; re-authorization is required.",
            BoardError::AuthExchange(_) => {
                "The identity provider rejected the client credentials; verify client id, secret and tenant."
            }
            BoardError::ServiceUnavailable { source, .. } => source.hint(),
            BoardError::Upstream { .. } | BoardError::Http(_) => "The remote API failed; try again later.",
            BoardError::Io(_) | BoardError::Json(_) | BoardError::Internal(_) => {
                "Check the server logs for details."
            }
        }
    }

    /// True for states the token cache manager recovers from by escalating
    /// to the next acquisition strategy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BoardError::VaultAbsent(_) | BoardError::VaultCorrupt(_) | BoardError::RefreshDenied(_)
        )
    }

    fn status(&self) -> StatusCode {
        match self {
            BoardError::AuthorizationTimeout(_)
            | BoardError::AuthorizationDenied(_)
            | BoardError::RefreshDenied(_) => StatusCode::UNAUTHORIZED,
            BoardError::AuthExchange(_) | BoardError::Upstream { .. } | BoardError::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            BoardError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Convert BoardError to HTTP responses for Axum
impl IntoResponse for BoardError {
    fn into_response(self) -> Response {
        let body = json!({
            "type": "error",
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "hint": self.hint(),
            }
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
