// Provider flow adapters
//
// One adapter per identity provider. The token cache manager only talks to
// the `ProviderAdapter` trait; provider-specific exchanges stay in here.

mod callback;
mod google;
mod microsoft;

pub use google::GoogleInteractive;
pub use microsoft::MicrosoftClientCredentials;

use crate::credentials::{Provider, TokenRecord};
use crate::error::Result;
use crate::utils::logging::sanitize;
use async_trait::async_trait;
use chrono::Utc;
use oauth2::basic::{BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{RequestTokenError, TokenResponse};
use std::collections::BTreeSet;

/// Capability set shared by every identity provider.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Obtains a brand-new token through a full authorization exchange.
    async fn mint_token(&self, scopes: &BTreeSet<String>) -> Result<TokenRecord>;

    /// Adapter-level freshness of a record. Performs no I/O.
    fn is_fresh(&self, record: &TokenRecord) -> bool;

    /// Exchanges the record's refresh token for a new access token.
    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord>;

    /// Whether `refresh` uses a refresh token. Adapters returning false
    /// re-mint instead, and rely on cache-level expiry tracking.
    fn supports_refresh(&self) -> bool {
        true
    }

    /// Asks the provider whether a record without a known expiry is still
    /// accepted. A positive answer must make `is_fresh` true for the record.
    async fn validate(&self, _record: &TokenRecord) -> Result<bool> {
        Ok(false)
    }
}

/// Token endpoint failure, reduced to what is safe to surface.
pub(crate) struct ExchangeFailure {
    /// The provider's error code when the endpoint answered with an error body.
    pub rejected: Option<BasicErrorResponseType>,
    pub message: String,
}

impl ExchangeFailure {
    pub(crate) fn from_request_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> Self
    where
        RE: std::error::Error + 'static,
    {
        match err {
            RequestTokenError::ServerResponse(response) => {
                let code = response.error().to_string();
                let message = match response.error_description() {
                    Some(description) => format!("{}: {}", code, description),
                    None => code,
                };
                Self {
                    rejected: Some(response.error().clone()),
                    message: sanitize(&message),
                }
            }
            RequestTokenError::Request(e) => Self {
                rejected: None,
                message: sanitize(&format!("token endpoint unreachable: {}", e)),
            },
            RequestTokenError::Parse(e, body) => Self {
                rejected: None,
                message: match provider_error_text(&body) {
                    Some(text) => sanitize(&text),
                    None => format!("unexpected token response: {}", e),
                },
            },
            RequestTokenError::Other(message) => Self {
                rejected: None,
                message: sanitize(&message),
            },
        }
    }
}

/// `error` and `error_description` from a token endpoint body that did not
/// parse as a token response.
fn provider_error_text(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let code = value.get("error").and_then(serde_json::Value::as_str);
    let description = value.get("error_description").and_then(serde_json::Value::as_str);

    match (code, description) {
        (Some(code), Some(description)) => Some(format!("{}: {}", code, description)),
        (Some(text), None) | (None, Some(text)) => Some(text.to_string()),
        (None, None) => None,
    }
}

/// Builds a record from a token endpoint response. Secret fields are kept
/// out of the raw payload copy; the record carries them explicitly.
pub(crate) fn record_from_response(
    token: &BasicTokenResponse,
    fallback_refresh_token: Option<&str>,
) -> Result<TokenRecord> {
    let mut raw = serde_json::to_value(token)?;
    if let Some(fields) = raw.as_object_mut() {
        for secret in ["access_token", "refresh_token", "id_token"] {
            fields.remove(secret);
        }
    }

    let expiry = token
        .expires_in()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .map(|d| Utc::now() + d);

    let refresh_token = token
        .refresh_token()
        .map(|t| t.secret().clone())
        .or_else(|| fallback_refresh_token.map(str::to_string));

    TokenRecord::new(token.access_token().secret().clone(), refresh_token, expiry, raw)
}
