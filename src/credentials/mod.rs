//! Credential lifecycle: bindings, token records, secrets, vault and cache.
//!
//! A [`CredentialBinding`] names one logical credential (provider, scope set,
//! vault identity). The [`TokenCacheManager`] turns a binding into a valid
//! [`TokenRecord`], consulting its in-memory cache, the encrypted [`Vault`],
//! and finally the provider adapters in `crate::oauth`.

mod manager;
mod secrets;
mod vault;

pub use manager::{TokenCacheManager, TokenStatus};
pub use secrets::{ClientSecretConfig, EncryptionKey, SecretStore};
pub use vault::{Vault, VaultRead};

use crate::error::{BoardError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use zeroize::Zeroize;

/// Token identities double as vault file stems, so they are restricted to
/// `[A-Za-z0-9_.-]` and may not start with a dot.
pub(crate) fn validate_identity(token_identity: &str) -> Result<()> {
    let valid = !token_identity.is_empty()
        && !token_identity.starts_with('.')
        && token_identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(BoardError::Config(format!(
            "Invalid token identity '{}': use letters, digits, '_', '-' or '.'",
            token_identity
        )))
    }
}

/// Identity provider a binding is minted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Google OAuth2 installed-app flow with a local redirect.
    GoogleInteractive,
    /// Microsoft identity platform client-credentials flow.
    MicrosoftClientCredentials,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleInteractive => "google",
            Provider::MicrosoftClientCredentials => "microsoft",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable key identifying one credential's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialBinding {
    provider: Provider,
    scopes: BTreeSet<String>,
    token_identity: String,
}

impl CredentialBinding {
    /// Creates a binding; fails with a config error on an unusable identity.
    pub fn new<I, S>(provider: Provider, scopes: I, token_identity: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let token_identity = token_identity.into();
        validate_identity(&token_identity)?;

        Ok(Self {
            provider,
            scopes: scopes.into_iter().map(Into::into).collect(),
            token_identity,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn token_identity(&self) -> &str {
        &self.token_identity
    }
}

impl fmt::Display for CredentialBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.token_identity)
    }
}

/// The persisted unit of a credential.
///
/// Records are only ever replaced as a whole; there is no partial update.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    raw_provider_payload: serde_json::Value,
}

impl TokenRecord {
    /// Builds a record, rejecting an empty access token.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expiry: Option<DateTime<Utc>>,
        raw_provider_payload: serde_json::Value,
    ) -> Result<Self> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(BoardError::AuthExchange(
                "provider response carried an empty access_token".to_string(),
            ));
        }

        Ok(Self {
            access_token,
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expiry,
            raw_provider_payload,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn raw_provider_payload(&self) -> &serde_json::Value {
        &self.raw_provider_payload
    }

    /// True when the record has an expiry that falls within `buffer_seconds` of now.
    /// Records without an expiry are never reported as expired here.
    pub fn is_expired(&self, buffer_seconds: i64) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(buffer_seconds) <= Utc::now(),
            None => false,
        }
    }

    /// Seconds until expiry, if known.
    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.expiry.map(|expiry| (expiry - Utc::now()).num_seconds())
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl Drop for TokenRecord {
    fn drop(&mut self) {
        self.access_token.zeroize();
        if let Some(token) = self.refresh_token.as_mut() {
            token.zeroize();
        }
    }
}

// Custom Debug impl that never logs tokens
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .field("raw_provider_payload", &"[REDACTED]")
            .finish()
    }
}
