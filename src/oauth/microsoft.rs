// Microsoft identity platform client-credentials adapter

use super::{record_from_response, ExchangeFailure, ProviderAdapter};
use crate::config::MicrosoftConfig;
use crate::credentials::{ClientSecretConfig, Provider, TokenRecord};
use crate::error::{BoardError, Result};
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthType, AuthUrl, ClientId, ClientSecret, Scope, TokenUrl};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Application-only access against Microsoft Graph.
///
/// There is no refresh token in this flow, so every acquisition is a fresh
/// mint. Expiry tracking for reuse happens in the token cache.
pub struct MicrosoftClientCredentials {
    client: BasicClient,
    default_scopes: BTreeSet<String>,
    authority: String,
}

impl MicrosoftClientCredentials {
    pub fn new(secrets: &ClientSecretConfig, microsoft: &MicrosoftConfig) -> Result<Self> {
        let tenant_or_authority = secrets.tenant_or_authority.as_deref().ok_or_else(|| {
            BoardError::Config("Microsoft application is missing tenant_id or authority".to_string())
        })?;
        let authority = resolve_authority(&microsoft.authority_host, tenant_or_authority);

        let client = BasicClient::new(
            ClientId::new(secrets.client_id.clone()),
            secrets.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(format!("{}/oauth2/v2.0/authorize", authority))
                .map_err(|e| BoardError::Config(format!("Invalid Microsoft authority: {}", e)))?,
            Some(
                TokenUrl::new(format!("{}/oauth2/v2.0/token", authority))
                    .map_err(|e| BoardError::Config(format!("Invalid Microsoft authority: {}", e)))?,
            ),
        )
        .set_auth_type(AuthType::RequestBody);

        Ok(Self {
            client,
            default_scopes: secrets.scopes.iter().cloned().collect(),
            authority,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

/// A value that already looks like a URL is used as the full authority;
/// anything else is treated as a tenant id under the configured host.
fn resolve_authority(host: &str, tenant_or_authority: &str) -> String {
    let value = tenant_or_authority.trim().trim_end_matches('/');
    if value.starts_with("https://") || value.starts_with("http://") {
        value.to_string()
    } else {
        format!("{}/{}", host.trim_end_matches('/'), value)
    }
}

#[async_trait]
impl ProviderAdapter for MicrosoftClientCredentials {
    fn provider(&self) -> Provider {
        Provider::MicrosoftClientCredentials
    }

    async fn mint_token(&self, scopes: &BTreeSet<String>) -> Result<TokenRecord> {
        let scopes = if scopes.is_empty() { &self.default_scopes } else { scopes };
        debug!("Requesting client-credentials token from {}", self.authority);

        let token = self
            .client
            .exchange_client_credentials()
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .request_async(async_http_client)
            .await
            .map_err(|e| BoardError::AuthExchange(ExchangeFailure::from_request_error(e).message))?;

        info!("Acquired Microsoft Graph application token");
        record_from_response(&token, None)
    }

    /// Records are never reused on adapter judgement alone.
    fn is_fresh(&self, _record: &TokenRecord) -> bool {
        false
    }

    async fn refresh(&self, _record: &TokenRecord) -> Result<TokenRecord> {
        self.mint_token(&self.default_scopes).await
    }

    fn supports_refresh(&self) -> bool {
        false
    }
}
