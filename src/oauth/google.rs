//! Google OAuth2 installed-app adapter.
//!
//! Minting runs the authorization-code flow with PKCE against a loopback
//! redirect bound to an ephemeral port. The consent URL is logged and opened
//! in a browser when one is available; the wait for the redirect is bounded
//! by the configured consent timeout. Refresh exchanges the stored refresh
//! token, and tokens without an expiry can be validated against the
//! tokeninfo endpoint once per process.

use super::callback::{wait_for_callback, CALLBACK_PATH};
use super::{record_from_response, ExchangeFailure, ProviderAdapter};
use crate::config::{CredentialsConfig, GoogleConfig};
use crate::credentials::{ClientSecretConfig, Provider, TokenRecord};
use crate::error::{BoardError, Result};
use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponseType};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenUrl,
};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct GoogleInteractive {
    client: BasicClient,
    http_client: reqwest::Client,
    tokeninfo_url: String,
    refresh_buffer_seconds: i64,
    consent_timeout: Duration,
    /// Fingerprints of access tokens the provider confirmed during this process.
    validated: RwLock<HashSet<String>>,
}

impl GoogleInteractive {
    pub fn new(
        secrets: &ClientSecretConfig,
        google: &GoogleConfig,
        credentials: &CredentialsConfig,
    ) -> Result<Self> {
        let auth_url = secrets.auth_uri.clone().unwrap_or_else(|| google.auth_url.clone());
        let token_url = secrets.token_uri.clone().unwrap_or_else(|| google.token_url.clone());

        let client = BasicClient::new(
            ClientId::new(secrets.client_id.clone()),
            secrets.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(auth_url)
                .map_err(|e| BoardError::Config(format!("Invalid Google auth URL: {}", e)))?,
            Some(
                TokenUrl::new(token_url)
                    .map_err(|e| BoardError::Config(format!("Invalid Google token URL: {}", e)))?,
            ),
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            http_client,
            tokeninfo_url: google.tokeninfo_url.clone(),
            refresh_buffer_seconds: credentials.refresh_buffer_seconds,
            consent_timeout: Duration::from_secs(credentials.consent_timeout_seconds),
            validated: RwLock::new(HashSet::new()),
        })
    }

    fn fingerprint(record: &TokenRecord) -> String {
        hex::encode(Sha256::digest(record.access_token().as_bytes()))
    }

    /// Client whose redirect points at the loopback listener.
    fn consent_client(&self, listener: &TcpListener) -> Result<BasicClient> {
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}{}", port, CALLBACK_PATH);
        debug!("Consent callback listening on port {}", port);

        let redirect = RedirectUrl::new(redirect_uri)
            .map_err(|e| BoardError::Internal(format!("Invalid redirect URL: {}", e)))?;
        Ok(self.client.clone().set_redirect_uri(redirect))
    }

    async fn run_consent(&self, scopes: &BTreeSet<String>) -> Result<TokenRecord> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let client = self.consent_client(&listener)?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        info!("Visit this URL to authorize Google access:\n{}", auth_url);
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Could not open a browser automatically: {}", e);
        }

        self.complete_consent(&client, &listener, &csrf_state, pkce_verifier)
            .await
    }

    /// Waits for the redirect within the consent timeout, checks the state
    /// and exchanges the code.
    async fn complete_consent(
        &self,
        client: &BasicClient,
        listener: &TcpListener,
        csrf_state: &CsrfToken,
        pkce_verifier: PkceCodeVerifier,
    ) -> Result<TokenRecord> {
        let (code, returned_state) =
            match tokio::time::timeout(self.consent_timeout, wait_for_callback(listener)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(BoardError::AuthorizationTimeout(self.consent_timeout.as_secs()))
                }
            };

        if returned_state != *csrf_state.secret() {
            return Err(BoardError::AuthorizationDenied(
                "state mismatch on consent redirect".to_string(),
            ));
        }

        debug!("Received authorization code, exchanging for tokens");
        let token = client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| BoardError::AuthExchange(ExchangeFailure::from_request_error(e).message))?;

        let record = record_from_response(&token, None)?;
        if record.refresh_token().is_none() {
            warn!("Google did not return a refresh token; the next expiry will need consent again");
        }
        Ok(record)
    }
}

#[async_trait]
impl ProviderAdapter for GoogleInteractive {
    fn provider(&self) -> Provider {
        Provider::GoogleInteractive
    }

    async fn mint_token(&self, scopes: &BTreeSet<String>) -> Result<TokenRecord> {
        info!("Starting Google consent flow for scopes: {:?}", scopes);
        self.run_consent(scopes).await
    }

    /// A record with an expiry is fresh until the refresh buffer. A record
    /// without one, whether or not it carries a refresh token, is only fresh
    /// after the provider confirmed it during this process.
    fn is_fresh(&self, record: &TokenRecord) -> bool {
        match record.expiry() {
            Some(_) => !record.is_expired(self.refresh_buffer_seconds),
            None => self.validated.read().contains(&Self::fingerprint(record)),
        }
    }

    async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let refresh_token = record.refresh_token().ok_or_else(|| {
            BoardError::RefreshDenied("record carries no refresh token".to_string())
        })?;

        let token = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                // invalid_grant: the refresh token is revoked or expired.
                let failure = ExchangeFailure::from_request_error(e);
                match failure.rejected {
                    Some(BasicErrorResponseType::InvalidGrant) => {
                        BoardError::RefreshDenied(failure.message)
                    }
                    _ => BoardError::AuthExchange(failure.message),
                }
            })?;

        info!("Refreshed Google access token");
        record_from_response(&token, Some(refresh_token))
    }

    async fn validate(&self, record: &TokenRecord) -> Result<bool> {
        let response = self
            .http_client
            .post(&self.tokeninfo_url)
            .form(&[("access_token", record.access_token())])
            .send()
            .await
            .map_err(|e| BoardError::Http(e.without_url()))?;

        let valid = response.status().is_success();
        if valid {
            self.validated.write().insert(Self::fingerprint(record));
        }
        debug!("Google tokeninfo validation result: {}", valid);
        Ok(valid)
    }
}
