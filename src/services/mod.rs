//! Service client factory.
//!
//! Wraps a bearer token from the [`TokenCacheManager`] into a small typed
//! HTTP client for one upstream API. The factory itself does not retry
//! credential acquisition; a credential failure comes back as
//! `ServiceUnavailable` carrying the underlying error.

use crate::config::{GoogleConfig, MicrosoftConfig};
use crate::credentials::{CredentialBinding, TokenCacheManager, TokenRecord};
use crate::error::{BoardError, Result};
use crate::utils::logging::sanitize;
use crate::utils::retry::{parse_retry_after, with_retry, AttemptFailure};
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

const MAX_MESSAGE_LEN: usize = 200;

/// Identifies an upstream API and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDescriptor {
    pub name: String,
    pub version: String,
    pub base_url: String,
}

impl ApiDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            base_url: base_url.into(),
        }
    }

    pub fn google_calendar(config: &GoogleConfig) -> Self {
        Self::new("calendar", "v3", config.calendar_api_base.clone())
    }

    pub fn microsoft_graph(config: &MicrosoftConfig) -> Self {
        Self::new("graph", "v1.0", config.graph_api_base.clone())
    }
}

impl fmt::Display for ApiDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Authenticated client for one API.
pub struct ServiceClient {
    descriptor: ApiDescriptor,
    http: reqwest::Client,
    access_token: Zeroizing<String>,
}

impl ServiceClient {
    pub(crate) fn new(descriptor: ApiDescriptor, http: reqwest::Client, record: &TokenRecord) -> Self {
        Self {
            descriptor,
            http,
            access_token: Zeroizing::new(record.access_token().to_string()),
        }
    }

    pub fn descriptor(&self) -> &ApiDescriptor {
        &self.descriptor
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.descriptor.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GETs `path` relative to the API base and decodes the JSON body.
    /// Throttling and transient server errors are retried with backoff.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path);
        let service = self.descriptor.name.as_str();

        let body = with_retry(service, || async {
            let response = self
                .http
                .get(&url)
                .bearer_auth(self.access_token.as_str())
                .query(query)
                .send()
                .await
                .map_err(|e| AttemptFailure::new(0, sanitize(&e.without_url().to_string())))?;

            let status = response.status();
            crate::metrics::record_upstream_call(service, status.as_u16());

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response
                .text()
                .await
                .map_err(|e| AttemptFailure::new(0, sanitize(&e.without_url().to_string())))?;

            if status.is_success() {
                Ok::<_, AttemptFailure>(text)
            } else {
                Err(AttemptFailure::new(status.as_u16(), text).with_retry_after(retry_after))
            }
        })
        .await
        .map_err(|failure| BoardError::Upstream {
            status: failure.status,
            message: upstream_message(&failure.body),
        })?;

        debug!("{} GET {} returned {} bytes", self.descriptor, path, body.len());
        Ok(serde_json::from_str(&body)?)
    }

    /// Same as [`get_json`](Self::get_json) for absolute URLs the API hands
    /// back, such as Graph's `@odata.nextLink`.
    pub async fn get_json_absolute<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let base = self.descriptor.base_url.trim_end_matches('/');
        match url.strip_prefix(base) {
            Some(path) => self.get_json(path, &[]).await,
            None => Err(BoardError::Upstream {
                status: 0,
                message: format!("refusing to follow link outside {}", self.descriptor.name),
            }),
        }
    }
}

/// Pulls `error.message` out of a Google or Graph error body; falls back to a
/// truncated, sanitized copy of the body.
fn upstream_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(str::to_string)
    });

    let message = from_json.unwrap_or_else(|| body.chars().take(MAX_MESSAGE_LEN).collect());
    sanitize(&message)
}

/// Builds authenticated clients from credential bindings.
#[derive(Clone)]
pub struct ServiceClientFactory {
    manager: TokenCacheManager,
    http: reqwest::Client,
}

impl ServiceClientFactory {
    pub fn new(manager: TokenCacheManager) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .use_rustls_tls()
            .build()?;
        Ok(Self { manager, http })
    }

    pub fn manager(&self) -> &TokenCacheManager {
        &self.manager
    }

    pub async fn build_client(
        &self,
        descriptor: &ApiDescriptor,
        binding: &CredentialBinding,
    ) -> Result<ServiceClient> {
        let record = self
            .manager
            .get_credential(binding)
            .await
            .map_err(|e| BoardError::ServiceUnavailable {
                service: descriptor.name.clone(),
                source: Box::new(e),
            })?;

        Ok(ServiceClient::new(descriptor.clone(), self.http.clone(), &record))
    }
}
