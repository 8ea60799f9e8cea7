// Secret store: vault key and provider application identities from the environment

use super::Provider;
use crate::config::CredentialsConfig;
use crate::error::{BoardError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the vault key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Symmetric key protecting the token vault.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Decodes a base64 key (URL-safe, unpadded URL-safe or standard alphabet).
    /// A Fernet key is accepted since it is URL-safe base64 of 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let mut bytes = URL_SAFE
            .decode(encoded)
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
            .or_else(|_| STANDARD.decode(encoded))
            .map_err(|_| BoardError::Config("Vault key is not valid base64".to_string()))?;

        if bytes.len() != KEY_SIZE {
            let len = bytes.len();
            bytes.zeroize();
            return Err(BoardError::Config(format!(
                "Vault key must be {} bytes (256 bits), got {} bytes",
                KEY_SIZE, len
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        bytes.zeroize();
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Provider application identity, read once at startup.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ClientSecretConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Tenant id or full authority URL (Microsoft only).
    pub tenant_or_authority: Option<String>,
    /// Default scopes used when a binding names none.
    pub scopes: Vec<String>,
    /// Authorization endpoint override from a downloaded Google client file.
    pub auth_uri: Option<String>,
    /// Token endpoint override from a downloaded Google client file.
    pub token_uri: Option<String>,
}

impl fmt::Debug for ClientSecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("tenant_or_authority", &self.tenant_or_authority)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[derive(Deserialize)]
struct RawClientSecret {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    authority: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Read-only view over the variables holding the vault key and client secrets.
pub struct SecretStore {
    key_var: String,
    google_var: String,
    microsoft_var: String,
    lookup: Lookup,
}

impl SecretStore {
    /// Reads variables from the process environment on each call.
    pub fn from_env(config: &CredentialsConfig) -> Self {
        Self::with_lookup(config, Box::new(|name| std::env::var(name).ok()))
    }

    /// Builds a store over explicit name/value pairs.
    pub fn from_pairs<I, K, V>(config: &CredentialsConfig, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_lookup(config, Box::new(move |name| values.get(name).cloned()))
    }

    fn with_lookup(config: &CredentialsConfig, lookup: Lookup) -> Self {
        Self {
            key_var: config.key_env.clone(),
            google_var: config.google_secret_env.clone(),
            microsoft_var: config.microsoft_secret_env.clone(),
            lookup,
        }
    }

    fn require(&self, name: &str) -> Result<String> {
        (self.lookup)(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| BoardError::Config(format!("Missing {} environment variable", name)))
    }

    pub fn get_encryption_key(&self) -> Result<EncryptionKey> {
        let mut encoded = self.require(&self.key_var)?;
        let key = EncryptionKey::from_base64(&encoded);
        encoded.zeroize();
        key
    }

    pub fn get_client_secret_config(&self, provider: Provider) -> Result<ClientSecretConfig> {
        let var = match provider {
            Provider::GoogleInteractive => &self.google_var,
            Provider::MicrosoftClientCredentials => &self.microsoft_var,
        };

        let mut payload = self.require(var)?;
        let parsed = parse_client_secret(provider, &payload)
            .map_err(|e| BoardError::Config(format!("{} is not usable: {}", var, e)));
        payload.zeroize();
        parsed
    }
}

fn parse_client_secret(provider: Provider, payload: &str) -> std::result::Result<ClientSecretConfig, String> {
    let mut value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| format!("invalid JSON at line {}, column {}", e.line(), e.column()))?;

    // Google's downloaded client files nest the identity under "installed" or "web".
    for wrapper in ["installed", "web"] {
        let inner = value.get_mut(wrapper).map(serde_json::Value::take);
        if let Some(inner) = inner {
            value = inner;
            break;
        }
    }

    let raw: RawClientSecret =
        serde_json::from_value(value).map_err(|e| format!("missing or malformed field: {}", e))?;

    if raw.client_id.trim().is_empty() {
        return Err("client_id is empty".to_string());
    }

    match provider {
        Provider::GoogleInteractive => Ok(ClientSecretConfig {
            client_id: raw.client_id,
            client_secret: raw.client_secret,
            tenant_or_authority: None,
            scopes: raw.scopes.unwrap_or_default(),
            auth_uri: raw.auth_uri,
            token_uri: raw.token_uri,
        }),
        Provider::MicrosoftClientCredentials => {
            let client_secret = raw
                .client_secret
                .filter(|s| !s.is_empty())
                .ok_or_else(|| "client_secret is required".to_string())?;
            let tenant_or_authority = raw
                .authority
                .or(raw.tenant_id)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| "tenant_id or authority is required".to_string())?;

            Ok(ClientSecretConfig {
                client_id: raw.client_id,
                client_secret: Some(client_secret),
                tenant_or_authority: Some(tenant_or_authority),
                scopes: raw
                    .scopes
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| vec![DEFAULT_GRAPH_SCOPE.to_string()]),
                auth_uri: None,
                token_uri: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: Vec<(&str, &str)>) -> SecretStore {
        SecretStore::from_pairs(&CredentialsConfig::default(), pairs)
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let result = store(vec![]).get_encryption_key();
        assert!(matches!(result, Err(BoardError::Config(_))));
    }

    #[test]
    fn test_fernet_style_key_accepted() {
        let key = URL_SAFE.encode([7u8; 32]);
        assert!(store(vec![("HOMEBOARD_TOKEN_KEY", key.as_str())]).get_encryption_key().is_ok());
    }

    #[test]
    fn test_short_key_rejected() {
        let key = STANDARD.encode([7u8; 16]);
        let result = store(vec![("HOMEBOARD_TOKEN_KEY", key.as_str())]).get_encryption_key();
        assert!(matches!(result, Err(BoardError::Config(_))));
    }

    #[test]
    fn test_google_installed_wrapper() {
        let json = r#"{"installed":{"client_id":"abc.apps.googleusercontent.com","client_secret":"s3cret","token_uri":"https://oauth2.googleapis.com/token"}}"#;
        let config = store(vec![("GOOGLE_CREDENTIALS_JSON", json)])
            .get_client_secret_config(Provider::GoogleInteractive)
            .unwrap();
        assert_eq!(config.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.token_uri.as_deref(), Some("https://oauth2.googleapis.com/token"));
    }

    #[test]
    fn test_microsoft_defaults_scope() {
        let json = r#"{"client_id":"cid","client_secret":"sec","tenant_id":"contoso"}"#;
        let config = store(vec![("ONEDRIVE_CREDENTIALS_JSON", json)])
            .get_client_secret_config(Provider::MicrosoftClientCredentials)
            .unwrap();
        assert_eq!(config.scopes, vec![DEFAULT_GRAPH_SCOPE.to_string()]);
        assert_eq!(config.tenant_or_authority.as_deref(), Some("contoso"));
    }

    #[test]
    fn test_microsoft_requires_tenant() {
        let json = r#"{"client_id":"cid","client_secret":"sec"}"#;
        let result = store(vec![("ONEDRIVE_CREDENTIALS_JSON", json)])
            .get_client_secret_config(Provider::MicrosoftClientCredentials);
        assert!(matches!(result, Err(BoardError::Config(_))));
    }

    #[test]
    fn test_malformed_json_does_not_echo_secret() {
        let json = r#"{"client_id":"cid","client_secret":"topsecret""#;
        let err = store(vec![("ONEDRIVE_CREDENTIALS_JSON", json)])
            .get_client_secret_config(Provider::MicrosoftClientCredentials)
            .unwrap_err();
        assert!(!err.to_string().contains("topsecret"));
    }

    #[test]
    fn test_debug_masks_client_secret() {
        let config = ClientSecretConfig {
            client_id: "cid".to_string(),
            client_secret: Some("hunter2".to_string()),
            tenant_or_authority: None,
            scopes: vec![],
            auth_uri: None,
            token_uri: None,
        };
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
