// Configuration module

mod models;

pub use models::*;

use crate::credentials::{CredentialBinding, Provider};
use crate::error::{BoardError, Result};
use config::{Config, Environment, File};
use std::path::PathBuf;

impl BindingConfig {
    /// Turns the configured binding into a credential binding for `provider`.
    /// An empty scope list falls back to `default_scopes`.
    pub fn bind(&self, provider: Provider, default_scopes: &[String]) -> Result<CredentialBinding> {
        let scopes: &[String] = if self.scopes.is_empty() {
            default_scopes
        } else {
            &self.scopes
        };
        CredentialBinding::new(provider, scopes.iter().cloned(), self.token_identity.clone())
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest, prefix `HOMEBOARD__`)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(str::to_string)
            .unwrap_or_else(Self::default_config_path);

        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::with_name(&path).required(config_path.is_some()))
            .add_source(
                Environment::with_prefix("HOMEBOARD")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bindings.calendar.scopes")
                    .with_list_parse_key("bindings.photos.scopes")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BoardError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| BoardError::Config(e.to_string()))
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".homeboard")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.credentials.refresh_buffer_seconds, 60);
        assert_eq!(config.credentials.key_env, "HOMEBOARD_TOKEN_KEY");
        assert_eq!(config.bindings.calendar.token_identity, "calendar_token");
        assert!(config.bindings.photos.scopes.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homeboard.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8088\n\n[photos]\nfolder = \"Kitchen\"\ndrive_user = \"me@example.com\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.photos.folder, "Kitchen");
        assert_eq!(config.calendar.max_results, 10);
    }

    #[test]
    fn test_binding_falls_back_to_default_scopes() {
        let config = AppConfig::default();
        let defaults = vec!["https://graph.microsoft.com/.default".to_string()];

        let photos = config
            .bindings
            .photos
            .bind(Provider::MicrosoftClientCredentials, &defaults)
            .unwrap();
        assert!(photos.scopes().contains("https://graph.microsoft.com/.default"));

        let calendar = config.bindings.calendar.bind(Provider::GoogleInteractive, &defaults).unwrap();
        assert_eq!(calendar.scopes().len(), 1);
        assert!(calendar.scopes().contains("https://www.googleapis.com/auth/calendar.readonly"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = AppConfig::load(Some("/nonexistent/homeboard.toml"));
        assert!(matches!(result, Err(BoardError::Config(_))));
    }
}
