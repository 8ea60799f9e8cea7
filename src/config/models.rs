//! Configuration data structures for the homeboard backend.
//!
//! This module defines the schema for the application settings: the HTTP
//! server, the credential vault, provider endpoints, the two credential
//! bindings the dashboard uses, and the calendar/photo widgets.

use serde::{Deserialize, Serialize};

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// HTTP server settings (host, port).
    #[serde(default)]
    pub server: ServerConfig,

    /// Token vault and credential lifecycle settings.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Google OAuth2 and Calendar endpoints.
    #[serde(default)]
    pub google: GoogleConfig,

    /// Microsoft identity platform and Graph endpoints.
    #[serde(default)]
    pub microsoft: MicrosoftConfig,

    /// Credential bindings used by the widgets.
    #[serde(default)]
    pub bindings: BindingsConfig,

    /// Calendar widget settings.
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Photo rotation widget settings.
    #[serde(default)]
    pub photos: PhotosConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the built-in HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Default: `0.0.0.0`
    #[serde(default = "default_host")]
    pub host: String,

    /// Default: `5050`
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Settings for the encrypted token vault and the cache manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding one encrypted file per token identity.
    /// Default: `~/.homeboard/tokens`
    #[serde(default = "default_vault_dir")]
    pub vault_dir: String,

    /// Seconds before expiry at which a token stops being considered fresh.
    /// Default: `60`
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: i64,

    /// Upper bound on the interactive consent wait.
    /// Default: `300` (5 minutes)
    #[serde(default = "default_consent_timeout")]
    pub consent_timeout_seconds: u64,

    /// Environment variable holding the base64 vault key.
    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// Environment variable holding the Google client secret JSON.
    #[serde(default = "default_google_env")]
    pub google_secret_env: String,

    /// Environment variable holding the Microsoft application JSON.
    #[serde(default = "default_microsoft_env")]
    pub microsoft_secret_env: String,
}

/// Google OAuth2 endpoints and API bases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_google_auth_url")]
    pub auth_url: String,

    #[serde(default = "default_google_token_url")]
    pub token_url: String,

    /// Endpoint used to validate access tokens that carry no expiry.
    #[serde(default = "default_google_tokeninfo_url")]
    pub tokeninfo_url: String,

    #[serde(default = "default_calendar_api_base")]
    pub calendar_api_base: String,
}

/// Microsoft identity platform and Graph settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrosoftConfig {
    /// Authority host; the tenant is appended unless the application JSON
    /// supplies a full authority.
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,
}

/// One logical credential: scopes plus the vault file identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingConfig {
    pub token_identity: String,

    /// Empty means "use the provider's configured default scopes".
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingsConfig {
    /// Google Calendar binding (interactive consent).
    #[serde(default = "default_calendar_binding")]
    pub calendar: BindingConfig,

    /// OneDrive binding (client credentials).
    #[serde(default = "default_photos_binding")]
    pub photos: BindingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Default: `300`
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Default: `7`
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,

    /// Default: `10`
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Last-known-good events, served when the API cannot be reached.
    #[serde(default = "default_calendar_cache")]
    pub cache_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotosConfig {
    /// OneDrive folder path under the drive root.
    /// Default: `DashboardPhotos`
    #[serde(default = "default_photo_folder")]
    pub folder: String,

    /// User principal name or id owning the drive. Client-credentials tokens
    /// have no signed-in user, so `/me` cannot be used.
    #[serde(default)]
    pub drive_user: String,

    #[serde(default = "default_photo_cache")]
    pub cache_path: String,

    /// How often the cached image list is re-read from OneDrive.
    /// Default: `3600`
    #[serde(default = "default_photo_refresh_interval")]
    pub refresh_interval_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            vault_dir: default_vault_dir(),
            refresh_buffer_seconds: default_refresh_buffer(),
            consent_timeout_seconds: default_consent_timeout(),
            key_env: default_key_env(),
            google_secret_env: default_google_env(),
            microsoft_secret_env: default_microsoft_env(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            auth_url: default_google_auth_url(),
            token_url: default_google_token_url(),
            tokeninfo_url: default_google_tokeninfo_url(),
            calendar_api_base: default_calendar_api_base(),
        }
    }
}

impl Default for MicrosoftConfig {
    fn default() -> Self {
        Self {
            authority_host: default_authority_host(),
            graph_api_base: default_graph_api_base(),
        }
    }
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            calendar: default_calendar_binding(),
            photos: default_photos_binding(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            lookahead_days: default_lookahead_days(),
            max_results: default_max_results(),
            cache_path: default_calendar_cache(),
        }
    }
}

impl Default for PhotosConfig {
    fn default() -> Self {
        Self {
            folder: default_photo_folder(),
            drive_user: String::new(),
            cache_path: default_photo_cache(),
            refresh_interval_seconds: default_photo_refresh_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn homeboard_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".homeboard")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_vault_dir() -> String {
    homeboard_dir().join("tokens").to_string_lossy().to_string()
}

fn default_refresh_buffer() -> i64 {
    60
}

fn default_consent_timeout() -> u64 {
    300
}

fn default_key_env() -> String {
    "HOMEBOARD_TOKEN_KEY".to_string()
}

fn default_google_env() -> String {
    "GOOGLE_CREDENTIALS_JSON".to_string()
}

fn default_microsoft_env() -> String {
    "ONEDRIVE_CREDENTIALS_JSON".to_string()
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_tokeninfo_url() -> String {
    "https://oauth2.googleapis.com/tokeninfo".to_string()
}

fn default_calendar_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_graph_api_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_calendar_binding() -> BindingConfig {
    BindingConfig {
        token_identity: "calendar_token".to_string(),
        scopes: vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()],
    }
}

fn default_photos_binding() -> BindingConfig {
    BindingConfig {
        token_identity: "onedrive_token".to_string(),
        scopes: Vec::new(),
    }
}

fn default_poll_interval() -> u64 {
    300
}

fn default_lookahead_days() -> i64 {
    7
}

fn default_max_results() -> u32 {
    10
}

fn default_calendar_cache() -> String {
    homeboard_dir().join("calendar_cache.json").to_string_lossy().to_string()
}

fn default_photo_folder() -> String {
    "DashboardPhotos".to_string()
}

fn default_photo_cache() -> String {
    homeboard_dir().join("image_cache.json").to_string_lossy().to_string()
}

fn default_photo_refresh_interval() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
