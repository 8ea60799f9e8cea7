//! Structured logging and secret scrubbing.
//!
//! Provider error bodies and transport errors can echo tokens back, so
//! anything derived from them passes through [`sanitize`] before it reaches
//! a log line or an error message.

use crate::config::LoggingConfig;
use crate::error::{BoardError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

lazy_static! {
    static ref SECRET_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Google access tokens
        (Regex::new(r"ya29\.[A-Za-z0-9_\-\.]+").unwrap(), "[REDACTED_ACCESS_TOKEN]"),
        // Google refresh tokens
        (Regex::new(r"1//0[A-Za-z0-9_\-]+").unwrap(), "[REDACTED_REFRESH_TOKEN]"),
        // JWTs, which is what Microsoft issues as access tokens
        (
            Regex::new(r"eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]*").unwrap(),
            "[REDACTED_JWT]",
        ),
        (Regex::new(r"(?i)bearer\s+[A-Za-z0-9_\-\.~+/]+=*").unwrap(), "Bearer [REDACTED]"),
    ];
}

/// Initializes the global tracing subscriber.
///
/// `json` gives structured output; anything else is the pretty format.
/// `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
    };

    installed.map_err(|e| BoardError::Internal(format!("Failed to initialize logging: {}", e)))
}

/// Replaces every token-shaped substring with a placeholder.
pub fn sanitize(input: &str) -> String {
    SECRET_PATTERNS
        .iter()
        .fold(input.to_string(), |text, (pattern, replacement)| {
            pattern.replace_all(&text, *replacement).into_owned()
        })
}
