//! Cross-cutting helpers: logging setup with secret scrubbing, and retry
//! with backoff for upstream API calls.

pub mod logging;
pub mod retry;
