// Retry with backoff for upstream API calls, honoring server delay hints

use backoff::{backoff::Backoff, ExponentialBackoff};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const MAX_ATTEMPTS: u32 = 4;
const MAX_HINTED_DELAY_SECS: f64 = 60.0;

/// A failed attempt as seen by the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub status: u16,
    pub body: String,
    /// Delay requested by the server (`Retry-After`), if any.
    pub retry_after: Option<Duration>,
}

impl AttemptFailure {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Server-provided delay: the `Retry-After` header, else Google's
    /// `RetryInfo.retryDelay` in the error body.
    fn hinted_delay(&self) -> Option<Duration> {
        self.retry_after.or_else(|| parse_retry_delay(&self.body))
    }
}

/// Parses Google's `retryDelay` (e.g. "0.457639761s") out of an error body.
pub fn parse_retry_delay(error_json: &str) -> Option<Duration> {
    let parsed: Value = serde_json::from_str(error_json).ok()?;
    let details = parsed.get("error")?.get("details")?.as_array()?;

    details
        .iter()
        .filter(|d| {
            d.get("@type").and_then(Value::as_str) == Some("type.googleapis.com/google.rpc.RetryInfo")
        })
        .find_map(|d| d.get("retryDelay").and_then(Value::as_str))
        .and_then(parse_duration_string)
}

/// Parses "40s" / "1.5s", capped at one minute.
fn parse_duration_string(duration_str: &str) -> Option<Duration> {
    let seconds: f64 = duration_str.strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_millis((seconds.min(MAX_HINTED_DELAY_SECS) * 1000.0) as u64))
}

/// Parses a `Retry-After` header given in seconds, capped at one minute.
pub fn parse_retry_after(header: &str) -> Option<Duration> {
    let seconds: u64 = header.trim().parse().ok()?;
    Some(Duration::from_secs(seconds.min(MAX_HINTED_DELAY_SECS as u64)))
}

pub fn create_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: Duration::from_millis(500),
        initial_interval: Duration::from_millis(500),
        randomization_factor: 0.3,
        multiplier: 2.0,
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    }
}

/// Throttling and transient server failures. Status 0 marks a transport error.
pub fn is_retryable(status: u16) -> bool {
    matches!(status, 0 | 429 | 500 | 502 | 503 | 504)
}

/// Runs `operation` until it succeeds, fails with a non-retryable status,
/// or runs out of attempts.
pub async fn with_retry<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T, AttemptFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AttemptFailure>>,
{
    let mut backoff = create_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let failure = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(failure) => failure,
        };

        if !is_retryable(failure.status) || attempt >= MAX_ATTEMPTS {
            return Err(failure);
        }

        let Some(delay) = failure.hinted_delay().or_else(|| backoff.next_backoff()) else {
            return Err(failure);
        };

        debug!(
            "{} failed with {} (attempt {}), retrying after {}ms",
            operation_name,
            failure.status,
            attempt,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_retry_delay() {
        let error_json = r#"{
  "error": {
    "code": 429,
    "message": "Rate Limit Exceeded",
    "details": [
      {
        "@type": "type.googleapis.com/google.rpc.RetryInfo",
        "retryDelay": "0.457639761s"
      }
    ]
  }
}"#;
        assert_eq!(parse_retry_delay(error_json).unwrap().as_millis(), 457);
        assert!(parse_retry_delay(r#"{"error":{"code":429}}"#).is_none());
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("40s").unwrap().as_secs(), 40);
        assert_eq!(parse_duration_string("1.5s").unwrap().as_millis(), 1500);
        assert_eq!(parse_duration_string("120s").unwrap().as_secs(), 60);
        assert!(parse_duration_string("-1s").is_none());
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3").unwrap().as_secs(), 3);
        assert_eq!(parse_retry_after("600").unwrap().as_secs(), 60);
        assert!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT").is_none());
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(0));
        assert!(is_retryable(429));
        assert!(is_retryable(503));
        assert!(!is_retryable(401));
        assert!(!is_retryable(404));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AttemptFailure::new(404, "not found"))
        })
        .await;

        assert_eq!(result.unwrap_err().status, 404);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AttemptFailure::new(503, "busy").with_retry_after(Some(Duration::from_millis(1))))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
