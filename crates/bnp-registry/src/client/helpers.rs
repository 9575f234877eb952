//! Pure helpers: URL joining, error bodies, backoff (no HTTP).

use std::time::Duration;

use rand::Rng;

use crate::error::PublishError;

/// Upper bound for any single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Join a registry base URL and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Registry-provided error text from a response body.
///
/// Registries answer failed writes with `{"error": "..."}`; anything else
/// yields `None`.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Delay before retry number `attempt` (1-based).
///
/// Rate limits honour `Retry-After` (capped, +-10% jitter); everything else
/// uses full-jitter exponential backoff.
pub(crate) fn retry_backoff(error: &PublishError, attempt: u32) -> Duration {
    match error {
        PublishError::RateLimited {
            retry_after: Some(retry_after),
        } => {
            let base_ms = (*retry_after).min(MAX_BACKOFF).as_millis() as u64;
            let jitter: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
            Duration::from_millis((((base_ms as f64) * jitter).round() as u64).max(100))
        }
        _ => {
            let base = Duration::from_secs(1u64 << attempt.min(5)).min(MAX_BACKOFF);
            let jittered = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
            Duration::from_millis(jittered.max(10))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://registry.example.com/", "@acme%2fwidget"),
            "https://registry.example.com/@acme%2fwidget"
        );
        assert_eq!(
            join_url("https://registry.example.com/npm", "/-/package/x/visibility"),
            "https://registry.example.com/npm/-/package/x/visibility"
        );
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":"cannot publish over previously published version"}"#)
                .as_deref(),
            Some("cannot publish over previously published version")
        );
        assert_eq!(extract_error_message(r#"{"error":""}"#), None);
        assert_eq!(extract_error_message(r#"{"message":"nope"}"#), None);
        assert_eq!(extract_error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn test_retry_after_is_capped_and_jittered() {
        let err = PublishError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        let delay = retry_backoff(&err, 1);
        assert!(delay >= Duration::from_secs(27));
        assert!(delay <= Duration::from_secs(33));
    }

    #[test]
    fn test_exponential_backoff_bounds() {
        let err = PublishError::Network {
            message: "reset".into(),
        };
        for attempt in 1..10 {
            let delay = retry_backoff(&err, attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= MAX_BACKOFF);
        }
    }
}
