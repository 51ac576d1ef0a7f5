use anyhow::{Result, anyhow};
use std::{fmt::Display, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

/// Errors that may clear up on their own and are worth another attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

// SQLITE_BUSY and SQLITE_LOCKED primary result codes
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl Retryable for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Database(db) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
            _ => false,
        }
    }
}

/// Backoff settings for start-up operations (opening the store, creating tables).
/// Per-height scanning never retries in-process; re-running the range is the retry.
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            exponential: 2.0,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a permanent error, or runs out of attempts.
pub async fn retry<F, Fut, T, E>(operation: F, config: &RetryConfig, context: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 1;
    let mut delay = config.base_delay_ms;

    loop {
        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_transient() {
            error!("Operation '{}' failed: {}", context, e);
            return Err(anyhow!("{context}: {e}"));
        }
        if attempt >= config.max_attempts {
            error!(
                "Operation '{}' failed after {} attempts. Final error: {}",
                context, attempt, e
            );
            return Err(anyhow!("{context}: {e}").context(format!("Failed after {attempt} attempts")));
        }

        warn!(
            "Attempt {}/{} for '{}' failed: {}. Retrying in {}ms...",
            attempt, config.max_attempts, context, e, delay
        );
        sleep(Duration::from_millis(delay)).await;

        // Exponential backoff with full jitter
        let next_delay = delay as f64 * config.exponential;
        delay = std::cmp::min(config.max_delay_ms, (fastrand::f64() * next_delay) as u64);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Busy,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Busy => write!(f, "database is locked"),
                TestError::Broken => write!(f, "no such table"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Busy)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            exponential: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Busy)
                } else {
                    Ok(42)
                }
            },
            &fast_config(5),
            "flaky",
        )
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Busy)
            },
            &fast_config(3),
            "always_busy",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Broken)
            },
            &fast_config(5),
            "broken",
        )
        .await;

        assert!(result.unwrap_err().to_string().contains("no such table"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sqlx_pool_timeout_is_transient() {
        assert!(sqlx::Error::PoolTimedOut.is_transient());
        assert!(!sqlx::Error::RowNotFound.is_transient());
    }
}
