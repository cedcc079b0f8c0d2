//! Startup retry with exponential backoff.
//!
//! Used for faults that make the bot useless until they clear (the database
//! cannot be opened). Each failed attempt is logged at error level, which
//! also reaches the operator chat, with the error text cut to a digest.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::whisper::format::truncate_chars;

/// Longest error text included in an operator notification.
pub const DIGEST_CHARS: usize = 800;

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(3),
            max: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based): initial * 2^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// An error message cut to `DIGEST_CHARS` characters.
pub fn digest(err: &impl Display) -> String {
    truncate_chars(&err.to_string(), DIGEST_CHARS)
}

/// Run `operation` until it succeeds or the attempt limit is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(what: &str, backoff: Backoff, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!("✅ {} succeeded after {} retries", what, attempt);
                }
                return Ok(result);
            }
            Err(err) => {
                attempt += 1;
                if backoff.max_attempts.is_some_and(|max| attempt >= max) {
                    error!("❌ {} failed for good after {} attempts: {}", what, attempt, digest(&err));
                    return Err(err);
                }

                let delay = backoff.delay(attempt - 1);
                error!(
                    "⚠️ {} failed (attempt {}), retrying in {:?}: {}",
                    what,
                    attempt,
                    delay,
                    digest(&err)
                );
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: Option<u32>) -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_immediately() {
        let result = retry_with_backoff("op", fast(None), || async { Ok::<_, String>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = retry_with_backoff("op", fast(None), move || {
            let attempt = attempt_clone.clone();
            async move {
                if attempt.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("database is locked".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_limit() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();

        let result = retry_with_backoff("op", fast(Some(3)), move || {
            let attempt = attempt_clone.clone();
            async move {
                attempt.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("unable to open database file".to_string())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(3));
        assert_eq!(backoff.delay(1), Duration::from_secs(6));
        assert_eq!(backoff.delay(3), Duration::from_secs(24));
        assert_eq!(backoff.delay(5), Duration::from_secs(60));
        assert_eq!(backoff.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_digest_truncates_long_errors() {
        assert_eq!(digest(&"short"), "short");
        let long = "é".repeat(DIGEST_CHARS + 50);
        let cut = digest(&long);
        assert_eq!(cut.chars().count(), DIGEST_CHARS);
        assert!(cut.ends_with('…'));
    }
}
