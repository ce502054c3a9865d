use std::future::Future;
use std::time::Duration;

use cinema_core::{BookingError, BookingResult};
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Backoff for units of work that lost a race against a concurrent writer.
///
/// Only `Contention` is retried; every other error is final for the request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// initial_delay * multiplier^attempt, capped at max_delay
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Run a single store call under `limit`, reporting an overrun as `StoreTimeout`
pub async fn bounded<T, Fut>(operation: &'static str, limit: Duration, call: Fut) -> BookingResult<T>
where
    Fut: Future<Output = BookingResult<T>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BookingError::StoreTimeout(format!(
            "{} did not finish within {:?}",
            operation, limit
        ))),
    }
}

/// Run one atomic unit under `limit`, repeating it on contention.
///
/// `unit` must build a fresh transaction on every call. A unit that does not
/// finish in time is dropped, which rolls its transaction back.
pub async fn run_unit<T, F, Fut>(
    operation: &'static str,
    policy: &RetryPolicy,
    limit: Duration,
    mut unit: F,
) -> BookingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BookingResult<T>>,
{
    let mut attempt = 0;

    loop {
        match bounded(operation, limit, unit()).await {
            Err(BookingError::Contention(reason)) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(operation, attempt, ?delay, %reason, "Contention, retrying unit of work");
                sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_contention_is_retried_then_surfaced() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };

        let result: BookingResult<()> = run_unit("test", &policy, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BookingError::Contention("version".into())) }
        })
        .await;

        assert!(matches!(result, Err(BookingError::Contention(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_conflicts_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: BookingResult<()> =
            run_unit("test", &RetryPolicy::default(), Duration::from_secs(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BookingError::AlreadyConfirmed(uuid::Uuid::new_v4())) }
            })
            .await;

        assert!(matches!(result, Err(BookingError::AlreadyConfirmed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_unit_times_out() {
        let result: BookingResult<u8> =
            run_unit("slow", &RetryPolicy::default(), Duration::from_millis(20), || async {
                sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(BookingError::StoreTimeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_read_times_out() {
        let result: BookingResult<u8> = bounded("list_bookings", Duration::from_millis(20), async {
            sleep(Duration::from_secs(3600)).await;
            Ok(1)
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, BookingError::StoreTimeout(ref m) if m.starts_with("list_bookings")));
        assert!(err.is_retryable());
    }
}
