use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::warn;

use crate::metric_consts::BATCH_RETRIES;

/// Exponential backoff with a hard elapsed-time budget, wrapped around a
/// fallible async operation.
///
/// The policy gives up once the *next* sleep would overrun the budget, which
/// makes the attempt count a deterministic function of the configuration: at
/// the defaults (500ms initial, 2.0 multiplier, 10s budget) an operation that
/// keeps failing is tried exactly 5 times. The final error is returned to the
/// caller, which decides what recovery means (for the consumer loop:
/// dead-letter the batch and move on).
#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    initial_interval: Duration,
    multiplier: f64,
    max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, multiplier: f64, max_elapsed: Duration) -> Self {
        Self {
            initial_interval,
            multiplier,
            max_elapsed,
        }
    }

    pub async fn retry<T, E, F, Fut>(&self, description: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut delay = self.initial_interval;
        let mut attempt: u32 = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if start.elapsed() + delay > self.max_elapsed {
                        return Err(error);
                    }
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "{description} failed, backing off"
                    );
                    counter!(BATCH_RETRIES).increment(1);
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.multiplier);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn success_passes_straight_through() {
        let policy = RetryPolicy::default();
        let result: Result<i32, &str> = policy.retry("op", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Result<&str, &str> = policy
            .retry("op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_op_is_tried_a_bounded_number_of_times() {
        // 500ms * 2.0^n against a 10s budget: sleeps of 500, 1000, 2000 and
        // 4000ms fit (7.5s), the next 8000ms sleep would overrun.
        let policy = RetryPolicy::new(
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(10),
        );
        let attempts = AtomicU32::new(0);

        let started = Instant::now();
        let result: Result<(), &str> = policy
            .retry("op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("poison") }
            })
            .await;

        assert_eq!(result.unwrap_err(), "poison");
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_millis(7500));
    }
}
