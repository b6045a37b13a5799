use metrics::counter;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::MAX_ATTEMPTS;
use crate::engine::RemoteError;

/// Which failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    AnyError,
    /// Give up at once unless the service is throttling us.
    RateLimitOnly,
}

/// How the computed backoff is randomised before sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    None,
    /// Sleep a uniform random time in `[0, delay]`.
    Full,
}

/// Exponential backoff around a single remote call.
///
/// The delay before retry `n` (0-based) is `initial_delay * multiplier^n`,
/// capped at `max_delay`, then jittered. `max_attempts` counts the first call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: Jitter,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: Jitter::Full,
            retry_on: RetryOn::AnyError,
        }
    }
}

/// Last error seen once the policy stopped retrying.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: RemoteError,
}

impl RetryPolicy {
    pub fn rate_limit_only(mut self) -> Self {
        self.retry_on = RetryOn::RateLimitOnly;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = Jitter::None;
        self
    }

    /// Capped exponential delay before retry `retry`, before jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry as i32))
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Time actually slept before retry `retry`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let capped = self.delay_for(retry);
        match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                let capped_ms = capped.as_millis() as u64;
                Duration::from_millis(rand::thread_rng().gen_range(0..=capped_ms))
            }
        }
    }

    pub fn should_retry(&self, error: &RemoteError) -> bool {
        match self.retry_on {
            RetryOn::AnyError => true,
            RetryOn::RateLimitOnly => error.is_throttled(),
        }
    }

    /// Runs `operation` until it succeeds, the predicate gives up, or the
    /// attempt budget is spent. `operation` receives the 1-based attempt.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !self.should_retry(&error) {
                        return Err(RetryFailure {
                            attempts: attempt,
                            error,
                        });
                    }

                    let delay = self.backoff_for(attempt - 1);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Remote call failed, backing off"
                    );
                    counter!("classification_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
        .without_jitter()
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn full_jitter_stays_within_the_capped_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.jitter, Jitter::Full);

        for retry in 0..MAX_ATTEMPTS {
            let capped = policy.delay_for(retry);
            for _ in 0..50 {
                let slept = policy.backoff_for(retry);
                assert!(slept <= capped, "retry {retry}: {slept:?} > {capped:?}");
            }
        }

        // 60s capped delay, 50 draws: all equal has probability ~0.
        let draws: std::collections::HashSet<Duration> =
            (0..50).map(|_| policy.backoff_for(10)).collect();
        assert!(draws.len() > 1);
    }

    #[test]
    fn disabled_jitter_sleeps_the_capped_delay() {
        let policy = RetryPolicy::default().without_jitter();
        for retry in 0..MAX_ATTEMPTS {
            assert_eq!(policy.backoff_for(retry), policy.delay_for(retry));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let count = AtomicU32::new(0);
        let calls = &count;
        let result = fast()
            .run(move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(RemoteError::Throttled("slow down".to_string()))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(RemoteError::Transport(format!("attempt {attempt}"))) }
            })
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, MAX_ATTEMPTS);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(failure.error.to_string().contains("attempt 8"));
    }

    #[tokio::test]
    async fn rate_limit_only_gives_up_on_other_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .rate_limit_only()
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(RemoteError::Status {
                        code: 21200,
                        description: "Model does not exist".to_string(),
                    })
                }
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
