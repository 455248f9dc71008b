use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    /// Fractional jitter applied symmetrically, e.g. 0.25 for ±25%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms as f64 * self.factor.powi(attempt as i32);
        let spread = exp * self.jitter;
        let jittered = if spread > 0.0 {
            rand::thread_rng().gen_range(exp - spread..=exp + spread)
        } else {
            exp
        };
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Run `op`, retrying on errors that `is_transient` accepts, up to
/// `policy.max_attempts` total attempts. The final error propagates.
pub async fn retry_with_backoff<T, E, Fut, Op, P>(
    policy: &BackoffPolicy,
    what: &str,
    is_transient: P,
    mut op: Op,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{what} failed (attempt {}/{}): {err}; retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_stays_within_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..3 {
            let expected = 500.0 * 2.0_f64.powi(attempt as i32);
            let lo = (expected * 0.75) as u128;
            let hi = (expected * 1.25) as u128;
            for _ in 0..50 {
                let d = policy.delay_for(attempt).as_millis();
                assert!(d >= lo && d <= hi, "delay {d} outside [{lo}, {hi}]");
            }
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            factor: 1.0,
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&policy, "test op", |_| true, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("temporarily down".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&policy, "test op", |_| false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad input".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_propagate_error() {
        let policy = BackoffPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            factor: 1.0,
            jitter: 0.0,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            retry_with_backoff(&policy, "test op", |_| true, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("still down".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
