//! Bounded retries with jittered exponential backoff, for idempotent
//! subgraph calls (SDL discovery, query steps). Mutations never retry.

use std::{future::Future, time::Duration};

use crate::fetch::{FetchError, FetchResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Additional attempts after the first call.
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 2,
            base_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jitter = rand::random::<f64>() + 0.5;
        Duration::from_millis((exp as f64 * jitter).round() as u64)
    }
}

/// Run `call` until it succeeds or the attempt budget is spent. The sleep is
/// injected so tests never wait on a real clock.
pub async fn retry<T, C, F, S, SF>(config: RetryConfig, sleep: S, mut call: C) -> FetchResult<T>
where
    C: FnMut() -> F,
    F: Future<Output = FetchResult<T>>,
    S: Fn(Duration) -> SF,
    SF: Future<Output = ()>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            // Parsing failures are deterministic; retrying re-reads the same
            // body.
            Err(err @ (FetchError::InvalidJson(_) | FetchError::InsecureJson(_))) => {
                return Err(err)
            }
            Err(err) if attempt >= config.attempts => return Err(err),
            Err(_) => {
                sleep(config.backoff(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_transport_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(
            RetryConfig {
                attempts: 3,
                base_backoff: Duration::from_millis(1),
            },
            |_| async {},
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::transport("connection refused"))
                } else {
                    Ok(42)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_budget() {
        let calls = AtomicU32::new(0);
        let result: FetchResult<()> = retry(
            RetryConfig {
                attempts: 2,
                base_backoff: Duration::from_millis(1),
            },
            |_| async {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::transport("down"))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_parse_failures() {
        let calls = AtomicU32::new(0);
        let result: FetchResult<()> = retry(
            RetryConfig::default(),
            |_| async {},
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::InvalidJson("nope".to_owned()))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
