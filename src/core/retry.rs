// src/core/retry.rs
use crate::config::SchedulerConfig;
use crate::connectors::traits::MarketNotFound;
use crate::error::EngineError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    /// Delay unit; attempt `n` waits `n * backoff` before the next try.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_scheduler(cfg: &SchedulerConfig) -> Self {
        Self {
            attempts: cfg.retry_attempts.max(1),
            timeout: Duration::from_millis(cfg.request_timeout_ms),
            backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

/// Runs `call` until it succeeds, bounding each attempt with a timeout and
/// backing off linearly between attempts. Exhaustion surfaces as
/// `TransientApi`; an unlisted market fails at once as `UnknownMarket`.
/// Never use this for order placement.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut call: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error = String::new();
    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                if let Some(MarketNotFound(market)) = e.downcast_ref::<MarketNotFound>() {
                    return Err(EngineError::UnknownMarket {
                        market: market.clone(),
                    });
                }
                last_error = format!("{:#}", e);
            }
            Err(_) => last_error = format!("timed out after {:?}", policy.timeout),
        }
        if attempt < policy.attempts {
            warn!(op, attempt, error = %last_error, "retrying");
            tokio::time::sleep(policy.backoff * attempt).await;
        }
    }
    Err(EngineError::TransientApi {
        op: op.to_string(),
        attempts: policy.attempts,
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            timeout: Duration::from_millis(50),
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(&fast_policy(), "ticker", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("503");
                }
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_is_transient_api_error() {
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "candles", || async {
            anyhow::bail!("connection reset")
        })
        .await;
        match result {
            Err(EngineError::TransientApi { op, attempts, reason }) => {
                assert_eq!(op, "candles");
                assert_eq!(attempts, 3);
                assert!(reason.contains("connection reset"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unlisted_market_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "ticker", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(MarketNotFound("KRW-GONE".into()).into())
            }
        })
        .await;
        assert!(matches!(result, Err(EngineError::UnknownMarket { market }) if market == "KRW-GONE"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "book", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EngineError::TransientApi { .. })));
    }
}
