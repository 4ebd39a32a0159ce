//! A single explicit retry helper used by every write/read call that
//! talks to the remote API, replacing per-call-site retry loops with
//! one bounded-backoff policy (see the design notes on this point).

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use lk_domain::{Error, Result};

fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(200),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(30)),
        ..ExponentialBackoff::default()
    }
}

/// Run `thunk` until it succeeds, a non-transient error is returned, or
/// the backoff schedule is exhausted.
pub async fn retry_transient<F, Fut, T>(mut thunk: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = default_backoff();
    loop {
        match thunk().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(e);
                };
                tracing::warn!(error = %e, delay_ms = delay.as_millis(), "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `thunk` once; on an auth-expired error, re-authenticate via
/// `reauth` and retry exactly once.
pub async fn retry_once_after_reauth<F, Fut, R, RFut, T>(mut thunk: F, mut reauth: R) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut() -> RFut,
    RFut: Future<Output = Result<()>>,
{
    match thunk().await {
        Err(e) if e.is_auth_expired() => {
            tracing::info!("access token expired, re-authenticating");
            reauth().await?;
            thunk().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_transient_succeeds_after_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32> = retry_transient(|| async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Timeout("slow".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_transient_does_not_retry_permanent_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<u32> = retry_transient(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::ApiClient {
                status: 400,
                code: Some("InvalidRequest".into()),
                message: "bad".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reauth_retries_exactly_once_on_expired_token() {
        let attempts = AtomicUsize::new(0);
        let reauth_calls = AtomicUsize::new(0);
        let result: Result<u32> = retry_once_after_reauth(
            || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(Error::Auth("expired".into()))
                } else {
                    Ok(7)
                }
            },
            || {
                reauth_calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(reauth_calls.load(Ordering::SeqCst), 1);
    }
}
