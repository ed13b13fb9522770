// SPDX-License-Identifier: BUSL-1.1
//! Backoff for blob downloads.
//!
//! A blob GET is idempotent, so transport failures and gateway statuses
//! (502, 503, 504) are retried with a doubling delay. A 404 is final: the
//! server no longer serves that artifact, and the caller should look the
//! file up again instead of waiting. POSTs never come through here.

use std::future::Future;
use std::time::Duration;

use crate::error::ClientError;

/// Retry policy for `GET /artifacts/{uuid}/{name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRetry {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay: Duration,
}

impl Default for BlobRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl BlobRetry {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Run `fetch` until it succeeds, fails for good, or runs out of retries.
    pub(crate) async fn run<T, F, Fut>(&self, endpoint: &str, mut fetch: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match fetch().await {
                Err(e) if attempt < self.retries && is_transient(&e) => {
                    let delay = self.delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        endpoint,
                        attempt,
                        max_retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "blob fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Whether a failed blob fetch may succeed if sent again unchanged.
pub(crate) fn is_transient(err: &ClientError) -> bool {
    match err {
        ClientError::Http { .. } => true,
        ClientError::Status { status, .. } => matches!(status, 502 | 503 | 504),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn status(code: u16) -> ClientError {
        ClientError::Status {
            endpoint: "blob".into(),
            status: code,
            body: String::new(),
        }
    }

    fn fast() -> BlobRetry {
        BlobRetry {
            retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn only_gateway_statuses_and_transport_errors_are_transient() {
        assert!(is_transient(&status(503)));
        assert!(is_transient(&status(502)));
        assert!(!is_transient(&status(500)));
        assert!(!is_transient(&ClientError::NotFound {
            endpoint: "blob".into()
        }));
        assert!(!is_transient(&ClientError::NoEndpoints));
    }

    #[test]
    fn delay_doubles() {
        let retry = BlobRetry::default();
        assert_eq!(retry.delay(0), Duration::from_millis(200));
        assert_eq!(retry.delay(1), Duration::from_millis(400));
        assert_eq!(retry.delay(2), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("blob", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ClientError::NotFound {
                        endpoint: "blob".into(),
                    })
                }
            })
            .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("blob", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(status(503))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn connection_refused_exhausts_all_attempts() {
        let calls = AtomicU32::new(0);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let result = fast()
            .run("http://127.0.0.1:1/", || {
                calls.fetch_add(1, Ordering::SeqCst);
                let request = http.get("http://127.0.0.1:1/").send();
                async move {
                    request.await.map_err(|e| ClientError::Http {
                        endpoint: "http://127.0.0.1:1/".into(),
                        source: e,
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
