use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;

use crate::error::LlmError;

/// Retry schedule for HTTP calls to a remote backend.
///
/// Rate limiting (429) and overloaded gateways (502, 503, 504) are retried with
/// exponential backoff; a numeric `Retry-After` header takes precedence but is
/// still capped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_millis(500),
            cap: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn delay(&self, response: &reqwest::Response, attempt: u32) -> Duration {
        response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or_else(
                || self.backoff(attempt),
                |secs| Duration::from_secs(secs).min(self.cap),
            )
    }

    /// Send a request built by `send`, retrying retryable statuses.
    ///
    /// The first response with any other status is returned as is; callers map
    /// non-success statuses themselves.
    ///
    /// # Errors
    ///
    /// `LlmError::RateLimited` when every attempt was rate limited,
    /// `LlmError::Status` when a gateway error persists, and `LlmError::Http`
    /// for transport failures.
    pub(crate) async fn send<F, Fut>(
        &self,
        provider: &str,
        mut send: F,
    ) -> Result<reqwest::Response, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0;
        loop {
            let response = send().await?;
            let status = response.status();
            if !is_retryable(status) {
                return Ok(response);
            }

            if attempt == self.max_retries {
                return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                    LlmError::RateLimited {
                        provider: provider.to_owned(),
                        attempts: attempt + 1,
                    }
                } else {
                    LlmError::Status {
                        provider: provider.to_owned(),
                        status: status.as_u16(),
                    }
                });
            }

            let delay = self.delay(&response, attempt);
            tracing::warn!(
                provider,
                status = status.as_u16(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = attempt + 1,
                "transient provider response, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const OK: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
    const TOO_MANY: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAUTHORIZED: &str =
        "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
        }
    }

    /// Serve one scripted reply per connection and count the connections.
    async fn scripted(replies: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            for reply in replies {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (url, hits)
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(64), Duration::from_secs(10));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable(StatusCode::OK));
    }

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let (url, hits) = scripted(vec![TOO_MANY, OK]).await;
        let client = reqwest::Client::new();
        let response = fast().send("test", || client.get(&url).send()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_rate_limit_is_reported() {
        let (url, hits) = scripted(vec![TOO_MANY, TOO_MANY, TOO_MANY]).await;
        let client = reqwest::Client::new();
        let result = fast().send("test", || client.get(&url).send()).await;
        assert!(
            matches!(result, Err(LlmError::RateLimited { attempts: 3, .. })),
            "unexpected: {result:?}"
        );
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_gateway_error_becomes_status() {
        let (url, _) = scripted(vec![UNAVAILABLE, UNAVAILABLE, UNAVAILABLE]).await;
        let client = reqwest::Client::new();
        let result = fast().send("test", || client.get(&url).send()).await;
        assert!(matches!(result, Err(LlmError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let (url, hits) = scripted(vec![UNAUTHORIZED, OK]).await;
        let client = reqwest::Client::new();
        let response = fast().send("test", || client.get(&url).send()).await.unwrap();
        assert_eq!(response.status(), 401);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn backoff_stays_within_bounds(attempt in 0u32..256) {
            let policy = RetryPolicy::default();
            let delay = policy.backoff(attempt);
            prop_assert!(delay >= policy.base);
            prop_assert!(delay <= policy.cap);
        }
    }
}
