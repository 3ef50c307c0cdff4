//! Rate-limit aware transport wrapper.
//!
//! [`RateLimitedTransport`] sends one request through any [`Transport`] and
//! turns the response into a [`Page`]:
//! - HTTP 429 → wait per [`BackoffPolicy`] and resend the identical request
//! - other non-2xx → [`TransportError::Status`], never retried
//! - request-level failure → propagated as-is, never retried

use rand::Rng;
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{ApiRequest, Page};
use crate::traits::{Transport, TransportError};

const RATE_LIMITED: u16 = 429;
const ERROR_BODY_PREVIEW: usize = 500;

/// Wait schedule applied between consecutive 429 responses.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,

    /// Upper bound for computed delays (a server `Retry-After` is honored as sent).
    pub max_delay: Duration,

    /// Growth factor per consecutive 429.
    pub multiplier: f64,

    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,

    /// Retries allowed after the first 429; `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            max_delay: Duration::from_secs(900),
            multiplier: 2.0,
            jitter: true,
            max_retries: Some(8),
        }
    }
}

impl BackoffPolicy {
    /// Same delay every time, no cap on retries.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
            max_retries: None,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }

        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped.max(0.0));

        if self.jitter {
            let half_ms = (delay.as_millis() / 2) as u64;
            let spread = rand::thread_rng().gen_range(0..=half_ms);
            Duration::from_millis(half_ms + spread)
        } else {
            delay
        }
    }

    fn exhausted(&self, rate_limited: u32) -> bool {
        self.max_retries.is_some_and(|max| rate_limited > max)
    }
}

/// A decoded page plus how many 429s it took to get it.
#[derive(Debug)]
pub struct FetchedPage {
    pub page: Page,
    pub rate_limited: u32,
}

pub struct RateLimitedTransport<T> {
    inner: T,
    backoff: BackoffPolicy,
}

impl<T: Transport> RateLimitedTransport<T> {
    pub fn new(inner: T, backoff: BackoffPolicy) -> Self {
        Self { inner, backoff }
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sends `request` until a non-429 response arrives or the retry budget
    /// runs out.
    ///
    /// # Errors
    ///
    /// - [`TransportError::RateLimitExhausted`] once `max_retries` is exceeded
    /// - [`TransportError::Status`] for any other non-2xx status
    /// - whatever the inner transport returns for network failures
    pub async fn send(&self, request: &ApiRequest) -> Result<FetchedPage, TransportError> {
        let mut rate_limited = 0u32;

        loop {
            let response = self.inner.send(request).await?;

            if response.status == RATE_LIMITED {
                rate_limited += 1;
                if self.backoff.exhausted(rate_limited) {
                    return Err(TransportError::RateLimitExhausted {
                        attempts: rate_limited,
                    });
                }
                let delay = self.backoff.delay_for(rate_limited, response.retry_after);
                warn!(
                    url = %request.url,
                    attempt = rate_limited,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limit exceeded, waiting before retry"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !(200..300).contains(&response.status) {
                let body = String::from_utf8_lossy(&response.body);
                return Err(TransportError::Status {
                    status: response.status,
                    body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
                });
            }

            let page = Page::from_slice(&response.body);
            if page.is_malformed() {
                warn!(url = %request.url, "Response has no 'data' list, treating as end of data");
            } else {
                debug!(records = page.len(), "Decoded page");
            }
            return Ok(FetchedPage { page, rate_limited });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApiResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        responses: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<ApiResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn too_many() -> Result<ApiResponse, TransportError> {
        Ok(ApiResponse::json(429, &json!({"error": "slow down"})))
    }

    fn quick(max_retries: Option<u32>) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter: false,
            max_retries,
        }
    }

    fn request() -> ApiRequest {
        ApiRequest {
            url: "https://analytics.test/agentstatusdetails".to_string(),
            query: vec![("offset".to_string(), "0".to_string())],
            headers: vec![],
            body: json!({}),
        }
    }

    #[tokio::test]
    async fn test_retries_identical_request_after_429() {
        let inner = Scripted::new(vec![
            too_many(),
            too_many(),
            Ok(ApiResponse::json(200, &json!({"data": [], "hasMore": false}))),
        ]);
        let transport = RateLimitedTransport::new(inner, quick(None));

        let fetched = transport.send(&request()).await.unwrap();
        assert_eq!(fetched.rate_limited, 2);
        assert!(fetched.page.is_empty());

        let seen = transport.inner.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|r| *r == request()));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausted_after_cap() {
        let inner = Scripted::new(vec![too_many(), too_many(), too_many()]);
        let transport = RateLimitedTransport::new(inner, quick(Some(2)));

        let err = transport.send(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::RateLimitExhausted { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn test_non_429_error_is_not_retried() {
        let inner = Scripted::new(vec![
            Ok(ApiResponse::json(401, &json!({"error": "bad token"}))),
            Ok(ApiResponse::json(200, &json!({"data": []}))),
        ]);
        let transport = RateLimitedTransport::new(inner, quick(None));

        let err = transport.send(&request()).await.unwrap_err();
        match err {
            TransportError::Status { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad token"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.inner.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_propagates() {
        let inner = Scripted::new(vec![Err(TransportError::Network("reset".into()))]);
        let transport = RateLimitedTransport::new(inner, quick(None));

        assert!(matches!(
            transport.send(&request()).await,
            Err(TransportError::Network(_))
        ));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(60),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: false,
            max_retries: None,
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(240));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(300));
        assert_eq!(
            policy.delay_for(4, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );

        let fixed = BackoffPolicy::fixed(Duration::from_secs(60));
        assert_eq!(fixed.delay_for(10, None), Duration::from_secs(60));
        assert!(!fixed.exhausted(u32::MAX));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            jitter: true,
            ..BackoffPolicy::fixed(Duration::from_secs(10))
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1, None);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(10));
        }
    }
}
