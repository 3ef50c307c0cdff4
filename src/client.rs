//! [`Transport`] implementations.
//!
//! - [`HttpTransport`]: `reqwest` client posting to the analytics API
//! - [`ReplayTransport`]: serves canned responses in order; used for offline
//!   runs against captured API output and in tests

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::model::{ApiRequest, ApiResponse};
use crate::traits::{Transport, TransportError};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("analytics-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("HTTP client setup: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .query(&request.query)
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("POST {}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("reading body of {}: {}", request.url, e)))?;

        Ok(ApiResponse {
            status,
            retry_after,
            body: body.to_vec(),
        })
    }
}

/// Serves queued responses in order and records every request it receives.
///
/// Once the queue is empty it answers with an empty final page, so a replay
/// always terminates.
#[derive(Default)]
pub struct ReplayTransport {
    responses: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues every element of a JSON array as a `200` response body.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let bodies: Vec<Value> = serde_json::from_str(text)?;
        Ok(bodies
            .iter()
            .fold(Self::new(), |replay, body| replay.with_json(200, body)))
    }

    pub fn with_response(mut self, response: ApiResponse) -> Self {
        self.responses.get_mut().push_back(Ok(response));
        self
    }

    pub fn with_json(self, status: u16, body: &Value) -> Self {
        self.with_response(ApiResponse::json(status, body))
    }

    pub fn with_error(mut self, error: TransportError) -> Self {
        self.responses.get_mut().push_back(Err(error));
        self
    }

    /// Requests received so far, in order.
    pub async fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().await.push(request.clone());
        match self.responses.lock().await.pop_front() {
            Some(response) => response,
            None => Ok(ApiResponse::json(
                200,
                &serde_json::json!({"data": [], "hasMore": false}),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Page;
    use serde_json::json;

    fn request() -> ApiRequest {
        ApiRequest {
            url: "https://analytics.test/calldetails".to_string(),
            query: vec![],
            headers: vec![],
            body: json!({}),
        }
    }

    #[tokio::test]
    async fn test_replay_serves_in_order_then_ends() {
        let replay = ReplayTransport::from_json(
            r#"[{"data": [{"sessionId": "s-1"}], "numResults": 1}, {"data": []}]"#,
        )
        .unwrap();
        assert_eq!(replay.remaining().await, 2);

        let first = replay.send(&request()).await.unwrap();
        assert_eq!(first.status, 200);
        assert_eq!(Page::from_slice(&first.body).len(), 1);

        replay.send(&request()).await.unwrap();
        let tail = replay.send(&request()).await.unwrap();
        assert_eq!(Page::from_slice(&tail.body).has_more, Some(false));
        assert_eq!(replay.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_replay_errors() {
        let replay = ReplayTransport::new().with_error(TransportError::Network("reset".into()));
        assert!(matches!(
            replay.send(&request()).await,
            Err(TransportError::Network(_))
        ));
    }
}
