//! Scripted search client for testing

use crate::{Result, SearchClient, SearchError, SearchRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Search client that replays scripted responses.
///
/// Scripted replies are consumed in order; once exhausted, the fallback
/// response is returned, or a 503 backend error when there is none.
#[derive(Debug, Default)]
pub struct MockSearchClient {
    replies: Mutex<VecDeque<Result<Value>>>,
    fallback: Option<Value>,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<SearchRequest>>,
}

impl MockSearchClient {
    /// Create a mock with no scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always returns the same response
    pub fn always(response: Value) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    /// Queue a successful response
    pub fn with_response(mut self, response: Value) -> Self {
        self.replies.get_mut().push_back(Ok(response));
        self
    }

    /// Queue an error
    pub fn with_error(mut self, error: SearchError) -> Self {
        self.replies.get_mut().push_back(Err(error));
        self
    }

    /// Delay every reply
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of executed requests
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl SearchClient for MockSearchClient {
    async fn execute(&self, request: &SearchRequest) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Mock search call {}", call);

        self.requests.lock().await.push(request.clone());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(reply) = self.replies.lock().await.pop_front() {
            return reply;
        }

        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Err(SearchError::Backend {
                status: 503,
                body: "no scripted response".to_string(),
            }),
        }
    }
}
