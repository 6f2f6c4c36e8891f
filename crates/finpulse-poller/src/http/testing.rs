//! Route-matching transport for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Answers by the first route whose pattern is a substring of the URL
///
/// Each route replays its queued responses, repeating the last one.
#[derive(Default)]
pub(crate) struct RouteTransport {
    routes: Mutex<Vec<(String, VecDeque<HttpResponse>)>>,
    seen: Mutex<Vec<String>>,
}

impl RouteTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(self, pattern: &str, responses: Vec<HttpResponse>) -> Self {
        self.routes
            .lock()
            .push((pattern.to_string(), responses.into_iter().collect()));
        self
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HttpTransport for RouteTransport {
    async fn send(&self, request: HttpRequest, _bearer: &str) -> Result<HttpResponse, TransportError> {
        self.seen.lock().push(request.url.clone());
        let mut routes = self.routes.lock();
        for (pattern, queue) in routes.iter_mut() {
            if request.url.contains(pattern.as_str()) {
                let response = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                return response.ok_or_else(|| TransportError::Network("no scripted response".into()));
            }
        }
        Ok(HttpResponse::new(404, ""))
    }
}
