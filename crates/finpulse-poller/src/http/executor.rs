//! HTTP executor - one instance per credential scope
//!
//! Failure classification:
//! - 401/403: [`ApiError::Auth`], never retried
//! - 429/5xx: retried with backoff, then [`ApiError::Transient`]
//! - other non-2xx: [`ApiError::Status`]
//! - transport failure or attempt deadline: [`ApiError::Network`], never retried

use finpulse_common::types::endpoint::unresolved_placeholder;
use finpulse_common::{ApiError, EndpointDefinition, EndpointScope};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::retry::RetryPolicy;
use super::transport::{HttpRequest, HttpTransport};
use crate::telemetry::PollerMetrics;

/// Default overall deadline for one attempt
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated executor bound to one scope and credential
pub struct HttpExecutor {
    scope: EndpointScope,
    credential: SecretString,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    request_timeout: Duration,
    metrics: Option<Arc<PollerMetrics>>,
}

impl HttpExecutor {
    pub fn new(
        scope: EndpointScope,
        credential: SecretString,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            scope,
            credential,
            transport,
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PollerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn scope(&self) -> EndpointScope {
        self.scope
    }

    /// Build the final URL: path substitution then query parameters
    pub fn resolve_url(
        endpoint: &EndpointDefinition,
        path_params: &HashMap<String, String>,
        query_params: &[(String, String)],
    ) -> Result<String, ApiError> {
        let built = endpoint.build_url(path_params);
        if let Some(param) = unresolved_placeholder(&built) {
            return Err(ApiError::MissingPathParam {
                endpoint: endpoint.name.clone(),
                param: param.to_string(),
            });
        }

        if query_params.is_empty() {
            return Ok(built);
        }

        let mut url = Url::parse(&built).map_err(|e| ApiError::Network {
            endpoint: endpoint.name.clone(),
            message: format!("invalid url: {}", e),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query_params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    /// Call an endpoint and return the raw response body
    #[instrument(
        skip(self, endpoint, path_params, query_params, body),
        fields(endpoint = %endpoint.name, scope = %self.scope)
    )]
    pub async fn execute(
        &self,
        endpoint: &EndpointDefinition,
        path_params: &HashMap<String, String>,
        query_params: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<String, ApiError> {
        let url = Self::resolve_url(endpoint, path_params, query_params)?;
        let body = if endpoint.method.carries_body() {
            body.cloned()
        } else {
            None
        };

        let mut retries = 0u32;
        loop {
            let attempt = retries + 1;
            let request = HttpRequest {
                method: endpoint.method,
                url: url.clone(),
                body: body.clone(),
            };

            let sent = tokio::time::timeout(
                self.request_timeout,
                self.transport
                    .send(request, self.credential.expose_secret()),
            )
            .await;

            let response = match sent {
                Err(_) => {
                    warn!(attempt, "Request deadline exceeded");
                    return Err(ApiError::Network {
                        endpoint: endpoint.name.clone(),
                        message: format!(
                            "no response within {}s",
                            self.request_timeout.as_secs()
                        ),
                    });
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "Request failed");
                    return Err(ApiError::Network {
                        endpoint: endpoint.name.clone(),
                        message: e.to_string(),
                    });
                }
                Ok(Ok(response)) => response,
            };

            let status = response.status;
            if (200..300).contains(&status) {
                debug!(attempt, status, bytes = response.body.len(), "Request succeeded");
                return Ok(response.body);
            }

            if ApiError::is_auth_status(status) {
                warn!(status, "Credential rejected");
                return Err(ApiError::Auth {
                    scope: self.scope.label().to_string(),
                    endpoint: endpoint.name.clone(),
                    status,
                });
            }

            if ApiError::is_retryable_status(status) {
                if retries < self.retry.max_retries {
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        attempt,
                        status,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.retries.inc();
                    }
                    tokio::time::sleep(delay).await;
                    retries += 1;
                    continue;
                }

                warn!(attempt, status, "Retries exhausted");
                return Err(ApiError::Transient {
                    endpoint: endpoint.name.clone(),
                    status,
                    attempts: attempt,
                });
            }

            return Err(ApiError::Status {
                endpoint: endpoint.name.clone(),
                status,
            });
        }
    }
}
