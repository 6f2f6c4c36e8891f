//! Usage fetching and on-demand metrics
//!
//! Usage records come from a skip/limit or offset/limit paginated endpoint,
//! per [`PagingStyle`]. Paging stops on
//! `has_more == false`, on a short page when the flag is absent, after
//! `max_pages`, or on the first failed page (records already fetched are kept).

use chrono::Utc;
use finpulse_common::{
    types::usage::DATE_FORMAT, DateRange, EndpointDefinition, EndpointRegistry, EndpointScope,
    FinPulseError, Result, UsageRecord, TENANT_PATH_PARAM,
};
use finpulse_metering::{MetricsEngine, MetricsResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{PagingStyle, UsageSettings};
use crate::discovery::TenantDiscovery;
use crate::http::HttpExecutor;

/// One parsed page of usage records
#[derive(Debug, Clone, PartialEq)]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    pub has_more: Option<bool>,
}

impl UsagePage {
    /// Parse a page body: records under `data`, `items`, or a bare array
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| FinPulseError::Parse(format!("usage page: {}", e)))?;

        let elements = value
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| value.get("items").and_then(Value::as_array))
            .or_else(|| value.as_array())
            .cloned()
            .unwrap_or_default();

        let mut records = Vec::with_capacity(elements.len());
        for element in elements {
            match serde_json::from_value::<UsageRecord>(element) {
                Ok(record) => records.push(record),
                Err(e) => debug!(error = %e, "Skipping malformed usage record"),
            }
        }

        Ok(Self {
            records,
            has_more: value.get("has_more").and_then(Value::as_bool),
        })
    }

    fn continues(&self, page_size: u32) -> bool {
        self.has_more
            .unwrap_or(self.records.len() >= page_size as usize)
    }
}

/// Paginated usage record fetcher
pub struct UsageFetcher {
    executor: Arc<HttpExecutor>,
    endpoint: Arc<EndpointDefinition>,
    settings: UsageSettings,
}

impl UsageFetcher {
    pub fn new(
        executor: Arc<HttpExecutor>,
        endpoint: Arc<EndpointDefinition>,
        settings: UsageSettings,
    ) -> Self {
        Self {
            executor,
            endpoint,
            settings,
        }
    }

    /// Fetch every page for the range, optionally within one tenant
    ///
    /// Fails only when the first page fails.
    #[instrument(skip(self), fields(endpoint = %self.endpoint.name))]
    pub async fn fetch(
        &self,
        start: &str,
        end: &str,
        tenant_id: Option<&str>,
    ) -> Result<Vec<UsageRecord>> {
        let mut path_params = HashMap::new();
        if let Some(tenant) = tenant_id {
            path_params.insert(TENANT_PATH_PARAM.to_string(), tenant.to_string());
        }

        let page_size = self.settings.page_size.max(1);
        let mut records = Vec::new();
        let start_key = self.settings.paging.start_key();
        let mut position = 0u64;

        for page_number in 0..self.settings.max_pages {
            let query = vec![
                (start_key.to_string(), position.to_string()),
                ("limit".to_string(), page_size.to_string()),
                ("start_date".to_string(), start.to_string()),
                ("end_date".to_string(), end.to_string()),
            ];

            let page = match self
                .executor
                .execute(&self.endpoint, &path_params, &query, None)
                .await
                .map_err(FinPulseError::from)
                .and_then(|body| UsagePage::parse(&body))
            {
                Ok(page) => page,
                Err(e) if page_number == 0 => return Err(e),
                Err(e) => {
                    warn!(page = page_number, error = %e, kept = records.len(), "Usage page failed, keeping partial data");
                    break;
                }
            };

            let fetched = page.records.len();
            let more = page.continues(page_size);
            records.extend(page.records);
            debug!(page = page_number, fetched, total = records.len(), "Fetched usage page");

            if !more || fetched == 0 {
                break;
            }
            position += page_size as u64;
        }

        Ok(records)
    }
}

/// Metrics plus the number of records they were computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub result: MetricsResult,
    pub record_count: usize,
}

/// Fetches usage for a date range and runs the metrics engine over it
pub struct MetricsService {
    global: Arc<HttpExecutor>,
    tenant: Option<Arc<HttpExecutor>>,
    registry: Arc<EndpointRegistry>,
    discovery: Arc<TenantDiscovery>,
    engine: MetricsEngine,
    settings: UsageSettings,
}

impl MetricsService {
    pub fn new(
        global: Arc<HttpExecutor>,
        tenant: Option<Arc<HttpExecutor>>,
        registry: Arc<EndpointRegistry>,
        discovery: Arc<TenantDiscovery>,
        engine: MetricsEngine,
        settings: UsageSettings,
    ) -> Self {
        Self {
            global,
            tenant,
            registry,
            discovery,
            engine,
            settings,
        }
    }

    /// Fetch usage records for the range from every applicable scope
    async fn fetch_records(&self, start: &str, end: &str) -> Result<Vec<UsageRecord>> {
        let endpoint = self.registry.find(&self.settings.endpoint).ok_or_else(|| {
            FinPulseError::Validation(format!(
                "usage endpoint {} is not in the endpoint catalog",
                self.settings.endpoint
            ))
        })?;

        match endpoint.scope {
            EndpointScope::Global => {
                UsageFetcher::new(self.global.clone(), endpoint, self.settings.clone())
                    .fetch(start, end, None)
                    .await
            }
            EndpointScope::Tenant => {
                let executor = self.tenant.clone().ok_or_else(|| {
                    FinPulseError::Validation("usage endpoint is tenant-scoped but no tenant credential is configured".into())
                })?;
                let fetcher = UsageFetcher::new(executor, endpoint, self.settings.clone());

                let mut records = Vec::new();
                for tenant in self.discovery.current_tenants().iter() {
                    match fetcher.fetch(start, end, Some(tenant.as_str())).await {
                        Ok(batch) => records.extend(batch.into_iter().map(|record| {
                            if record.tenant_id.is_some() {
                                record
                            } else {
                                record.with_tenant(tenant.as_str())
                            }
                        })),
                        Err(e) => warn!(tenant = %tenant, error = %e, "Usage fetch failed for tenant"),
                    }
                }
                Ok(records)
            }
        }
    }

    /// Fetch and compute metrics; absent dates default to the lookback window
    #[instrument(skip(self))]
    pub async fn compute(&self, range: DateRange) -> Result<MetricsReport> {
        let today = Utc::now().date_naive();
        let (start, end) = range.resolve(today, self.settings.lookback_days);
        let start = start.format(DATE_FORMAT).to_string();
        let end = end.format(DATE_FORMAT).to_string();

        let records = self.fetch_records(&start, &end).await?;
        let result = self
            .engine
            .calculate_all_metrics(&records, Some(&start), Some(&end));

        info!(
            records = records.len(),
            total_cost = result.metrics.total_cost,
            "Metrics computed"
        );
        Ok(MetricsReport {
            result,
            record_count: records.len(),
        })
    }
}
