//! Tenant discovery
//!
//! Resolves which tenants tenant-scoped endpoints are polled for:
//! - **Fixed**: one configured tenant, ready immediately
//! - **Auto**: the global "list tenants" endpoint is called on a timer and the
//!   cached list is swapped atomically on success
//! - **Disabled**: no tenant credential, tenant endpoints are never polled
//!
//! A failed or empty refresh keeps the previous list.

use finpulse_common::{DiscoveryError, EndpointRegistry};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::http::HttpExecutor;
use crate::telemetry::PollerMetrics;

/// How the tenant list is obtained, chosen once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    Fixed(String),
    Auto,
    Disabled,
}

/// Locates the tenant array inside a "list tenants" response
pub type TenantArrayLocator = for<'a> fn(&'a Value) -> Option<&'a Vec<Value>>;

/// Tried in order; the first locator that finds an array wins
pub const EXTRACTION_STRATEGIES: [(&str, TenantArrayLocator); 3] = [
    ("items", items_array),
    ("organizations", organizations_array),
    ("root", root_array),
];

/// Keys holding a tenant id inside each array element, in priority order
pub const TENANT_ID_KEYS: [&str; 2] = ["id", "org_id"];

fn items_array(body: &Value) -> Option<&Vec<Value>> {
    body.get("items")?.as_array()
}

fn organizations_array(body: &Value) -> Option<&Vec<Value>> {
    body.get("organizations")?.as_array()
}

fn root_array(body: &Value) -> Option<&Vec<Value>> {
    body.as_array()
}

/// Extract tenant ids; numeric ids are stringified
///
/// The first id key present in an element decides; an element whose id is
/// blank is skipped even when a lower-priority key holds a value.
pub fn extract_tenant_ids(body: &Value) -> Vec<String> {
    let Some(elements) = EXTRACTION_STRATEGIES
        .iter()
        .find_map(|(_, locate)| locate(body))
    else {
        return Vec::new();
    };

    elements
        .iter()
        .filter_map(|element| {
            TENANT_ID_KEYS
                .iter()
                .find_map(|key| element.get(*key))
                .and_then(tenant_id_string)
        })
        .collect()
}

fn tenant_id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Current tenant list with a readiness flag
pub struct TenantDiscovery {
    mode: DiscoveryMode,
    tenants: RwLock<Arc<Vec<String>>>,
    ready: AtomicBool,
    executor: Option<Arc<HttpExecutor>>,
    registry: Arc<EndpointRegistry>,
    list_endpoint: String,
    timeout: Duration,
    metrics: Option<Arc<PollerMetrics>>,
}

impl TenantDiscovery {
    /// Single configured tenant
    pub fn fixed(tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        Self {
            mode: DiscoveryMode::Fixed(tenant_id.clone()),
            tenants: RwLock::new(Arc::new(vec![tenant_id])),
            ready: AtomicBool::new(true),
            executor: None,
            registry: Arc::new(EndpointRegistry::default()),
            list_endpoint: String::new(),
            timeout: Duration::ZERO,
            metrics: None,
        }
    }

    /// No tenant credential
    pub fn disabled() -> Self {
        Self {
            mode: DiscoveryMode::Disabled,
            tenants: RwLock::new(Arc::new(Vec::new())),
            ready: AtomicBool::new(true),
            executor: None,
            registry: Arc::new(EndpointRegistry::default()),
            list_endpoint: String::new(),
            timeout: Duration::ZERO,
            metrics: None,
        }
    }

    /// Periodic discovery through the global executor
    pub fn auto(
        executor: Arc<HttpExecutor>,
        registry: Arc<EndpointRegistry>,
        list_endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            mode: DiscoveryMode::Auto,
            tenants: RwLock::new(Arc::new(Vec::new())),
            ready: AtomicBool::new(false),
            executor: Some(executor),
            registry,
            list_endpoint: list_endpoint.into(),
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PollerMetrics>) -> Self {
        metrics
            .discovered_tenants
            .set(self.tenants.read().len() as i64);
        self.metrics = Some(metrics);
        self
    }

    pub fn mode(&self) -> &DiscoveryMode {
        &self.mode
    }

    /// Whether cache keys are tagged with the tenant id
    pub fn is_multi_tenant(&self) -> bool {
        self.mode == DiscoveryMode::Auto
    }

    /// At least one discovery attempt has completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn current_tenants(&self) -> Arc<Vec<String>> {
        self.tenants.read().clone()
    }

    /// Run one discovery attempt; marks discovery ready whatever the outcome
    #[instrument(skip(self), fields(endpoint = %self.list_endpoint))]
    pub async fn refresh(&self) -> Result<usize, DiscoveryError> {
        if self.mode != DiscoveryMode::Auto {
            return Ok(self.current_tenants().len());
        }

        let result = self.fetch().await;
        match &result {
            Ok(ids) => {
                let count = ids.len();
                *self.tenants.write() = Arc::new(ids.clone());
                if let Some(metrics) = &self.metrics {
                    metrics.discovered_tenants.set(count as i64);
                }
                info!(tenants = count, "Tenant list refreshed");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retained = self.current_tenants().len(),
                    "Tenant discovery failed, keeping previous list"
                );
            }
        }

        self.ready.store(true, Ordering::Release);
        result.map(|ids| ids.len())
    }

    async fn fetch(&self) -> Result<Vec<String>, DiscoveryError> {
        let endpoint = self
            .registry
            .find(&self.list_endpoint)
            .ok_or_else(|| DiscoveryError::EndpointMissing(self.list_endpoint.clone()))?;
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| DiscoveryError::EndpointMissing(self.list_endpoint.clone()))?;

        let body = tokio::time::timeout(
            self.timeout,
            executor.execute(&endpoint, &HashMap::new(), &[], None),
        )
        .await
        .map_err(|_| DiscoveryError::Timeout(self.timeout.as_secs()))??;

        let parsed: Value =
            serde_json::from_str(&body).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        let ids = extract_tenant_ids(&parsed);
        if ids.is_empty() {
            return Err(DiscoveryError::Empty);
        }
        Ok(ids)
    }

    /// Start the refresh timer (first run immediate); only auto mode spawns
    pub fn spawn_refresh(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if self.mode != DiscoveryMode::Auto {
            debug!(mode = ?self.mode, "Tenant discovery timer not needed");
            return None;
        }

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = this.refresh().await;
                    }
                }
            }
            debug!("Tenant discovery timer stopped");
        }))
    }
}
