//! Component wiring
//!
//! Builds executors, discovery, cache, orchestrator and gateway state from a
//! loaded configuration. The transport is injected so tests can script the
//! remote API.

use finpulse_common::{ApiError, ConfigError, EndpointRegistry, EndpointScope, Result};
use finpulse_metering::{MetricsEngine, SnapshotCache};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FinPulseConfig;
use crate::discovery::TenantDiscovery;
use crate::gateway::{self, AppState};
use crate::http::{HttpExecutor, HttpTransport};
use crate::orchestrator::PollingOrchestrator;
use crate::telemetry::PollerMetrics;
use crate::usage::MetricsService;

/// Fully wired poller
pub struct App {
    pub config: FinPulseConfig,
    pub registry: Arc<EndpointRegistry>,
    pub global: Arc<HttpExecutor>,
    pub tenant: Option<Arc<HttpExecutor>>,
    pub discovery: Arc<TenantDiscovery>,
    pub cache: Arc<SnapshotCache>,
    pub telemetry: Arc<PollerMetrics>,
    pub state: AppState,
}

impl App {
    /// Wire every component; fails when the global credential is missing
    pub fn build(
        config: FinPulseConfig,
        registry: EndpointRegistry,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let registry = Arc::new(registry);
        let prometheus_registry = prometheus::Registry::new();
        let telemetry = Arc::new(PollerMetrics::new()?);
        telemetry.register(&prometheus_registry)?;

        let timeout = config.api.request_timeout();
        let global = Arc::new(
            HttpExecutor::new(EndpointScope::Global, config.global_credential()?, transport.clone())
                .with_timeout(timeout)
                .with_metrics(telemetry.clone()),
        );
        let tenant = config.tenant_credential().map(|credential| {
            Arc::new(
                HttpExecutor::new(EndpointScope::Tenant, credential, transport.clone())
                    .with_timeout(timeout)
                    .with_metrics(telemetry.clone()),
            )
        });

        let discovery = match (&tenant, &config.api.tenant_id) {
            (None, _) => {
                warn!("No tenant credential configured, tenant endpoints will not be polled");
                TenantDiscovery::disabled()
            }
            (Some(_), Some(tenant_id)) => {
                info!(tenant = %tenant_id, "Using fixed tenant");
                TenantDiscovery::fixed(tenant_id.clone())
            }
            (Some(_), None) => TenantDiscovery::auto(
                global.clone(),
                registry.clone(),
                config.polling.list_tenants_endpoint.clone(),
                config.polling.discovery_timeout(),
            ),
        };
        let discovery = Arc::new(discovery.with_metrics(telemetry.clone()));

        let cache = Arc::new(SnapshotCache::new(&config.snapshot.path));

        let orchestrator = Arc::new(PollingOrchestrator::new(
            registry.clone(),
            global.clone(),
            tenant.clone(),
            discovery.clone(),
            cache.clone(),
            telemetry.clone(),
            config.polling.interval(),
        ));

        let metrics_service = Arc::new(MetricsService::new(
            global.clone(),
            tenant.clone(),
            registry.clone(),
            discovery.clone(),
            MetricsEngine::new(config.price_config()?),
            config.usage.clone(),
        ));

        let state = AppState::new(
            orchestrator,
            metrics_service,
            cache.clone(),
            telemetry.clone(),
            prometheus_registry,
        );

        info!(
            endpoints = registry.len(),
            tenant_scope = tenant.is_some(),
            mode = ?discovery.mode(),
            "Poller wired"
        );

        Ok(Self {
            config,
            registry,
            global,
            tenant,
            discovery,
            cache,
            telemetry,
            state,
        })
    }

    /// Call the tenant-list endpoint once with the global credential
    ///
    /// A rejected credential is fatal. Any other failure only warns, the
    /// remote API may be briefly unavailable at startup.
    pub async fn verify_global_credential(&self) -> Result<()> {
        let name = &self.config.polling.list_tenants_endpoint;
        let Some(endpoint) = self.registry.find(name) else {
            warn!(endpoint = %name, "Credential check skipped, endpoint not in catalog");
            return Ok(());
        };

        match self
            .global
            .execute(&endpoint, &HashMap::new(), &[], None)
            .await
        {
            Ok(_) => {
                info!("Global credential accepted");
                Ok(())
            }
            Err(ApiError::Auth { status, .. }) => Err(ConfigError::CredentialRejected {
                scope: EndpointScope::Global.label().to_string(),
                status,
            }
            .into()),
            Err(e) => {
                warn!(error = %e, "Credential check failed, continuing");
                Ok(())
            }
        }
    }

    pub fn router(&self) -> axum::Router {
        gateway::router(self.state.clone())
    }

    /// Start tenant discovery and the periodic metrics broadcast
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Some(handle) = self
            .discovery
            .spawn_refresh(self.config.polling.discovery_refresh(), cancel.child_token())
        {
            handles.push(handle);
        }
        if let Some(handle) = gateway::spawn_metrics_broadcast(
            self.state.clone(),
            Duration::from_secs(self.config.metrics.refresh_seconds),
            cancel.child_token(),
        ) {
            handles.push(handle);
        }
        handles
    }

    /// Close every connection and write a last snapshot
    pub async fn shutdown(&self) {
        self.state.close_all();
        if self.cache.is_empty() {
            return;
        }
        if let Err(e) = self.cache.flush().await {
            warn!(error = %e, "Final snapshot flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryMode;
    use crate::http::testing::RouteTransport;
    use crate::http::HttpResponse;
    use finpulse_common::{EndpointDefinition, FinPulseError, HttpMethod};

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(vec![
            EndpointDefinition::new(
                "list_organizations",
                "/organizations",
                HttpMethod::Get,
                EndpointScope::Global,
                "https://global.test",
            ),
            EndpointDefinition::new(
                "sessions",
                "/{org_id}/sessions",
                HttpMethod::Get,
                EndpointScope::Tenant,
                "https://tenant.test",
            ),
        ])
        .unwrap()
    }

    fn config(tenant_token: Option<&str>, tenant_id: Option<&str>) -> (FinPulseConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FinPulseConfig::default();
        config.api.global_token = Some("global-token-0123456789".into());
        config.api.tenant_token = tenant_token.map(String::from);
        config.api.tenant_id = tenant_id.map(String::from);
        config.snapshot.path = dir.path().join("snapshot.json").display().to_string();
        (config, dir)
    }

    #[test]
    fn test_discovery_mode_follows_credentials() {
        let transport: Arc<dyn HttpTransport> = Arc::new(RouteTransport::new());

        let (cfg, _dir) = config(None, None);
        let app = App::build(cfg, registry(), transport.clone()).unwrap();
        assert_eq!(app.discovery.mode(), &DiscoveryMode::Disabled);
        assert!(app.tenant.is_none());

        let (cfg, _dir) = config(Some("tenant-token-0123456789"), Some("org-1"));
        let app = App::build(cfg, registry(), transport.clone()).unwrap();
        assert_eq!(app.discovery.mode(), &DiscoveryMode::Fixed("org-1".into()));

        let (cfg, _dir) = config(Some("tenant-token-0123456789"), None);
        let app = App::build(cfg, registry(), transport).unwrap();
        assert_eq!(app.discovery.mode(), &DiscoveryMode::Auto);
        assert!(!app.discovery.is_ready());
    }

    #[test]
    fn test_build_without_global_credential_fails() {
        let (mut cfg, _dir) = config(None, None);
        cfg.api.global_token = None;
        let transport: Arc<dyn HttpTransport> = Arc::new(RouteTransport::new());

        let err = App::build(cfg, registry(), transport).err().unwrap();
        assert!(matches!(
            err,
            FinPulseError::Config(ConfigError::MissingCredential { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_credential_is_fatal() {
        let transport: Arc<dyn HttpTransport> = Arc::new(
            RouteTransport::new().route("/organizations", vec![HttpResponse::new(401, "")]),
        );
        let (cfg, _dir) = config(None, None);
        let app = App::build(cfg, registry(), transport).unwrap();

        let err = app.verify_global_credential().await.unwrap_err();
        assert!(matches!(
            err,
            FinPulseError::Config(ConfigError::CredentialRejected { status: 401, .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_api_is_not_fatal() {
        let transport: Arc<dyn HttpTransport> = Arc::new(
            RouteTransport::new().route("/organizations", vec![HttpResponse::new(404, "")]),
        );
        let (cfg, _dir) = config(None, None);
        let app = App::build(cfg, registry(), transport).unwrap();

        assert!(app.verify_global_credential().await.is_ok());
    }
}
