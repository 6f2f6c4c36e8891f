//! Polling orchestrator
//!
//! Per connection, a fixed-interval timer fires a poll cycle:
//!
//! 1. Abort calls still pending from the previous cycle; each counts as a
//!    failed completion and is reported to the connection
//! 2. Plan one call per global endpoint and one per tenant endpoint per known tenant
//! 3. Push every response to the connection as it completes
//! 4. Flush the snapshot exactly once, when the last dispatched call completes
//!
//! Failures are reported to the connection and counted as completions; they
//! never abort a cycle or close the connection.

use finpulse_common::{
    snapshot_key, EndpointDefinition, EndpointRegistry, EndpointScope, ServerMessage,
    TENANT_PATH_PARAM,
};
use finpulse_metering::SnapshotCache;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::discovery::TenantDiscovery;
use crate::http::HttpExecutor;
use crate::telemetry::{PollerMetrics, OUTCOME_FAILURE, OUTCOME_MALFORMED, OUTCOME_SUCCESS};

/// Outbound message channel of one connection
pub type MessageSink = UnboundedSender<ServerMessage>;

/// One planned call of a cycle
#[derive(Clone)]
pub struct PollTarget {
    pub endpoint: Arc<EndpointDefinition>,
    pub tenant_id: Option<String>,
    pub cache_key: String,
    pub executor: Arc<HttpExecutor>,
}

/// Schedules poll cycles for dashboard connections
pub struct PollingOrchestrator {
    registry: Arc<EndpointRegistry>,
    global: Arc<HttpExecutor>,
    tenant: Option<Arc<HttpExecutor>>,
    discovery: Arc<TenantDiscovery>,
    cache: Arc<SnapshotCache>,
    metrics: Arc<PollerMetrics>,
    interval: Duration,
}

impl PollingOrchestrator {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        global: Arc<HttpExecutor>,
        tenant: Option<Arc<HttpExecutor>>,
        discovery: Arc<TenantDiscovery>,
        cache: Arc<SnapshotCache>,
        metrics: Arc<PollerMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            global,
            tenant,
            discovery,
            cache,
            metrics,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Calls to dispatch this cycle
    ///
    /// Tenant endpoints are left out entirely while discovery is not ready,
    /// no tenants are known, or no tenant executor exists.
    pub fn plan_cycle(&self) -> Vec<PollTarget> {
        let mut targets: Vec<PollTarget> = self
            .registry
            .read_endpoints(EndpointScope::Global)
            .into_iter()
            .map(|endpoint| PollTarget {
                cache_key: snapshot_key(&endpoint.name, None),
                endpoint,
                tenant_id: None,
                executor: self.global.clone(),
            })
            .collect();

        let Some(tenant_executor) = &self.tenant else {
            return targets;
        };
        if !self.discovery.is_ready() {
            debug!("Tenant discovery not ready, skipping tenant endpoints");
            return targets;
        }
        let tenants = self.discovery.current_tenants();
        if tenants.is_empty() {
            return targets;
        }

        let tag_keys = self.discovery.is_multi_tenant();
        for endpoint in self.registry.read_endpoints(EndpointScope::Tenant) {
            for tenant in tenants.iter() {
                let key_tenant = if tag_keys { Some(tenant.as_str()) } else { None };
                targets.push(PollTarget {
                    endpoint: endpoint.clone(),
                    tenant_id: Some(tenant.clone()),
                    cache_key: snapshot_key(&endpoint.name, key_tenant),
                    executor: tenant_executor.clone(),
                });
            }
        }

        targets
    }

    /// Dispatch one cycle into `tasks`
    ///
    /// Returns the cycle's completion tracker, or `None` when nothing was
    /// planned.
    pub fn run_cycle(
        &self,
        sink: &MessageSink,
        tasks: &mut JoinSet<()>,
    ) -> Option<Arc<CycleTracker>> {
        let targets = self.plan_cycle();
        self.metrics.poll_cycles.inc();

        if targets.is_empty() {
            debug!("Nothing to poll this cycle");
            return None;
        }

        let tracker = Arc::new(CycleTracker::new(
            &targets,
            self.cache.clone(),
            self.metrics.clone(),
        ));
        for (index, target) in targets.into_iter().enumerate() {
            let sink = sink.clone();
            let cache = self.cache.clone();
            let tracker = tracker.clone();

            tasks.spawn(async move {
                let (message, outcome) = poll_target(&target, &cache).await;
                if tracker.settle(index) {
                    tracker.metrics.record_call(target.endpoint.scope.label(), outcome);
                    // Receiver gone means the connection is closing
                    let _ = sink.send(message);
                    tracker.complete(1);
                }
            });
        }

        debug!(expected = tracker.expected(), "Poll cycle dispatched");
        Some(tracker)
    }

    /// Start the timer loop of one connection (first tick immediate)
    ///
    /// Calls still pending at the next tick are aborted and reported as
    /// failed. The loop ends when `cancel` fires or the sink closes; pending
    /// calls are aborted either way.
    pub fn spawn_connection_loop(
        self: &Arc<Self>,
        sink: MessageSink,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight: JoinSet<()> = JoinSet::new();
            let mut current: Option<Arc<CycleTracker>> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if sink.is_closed() {
                            break;
                        }
                        in_flight.abort_all();
                        in_flight = JoinSet::new();
                        if let Some(previous) = current.take() {
                            previous.abandon(&sink);
                        }
                        current = this.run_cycle(&sink, &mut in_flight);
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }

            in_flight.abort_all();
            info!("Connection poll loop stopped");
        })
    }
}

/// Completion bookkeeping of one dispatched cycle
///
/// Every planned call is settled exactly once, either by its task or by
/// [`CycleTracker::abandon`]. The call that brings the count to the
/// expected total triggers the cycle's single flush.
pub struct CycleTracker {
    calls: Vec<(Arc<EndpointDefinition>, Option<String>)>,
    settled: Vec<AtomicBool>,
    completed: AtomicUsize,
    cache: Arc<SnapshotCache>,
    metrics: Arc<PollerMetrics>,
}

impl CycleTracker {
    fn new(targets: &[PollTarget], cache: Arc<SnapshotCache>, metrics: Arc<PollerMetrics>) -> Self {
        Self {
            calls: targets
                .iter()
                .map(|t| (t.endpoint.clone(), t.tenant_id.clone()))
                .collect(),
            settled: targets.iter().map(|_| AtomicBool::new(false)).collect(),
            completed: AtomicUsize::new(0),
            cache,
            metrics,
        }
    }

    pub fn expected(&self) -> usize {
        self.calls.len()
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Claim call `index`; false when it was already settled
    fn settle(&self, index: usize) -> bool {
        !self.settled[index].swap(true, Ordering::AcqRel)
    }

    fn complete(&self, count: usize) {
        if count == 0 {
            return;
        }
        if self.completed.fetch_add(count, Ordering::AcqRel) + count == self.expected() {
            self.metrics.snapshot_flushes.inc();
            let cache = self.cache.clone();
            // Detached so aborting the cycle cannot interrupt the write
            tokio::spawn(async move {
                if let Err(e) = cache.flush().await {
                    error!(error = %e, "Snapshot flush failed");
                }
            });
        }
    }

    /// Settle every call still pending as failed and report each one
    ///
    /// Returns the number of calls abandoned.
    pub fn abandon(&self, sink: &MessageSink) -> usize {
        let mut abandoned = 0;
        for (index, (endpoint, tenant_id)) in self.calls.iter().enumerate() {
            if !self.settle(index) {
                continue;
            }
            abandoned += 1;
            self.metrics
                .record_call(endpoint.scope.label(), OUTCOME_FAILURE);
            warn!(
                endpoint = %endpoint.name,
                tenant = ?tenant_id,
                "Call still pending at next cycle, aborted"
            );
            let _ = sink.send(ServerMessage::error(
                Some(endpoint.name.clone()),
                tenant_id.clone(),
                "aborted",
                format!(
                    "call to {} did not complete within the poll interval",
                    endpoint.name
                ),
            ));
        }
        self.complete(abandoned);
        abandoned
    }
}

/// Run one call and build the message for the connection
async fn poll_target(target: &PollTarget, cache: &SnapshotCache) -> (ServerMessage, &'static str) {
    let name = target.endpoint.name.as_str();

    let mut path_params = HashMap::new();
    if let Some(tenant) = &target.tenant_id {
        path_params.insert(TENANT_PATH_PARAM.to_string(), tenant.clone());
    }

    match target
        .executor
        .execute(&target.endpoint, &path_params, &[], None)
        .await
    {
        Ok(body) if body.trim().is_empty() => (
            ServerMessage::data(name, target.tenant_id.clone(), Value::Null),
            OUTCOME_SUCCESS,
        ),
        Ok(body) => match cache.put(&target.cache_key, &body) {
            Some(value) => (
                ServerMessage::data(name, target.tenant_id.clone(), value),
                OUTCOME_SUCCESS,
            ),
            None => (
                ServerMessage::error(
                    Some(name.to_string()),
                    target.tenant_id.clone(),
                    "parse",
                    format!("endpoint {} returned a body that is not valid JSON", name),
                ),
                OUTCOME_MALFORMED,
            ),
        },
        Err(e) => {
            warn!(
                endpoint = %name,
                tenant = ?target.tenant_id,
                kind = e.kind(),
                error = %e,
                "Endpoint call failed"
            );
            (
                ServerMessage::error(
                    Some(name.to_string()),
                    target.tenant_id.clone(),
                    e.kind(),
                    e.to_string(),
                ),
                OUTCOME_FAILURE,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::RouteTransport;
    use crate::http::{HttpResponse, RetryPolicy};
    use finpulse_common::{HttpMethod, MessageType};
    use secrecy::SecretString;
    use tokio::sync::mpsc;

    fn endpoint(name: &str, scope: EndpointScope) -> EndpointDefinition {
        let (base, path) = match scope {
            EndpointScope::Global => ("https://global.test", format!("/{}", name)),
            EndpointScope::Tenant => ("https://tenant.test", format!("/{{org_id}}/{}", name)),
        };
        EndpointDefinition::new(name, path, HttpMethod::Get, scope, base)
    }

    fn registry() -> Arc<EndpointRegistry> {
        Arc::new(
            EndpointRegistry::new(vec![
                endpoint("members", EndpointScope::Global),
                endpoint("audit_logs", EndpointScope::Global),
                endpoint("billing", EndpointScope::Global),
                endpoint("sessions", EndpointScope::Tenant),
                endpoint("playbooks", EndpointScope::Tenant),
                EndpointDefinition::new(
                    "create_key",
                    "/keys",
                    HttpMethod::Post,
                    EndpointScope::Global,
                    "https://global.test",
                ),
            ])
            .unwrap(),
        )
    }

    struct Fixture {
        orchestrator: Arc<PollingOrchestrator>,
        cache: Arc<SnapshotCache>,
        metrics: Arc<PollerMetrics>,
        _dir: tempfile::TempDir,
    }

    fn fixture(transport: RouteTransport, discovery: TenantDiscovery, with_tenant: bool) -> Fixture {
        let transport = Arc::new(transport);
        let metrics = Arc::new(PollerMetrics::new().unwrap());
        let global = Arc::new(
            HttpExecutor::new(
                EndpointScope::Global,
                SecretString::from("global-token-0123456789"),
                transport.clone(),
            )
            .with_retry(RetryPolicy::none()),
        );
        let tenant = with_tenant.then(|| {
            Arc::new(
                HttpExecutor::new(
                    EndpointScope::Tenant,
                    SecretString::from("tenant-token-0123456789"),
                    transport.clone(),
                )
                .with_retry(RetryPolicy::none()),
            )
        });
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SnapshotCache::new(dir.path().join("snapshot.json")));

        let orchestrator = Arc::new(PollingOrchestrator::new(
            registry(),
            global,
            tenant,
            Arc::new(discovery),
            cache.clone(),
            metrics.clone(),
            Duration::from_secs(5),
        ));
        Fixture {
            orchestrator,
            cache,
            metrics,
            _dir: dir,
        }
    }

    fn ok_transport() -> RouteTransport {
        RouteTransport::new()
            .route("global.test", vec![HttpResponse::new(200, r#"{"ok":true}"#)])
            .route("tenant.test", vec![HttpResponse::new(200, r#"[1]"#)])
    }

    async fn auto_discovery_with(tenants: &[&str]) -> TenantDiscovery {
        let body = serde_json::json!({
            "items": tenants.iter().map(|t| serde_json::json!({"id": t})).collect::<Vec<_>>()
        });
        let transport = RouteTransport::new()
            .route("orgs.test", vec![HttpResponse::new(200, body.to_string())]);
        let registry = EndpointRegistry::new(vec![EndpointDefinition::new(
            "list_organizations",
            "/organizations",
            HttpMethod::Get,
            EndpointScope::Global,
            "https://orgs.test",
        )])
        .unwrap();
        let executor = HttpExecutor::new(
            EndpointScope::Global,
            SecretString::from("global-token-0123456789"),
            Arc::new(transport),
        );
        let discovery = TenantDiscovery::auto(
            Arc::new(executor),
            Arc::new(registry),
            "list_organizations",
            Duration::from_secs(10),
        );
        discovery.refresh().await.unwrap();
        discovery
    }

    #[tokio::test]
    async fn test_plan_counts_global_plus_tenant_pairs() {
        let f = fixture(ok_transport(), auto_discovery_with(&["org-1", "org-2"]).await, true);
        let targets = f.orchestrator.plan_cycle();

        // 3 global GETs + 2 tenant endpoints x 2 tenants; POST excluded
        assert_eq!(targets.len(), 7);
        assert!(targets
            .iter()
            .any(|t| t.cache_key == "sessions__tenant_org-2" && t.tenant_id.as_deref() == Some("org-2")));
        assert!(targets.iter().all(|t| t.endpoint.name != "create_key"));
    }

    #[tokio::test]
    async fn test_fixed_mode_keys_are_untagged() {
        let f = fixture(ok_transport(), TenantDiscovery::fixed("org-1"), true);
        let targets = f.orchestrator.plan_cycle();

        assert_eq!(targets.len(), 5);
        let sessions = targets.iter().find(|t| t.endpoint.name == "sessions").unwrap();
        assert_eq!(sessions.cache_key, "sessions");
        assert_eq!(sessions.tenant_id.as_deref(), Some("org-1"));
    }

    #[tokio::test]
    async fn test_tenant_endpoints_skipped_without_executor_or_tenants() {
        let f = fixture(ok_transport(), TenantDiscovery::fixed("org-1"), false);
        assert_eq!(f.orchestrator.plan_cycle().len(), 3);

        let f = fixture(ok_transport(), TenantDiscovery::disabled(), true);
        assert_eq!(f.orchestrator.plan_cycle().len(), 3);
    }

    #[tokio::test]
    async fn test_cycle_pushes_every_completion_and_flushes_once() {
        let transport = RouteTransport::new()
            .route("global.test/audit_logs", vec![HttpResponse::new(500, "")])
            .route("global.test/billing", vec![HttpResponse::new(200, "<html>")])
            .route("global.test", vec![HttpResponse::new(200, r#"{"ok":true}"#)])
            .route("tenant.test", vec![HttpResponse::new(200, r#"[1]"#)]);
        let f = fixture(transport, auto_discovery_with(&["org-1", "org-2"]).await, true);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let cycle = f.orchestrator.run_cycle(&tx, &mut tasks).unwrap();
        assert_eq!(cycle.expected(), 7);
        while tasks.join_next().await.is_some() {}
        assert_eq!(cycle.completed(), 7);
        while f.cache.flush_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut data = 0;
        let mut errors = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg.kind {
                MessageType::Data => data += 1,
                MessageType::Error => errors += 1,
                _ => {}
            }
        }
        assert_eq!(data, 5);
        assert_eq!(errors, 2);
        assert_eq!(f.metrics.snapshot_flushes.get(), 1);
        assert_eq!(f.cache.flush_count(), 1);

        let snapshot = f.cache.snapshot();
        assert!(snapshot.endpoints.contains_key("sessions__tenant_org-1"));
        assert!(!snapshot.endpoints.contains_key("audit_logs"));
        assert!(!snapshot.endpoints.contains_key("billing"));
    }

    #[tokio::test]
    async fn test_empty_cycle_does_not_flush() {
        let f = fixture(RouteTransport::new(), TenantDiscovery::disabled(), true);
        let empty = Arc::new(PollingOrchestrator::new(
            Arc::new(EndpointRegistry::default()),
            f.orchestrator.global.clone(),
            None,
            Arc::new(TenantDiscovery::disabled()),
            f.cache.clone(),
            f.metrics.clone(),
            Duration::from_secs(5),
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        assert!(empty.run_cycle(&tx, &mut tasks).is_none());
        assert_eq!(f.metrics.snapshot_flushes.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loop_ticks_and_stops_on_cancel() {
        let f = fixture(ok_transport(), TenantDiscovery::fixed("org-1"), true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let handle = f.orchestrator.spawn_connection_loop(tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.metrics.poll_cycles.get(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.metrics.poll_cycles.get(), 2);

        cancel.cancel();
        handle.await.unwrap();

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loop_stops_when_receiver_dropped() {
        let f = fixture(ok_transport(), TenantDiscovery::fixed("org-1"), true);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = f
            .orchestrator
            .spawn_connection_loop(tx, CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(rx);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_call_is_reported_and_cycle_still_flushes() {
        let transport = Arc::new(
            RouteTransport::new()
                .route("global.test/members", vec![HttpResponse::new(200, r#"{"ok":true}"#)])
                .route("global.test/billing", vec![HttpResponse::new(503, "")]),
        );
        let registry = Arc::new(
            EndpointRegistry::new(vec![
                endpoint("members", EndpointScope::Global),
                endpoint("billing", EndpointScope::Global),
            ])
            .unwrap(),
        );
        // Default backoff (1s + 2s + 4s) outlasts the 5s interval
        let global = Arc::new(HttpExecutor::new(
            EndpointScope::Global,
            SecretString::from("global-token-0123456789"),
            transport,
        ));
        let metrics = Arc::new(PollerMetrics::new().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SnapshotCache::new(dir.path().join("snapshot.json")));
        let orchestrator = Arc::new(PollingOrchestrator::new(
            registry,
            global,
            None,
            Arc::new(TenantDiscovery::disabled()),
            cache.clone(),
            metrics.clone(),
            Duration::from_secs(5),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = orchestrator.spawn_connection_loop(tx, cancel.clone());

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap();
        while cache.flush_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut aborted = 0;
        while let Ok(msg) = rx.try_recv() {
            if msg.kind == MessageType::Error {
                assert_eq!(msg.endpoint.as_deref(), Some("billing"));
                assert_eq!(msg.data["kind"], "aborted");
                aborted += 1;
            }
        }
        // Cycles at 0s and 5s were torn down by the next tick
        assert_eq!(aborted, 2);
        assert_eq!(metrics.snapshot_flushes.get(), 2);
        assert_eq!(metrics.call_count("global", OUTCOME_FAILURE), 2);
        assert!(cache.path().exists());
        assert!(cache.get("members").is_some());
    }

    #[tokio::test]
    async fn test_abandon_skips_settled_calls() {
        let f = fixture(ok_transport(), TenantDiscovery::disabled(), true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();

        let cycle = f.orchestrator.run_cycle(&tx, &mut tasks).unwrap();
        while tasks.join_next().await.is_some() {}

        assert_eq!(cycle.abandon(&tx), 0);
        assert_eq!(cycle.completed(), 3);
        assert_eq!(f.metrics.snapshot_flushes.get(), 1);
        while let Ok(msg) = rx.try_recv() {
            assert_eq!(msg.kind, MessageType::Data);
        }
    }
}
