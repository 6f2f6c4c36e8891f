//! Connection gateway
//!
//! HTTP surface of the poller:
//! - `GET /health`: liveness and connection count
//! - `GET /snapshot`: read-only view of the snapshot cache
//! - `GET /metrics`: Prometheus text format
//! - `GET /ws`: dashboard channel, one polling loop per connection

pub mod session;
pub mod socket;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use dashmap::DashMap;
use finpulse_common::{DateRange, Result, ServerMessage};
use finpulse_metering::SnapshotCache;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::orchestrator::PollingOrchestrator;
use crate::telemetry::{self, PollerMetrics};
use crate::usage::MetricsService;

pub use session::ConnectionSession;

/// Endpoint name carried by metrics data messages
pub const METRICS_ENDPOINT: &str = "metrics";

/// Capacity of the all-connections broadcast channel
pub const BROADCAST_CAPACITY: usize = 256;

/// Shared state of the gateway
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PollingOrchestrator>,
    pub metrics_service: Arc<MetricsService>,
    pub cache: Arc<SnapshotCache>,
    pub telemetry: Arc<PollerMetrics>,
    pub registry: Registry,
    pub broadcast_tx: broadcast::Sender<ServerMessage>,
    pub sessions: Arc<DashMap<Uuid, Arc<ConnectionSession>>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<PollingOrchestrator>,
        metrics_service: Arc<MetricsService>,
        cache: Arc<SnapshotCache>,
        telemetry: Arc<PollerMetrics>,
        registry: Registry,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            orchestrator,
            metrics_service,
            cache,
            telemetry,
            registry,
            broadcast_tx,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every open connection
    pub fn close_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/snapshot", get(get_snapshot))
        .route("/metrics", get(get_metrics))
        .route("/ws", get(socket::websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": finpulse_common::VERSION,
        "connections": state.connection_count(),
        "snapshot_entries": state.cache.len(),
    }))
}

async fn get_snapshot(State(state): State<AppState>) -> Json<finpulse_metering::SnapshotView> {
    Json(state.cache.snapshot())
}

async fn get_metrics(State(state): State<AppState>) -> Response {
    match telemetry::encode(&state.registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Compute metrics and push them to every connection
///
/// Returns the number of connections the result was delivered to.
pub async fn broadcast_metrics(state: &AppState, range: DateRange) -> Result<usize> {
    let report = state.metrics_service.compute(range).await?;
    let message = ServerMessage::data(METRICS_ENDPOINT, None, serde_json::to_value(&report)?);
    let delivered = state.broadcast_tx.send(message).unwrap_or(0);
    info!(delivered, "Metrics broadcast");
    Ok(delivered)
}

/// Periodic full-refresh broadcast; `None` when `period` is zero
pub fn spawn_metrics_broadcast(
    state: AppState,
    period: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        info!("Periodic metrics broadcast disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if state.broadcast_tx.receiver_count() == 0 {
                        debug!("No connections, skipping metrics broadcast");
                        continue;
                    }
                    if let Err(e) = broadcast_metrics(&state, DateRange::default()).await {
                        error!(error = %e, "Periodic metrics broadcast failed");
                    }
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::config::FinPulseConfig;
    use crate::http::testing::RouteTransport;
    use crate::http::{HttpResponse, HttpTransport};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use finpulse_common::{
        EndpointDefinition, EndpointRegistry, EndpointScope, HttpMethod, MessageType,
    };
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    const USAGE_BODY: &str = r#"{"data":[{"session_id":"s1","user_id":"alice","acu_consumed":10}],"has_more":false}"#;

    fn app(transport: RouteTransport) -> (App, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FinPulseConfig::default();
        config.api.global_token = Some("global-token-0123456789".into());
        config.snapshot.path = dir.path().join("snapshot.json").display().to_string();

        let registry = EndpointRegistry::new(vec![EndpointDefinition::new(
            "consumption_daily",
            "/consumption/daily",
            HttpMethod::Get,
            EndpointScope::Global,
            "https://global.test",
        )])
        .unwrap();
        let transport: Arc<dyn HttpTransport> = Arc::new(transport);
        (App::build(config, registry, transport).unwrap(), dir)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_connections() {
        let (app, _dir) = app(RouteTransport::new());
        let (status, body) = get(app.router(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn test_snapshot_route_returns_cache_view() {
        let (app, _dir) = app(RouteTransport::new());
        app.cache.put("members", r#"{"count":3}"#);

        let (status, body) = get(app.router(), "/snapshot").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["endpoints"]["members"]["count"], 3);
    }

    #[tokio::test]
    async fn test_metrics_route_exposes_counters() {
        let (app, _dir) = app(RouteTransport::new());
        app.telemetry.poll_cycles.inc();

        let (status, body) = get(app.router(), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("finpulse_poll_cycles_total 1"));
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_fetch_metrics_acks_then_replies_with_data() {
        let (app, _dir) = app(RouteTransport::new().route(
            "consumption/daily",
            vec![HttpResponse::new(200, USAGE_BODY)],
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();

        socket::handle_client_message(
            &app.state,
            &tx,
            r#"{"action":"fetch_metrics","start_date":"2024-01-01","end_date":"2024-01-31"}"#,
        )
        .await;

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].kind, MessageType::Ack);
        assert_eq!(messages[1].kind, MessageType::Status);
        assert_eq!(messages[2].kind, MessageType::Data);
        assert_eq!(messages[2].endpoint.as_deref(), Some(METRICS_ENDPOINT));
        assert_eq!(messages[2].data["record_count"], 1);
        assert_eq!(messages[2].data["result"]["metrics"]["total_cost"], 0.5);
    }

    #[tokio::test]
    async fn test_bad_client_messages_get_errors() {
        let (app, _dir) = app(RouteTransport::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        socket::handle_client_message(&app.state, &tx, "not json").await;
        socket::handle_client_message(&app.state, &tx, r#"{"action":"dance"}"#).await;
        socket::handle_client_message(
            &app.state,
            &tx,
            r#"{"action":"fetch_metrics","start_date":"2024-02-01","end_date":"2024-01-01"}"#,
        )
        .await;

        let kinds: Vec<MessageType> = drain(&mut rx).into_iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::Error,
                MessageType::Ack,
                MessageType::Error,
                MessageType::Ack,
                MessageType::Error,
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_broadcasts_to_subscribers() {
        let (app, _dir) = app(RouteTransport::new().route(
            "consumption/daily",
            vec![HttpResponse::new(200, USAGE_BODY)],
        ));
        let mut subscriber = app.state.broadcast_tx.subscribe();
        let (tx, mut rx) = mpsc::unbounded_channel();

        socket::handle_client_message(&app.state, &tx, r#"{"action":"refresh"}"#).await;

        let shared = subscriber.try_recv().unwrap();
        assert_eq!(shared.kind, MessageType::Data);
        assert_eq!(shared.endpoint.as_deref(), Some(METRICS_ENDPOINT));

        let direct: Vec<MessageType> = drain(&mut rx).into_iter().map(|m| m.kind).collect();
        assert_eq!(direct, vec![MessageType::Ack, MessageType::Status]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_broadcast_waits_for_first_period() {
        let (app, _dir) = app(RouteTransport::new().route(
            "consumption/daily",
            vec![HttpResponse::new(200, USAGE_BODY)],
        ));
        let mut subscriber = app.state.broadcast_tx.subscribe();
        let cancel = CancellationToken::new();

        let handle =
            spawn_metrics_broadcast(app.state.clone(), Duration::from_secs(60), cancel.clone())
                .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(subscriber.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(subscriber.recv().await.unwrap().kind, MessageType::Data);

        cancel.cancel();
        handle.await.unwrap();
        assert!(spawn_metrics_broadcast(app.state.clone(), Duration::ZERO, cancel).is_none());
    }
}
