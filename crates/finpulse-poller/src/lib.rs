//! # FinPulse Poller
//!
//! Polls a billing API's global and per-tenant endpoints on behalf of each
//! connected dashboard, caches the last good response per endpoint, and
//! serves on-demand cost metrics over the same channel.
//!
//! ## Components
//!
//! - [`http`]: authenticated calls with retry and failure classification
//! - [`discovery`]: tenant list, fixed or refreshed from the global scope
//! - [`orchestrator`]: per-connection poll cycles and snapshot flushing
//! - [`usage`]: paginated usage fetch feeding the metrics engine
//! - [`gateway`]: HTTP and WebSocket surface
//! - [`app`]: wiring from [`config::FinPulseConfig`]

pub mod app;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod gateway;
pub mod http;
pub mod orchestrator;
pub mod telemetry;
pub mod usage;

pub use app::App;
pub use config::{FinPulseConfig, LogFormat};
pub use discovery::{DiscoveryMode, TenantDiscovery};
pub use gateway::AppState;
pub use http::{HttpExecutor, HttpTransport, ReqwestTransport};
pub use orchestrator::PollingOrchestrator;
pub use telemetry::PollerMetrics;
pub use usage::{MetricsReport, MetricsService, UsageFetcher};
