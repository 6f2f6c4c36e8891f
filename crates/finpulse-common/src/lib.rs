//! # FinPulse Common
//!
//! Shared types, errors, and wire messages for the FinPulse usage poller.
//!
//! ## Core Types
//!
//! - [`EndpointDefinition`]: one resolved remote API endpoint (verb, path template, scope)
//! - [`EndpointRegistry`]: read-only lookup table over the endpoint catalog
//! - [`UsageRecord`]: one consumption event reported by the billing API
//! - [`ServerMessage`]/[`ClientMessage`]: dashboard channel frames
//!
//! ## Errors
//!
//! - [`FinPulseError`]: unified error with [`ApiError`], [`DiscoveryError`]
//!   and [`ConfigError`] sub-kinds

pub mod error;
pub mod registry;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{ApiError, ConfigError, DiscoveryError, FinPulseError, Result};
pub use registry::EndpointRegistry;
pub use types::{
    endpoint::{EndpointDefinition, EndpointScope, HttpMethod},
    message::{ClientAction, ClientMessage, MessageType, ServerMessage},
    usage::{DateRange, UsageRecord},
};

/// FinPulse version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Separator between endpoint name and tenant id in snapshot keys
pub const TENANT_KEY_SEPARATOR: &str = "__tenant_";

/// Path parameter name substituted with the tenant id
pub const TENANT_PATH_PARAM: &str = "org_id";

/// Default polling interval per connection (seconds)
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default tenant discovery refresh interval (seconds)
pub const DEFAULT_DISCOVERY_REFRESH_SECS: u64 = 60;

/// Default worker pool size driving connection timers
pub const DEFAULT_SCHEDULER_POOL_SIZE: usize = 2;

/// Build the snapshot cache key for an endpoint, optionally tagged with a tenant
pub fn snapshot_key(endpoint_name: &str, tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant) => format!("{}{}{}", endpoint_name, TENANT_KEY_SEPARATOR, tenant),
        None => endpoint_name.to_string(),
    }
}
