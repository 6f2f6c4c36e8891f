//! # FinPulse Metering
//!
//! Cost and usage aggregation for the FinPulse poller.
//!
//! ## Cost Formula
//!
//! ```text
//! cost = units × unit_price
//! ```
//!
//! Currency outputs are rounded to 2 decimals, half away from zero. Each
//! record's session duration is approximated as `max(1, trunc(units / 5))`
//! whole minutes.
//!
//! ## Components
//!
//! - [`MetricsEngine`]: computes the 20 aggregates over a record set
//! - [`SnapshotCache`]: concurrent last-known-good response store with a
//!   single durable flush

pub mod metrics;
pub mod snapshot;

pub use metrics::{Metrics, MetricsEngine, MetricsResult, Period, PriceConfig};
pub use snapshot::{SnapshotCache, SnapshotView};
