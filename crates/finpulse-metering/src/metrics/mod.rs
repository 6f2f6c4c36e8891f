//! Usage metrics - pure reduction of usage records into aggregates

pub mod calculator;

pub use calculator::{Metrics, MetricsEngine, MetricsResult, Period, PriceConfig};
