//! Snapshot cache - last known good response per endpoint key

pub mod cache;

pub use cache::{SnapshotCache, SnapshotView};
