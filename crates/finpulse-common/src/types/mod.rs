//! Core data types for FinPulse

pub mod endpoint;
pub mod message;
pub mod usage;
