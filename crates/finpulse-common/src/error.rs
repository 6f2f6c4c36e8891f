//! Error types for FinPulse
//!
//! Provides a unified error type and the failure kinds of the polling engine:
//! API call failures, tenant discovery failures, and startup configuration errors.

use thiserror::Error;

/// Result type alias using FinPulseError
pub type Result<T> = std::result::Result<T, FinPulseError>;

/// Unified error type for FinPulse operations
#[derive(Debug, Error)]
pub enum FinPulseError {
    // Remote API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    // Tenant discovery errors
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    // Startup configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    // Malformed response bodies
    #[error("Parse error: {0}")]
    Parse(String),

    // Snapshot file errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Invalid input (dates, catalog entries)
    #[error("Validation error: {0}")]
    Validation(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FinPulseError {
    /// Short machine-readable kind, safe to forward to dashboard clients
    pub fn kind(&self) -> &'static str {
        match self {
            FinPulseError::Api(e) => e.kind(),
            FinPulseError::Discovery(_) => "discovery",
            FinPulseError::Config(_) => "config",
            FinPulseError::Parse(_) => "parse",
            FinPulseError::Storage(_) => "storage",
            FinPulseError::Serialization(_) => "serialization",
            FinPulseError::Validation(_) => "validation",
            FinPulseError::Internal(_) => "internal",
        }
    }
}

/// Remote API call failures
///
/// None of the variants carry the bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{scope} credential rejected for endpoint {endpoint} (HTTP {status})")]
    Auth {
        scope: String,
        endpoint: String,
        status: u16,
    },

    #[error("endpoint {endpoint} still failing after {attempts} attempts (HTTP {status})")]
    Transient {
        endpoint: String,
        status: u16,
        attempts: u32,
    },

    #[error("endpoint {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("request to endpoint {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },

    #[error("endpoint {endpoint} requires path parameter {param}")]
    MissingPathParam { endpoint: String, param: String },
}

impl ApiError {
    /// Whether an HTTP status warrants another attempt (5xx and 429)
    pub fn is_retryable_status(status: u16) -> bool {
        status >= 500 || status == 429
    }

    /// Whether an HTTP status means the credential is invalid or under-privileged
    pub fn is_auth_status(status: u16) -> bool {
        status == 401 || status == 403
    }

    /// Credential failures are terminal for the endpoint this cycle
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Auth { .. } => "auth",
            ApiError::Transient { .. } => "transient",
            ApiError::Status { .. } => "status",
            ApiError::Network { .. } => "network",
            ApiError::MissingPathParam { .. } => "request",
        }
    }
}

/// Tenant discovery failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("tenant list endpoint {0} is not in the endpoint catalog")]
    EndpointMissing(String),

    #[error("tenant list call failed: {0}")]
    Request(#[from] ApiError),

    #[error("tenant list call timed out after {0}s")]
    Timeout(u64),

    #[error("tenant list response is not valid JSON: {0}")]
    Malformed(String),

    #[error("tenant list response contained no tenant ids")]
    Empty,
}

/// Startup configuration errors, fatal to the process
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not configured. {hint}")]
    MissingCredential { name: String, hint: String },

    #[error("{scope} credential is configured but was rejected by the server (HTTP {status})")]
    CredentialRejected { scope: String, status: u16 },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// Implement From for common external error types
impl From<serde_json::Error> for FinPulseError {
    fn from(err: serde_json::Error) -> Self {
        FinPulseError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FinPulseError {
    fn from(err: std::io::Error) -> Self {
        FinPulseError::Storage(err.to_string())
    }
}
