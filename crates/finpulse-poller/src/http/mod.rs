//! Authenticated HTTP execution against the billing API
//!
//! - [`HttpTransport`]: the wire seam, with a `reqwest` implementation
//! - [`RetryPolicy`]: exponential backoff for transient failures
//! - [`HttpExecutor`]: one per credential scope; builds URLs, retries, classifies failures

pub mod executor;
pub mod retry;
pub mod transport;

pub use executor::HttpExecutor;
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};

#[cfg(test)]
pub(crate) mod testing;
