//! Endpoint definitions - one remote API operation resolved from the catalog
//!
//! An endpoint is identified by a unique name and carries:
//! - a path template with `{param}` placeholders
//! - the HTTP verb used to call it
//! - its scope (account-wide or per tenant), which selects the credential
//! - the base URL resolved for that scope at load time

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::FinPulseError;

/// HTTP verb of a remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only POST, PUT and PATCH send a request body
    #[inline]
    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = FinPulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(FinPulseError::Validation(format!(
                "unsupported HTTP method: {}",
                other
            ))),
        }
    }
}

/// Credential scope of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointScope {
    /// Account-wide operation, called with the global credential
    #[serde(alias = "enterprise")]
    Global,
    /// Per-tenant operation, called with the tenant credential
    #[serde(alias = "organization")]
    Tenant,
}

impl EndpointScope {
    pub fn label(&self) -> &'static str {
        match self {
            EndpointScope::Global => "global",
            EndpointScope::Tenant => "tenant",
        }
    }
}

impl fmt::Display for EndpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A resolved remote API endpoint, immutable after load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    /// Unique catalog key
    pub name: String,

    /// Path relative to the base URL, e.g. `/organizations/{org_id}/sessions`
    pub path_template: String,

    pub method: HttpMethod,

    pub scope: EndpointScope,

    /// Base URL resolved for this endpoint's scope (or its override)
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Endpoint is marked beta by the remote API
    #[serde(default)]
    pub beta: bool,
}

impl EndpointDefinition {
    pub fn new(
        name: impl Into<String>,
        path_template: impl Into<String>,
        method: HttpMethod,
        scope: EndpointScope,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path_template: path_template.into(),
            method,
            scope,
            base_url: base_url.into(),
            description: None,
            beta: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_beta(mut self, beta: bool) -> Self {
        self.beta = beta;
        self
    }

    /// Whether this endpoint is polled (GET only)
    #[inline]
    pub fn is_read(&self) -> bool {
        self.method == HttpMethod::Get
    }

    /// Substitute `{param}` placeholders in `base_url + path_template`
    ///
    /// Values are percent-encoded as single path segments. Placeholders
    /// without a matching parameter are left in place; see
    /// [`unresolved_placeholder`] to detect them.
    pub fn build_url(&self, path_params: &HashMap<String, String>) -> String {
        let mut url = format!("{}{}", self.base_url, self.path_template);
        for (key, value) in path_params {
            url = url.replace(&format!("{{{}}}", key), &urlencoding::encode(value));
        }
        url
    }
}

/// First `{param}` placeholder still present in a built URL
pub fn unresolved_placeholder(url: &str) -> Option<&str> {
    let open = url.find('{')?;
    let close = url[open..].find('}')?;
    Some(&url[open + 1..open + close])
}
