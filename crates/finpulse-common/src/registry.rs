//! Endpoint registry - read-only lookup table over the endpoint catalog

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{FinPulseError, Result};
use crate::types::endpoint::{EndpointDefinition, EndpointScope};

/// Resolved endpoint catalog, keyed by unique name
///
/// Catalog order is preserved so poll cycles dispatch deterministically.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<EndpointDefinition>>,
    by_name: HashMap<String, usize>,
}

impl EndpointRegistry {
    /// Build a registry, rejecting duplicate names
    pub fn new(endpoints: Vec<EndpointDefinition>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(endpoints.len());
        for (idx, endpoint) in endpoints.iter().enumerate() {
            if by_name.insert(endpoint.name.clone(), idx).is_some() {
                return Err(FinPulseError::Validation(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
        }

        Ok(Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    pub fn find(&self, name: &str) -> Option<Arc<EndpointDefinition>> {
        self.by_name.get(name).map(|&idx| self.endpoints[idx].clone())
    }

    /// Polled endpoints (GET only) of the given scope, in catalog order
    pub fn read_endpoints(&self, scope: EndpointScope) -> Vec<Arc<EndpointDefinition>> {
        self.endpoints
            .iter()
            .filter(|e| e.scope == scope && e.is_read())
            .cloned()
            .collect()
    }

    pub fn by_scope(&self, scope: EndpointScope) -> impl Iterator<Item = &Arc<EndpointDefinition>> {
        self.endpoints.iter().filter(move |e| e.scope == scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EndpointDefinition>> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
