//! Endpoint catalog loader
//!
//! Reads the YAML catalog and resolves each entry's base URL from its scope
//! (or its own override) before handing the list to [`EndpointRegistry`].

use finpulse_common::{
    ConfigError, EndpointDefinition, EndpointRegistry, EndpointScope, HttpMethod, Result,
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    pub base_urls: BaseUrls,
    #[serde(default)]
    pub endpoints: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaseUrls {
    #[serde(alias = "organization")]
    pub tenant: String,
    #[serde(alias = "enterprise")]
    pub global: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub scope: EndpointScope,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub beta: bool,
    #[serde(default)]
    pub base_url_override: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl CatalogFile {
    /// Resolve entries into endpoint definitions
    pub fn resolve(self) -> Result<Vec<EndpointDefinition>> {
        let base_urls = self.base_urls;
        self.endpoints
            .into_iter()
            .map(|entry| -> Result<EndpointDefinition> {
                let method: HttpMethod = entry.method.parse()?;
                let base_url = match entry.base_url_override.filter(|u| !u.trim().is_empty()) {
                    Some(url) => url,
                    None => match entry.scope {
                        EndpointScope::Tenant => base_urls.tenant.clone(),
                        EndpointScope::Global => base_urls.global.clone(),
                    },
                };

                let definition =
                    EndpointDefinition::new(entry.name, entry.path, method, entry.scope, base_url)
                        .with_beta(entry.beta);
                Ok(match entry.description {
                    Some(description) => definition.with_description(description),
                    None => definition,
                })
            })
            .collect()
    }
}

/// Load the catalog file into a registry
pub fn load_registry(path: &Path) -> Result<EndpointRegistry> {
    let catalog: CatalogFile = config::Config::builder()
        .add_source(config::File::from(path))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| {
            ConfigError::Invalid(format!("endpoint catalog {}: {}", path.display(), e))
        })?;

    let registry = EndpointRegistry::new(catalog.resolve()?)?;
    info!(
        path = %path.display(),
        endpoints = registry.len(),
        tenant = registry.by_scope(EndpointScope::Tenant).count(),
        global = registry.by_scope(EndpointScope::Global).count(),
        "Loaded endpoint catalog"
    );
    Ok(registry)
}
