//! FinPulse configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `finpulse.toml` (path overridable with `FINPULSE_CONFIG`), then
//! `FINPULSE__SECTION__KEY` environment variables. `PORT` wins over
//! `server.port`.

use finpulse_common::{
    ConfigError, FinPulseError, Result, DEFAULT_DISCOVERY_REFRESH_SECS,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_SCHEDULER_POOL_SIZE,
};
use finpulse_metering::PriceConfig;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "FINPULSE_CONFIG";

/// Config file read when `FINPULSE_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "finpulse.toml";

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "FINPULSE";

/// Tokens shorter than this are probably truncated
pub const MIN_TOKEN_LEN: usize = 20;

const GLOBAL_TOKEN_VAR: &str = "FINPULSE__API__GLOBAL_TOKEN";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FinPulseConfig {
    pub server: ServerSettings,
    pub api: ApiSettings,
    pub polling: PollingSettings,
    pub snapshot: SnapshotSettings,
    pub metrics: MetricsSettings,
    pub usage: UsageSettings,
    /// Endpoint catalog file (YAML)
    pub endpoints_file: String,
    pub log_format: LogFormat,
}

impl Default for FinPulseConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            api: ApiSettings::default(),
            polling: PollingSettings::default(),
            snapshot: SnapshotSettings::default(),
            metrics: MetricsSettings::default(),
            usage: UsageSettings::default(),
            endpoints_file: "endpoints.yaml".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl FinPulseConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let mut cfg = Self::load_from(Path::new(&path))?;

        // PORT takes priority, as set by container platforms
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse::<u16>() {
                cfg.server.port = p;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit (optional) file plus environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(invalid)?;

        let mut cfg: Self = settings.try_deserialize().map_err(invalid)?;
        cfg.api.normalize();
        Ok(cfg)
    }

    /// Reject values the poller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_seconds == 0 {
            return Err(ConfigError::Invalid("polling.interval_seconds must be at least 1".into()).into());
        }
        if self.polling.scheduler_pool_size == 0 {
            return Err(ConfigError::Invalid("polling.scheduler_pool_size must be at least 1".into()).into());
        }
        if self.usage.page_size == 0 {
            return Err(ConfigError::Invalid("usage.page_size must be at least 1".into()).into());
        }
        if self.metrics.unit_price < 0.0 || !self.metrics.unit_price.is_finite() {
            return Err(ConfigError::Invalid("metrics.unit_price must be a non-negative number".into()).into());
        }
        Ok(())
    }

    /// Global credential; fatal when absent
    pub fn global_credential(&self) -> Result<SecretString> {
        let token = self.api.global_token.as_deref().unwrap_or_default();
        if token.is_empty() {
            return Err(ConfigError::MissingCredential {
                name: GLOBAL_TOKEN_VAR.to_string(),
                hint: "Provision a service user with account-wide read access and set its token.".to_string(),
            }
            .into());
        }
        if token.len() < MIN_TOKEN_LEN {
            warn!(
                length = token.len(),
                "Global token looks shorter than expected, check it is complete"
            );
        }
        Ok(SecretString::from(token.to_string()))
    }

    /// Tenant credential; `None` disables tenant-scoped polling
    pub fn tenant_credential(&self) -> Option<SecretString> {
        self.api
            .tenant_token
            .as_deref()
            .map(|t| SecretString::from(t.to_string()))
    }

    pub fn price_config(&self) -> Result<PriceConfig> {
        let unit_price = Decimal::try_from(self.metrics.unit_price)
            .map_err(|e| ConfigError::Invalid(format!("metrics.unit_price: {}", e)))?;
        Ok(PriceConfig {
            unit_price,
            currency: self.metrics.currency.clone(),
            work_hours_per_day: self.metrics.work_hours_per_day,
            work_days_per_month: self.metrics.work_days_per_month,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn invalid(err: config::ConfigError) -> FinPulseError {
    ConfigError::Invalid(err.to_string()).into()
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Remote API credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Account-wide token
    #[serde(skip_serializing)]
    pub global_token: Option<String>,
    /// Per-tenant token
    #[serde(skip_serializing)]
    pub tenant_token: Option<String>,
    /// Fixed tenant; disables auto-discovery when set
    pub tenant_id: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            global_token: None,
            tenant_token: None,
            tenant_id: None,
            request_timeout_seconds: 30,
        }
    }
}

impl ApiSettings {
    /// Treat blank values as unset
    fn normalize(&mut self) {
        for field in [&mut self.global_token, &mut self.tenant_token, &mut self.tenant_id] {
            let blank = field.as_deref().map(|v| v.trim().is_empty()).unwrap_or(false);
            if blank {
                *field = None;
            } else if let Some(v) = field {
                *v = v.trim().to_string();
            }
        }
        if self.request_timeout_seconds == 0 {
            self.request_timeout_seconds = 30;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "[REDACTED]" } else { "<unset>" };
        f.debug_struct("ApiSettings")
            .field("global_token", &mask(&self.global_token))
            .field("tenant_token", &mask(&self.tenant_token))
            .field("tenant_id", &self.tenant_id)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// Polling and discovery timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub interval_seconds: u64,
    /// Runtime worker threads driving connection timers
    pub scheduler_pool_size: usize,
    pub discovery_refresh_seconds: u64,
    pub discovery_timeout_seconds: u64,
    /// Global endpoint that lists tenants
    pub list_tenants_endpoint: String,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            scheduler_pool_size: DEFAULT_SCHEDULER_POOL_SIZE,
            discovery_refresh_seconds: DEFAULT_DISCOVERY_REFRESH_SECS,
            discovery_timeout_seconds: 10,
            list_tenants_endpoint: "list_organizations".to_string(),
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn discovery_refresh(&self) -> Duration {
        Duration::from_secs(self.discovery_refresh_seconds.max(1))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    pub path: String,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            path: finpulse_metering::snapshot::cache::DEFAULT_SNAPSHOT_PATH.to_string(),
        }
    }
}

/// Pricing and broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub unit_price: f64,
    pub currency: String,
    pub work_hours_per_day: u32,
    pub work_days_per_month: u32,
    /// Full-refresh broadcast period; 0 disables
    pub refresh_seconds: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            unit_price: 0.05,
            currency: "USD".to_string(),
            work_hours_per_day: 8,
            work_days_per_month: 22,
            refresh_seconds: 300,
        }
    }
}

/// Usage record fetching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Catalog name of the paginated usage endpoint
    pub endpoint: String,
    pub paging: PagingStyle,
    pub page_size: u32,
    pub max_pages: u32,
    pub lookback_days: i64,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            endpoint: "consumption_daily".to_string(),
            paging: PagingStyle::Skip,
            page_size: 100,
            max_pages: 1000,
            lookback_days: 365,
        }
    }
}

/// Query parameter carrying the page start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PagingStyle {
    /// `skip=<n>&limit=<size>`
    #[default]
    Skip,
    /// `offset=<n>&limit=<size>`
    Offset,
}

impl PagingStyle {
    pub fn start_key(self) -> &'static str {
        match self {
            PagingStyle::Skip => "skip",
            PagingStyle::Offset => "offset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}
