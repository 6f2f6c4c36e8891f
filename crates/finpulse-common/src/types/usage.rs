//! Usage records - one consumption event reported by the billing API
//!
//! Field names follow the remote API (`acu_consumed`, `business_unit`, ...);
//! the generic names are accepted as aliases.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{FinPulseError, Result};

/// Task type assigned to records without one
pub const UNKNOWN_TASK_TYPE: &str = "unknown";

/// Cost center assigned to records without one
pub const UNKNOWN_COST_CENTER: &str = "Unknown";

/// Date format accepted for range filters
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single usage event
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRecord {
    #[serde(alias = "sessionId")]
    pub session_id: String,

    /// Actor who ran the session
    #[serde(alias = "userId")]
    pub user_id: String,

    #[serde(rename = "organization_id", alias = "tenant_id", alias = "tenantId")]
    pub tenant_id: Option<String>,

    #[serde(alias = "projectId")]
    pub project_id: Option<String>,

    pub timestamp: Option<String>,

    /// Billing units consumed
    #[serde(rename = "acu_consumed", alias = "units_consumed", alias = "unitsConsumed")]
    pub units_consumed: f64,

    #[serde(rename = "business_unit", alias = "cost_center", alias = "costCenter")]
    pub cost_center: Option<String>,

    #[serde(alias = "taskType")]
    pub task_type: Option<String>,

    #[serde(rename = "is_out_of_hours", alias = "out_of_hours", alias = "outOfHours")]
    pub out_of_hours: bool,

    #[serde(rename = "is_merged", alias = "merged")]
    pub merged: bool,

    #[serde(rename = "session_outcome", alias = "outcome")]
    pub outcome: Option<String>,
}

impl UsageRecord {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, units: f64) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            units_consumed: units,
            ..Default::default()
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Task type used for grouping
    pub fn task_type_or_default(&self) -> &str {
        match self.task_type.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => UNKNOWN_TASK_TYPE,
        }
    }

    /// Cost center used for grouping
    pub fn cost_center_or_default(&self) -> &str {
        match self.cost_center.as_deref() {
            Some(c) if !c.is_empty() => c,
            _ => UNKNOWN_COST_CENTER,
        }
    }
}

/// Optional inclusive date range for usage queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Parse `YYYY-MM-DD` bounds; blank strings count as absent
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let range = Self {
            start: parse_date(start)?,
            end: parse_date(end)?,
        };
        if let (Some(s), Some(e)) = (range.start, range.end) {
            if s > e {
                return Err(FinPulseError::Validation(format!(
                    "start_date {} is after end_date {}",
                    s, e
                )));
            }
        }
        Ok(range)
    }

    /// Fill absent bounds: end defaults to `today`, start to `lookback_days` before end
    pub fn resolve(&self, today: NaiveDate, lookback_days: i64) -> (NaiveDate, NaiveDate) {
        let end = self.end.unwrap_or(today);
        let start = self
            .start
            .unwrap_or_else(|| end - Duration::days(lookback_days));
        (start, end)
    }
}

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Some)
            .map_err(|_| FinPulseError::Validation(format!("invalid date {:?}, expected YYYY-MM-DD", s))),
    }
}
