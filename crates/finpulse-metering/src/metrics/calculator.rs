//! Metrics engine - the 20 foundational cost and usage aggregates
//!
//! A pure reduction: the same records and price configuration always give the
//! same result. Monetary sums are accumulated as [`Decimal`] and rounded only
//! when the result is built. Records whose units cannot be priced (non-finite,
//! or beyond the [`Decimal`] range) are skipped and counted nowhere.
//! `units_by_session` keeps the last record seen for a repeated session id.

use finpulse_common::UsageRecord;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Units per minute of session time used by the duration proxy
pub const UNITS_PER_MINUTE_PROXY: f64 = 5.0;

/// Decimal places kept for currency outputs
pub const CURRENCY_DP: u32 = 2;

/// Label used in the period for an absent bound
pub const MISSING_DATE_LABEL: &str = "N/A";

/// Price configuration applied to every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceConfig {
    /// Price of one billing unit
    #[serde(serialize_with = "decimal_as_f64")]
    pub unit_price: Decimal,
    pub currency: String,
    pub work_hours_per_day: u32,
    pub work_days_per_month: u32,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            unit_price: Decimal::new(5, 2),
            currency: "USD".to_string(),
            work_hours_per_day: 8,
            work_days_per_month: 22,
        }
    }
}

/// Reporting period echoed back with every result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<String>,
    pub end: Option<String>,
    /// "start to end", absent bounds rendered as `N/A`
    pub label: String,
}

impl Period {
    pub fn new(start: Option<&str>, end: Option<&str>) -> Self {
        let label = format!(
            "{} to {}",
            start.unwrap_or(MISSING_DATE_LABEL),
            end.unwrap_or(MISSING_DATE_LABEL)
        );
        Self {
            start: start.map(str::to_string),
            end: end.map(str::to_string),
            label,
        }
    }
}

/// The 20 aggregates, serialized in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_cost: f64,
    pub total_units: f64,
    pub cost_by_actor: BTreeMap<String, f64>,
    pub units_by_session: BTreeMap<String, f64>,
    pub average_units_per_session: f64,
    pub total_sessions: u64,
    pub sessions_by_actor: BTreeMap<String, u64>,
    pub total_duration_minutes: i64,
    pub average_session_duration: f64,
    pub units_per_minute: f64,
    pub cost_per_minute: f64,
    pub unique_actors: u64,
    pub sessions_by_task_type: BTreeMap<String, u64>,
    pub units_by_task_type: BTreeMap<String, f64>,
    pub cost_by_task_type: BTreeMap<String, f64>,
    pub sessions_by_cost_center: BTreeMap<String, u64>,
    pub units_by_cost_center: BTreeMap<String, f64>,
    pub cost_by_cost_center: BTreeMap<String, f64>,
    pub average_cost_per_actor: f64,
    pub efficiency_ratio: f64,
}

impl Metrics {
    /// Metric names in output order
    pub const NAMES: [&'static str; 20] = [
        "total_cost",
        "total_units",
        "cost_by_actor",
        "units_by_session",
        "average_units_per_session",
        "total_sessions",
        "sessions_by_actor",
        "total_duration_minutes",
        "average_session_duration",
        "units_per_minute",
        "cost_per_minute",
        "unique_actors",
        "sessions_by_task_type",
        "units_by_task_type",
        "cost_by_task_type",
        "sessions_by_cost_center",
        "units_by_cost_center",
        "cost_by_cost_center",
        "average_cost_per_actor",
        "efficiency_ratio",
    ];
}

/// Output of one metrics computation, built fresh per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub config: PriceConfig,
    pub period: Period,
    pub metrics: Metrics,
}

/// Per-group running sums
#[derive(Default)]
struct Group {
    sessions: u64,
    units: f64,
    cost: Decimal,
}

impl Group {
    fn add(&mut self, units: f64, cost: Decimal) {
        self.sessions += 1;
        self.units += units;
        self.cost = self.cost.saturating_add(cost);
    }
}

/// Stateless metrics calculator
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: PriceConfig,
}

impl MetricsEngine {
    pub fn new(config: PriceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PriceConfig {
        &self.config
    }

    /// Cost of a quantity of units at the configured price (unrounded)
    ///
    /// `None` when the units or the product do not fit a [`Decimal`].
    pub fn cost_of(&self, units: f64) -> Option<Decimal> {
        if !units.is_finite() {
            return None;
        }
        Decimal::from_f64(units)?.checked_mul(self.config.unit_price)
    }

    /// Session duration proxy in whole minutes, at least 1
    #[inline]
    pub fn duration_minutes(units: f64) -> i64 {
        ((units / UNITS_PER_MINUTE_PROXY).trunc() as i64).max(1)
    }

    /// Compute all 20 metrics over `records`
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub fn calculate_all_metrics(
        &self,
        records: &[UsageRecord],
        start: Option<&str>,
        end: Option<&str>,
    ) -> MetricsResult {
        let mut total_units = 0.0_f64;
        let mut total_cost = Decimal::ZERO;
        let mut total_duration = 0_i64;

        let mut by_actor: BTreeMap<String, Group> = BTreeMap::new();
        let mut by_task_type: BTreeMap<String, Group> = BTreeMap::new();
        let mut by_cost_center: BTreeMap<String, Group> = BTreeMap::new();
        let mut units_by_session: BTreeMap<String, f64> = BTreeMap::new();
        let mut total_sessions = 0_u64;

        for record in records {
            let units = record.units_consumed;
            let Some(cost) = self.cost_of(units) else {
                warn!(session = %record.session_id, units, "Skipping usage record with unpriceable units");
                continue;
            };

            total_sessions += 1;
            total_units += units;
            total_cost = total_cost.saturating_add(cost);
            total_duration = total_duration.saturating_add(Self::duration_minutes(units));

            by_actor
                .entry(record.user_id.clone())
                .or_default()
                .add(units, cost);
            by_task_type
                .entry(record.task_type_or_default().to_string())
                .or_default()
                .add(units, cost);
            by_cost_center
                .entry(record.cost_center_or_default().to_string())
                .or_default()
                .add(units, cost);
            units_by_session.insert(record.session_id.clone(), units);
        }

        let unique_actors = by_actor.len() as u64;

        let units_per_minute = ratio(total_units, total_duration as f64);
        let cost_per_minute = if total_duration > 0 {
            total_cost / Decimal::from(total_duration)
        } else {
            Decimal::ZERO
        };
        let average_cost_per_actor = if unique_actors > 0 {
            total_cost / Decimal::from(unique_actors)
        } else {
            Decimal::ZERO
        };

        let metrics = Metrics {
            total_cost: round_currency(total_cost),
            total_units,
            cost_by_actor: cost_map(&by_actor),
            units_by_session,
            average_units_per_session: ratio(total_units, total_sessions as f64),
            total_sessions,
            sessions_by_actor: session_map(&by_actor),
            total_duration_minutes: total_duration,
            average_session_duration: ratio(total_duration as f64, total_sessions as f64),
            units_per_minute,
            cost_per_minute: round_currency(cost_per_minute),
            unique_actors,
            sessions_by_task_type: session_map(&by_task_type),
            units_by_task_type: units_map(&by_task_type),
            cost_by_task_type: cost_map(&by_task_type),
            sessions_by_cost_center: session_map(&by_cost_center),
            units_by_cost_center: units_map(&by_cost_center),
            cost_by_cost_center: cost_map(&by_cost_center),
            average_cost_per_actor: round_currency(average_cost_per_actor),
            efficiency_ratio: ratio(total_units, total_duration as f64 / 60.0),
        };

        debug!(
            total_cost = metrics.total_cost,
            unique_actors = metrics.unique_actors,
            "Computed metrics"
        );

        MetricsResult {
            config: self.config.clone(),
            period: Period::new(start, end),
            metrics,
        }
    }
}

/// Division that yields 0 for a zero denominator
#[inline]
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Round to cents, half away from zero
pub fn round_currency(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or(0.0)
}

fn cost_map(groups: &BTreeMap<String, Group>) -> BTreeMap<String, f64> {
    groups
        .iter()
        .map(|(k, g)| (k.clone(), round_currency(g.cost)))
        .collect()
}

fn units_map(groups: &BTreeMap<String, Group>) -> BTreeMap<String, f64> {
    groups.iter().map(|(k, g)| (k.clone(), g.units)).collect()
}

fn session_map(groups: &BTreeMap<String, Group>) -> BTreeMap<String, u64> {
    groups.iter().map(|(k, g)| (k.clone(), g.sessions)).collect()
}

fn decimal_as_f64<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.to_f64().unwrap_or(0.0))
}
