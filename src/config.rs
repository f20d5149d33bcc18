//! Weight and threshold settings, plus process configuration from the environment.

use anyhow::Context;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::models::{CourseThresholds, WeightConfig};
use crate::provider::MetricsProvider;

pub const RECENCY_WEIGHT_SETTING: &str = "recencydaysweight";
pub const SLOT_WEIGHT_SETTING: &str = "slotcountweight";
pub const ACTIVITY_WEIGHT_SETTING: &str = "activitycountweight";
pub const COMPLETION_WEIGHT_SETTING: &str = "completionweight";

pub const POSTING_WAIT_SETTING: &str = "postingwait";
pub const ON_HOLD_PERIOD_SETTING: &str = "onholdperiod";
pub const SUSPENSION_PERIOD_SETTING: &str = "suspensionperiod";

pub const DEFAULT_RECENCY_WEIGHT: f64 = 1.0;
pub const DEFAULT_SLOT_WEIGHT: f64 = 10.0;
pub const DEFAULT_ACTIVITY_WEIGHT: f64 = 1.0;
pub const DEFAULT_COMPLETION_WEIGHT: f64 = 1.0;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            recency_weight: DEFAULT_RECENCY_WEIGHT,
            slot_weight: DEFAULT_SLOT_WEIGHT,
            activity_weight: DEFAULT_ACTIVITY_WEIGHT,
            completion_weight: DEFAULT_COMPLETION_WEIGHT,
        }
    }
}

fn configuration_error(name: &str, value: &str, reason: impl Into<String>) -> EngineError {
    EngineError::Configuration {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Blank values count as unset.
fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

pub fn parse_weight(name: &str, raw: Option<&str>, default: f64) -> EngineResult<f64> {
    let Some(value) = present(raw) else {
        return Ok(default);
    };

    let weight: f64 = value
        .parse()
        .map_err(|_| configuration_error(name, value, "not a number"))?;
    if !weight.is_finite() {
        return Err(configuration_error(name, value, "not a finite number"));
    }
    Ok(weight)
}

/// Unset thresholds are 0, which disables the check that uses them.
pub fn parse_days(name: &str, raw: Option<&str>) -> EngineResult<i64> {
    match present(raw) {
        None => Ok(0),
        Some(value) => value
            .parse()
            .map_err(|_| configuration_error(name, value, "not a whole number of days")),
    }
}

pub async fn load_weights<P>(provider: &P) -> EngineResult<WeightConfig>
where
    P: MetricsProvider + ?Sized,
{
    let mut weights = WeightConfig::default();
    let fields = [
        (RECENCY_WEIGHT_SETTING, &mut weights.recency_weight),
        (SLOT_WEIGHT_SETTING, &mut weights.slot_weight),
        (ACTIVITY_WEIGHT_SETTING, &mut weights.activity_weight),
        (COMPLETION_WEIGHT_SETTING, &mut weights.completion_weight),
    ];

    for (name, field) in fields {
        let raw = provider.config_value(name).await?;
        *field = parse_weight(name, raw.as_deref(), *field)?;
    }

    debug!(?weights, "loaded priority weights");
    Ok(weights)
}

pub async fn load_thresholds<P>(provider: &P, course_id: i64) -> EngineResult<CourseThresholds>
where
    P: MetricsProvider + ?Sized,
{
    let posting_wait = provider.course_setting(course_id, POSTING_WAIT_SETTING).await?;
    let on_hold = provider.course_setting(course_id, ON_HOLD_PERIOD_SETTING).await?;
    let suspension = provider
        .course_setting(course_id, SUSPENSION_PERIOD_SETTING)
        .await?;

    let thresholds = CourseThresholds {
        posting_wait_days: parse_days(POSTING_WAIT_SETTING, posting_wait.as_deref())?,
        on_hold_period_days: parse_days(ON_HOLD_PERIOD_SETTING, on_hold.as_deref())?,
        suspension_period_days: parse_days(SUSPENSION_PERIOD_SETTING, suspension.as_deref())?,
    };
    debug!(course_id, ?thresholds, "loaded course thresholds");
    Ok(thresholds)
}

/// Process settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = match std::env::var("FLIGHT_PRIORITY_MAX_CONNECTIONS") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("invalid FLIGHT_PRIORITY_MAX_CONNECTIONS '{value}'"))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}
