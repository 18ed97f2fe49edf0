//! Utilization aggregation over a trailing window
//!
//! Turns a raw sample series into the summary statistics the
//! recommendation engine consumes: average, maximum and the count of
//! breach-threshold crossings. No data is never an error here; a zeroed
//! summary with `samples == 0` tells the downstream logic to hold still.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{UtilizationSample, UtilizationSummary};
use crate::provider::MetricsProvider;

/// Default trailing window length in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Default sample spacing in minutes.
pub const DEFAULT_GRANULARITY_MINUTES: i64 = 60;

/// Utilization percentage a sample must exceed to count as a breach.
/// Sits below the recommendation engine's critical ceiling so repeated
/// spikes count even when no single sample crosses that ceiling.
pub const DEFAULT_BREACH_THRESHOLD: f64 = 80.0;

/// Window shape for the aggregation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub window_days: u32,
    pub granularity_minutes: i64,
    pub breach_threshold_percent: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            granularity_minutes: DEFAULT_GRANULARITY_MINUTES,
            breach_threshold_percent: DEFAULT_BREACH_THRESHOLD,
        }
    }
}

/// Summarizes trailing-window utilization per resource.
pub struct MetricsAggregator {
    provider: Arc<dyn MetricsProvider>,
    config: WindowConfig,
}

impl MetricsAggregator {
    pub fn new(provider: Arc<dyn MetricsProvider>) -> Self {
        Self::with_config(provider, WindowConfig::default())
    }

    pub fn with_config(provider: Arc<dyn MetricsProvider>, config: WindowConfig) -> Self {
        Self { provider, config }
    }

    /// Summarize the window ending at `now`. A provider outage degrades to
    /// the no-data summary rather than failing the resource.
    pub async fn summarize(&self, resource_id: &str, now: DateTime<Utc>) -> UtilizationSummary {
        let from = now - Duration::days(i64::from(self.config.window_days));
        let granularity = Duration::minutes(self.config.granularity_minutes);
        let samples = match self
            .provider
            .utilization(resource_id, from, now, granularity)
            .await
        {
            Ok(samples) => samples,
            Err(error) => {
                tracing::warn!(
                    event = "metrics_unavailable",
                    resource_id = %resource_id,
                    error = %error,
                    "Metrics provider failed, treating window as no data"
                );
                return UtilizationSummary::no_data(self.config.window_days);
            }
        };
        summarize_samples(
            &samples,
            self.config.breach_threshold_percent,
            self.config.window_days,
        )
    }
}

/// Pure aggregation over an already-fetched sample set.
pub fn summarize_samples(
    samples: &[UtilizationSample],
    breach_threshold: f64,
    window_days: u32,
) -> UtilizationSummary {
    if samples.is_empty() {
        return UtilizationSummary::no_data(window_days);
    }
    let sum: f64 = samples.iter().map(|s| s.percent).sum();
    let maximum = samples
        .iter()
        .map(|s| s.percent)
        .fold(f64::MIN, f64::max);
    let breaches = samples
        .iter()
        .filter(|s| s.percent > breach_threshold)
        .count() as u32;

    UtilizationSummary {
        average_percent: sum / samples.len() as f64,
        maximum_percent: maximum,
        breaches,
        samples: samples.len() as u32,
        window_days,
    }
}
