//! Target-tier recommendation from utilization statistics
//!
//! Maps a utilization summary onto the tier ladder using class-dependent
//! target bands. Critical resources are sized so the observed peak sits at
//! or under half the new tier's capacity; non-critical resources tolerate
//! sixty percent. Downgrades additionally require a well-sampled window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::TierCatalog;
use crate::error::CatalogError;
use crate::models::{
    Recommendation, RecommendedAction, Resource, Urgency, UtilizationSummary,
};

/// Target utilization band for critical resources.
pub const DEFAULT_CRITICAL_BAND: f64 = 0.50;

/// Target utilization band for non-critical resources.
pub const DEFAULT_NON_CRITICAL_BAND: f64 = 0.60;

/// Maximum-utilization percentage that forces an immediate upgrade.
const DEFAULT_CRITICAL_MAX_PERCENT: f64 = 90.0;

/// High-average thresholds, per resource class.
const DEFAULT_HIGH_AVERAGE_CRITICAL: f64 = 60.0;
const DEFAULT_HIGH_AVERAGE_NON_CRITICAL: f64 = 75.0;

/// Breach-count threshold for frequency-driven upgrades.
const DEFAULT_BREACH_COUNT_THRESHOLD: u32 = 3;

/// Both must hold before a downgrade is considered.
const DEFAULT_LOW_AVERAGE_PERCENT: f64 = 20.0;
const DEFAULT_LOW_MAXIMUM_PERCENT: f64 = 30.0;

/// Minimum window samples before a downgrade is trusted. A sparse window
/// that happens to read zero is not evidence the resource is idle.
const DEFAULT_MIN_SAMPLES_FOR_DECREASE: u32 = 12;

/// Thresholds steering the recommendation ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandPolicy {
    pub critical_band: f64,
    pub non_critical_band: f64,
    pub critical_max_percent: f64,
    pub high_average_critical_percent: f64,
    pub high_average_non_critical_percent: f64,
    pub breach_count_threshold: u32,
    pub low_average_percent: f64,
    pub low_maximum_percent: f64,
    pub min_samples_for_decrease: u32,
}

impl Default for BandPolicy {
    fn default() -> Self {
        Self {
            critical_band: DEFAULT_CRITICAL_BAND,
            non_critical_band: DEFAULT_NON_CRITICAL_BAND,
            critical_max_percent: DEFAULT_CRITICAL_MAX_PERCENT,
            high_average_critical_percent: DEFAULT_HIGH_AVERAGE_CRITICAL,
            high_average_non_critical_percent: DEFAULT_HIGH_AVERAGE_NON_CRITICAL,
            breach_count_threshold: DEFAULT_BREACH_COUNT_THRESHOLD,
            low_average_percent: DEFAULT_LOW_AVERAGE_PERCENT,
            low_maximum_percent: DEFAULT_LOW_MAXIMUM_PERCENT,
            min_samples_for_decrease: DEFAULT_MIN_SAMPLES_FOR_DECREASE,
        }
    }
}

impl BandPolicy {
    /// The target band for a resource's class.
    pub fn band_for(&self, resource: &Resource) -> f64 {
        if resource.is_critical() {
            self.critical_band
        } else {
            self.non_critical_band
        }
    }

    fn high_average_for(&self, resource: &Resource) -> f64 {
        if resource.is_critical() {
            self.high_average_critical_percent
        } else {
            self.high_average_non_critical_percent
        }
    }
}

/// Computes one [`Recommendation`] per resource.
pub struct RecommendationEngine {
    catalog: Arc<TierCatalog>,
    policy: BandPolicy,
}

impl RecommendationEngine {
    pub fn new(catalog: Arc<TierCatalog>) -> Self {
        Self::with_policy(catalog, BandPolicy::default())
    }

    pub fn with_policy(catalog: Arc<TierCatalog>, policy: BandPolicy) -> Self {
        Self { catalog, policy }
    }

    /// Recommend a target tier. Fails only when the resource's current
    /// tier is not on the ladder.
    pub fn recommend(
        &self,
        resource: &Resource,
        summary: &UtilizationSummary,
    ) -> Result<Recommendation, CatalogError> {
        let current = self.catalog.by_name(&resource.tier)?;

        if !summary.has_samples() {
            return Ok(Recommendation::keep(
                &resource.tier,
                "no utilization data in window",
            ));
        }

        let band = self.policy.band_for(resource);
        let needed = f64::from(current.capacity) * (summary.maximum_percent / 100.0) / band;

        if summary.maximum_percent > self.policy.critical_max_percent {
            return Ok(self.increase(
                resource,
                needed,
                Urgency::Critical,
                format!(
                    "maximum {:.1}% breached the {:.0}% ceiling",
                    summary.maximum_percent, self.policy.critical_max_percent
                ),
            ));
        }

        let high_average = self.policy.high_average_for(resource);
        if summary.average_percent > high_average {
            return Ok(self.increase(
                resource,
                needed,
                Urgency::High,
                format!(
                    "average {:.1}% above the {:.0}% sustained-load limit",
                    summary.average_percent, high_average
                ),
            ));
        }
        if summary.breaches > self.policy.breach_count_threshold {
            return Ok(self.increase(
                resource,
                needed,
                Urgency::Medium,
                format!("{} samples breached the window threshold", summary.breaches),
            ));
        }

        let idle = summary.average_percent < self.policy.low_average_percent
            && summary.maximum_percent < self.policy.low_maximum_percent;
        if idle && current.position > self.catalog.floor().position {
            if summary.samples < self.policy.min_samples_for_decrease {
                return Ok(Recommendation::keep(
                    &resource.tier,
                    "window too sparse to shrink safely",
                ));
            }
            let target = self
                .catalog
                .smallest_covering_capacity(needed)
                .unwrap_or(current);
            if target.position >= current.position {
                return Ok(Recommendation::keep(
                    &resource.tier,
                    "no smaller tier covers the observed peak",
                ));
            }
            return Ok(Recommendation {
                action: RecommendedAction::Decrease,
                urgency: Urgency::Normal,
                target_tier: target.name.clone(),
                needed_capacity: needed,
                reason: format!(
                    "average {:.1}% and maximum {:.1}% leave the tier idle",
                    summary.average_percent, summary.maximum_percent
                ),
            });
        }

        Ok(Recommendation::keep(&resource.tier, "utilization within band"))
    }

    fn increase(
        &self,
        resource: &Resource,
        needed: f64,
        urgency: Urgency,
        reason: String,
    ) -> Recommendation {
        let target = self
            .catalog
            .smallest_covering_capacity(needed)
            .unwrap_or_else(|| self.catalog.top());
        if target.name == resource.tier {
            // Already on the largest adequate rung; only the ladder top
            // qualifies here because upgrades always need more capacity.
            return Recommendation::keep(
                &resource.tier,
                format!("ladder exhausted above current tier ({reason})"),
            );
        }
        Recommendation {
            action: RecommendedAction::Increase,
            urgency,
            target_tier: target.name.clone(),
            needed_capacity: needed,
            reason,
        }
    }
}
