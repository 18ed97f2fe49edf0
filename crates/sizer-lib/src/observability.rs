//! Observability infrastructure for the sizing engine
//!
//! Provides:
//! - Prometheus metrics (run duration, outcome counters, savings gauges)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_gauge, Gauge, Histogram, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{AttemptStatus, Urgency};
use crate::report::{OutcomeCounts, RunMode};

/// Histogram buckets for run durations (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SizerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct SizerMetricsInner {
    run_duration_seconds: Histogram,
    resources_analyzed: IntGauge,
    changes_applied: IntGauge,
    changes_failed: IntGauge,
    changes_skipped: IntGauge,
    projected_savings_monthly: Gauge,
    realized_savings_monthly: Gauge,
    ledger_entries: IntGauge,
}

impl SizerMetricsInner {
    fn new() -> Self {
        Self {
            run_duration_seconds: register_histogram!(
                "tier_sizer_run_duration_seconds",
                "Wall time of one full sizing run",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            resources_analyzed: register_int_gauge!(
                "tier_sizer_resources_analyzed_total",
                "Total number of resources analyzed across runs"
            )
            .expect("Failed to register resources_analyzed"),

            changes_applied: register_int_gauge!(
                "tier_sizer_changes_applied_total",
                "Total number of tier changes applied (fixed plus partial)"
            )
            .expect("Failed to register changes_applied"),

            changes_failed: register_int_gauge!(
                "tier_sizer_changes_failed_total",
                "Total number of resources whose remediation failed"
            )
            .expect("Failed to register changes_failed"),

            changes_skipped: register_int_gauge!(
                "tier_sizer_changes_skipped_total",
                "Total number of resources skipped (cooldown or permanent errors)"
            )
            .expect("Failed to register changes_skipped"),

            projected_savings_monthly: register_gauge!(
                "tier_sizer_projected_savings_monthly",
                "Monthly savings the latest run's planned downgrades would realize"
            )
            .expect("Failed to register projected_savings_monthly"),

            realized_savings_monthly: register_gauge!(
                "tier_sizer_realized_savings_monthly",
                "Monthly savings realized by changes the latest run applied"
            )
            .expect("Failed to register realized_savings_monthly"),

            ledger_entries: register_int_gauge!(
                "tier_sizer_ledger_entries",
                "Number of records in the change ledger"
            )
            .expect("Failed to register ledger_entries"),
        }
    }
}

/// Sizer metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct SizerMetrics {
    _private: (),
}

impl Default for SizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SizerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SizerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record the wall time of one full run
    pub fn observe_run_duration(&self, duration_secs: f64) {
        self.inner().run_duration_seconds.observe(duration_secs);
    }

    pub fn add_resources_analyzed(&self, count: i64) {
        self.inner().resources_analyzed.add(count);
    }

    /// Fold one run's terminal outcomes into the counters
    pub fn record_outcomes(&self, outcomes: &OutcomeCounts) {
        let inner = self.inner();
        inner
            .changes_applied
            .add((outcomes.fixed + outcomes.partial) as i64);
        inner.changes_failed.add(outcomes.failed as i64);
        inner.changes_skipped.add(outcomes.skipped as i64);
    }

    pub fn set_projected_savings(&self, monthly: f64) {
        self.inner().projected_savings_monthly.set(monthly);
    }

    pub fn set_realized_savings(&self, monthly: f64) {
        self.inner().realized_savings_monthly.set(monthly);
    }

    pub fn set_ledger_entries(&self, count: i64) {
        self.inner().ledger_entries.set(count);
    }
}

/// Structured logger for run lifecycle events
///
/// Provides consistent JSON-formatted logging for recommendations,
/// applied changes, and run boundaries.
#[derive(Clone)]
pub struct StructuredLogger {
    scope: String,
}

impl StructuredLogger {
    /// `scope` tags every record; pass the run's inventory scope or a
    /// deployment name.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    pub fn log_run_started(&self, run_id: &str, mode: RunMode, resources: usize) {
        info!(
            event = "run_started",
            scope = %self.scope,
            run_id = %run_id,
            mode = ?mode,
            resources = resources,
            "Sizing run started"
        );
    }

    /// Log one analysis finding that would move a resource
    pub fn log_recommendation(
        &self,
        resource_id: &str,
        from_tier: &str,
        target_tier: &str,
        urgency: Urgency,
        reason: &str,
        monthly_delta: f64,
    ) {
        info!(
            event = "recommendation_generated",
            scope = %self.scope,
            resource_id = %resource_id,
            from_tier = %from_tier,
            target_tier = %target_tier,
            urgency = ?urgency,
            reason = %reason,
            monthly_delta = monthly_delta,
            "Generated tier recommendation"
        );
    }

    pub fn log_change_applied(
        &self,
        resource_id: &str,
        from_tier: &str,
        applied_tier: &str,
        status: AttemptStatus,
    ) {
        info!(
            event = "change_applied",
            scope = %self.scope,
            resource_id = %resource_id,
            from_tier = %from_tier,
            applied_tier = %applied_tier,
            status = ?status,
            "Tier change applied"
        );
    }

    pub fn log_change_failed(&self, resource_id: &str, from_tier: &str, detail: &str) {
        warn!(
            event = "change_failed",
            scope = %self.scope,
            resource_id = %resource_id,
            from_tier = %from_tier,
            detail = %detail,
            "Remediation failed"
        );
    }

    pub fn log_verification_mismatch(
        &self,
        resource_id: &str,
        expected_tier: Option<&str>,
        observed_tier: Option<&str>,
    ) {
        warn!(
            event = "verification_mismatch",
            scope = %self.scope,
            resource_id = %resource_id,
            expected_tier = ?expected_tier,
            observed_tier = ?observed_tier,
            "Verification found divergent state"
        );
    }

    pub fn log_run_completed(
        &self,
        run_id: &str,
        outcomes: &OutcomeCounts,
        projected_savings: f64,
        realized_savings: f64,
    ) {
        info!(
            event = "run_completed",
            scope = %self.scope,
            run_id = %run_id,
            fixed = outcomes.fixed,
            partial = outcomes.partial,
            already_at_target = outcomes.already_at_target,
            already_deleted = outcomes.already_deleted,
            skipped = outcomes.skipped,
            failed = outcomes.failed,
            projected_savings_monthly = projected_savings,
            realized_savings_monthly = realized_savings,
            "Sizing run completed"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, mode: RunMode) {
        info!(
            event = "sizer_started",
            scope = %self.scope,
            version = %version,
            mode = ?mode,
            "Tier sizer started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "sizer_shutdown",
            scope = %self.scope,
            reason = %reason,
            "Tier sizer shutting down"
        );
    }
}
