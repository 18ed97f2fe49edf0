//! Run report assembly
//!
//! One [`RunResult`] per run, owned by the orchestrator and filled from
//! returned values. Components never accumulate findings in shared state;
//! everything a run produced is carried here and serialized as JSON by
//! the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::TierCatalog;
use crate::constraint::{FeasiblePlan, InfeasibleReason, Precondition};
use crate::models::{
    AttemptStatus, ChangeAttempt, Recommendation, RecommendedAction, Resource, Urgency,
};
use crate::verify::VerificationReport;

/// Whether a run stops after analysis or applies its plans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Analyze and report only; no mutating call is ever issued.
    #[default]
    DryRun,
    /// Analyze, then remediate.
    Apply,
}

impl RunMode {
    pub fn is_apply(&self) -> bool {
        matches!(self, RunMode::Apply)
    }
}

/// One analysis-phase finding for a single resource.
///
/// For non-Keep findings the target tier is the constraint-vetted one;
/// it may sit higher up the ladder than the raw recommendation when the
/// stored data does not fit the recommended rung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub resource_id: String,
    pub from_tier: String,
    pub action: RecommendedAction,
    pub urgency: Urgency,
    pub target_tier: String,
    pub reason: String,
    /// Monthly price delta of the move. Positive for downgrades (money
    /// saved), negative for upgrades.
    pub projected_monthly_delta: f64,
    /// Lower the declared storage ceiling to this value before the move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shrink_ceiling_to: Option<u64>,
    /// Source resource that must be repriced before this change can apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Precondition>,
    /// Set when no acceptable tier exists; the delta is zeroed because the
    /// change cannot apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infeasible: Option<InfeasibleReason>,
}

impl PlannedChange {
    /// A finding built straight from the recommendation, without
    /// constraint checks. Used for Keep decisions and as the fallback
    /// when the resolver cannot answer.
    pub fn from_recommendation(
        resource: &Resource,
        recommendation: &Recommendation,
        catalog: &TierCatalog,
    ) -> Self {
        let delta = match (
            catalog.by_name(&resource.tier),
            catalog.by_name(&recommendation.target_tier),
        ) {
            (Ok(from), Ok(to)) => from.price_monthly - to.price_monthly,
            _ => 0.0,
        };
        Self {
            resource_id: resource.id.clone(),
            from_tier: resource.tier.clone(),
            action: recommendation.action,
            urgency: recommendation.urgency,
            target_tier: recommendation.target_tier.clone(),
            reason: recommendation.reason.clone(),
            projected_monthly_delta: delta,
            shrink_ceiling_to: None,
            precondition: None,
            infeasible: None,
        }
    }

    /// A finding vetted by constraint resolution; carries the possibly
    /// retargeted tier plus the steps an apply run would take first.
    pub fn from_plan(
        resource: &Resource,
        recommendation: &Recommendation,
        plan: &FeasiblePlan,
        catalog: &TierCatalog,
    ) -> Self {
        let delta = catalog
            .by_name(&resource.tier)
            .map(|from| from.price_monthly - plan.target_price)
            .unwrap_or(0.0);
        Self {
            resource_id: resource.id.clone(),
            from_tier: resource.tier.clone(),
            action: recommendation.action,
            urgency: recommendation.urgency,
            target_tier: plan.target_tier.clone(),
            reason: recommendation.reason.clone(),
            projected_monthly_delta: delta,
            shrink_ceiling_to: plan.shrink_ceiling_to,
            precondition: plan.precondition.clone(),
            infeasible: None,
        }
    }

    /// A recommended change no acceptable tier can satisfy. Kept in the
    /// plan so the report shows it, with nothing to project.
    pub fn infeasible(
        resource: &Resource,
        recommendation: &Recommendation,
        reason: InfeasibleReason,
    ) -> Self {
        Self {
            resource_id: resource.id.clone(),
            from_tier: resource.tier.clone(),
            action: recommendation.action,
            urgency: recommendation.urgency,
            target_tier: resource.tier.clone(),
            reason: recommendation.reason.clone(),
            projected_monthly_delta: 0.0,
            shrink_ceiling_to: None,
            precondition: None,
            infeasible: Some(reason),
        }
    }

    pub fn is_change(&self) -> bool {
        self.action != RecommendedAction::Keep
    }
}

/// Attempt tally by terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub fixed: usize,
    pub partial: usize,
    pub already_at_target: usize,
    pub already_deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn tally(attempts: &[ChangeAttempt]) -> Self {
        let mut counts = Self::default();
        for attempt in attempts {
            counts.record(attempt.status);
        }
        counts
    }

    pub fn record(&mut self, status: AttemptStatus) {
        match status {
            AttemptStatus::Fixed => self.fixed += 1,
            AttemptStatus::Partial => self.partial += 1,
            AttemptStatus::AlreadyAtTarget => self.already_at_target += 1,
            AttemptStatus::AlreadyDeleted => self.already_deleted += 1,
            AttemptStatus::Skipped => self.skipped += 1,
            AttemptStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fixed
            + self.partial
            + self.already_at_target
            + self.already_deleted
            + self.skipped
            + self.failed
    }
}

/// Everything one sizing run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Resources the inventory listed at preflight.
    pub resources_total: usize,
    /// Resources whose trailing window held at least one sample. Zero
    /// with a non-empty inventory points at a metrics-provider outage.
    #[serde(default)]
    pub windows_sampled: usize,
    /// Analysis findings, including Keep decisions.
    pub planned: Vec<PlannedChange>,
    /// Per-resource terminal attempts; empty in dry-run mode.
    pub attempts: Vec<ChangeAttempt>,
    pub outcomes: OutcomeCounts,
    /// Monthly savings the planned downgrades would realize if applied.
    pub projected_monthly_savings: f64,
    /// Monthly savings the changes recorded this run actually realized.
    pub realized_monthly_savings: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

impl RunResult {
    /// True when at least one resource ended in `Failed`. Reported as a
    /// summary flag; the process exit status does not change.
    pub fn has_failures(&self) -> bool {
        self.outcomes.failed > 0
    }

    /// Planned changes that would actually move a resource.
    pub fn planned_changes(&self) -> impl Iterator<Item = &PlannedChange> {
        self.planned.iter().filter(|p| p.is_change())
    }
}

/// Sum of monthly deltas over planned decreases.
pub fn projected_savings(planned: &[PlannedChange]) -> f64 {
    planned
        .iter()
        .filter(|p| p.action == RecommendedAction::Decrease)
        .map(|p| p.projected_monthly_delta)
        .sum()
}
