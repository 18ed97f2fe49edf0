//! Core data models for the sizing engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a managed resource, driving how aggressively it is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Production-critical; sized with extra headroom.
    Critical,
    /// Everything else; tolerates tighter packing.
    NonCritical,
}

/// A managed resource as reported by the inventory provider.
///
/// Tier and ceiling fields are mutated only by the remediation executor
/// after a successful apply; the engine never deletes resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Opaque identity, unique within the inventory.
    pub id: String,
    /// Owning scope, e.g. "project/server".
    pub scope: String,
    /// Name of the current tier in the catalog ladder.
    pub tier: String,
    /// Declared storage ceiling (the provisioned max-size setting).
    pub storage_limit: u64,
    /// Observed stored-data size.
    pub storage_used: u64,
    pub class: ResourceClass,
    /// Source resource this one derives from (replica relationship), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

impl Resource {
    pub fn is_critical(&self) -> bool {
        self.class == ResourceClass::Critical
    }
}

/// One utilization observation from the metrics provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    /// Percent of the current tier's capacity in use, 0–100.
    pub percent: f64,
}

/// Summary statistics over a trailing window. Computed fresh per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSummary {
    pub average_percent: f64,
    pub maximum_percent: f64,
    /// Samples above the breach threshold.
    pub breaches: u32,
    /// Samples seen in the window. Zero means "no data", which is not the
    /// same thing as confirmed zero utilization.
    pub samples: u32,
    pub window_days: u32,
}

impl UtilizationSummary {
    /// Summary for a window the provider had nothing for.
    pub fn no_data(window_days: u32) -> Self {
        Self {
            average_percent: 0.0,
            maximum_percent: 0.0,
            breaches: 0,
            samples: 0,
            window_days,
        }
    }

    /// Whether any observations back this summary.
    pub fn has_samples(&self) -> bool {
        self.samples > 0
    }
}

/// Direction of a recommended tier change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Increase,
    Decrease,
    Keep,
}

/// How urgently a recommendation should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Normal,
}

/// Output of the recommendation engine for one resource. Transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: RecommendedAction,
    pub urgency: Urgency,
    /// Target tier name; equals the current tier for `Keep`.
    pub target_tier: String,
    /// Capacity units the workload needs after applying the target band.
    pub needed_capacity: f64,
    pub reason: String,
}

impl Recommendation {
    /// A keep-current recommendation with the given reason.
    pub fn keep(current_tier: &str, reason: impl Into<String>) -> Self {
        Self {
            action: RecommendedAction::Keep,
            urgency: Urgency::Normal,
            target_tier: current_tier.to_string(),
            needed_capacity: 0.0,
            reason: reason.into(),
        }
    }
}

/// Terminal status of one remediation attempt. Mutually exclusive; every
/// executor invocation ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Recommended tier applied.
    Fixed,
    /// A cheaper tier applied, but not the recommended one (ladder fallback).
    Partial,
    /// No change was needed.
    AlreadyAtTarget,
    /// The resource no longer exists; treated as success.
    AlreadyDeleted,
    /// Not attempted: cooldown, unknown target, or cancelled run.
    Skipped,
    Failed,
}

impl AttemptStatus {
    /// Whether the attempt mutated the resource.
    pub fn changed(&self) -> bool {
        matches!(self, AttemptStatus::Fixed | AttemptStatus::Partial)
    }
}

/// One sub-step of an attempt, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum AttemptStep {
    /// Storage ceiling reduced ahead of a downgrade.
    Shrink { ceiling: u64 },
    TierChange { tier: String },
    /// Recursive remediation of the blocking source resource.
    SourceFix { source: String },
    /// Retry at a fallback tier found by the upward ladder search.
    LadderRetry { tier: String },
}

/// Record of one sub-step and how it went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(flatten)]
    pub step: AttemptStep,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn ok(step: AttemptStep) -> Self {
        Self {
            step,
            ok: true,
            error: None,
        }
    }

    pub fn failed(step: AttemptStep, error: impl Into<String>) -> Self {
        Self {
            step,
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Full record of one per-resource remediation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeAttempt {
    pub resource_id: String,
    /// Tier the resource occupied when the attempt started.
    pub from_tier: String,
    /// Tier the plan aimed for, when there was a plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tier: Option<String>,
    /// Tier actually applied; differs from the target after a fallback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_tier: Option<String>,
    pub steps: Vec<StepRecord>,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ChangeAttempt {
    /// Attempt that terminated before any plan existed.
    pub fn terminal(
        resource_id: &str,
        from_tier: &str,
        status: AttemptStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            from_tier: from_tier.to_string(),
            target_tier: None,
            applied_tier: None,
            steps: Vec::new(),
            status,
            detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }
}

/// Append-only ledger record of an applied change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLedgerEntry {
    pub resource_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_tier: String,
    pub to_tier: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_summary_has_no_samples() {
        let summary = UtilizationSummary::no_data(7);
        assert!(!summary.has_samples());
        assert_eq!(summary.average_percent, 0.0);
        assert_eq!(summary.maximum_percent, 0.0);
        assert_eq!(summary.breaches, 0);
    }

    #[test]
    fn keep_recommendation_targets_current_tier() {
        let rec = Recommendation::keep("S1", "utilization inside band");
        assert_eq!(rec.action, RecommendedAction::Keep);
        assert_eq!(rec.target_tier, "S1");
        assert_eq!(rec.urgency, Urgency::Normal);
    }

    #[test]
    fn only_fixed_and_partial_count_as_changes() {
        assert!(AttemptStatus::Fixed.changed());
        assert!(AttemptStatus::Partial.changed());
        assert!(!AttemptStatus::AlreadyAtTarget.changed());
        assert!(!AttemptStatus::AlreadyDeleted.changed());
        assert!(!AttemptStatus::Skipped.changed());
        assert!(!AttemptStatus::Failed.changed());
    }

    #[test]
    fn attempt_step_serializes_with_tag() {
        let record = StepRecord::ok(AttemptStep::TierChange { tier: "S2".into() });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"step\":\"tier_change\""));
        assert!(json.contains("\"tier\":\"S2\""));
    }
}
