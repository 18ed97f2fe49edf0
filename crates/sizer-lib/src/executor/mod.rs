//! Remediation executor
//!
//! Drives the per-resource attempt machine end to end: probe, analyze,
//! cooldown gate, plan, optional ceiling shrink, tier change, and the
//! fallback paths (upward ladder search, recursive source fix, bounded
//! transient retries). Every invocation ends in exactly one terminal
//! status and failures never escape a single resource.

mod machine;

pub use machine::{
    dispose, is_legal, AttemptBudget, AttemptProgress, AttemptState, FailureDisposition,
};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{Tier, TierCatalog};
use crate::constraint::{ConstraintResolver, Resolution};
use crate::error::ResolveError;
use crate::ledger::ChangeLedger;
use crate::metrics::MetricsAggregator;
use crate::models::{
    AttemptStatus, AttemptStep, ChangeAttempt, ChangeLedgerEntry, RecommendedAction, StepRecord,
};
use crate::provider::{ChangeApplier, InventoryProvider};
use crate::recommend::RecommendationEngine;

/// Transient retries per attempt before giving up.
pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 3;

/// Delay between transient retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Longest dependency chain the executor will follow.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: u32 = 4;

/// Executor behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_transient_retries: u32,
    pub retry_delay_ms: u64,
    pub max_dependency_depth: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
        }
    }
}

/// Runs the remediation machine for resources of one run.
///
/// The executor keeps a per-run attempt registry: a resource remediated
/// once (directly or through a dependent's source fix) returns the same
/// attempt on later calls instead of mutating again. Across runs the
/// change ledger's cooldown provides the same guarantee.
pub struct RemediationExecutor {
    catalog: Arc<TierCatalog>,
    inventory: Arc<dyn InventoryProvider>,
    aggregator: MetricsAggregator,
    engine: RecommendationEngine,
    resolver: ConstraintResolver,
    applier: Arc<dyn ChangeApplier>,
    ledger: Arc<ChangeLedger>,
    config: ExecutorConfig,
    attempts: DashMap<String, ChangeAttempt>,
}

impl RemediationExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn with_config(
        catalog: Arc<TierCatalog>,
        inventory: Arc<dyn InventoryProvider>,
        aggregator: MetricsAggregator,
        engine: RecommendationEngine,
        resolver: ConstraintResolver,
        applier: Arc<dyn ChangeApplier>,
        ledger: Arc<ChangeLedger>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            inventory,
            aggregator,
            engine,
            resolver,
            applier,
            ledger,
            config,
            attempts: DashMap::new(),
        }
    }

    /// Remediate one resource to a terminal attempt.
    pub async fn remediate(&self, resource_id: &str, now: DateTime<Utc>) -> ChangeAttempt {
        self.remediate_chained(resource_id.to_string(), now, Vec::new())
            .await
    }

    /// All attempts recorded this run, including sources fixed through
    /// dependents.
    pub fn attempts(&self) -> Vec<ChangeAttempt> {
        self.attempts.iter().map(|kv| kv.value().clone()).collect()
    }

    /// Recursion entry point. `chain` holds the ids whose machines are
    /// still running up-stack, newest last.
    fn remediate_chained(
        &self,
        resource_id: String,
        now: DateTime<Utc>,
        chain: Vec<String>,
    ) -> Pin<Box<dyn Future<Output = ChangeAttempt> + Send + '_>> {
        Box::pin(async move {
            if let Some(done) = self.attempts.get(&resource_id) {
                return done.clone();
            }
            // Guard attempts are sentinels for the caller's source-fix
            // decision; they never enter the registry.
            if chain.iter().any(|id| id == &resource_id) {
                warn!(
                    event = "dependency_cycle",
                    resource_id = %resource_id,
                    "Dependency chain loops back on itself"
                );
                return ChangeAttempt::terminal(
                    &resource_id,
                    "",
                    AttemptStatus::Failed,
                    "dependency cycle detected",
                );
            }
            if chain.len() as u32 > self.config.max_dependency_depth {
                return ChangeAttempt::terminal(
                    &resource_id,
                    "",
                    AttemptStatus::Failed,
                    "dependency chain too deep",
                );
            }

            let attempt = self.drive(&resource_id, now, &chain).await;
            self.attempts.insert(resource_id, attempt.clone());
            attempt
        })
    }

    /// One full pass of the attempt machine.
    async fn drive(&self, id: &str, now: DateTime<Utc>, chain: &[String]) -> ChangeAttempt {
        let mut progress = AttemptProgress::new(id);
        let mut budget = AttemptBudget::new(self.config.max_transient_retries);

        // Probe current state, retrying transient inventory failures.
        let resource = loop {
            match self.inventory.fetch_resource(id).await {
                Ok(resource) => break resource,
                Err(error) if error.is_transient() => {
                    if budget.consume_transient() {
                        self.pause().await;
                        continue;
                    }
                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                    return ChangeAttempt::terminal(
                        id,
                        "",
                        AttemptStatus::Failed,
                        format!("probe failed: {error}"),
                    );
                }
                Err(crate::error::ProviderError::NotFound(_)) => {
                    progress.advance(AttemptState::Done(AttemptStatus::AlreadyDeleted));
                    return ChangeAttempt::terminal(
                        id,
                        "",
                        AttemptStatus::AlreadyDeleted,
                        "resource no longer exists",
                    );
                }
                Err(error) => {
                    progress.advance(AttemptState::Done(AttemptStatus::Skipped));
                    return ChangeAttempt::terminal(
                        id,
                        "",
                        AttemptStatus::Skipped,
                        format!("probe failed: {error}"),
                    );
                }
            }
        };

        let summary = self.aggregator.summarize(id, now).await;
        let recommendation = match self.engine.recommend(&resource, &summary) {
            Ok(recommendation) => recommendation,
            Err(error) => {
                progress.advance(AttemptState::Done(AttemptStatus::Skipped));
                return ChangeAttempt::terminal(
                    id,
                    &resource.tier,
                    AttemptStatus::Skipped,
                    error.to_string(),
                );
            }
        };
        progress.advance(AttemptState::Analyzed);
        debug!(
            event = "resource_analyzed",
            resource_id = %id,
            tier = %resource.tier,
            action = ?recommendation.action,
            urgency = ?recommendation.urgency,
            target = %recommendation.target_tier,
            reason = %recommendation.reason,
            "Recommendation computed"
        );

        if recommendation.action == RecommendedAction::Keep
            || recommendation.target_tier == resource.tier
        {
            progress.advance(AttemptState::NoChangeNeeded);
            progress.advance(AttemptState::Done(AttemptStatus::AlreadyAtTarget));
            return ChangeAttempt::terminal(
                id,
                &resource.tier,
                AttemptStatus::AlreadyAtTarget,
                recommendation.reason,
            );
        }

        // Only actual changes honor the cooldown.
        if let Some(remaining) = self.ledger.cooldown_remaining(id, now) {
            progress.advance(AttemptState::BlockedByCooldown);
            progress.advance(AttemptState::Done(AttemptStatus::Skipped));
            return ChangeAttempt::terminal(
                id,
                &resource.tier,
                AttemptStatus::Skipped,
                format!(
                    "within cooldown ({}h remaining)",
                    remaining.num_hours().max(0)
                ),
            );
        }

        progress.advance(AttemptState::Planning);
        let plan = loop {
            match self.resolver.resolve(&resource, &recommendation).await {
                Ok(Resolution::Plan(plan)) => break plan,
                Ok(Resolution::Infeasible(reason)) => {
                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                    return attempt_record(
                        id,
                        &resource.tier,
                        Some(recommendation.target_tier),
                        None,
                        Vec::new(),
                        AttemptStatus::Failed,
                        Some(reason.as_str().to_string()),
                    );
                }
                Err(ResolveError::Dependency(error))
                    if error.is_transient() && budget.consume_transient() =>
                {
                    self.pause().await;
                }
                // A plan naming a tier the catalog does not know is a
                // configuration problem, not a remediation failure.
                Err(error @ ResolveError::Catalog(_)) => {
                    progress.advance(AttemptState::Done(AttemptStatus::Skipped));
                    return attempt_record(
                        id,
                        &resource.tier,
                        Some(recommendation.target_tier),
                        None,
                        Vec::new(),
                        AttemptStatus::Skipped,
                        Some(error.to_string()),
                    );
                }
                Err(error) => {
                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                    return attempt_record(
                        id,
                        &resource.tier,
                        Some(recommendation.target_tier),
                        None,
                        Vec::new(),
                        AttemptStatus::Failed,
                        Some(format!("planning failed: {error}")),
                    );
                }
            }
        };

        // Price the resource occupied at attempt start; the ladder search
        // never goes at or above it.
        let original_price = match self.catalog.by_name(&resource.tier) {
            Ok(tier) => tier.price_monthly,
            Err(error) => {
                progress.advance(AttemptState::Done(AttemptStatus::Skipped));
                return ChangeAttempt::terminal(
                    id,
                    &resource.tier,
                    AttemptStatus::Skipped,
                    error.to_string(),
                );
            }
        };

        let mut steps: Vec<StepRecord> = Vec::new();
        let mut candidate = plan.target_tier.clone();
        let mut shrink_to = plan.shrink_ceiling_to;
        let mut current_limit = resource.storage_limit;

        // The resolver found the dependency violation up front; fix the
        // source before touching this resource.
        if let Some(precondition) = &plan.precondition {
            match self
                .fix_source(&precondition.source_id, id, now, chain, &mut steps)
                .await
            {
                Ok(()) => budget.dependency_fix_used = true,
                Err(detail) => {
                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                    return attempt_record(
                        id,
                        &resource.tier,
                        Some(recommendation.target_tier),
                        None,
                        steps,
                        AttemptStatus::Failed,
                        Some(detail),
                    );
                }
            }
        }

        // One mutating call per iteration: the pending shrink first, then
        // tier changes until a disposition terminates the attempt.
        loop {
            if let Some(ceiling) = shrink_to {
                progress.advance(AttemptState::Shrinking);
                match self.applier.set_storage_ceiling(id, ceiling).await {
                    Ok(()) => {
                        steps.push(StepRecord::ok(AttemptStep::Shrink { ceiling }));
                        current_limit = ceiling;
                        shrink_to = None;
                    }
                    Err(error) => match dispose(&error, &budget) {
                        FailureDisposition::RetryAfterDelay => {
                            budget.consume_transient();
                            self.pause().await;
                        }
                        FailureDisposition::SearchLadderUp => {
                            steps.push(StepRecord::failed(
                                AttemptStep::Shrink { ceiling },
                                error.to_string(),
                            ));
                            match self.ladder_up(&candidate, resource.storage_used, original_price)
                            {
                                Some(next) => {
                                    candidate = next.name.clone();
                                    shrink_to = (current_limit > next.max_storage)
                                        .then_some(next.max_storage);
                                }
                                None => {
                                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                                    return attempt_record(
                                        id,
                                        &resource.tier,
                                        Some(recommendation.target_tier),
                                        None,
                                        steps,
                                        AttemptStatus::Failed,
                                        Some(
                                            "no acceptable tier below the original price"
                                                .to_string(),
                                        ),
                                    );
                                }
                            }
                        }
                        FailureDisposition::FixSourceFirst { source_id } => {
                            match self.fix_source(&source_id, id, now, chain, &mut steps).await {
                                Ok(()) => budget.dependency_fix_used = true,
                                Err(detail) => {
                                    progress.advance(AttemptState::Done(AttemptStatus::Failed));
                                    return attempt_record(
                                        id,
                                        &resource.tier,
                                        Some(recommendation.target_tier),
                                        None,
                                        steps,
                                        AttemptStatus::Failed,
                                        Some(detail),
                                    );
                                }
                            }
                        }
                        FailureDisposition::Terminate { status, detail } => {
                            steps.push(StepRecord::failed(
                                AttemptStep::Shrink { ceiling },
                                error.to_string(),
                            ));
                            progress.advance(AttemptState::Done(status));
                            return attempt_record(
                                id,
                                &resource.tier,
                                Some(recommendation.target_tier),
                                None,
                                steps,
                                status,
                                Some(detail),
                            );
                        }
                    },
                }
                continue;
            }

            progress.advance(AttemptState::ChangingTier);
            let step = if candidate == plan.target_tier {
                AttemptStep::TierChange {
                    tier: candidate.clone(),
                }
            } else {
                AttemptStep::LadderRetry {
                    tier: candidate.clone(),
                }
            };
            match self.applier.set_tier(id, &candidate).await {
                Ok(()) => {
                    steps.push(StepRecord::ok(step));
                    let status = if candidate == recommendation.target_tier {
                        AttemptStatus::Fixed
                    } else {
                        AttemptStatus::Partial
                    };
                    let entry = ChangeLedgerEntry {
                        resource_id: id.to_string(),
                        timestamp: now,
                        from_tier: resource.tier.clone(),
                        to_tier: candidate.clone(),
                    };
                    if let Err(error) = self.ledger.record(entry) {
                        warn!(
                            event = "ledger_record_failed",
                            resource_id = %id,
                            error = %error,
                            "Change applied but could not be recorded"
                        );
                    }
                    debug!(
                        event = "resource_remediated",
                        resource_id = %id,
                        from_tier = %resource.tier,
                        applied_tier = %candidate,
                        status = ?status,
                        "Tier change applied"
                    );
                    progress.advance(AttemptState::Done(status));
                    return attempt_record(
                        id,
                        &resource.tier,
                        Some(recommendation.target_tier),
                        Some(candidate),
                        steps,
                        status,
                        Some(recommendation.reason),
                    );
                }
                Err(error) => match dispose(&error, &budget) {
                    FailureDisposition::RetryAfterDelay => {
                        budget.consume_transient();
                        self.pause().await;
                    }
                    FailureDisposition::SearchLadderUp => {
                        steps.push(StepRecord::failed(step, error.to_string()));
                        match self.ladder_up(&candidate, resource.storage_used, original_price) {
                            Some(next) => {
                                info!(
                                    event = "ladder_fallback",
                                    resource_id = %id,
                                    rejected = %candidate,
                                    retrying = %next.name,
                                    "Storage rejection, walking the ladder up"
                                );
                                candidate = next.name.clone();
                                shrink_to =
                                    (current_limit > next.max_storage).then_some(next.max_storage);
                            }
                            None => {
                                progress.advance(AttemptState::Done(AttemptStatus::Failed));
                                return attempt_record(
                                    id,
                                    &resource.tier,
                                    Some(recommendation.target_tier),
                                    None,
                                    steps,
                                    AttemptStatus::Failed,
                                    Some("no acceptable tier below the original price".to_string()),
                                );
                            }
                        }
                    }
                    FailureDisposition::FixSourceFirst { source_id } => {
                        match self.fix_source(&source_id, id, now, chain, &mut steps).await {
                            Ok(()) => budget.dependency_fix_used = true,
                            Err(detail) => {
                                steps.push(StepRecord::failed(step, error.to_string()));
                                progress.advance(AttemptState::Done(AttemptStatus::Failed));
                                return attempt_record(
                                    id,
                                    &resource.tier,
                                    Some(recommendation.target_tier),
                                    None,
                                    steps,
                                    AttemptStatus::Failed,
                                    Some(detail),
                                );
                            }
                        }
                    }
                    FailureDisposition::Terminate { status, detail } => {
                        steps.push(StepRecord::failed(step, error.to_string()));
                        progress.advance(AttemptState::Done(status));
                        return attempt_record(
                            id,
                            &resource.tier,
                            Some(recommendation.target_tier),
                            None,
                            steps,
                            status,
                            Some(detail),
                        );
                    }
                },
            }
        }
    }

    /// Remediate the blocking source resource. Any outcome short of
    /// `Failed` lets the dependent retry: the source may already sit at an
    /// acceptable price (cooldown, already at target, even deleted).
    async fn fix_source(
        &self,
        source_id: &str,
        dependent_id: &str,
        now: DateTime<Utc>,
        chain: &[String],
        steps: &mut Vec<StepRecord>,
    ) -> Result<(), String> {
        info!(
            event = "source_fix",
            resource_id = %dependent_id,
            source_id = %source_id,
            "Dependent priced below source, remediating the source first"
        );
        let mut chain = chain.to_vec();
        chain.push(dependent_id.to_string());
        let outcome = self
            .remediate_chained(source_id.to_string(), now, chain)
            .await;

        let step = AttemptStep::SourceFix {
            source: source_id.to_string(),
        };
        if outcome.status == AttemptStatus::Failed {
            let detail = outcome
                .detail
                .unwrap_or_else(|| "source remediation failed".to_string());
            steps.push(StepRecord::failed(step, detail));
            Err("unresolved dependency".to_string())
        } else {
            steps.push(StepRecord::ok(step));
            Ok(())
        }
    }

    /// Next tier strictly above `after` that holds the data and still
    /// costs less than the attempt-start price. Walking positions upward
    /// visits each rung at most once, so the search always terminates.
    fn ladder_up(&self, after: &str, storage_used: u64, below_price: f64) -> Option<&Tier> {
        let position = self.catalog.by_name(after).ok()?.position;
        self.catalog
            .above(position)
            .find(|t| t.max_storage >= storage_used && t.price_monthly < below_price)
    }

    async fn pause(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(self.config.retry_delay_ms)).await;
    }
}

fn attempt_record(
    resource_id: &str,
    from_tier: &str,
    target_tier: Option<String>,
    applied_tier: Option<String>,
    steps: Vec<StepRecord>,
    status: AttemptStatus,
    detail: Option<String>,
) -> ChangeAttempt {
    ChangeAttempt {
        resource_id: resource_id.to_string(),
        from_tier: from_tier.to_string(),
        target_tier,
        applied_tier,
        steps,
        status,
        detail,
        completed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::ConstraintResolver;
    use crate::error::ApplyError;
    use crate::ledger::LedgerConfig;
    use crate::models::{Resource, ResourceClass};
    use crate::provider::{
        AppliedCall, MemoryApplier, MemoryDependencyLookup, MemoryInventory, MemoryMetrics,
    };

    struct Harness {
        inventory: Arc<MemoryInventory>,
        metrics: Arc<MemoryMetrics>,
        applier: Arc<MemoryApplier>,
        ledger: Arc<ChangeLedger>,
        executor: RemediationExecutor,
    }

    fn harness(resources: Vec<Resource>) -> Harness {
        harness_with_ledger(resources, Arc::new(ChangeLedger::new()))
    }

    fn harness_with_ledger(resources: Vec<Resource>, ledger: Arc<ChangeLedger>) -> Harness {
        let catalog = Arc::new(TierCatalog::builtin());
        let inventory = Arc::new(MemoryInventory::new(resources));
        let metrics = Arc::new(MemoryMetrics::default());
        let applier = Arc::new(MemoryApplier::new(inventory.clone(), (*catalog).clone()));
        let executor = RemediationExecutor::with_config(
            catalog.clone(),
            inventory.clone(),
            MetricsAggregator::new(metrics.clone()),
            RecommendationEngine::new(catalog.clone()),
            ConstraintResolver::new(
                catalog.clone(),
                Arc::new(MemoryDependencyLookup::new(inventory.clone())),
            ),
            applier.clone(),
            ledger.clone(),
            ExecutorConfig {
                retry_delay_ms: 1,
                ..Default::default()
            },
        );
        Harness {
            inventory,
            metrics,
            applier,
            ledger,
            executor,
        }
    }

    fn resource(id: &str, tier: &str, limit: u64, used: u64, class: ResourceClass) -> Resource {
        Resource {
            id: id.to_string(),
            scope: "proj/server".to_string(),
            tier: tier.to_string(),
            storage_limit: limit,
            storage_used: used,
            class,
            depends_on: None,
        }
    }

    fn hot_series() -> Vec<f64> {
        let mut series = vec![70.0; 167];
        series.push(96.0);
        series
    }

    fn idle_series() -> Vec<f64> {
        let mut series = vec![10.0; 167];
        series.push(15.0);
        series
    }

    fn in_band_series() -> Vec<f64> {
        let mut series = vec![45.0; 167];
        series.push(55.0);
        series
    }

    #[tokio::test]
    async fn test_hot_critical_resource_is_upgraded() {
        let h = harness(vec![resource("db-1", "S1", 200, 50, ResourceClass::Critical)]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &hot_series(), now);

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Fixed);
        assert_eq!(attempt.applied_tier.as_deref(), Some("S2"));
        assert_eq!(h.inventory.get("db-1").unwrap().tier, "S2");
        assert_eq!(h.ledger.entries_for("db-1").len(), 1);
        assert_eq!(attempt.steps.len(), 1);
        assert!(attempt.steps[0].ok);
    }

    #[tokio::test]
    async fn test_in_band_resource_makes_no_calls() {
        let h = harness(vec![resource(
            "db-1",
            "S1",
            200,
            50,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &in_band_series(), now);

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::AlreadyAtTarget);
        assert_eq!(h.applier.call_count(), 0);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_skips_before_any_call() {
        let ledger = Arc::new(ChangeLedger::new());
        let now = Utc::now();
        ledger
            .record(ChangeLedgerEntry {
                resource_id: "db-1".to_string(),
                timestamp: now - chrono::Duration::hours(10),
                from_tier: "S3".to_string(),
                to_tier: "S2".to_string(),
            })
            .unwrap();

        let h = harness_with_ledger(
            vec![resource("db-1", "S2", 200, 50, ResourceClass::NonCritical)],
            ledger,
        );
        h.metrics.set_hourly("db-1", &idle_series(), now);

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Skipped);
        assert!(attempt.detail.as_deref().unwrap().contains("within cooldown"));
        assert_eq!(h.applier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_vanished_resource_is_already_deleted() {
        let h = harness(vec![]);
        let attempt = h.executor.remediate("ghost", Utc::now()).await;
        assert_eq!(attempt.status, AttemptStatus::AlreadyDeleted);
        assert_eq!(h.applier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let h = harness(vec![resource(
            "db-1",
            "S2",
            200,
            50,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        h.applier
            .script_failure("db-1", ApplyError::Transient("throttled".into()));

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Fixed);
        assert_eq!(attempt.applied_tier.as_deref(), Some("S1"));
        assert_eq!(h.applier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_fails_the_resource() {
        let h = harness(vec![resource(
            "db-1",
            "S2",
            200,
            50,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        for _ in 0..4 {
            h.applier
                .script_failure("db-1", ApplyError::Transient("throttled".into()));
        }

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt.detail.as_deref().unwrap().contains("exhausted"));
        // Initial call plus the three budgeted retries.
        assert_eq!(h.applier.call_count(), 4);
    }

    #[tokio::test]
    async fn test_size_rejection_walks_ladder_to_partial() {
        let h = harness(vec![resource(
            "db-1",
            "P1",
            250,
            50,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        h.applier
            .script_failure("db-1", ApplyError::SizeExceedsTier { tier: "S2".into() });

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Partial);
        assert_eq!(attempt.target_tier.as_deref(), Some("S2"));
        assert_eq!(attempt.applied_tier.as_deref(), Some("S3"));
        assert_eq!(h.inventory.get("db-1").unwrap().tier, "S3");

        assert_eq!(attempt.steps.len(), 2);
        assert!(!attempt.steps[0].ok);
        assert!(matches!(
            attempt.steps[1].step,
            AttemptStep::LadderRetry { ref tier } if tier == "S3"
        ));
    }

    #[tokio::test]
    async fn test_ladder_exhaustion_fails() {
        let h = harness(vec![resource(
            "db-1",
            "S0",
            2,
            1,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        h.applier
            .script_failure("db-1", ApplyError::SizeExceedsTier { tier: "B".into() });

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt
            .detail
            .as_deref()
            .unwrap()
            .contains("below the original price"));
    }

    #[tokio::test]
    async fn test_dependency_precondition_fixes_source_first() {
        let mut replica = resource("replica", "S3", 2, 1, ResourceClass::NonCritical);
        replica.depends_on = Some("primary".to_string());
        let primary = resource("primary", "S3", 2, 1, ResourceClass::NonCritical);
        let h = harness(vec![primary, replica]);

        let now = Utc::now();
        h.metrics.set_hourly("replica", &idle_series(), now);
        h.metrics.set_hourly("primary", &idle_series(), now);

        let attempt = h.executor.remediate("replica", now).await;
        assert_eq!(attempt.status, AttemptStatus::Fixed);
        assert!(attempt
            .steps
            .iter()
            .any(|s| matches!(s.step, AttemptStep::SourceFix { ref source } if source == "primary") && s.ok));

        // The source was remediated inside the replica's attempt and its
        // change landed before the replica's.
        let registered = h.executor.attempts();
        let primary_attempt = registered
            .iter()
            .find(|a| a.resource_id == "primary")
            .expect("primary attempt registered");
        assert_eq!(primary_attempt.status, AttemptStatus::Fixed);

        let calls = h.applier.calls();
        let primary_index = calls
            .iter()
            .position(|c| matches!(c, AppliedCall::SetTier { resource_id, .. } if resource_id == "primary"))
            .unwrap();
        let replica_index = calls
            .iter()
            .position(|c| matches!(c, AppliedCall::SetTier { resource_id, .. } if resource_id == "replica"))
            .unwrap();
        assert!(primary_index < replica_index);

        // Final price order holds.
        let catalog = TierCatalog::builtin();
        let replica_price = catalog
            .by_name(&h.inventory.get("replica").unwrap().tier)
            .unwrap()
            .price_monthly;
        let primary_price = catalog
            .by_name(&h.inventory.get("primary").unwrap().tier)
            .unwrap()
            .price_monthly;
        assert!(replica_price >= primary_price);
        assert_eq!(h.ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_dependency_cycle_fails_cleanly() {
        let mut a = resource("a", "S3", 2, 1, ResourceClass::NonCritical);
        a.depends_on = Some("b".to_string());
        let mut b = resource("b", "S3", 2, 1, ResourceClass::NonCritical);
        b.depends_on = Some("a".to_string());
        let h = harness(vec![a, b]);

        let now = Utc::now();
        h.metrics.set_hourly("a", &idle_series(), now);
        h.metrics.set_hourly("b", &idle_series(), now);

        let attempt = h.executor.remediate("a", now).await;
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(attempt.detail.as_deref(), Some("unresolved dependency"));
    }

    #[tokio::test]
    async fn test_infeasible_downgrade_fails_without_calls() {
        let h = harness(vec![resource(
            "db-1",
            "S3",
            1024,
            300,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert_eq!(
            attempt.detail.as_deref(),
            Some("data too large for downgrade")
        );
        assert_eq!(h.applier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_shrink_precedes_tier_change() {
        let h = harness(vec![resource(
            "db-1",
            "S3",
            1024,
            100,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Fixed);
        assert_eq!(attempt.applied_tier.as_deref(), Some("S2"));

        let calls = h.applier.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(
            calls[0],
            AppliedCall::SetStorageCeiling { ceiling: 250, .. }
        ));
        assert!(matches!(calls[1], AppliedCall::SetTier { .. }));

        let moved = h.inventory.get("db-1").unwrap();
        assert_eq!(moved.tier, "S2");
        assert_eq!(moved.storage_limit, 250);
        assert!(moved.storage_used <= 250);
    }

    #[tokio::test]
    async fn test_reactive_dependency_error_fixes_named_source() {
        // No declared edge, but the control plane reports one anyway.
        let db = resource("db-1", "S2", 200, 50, ResourceClass::NonCritical);
        let other = resource("other", "B", 2, 1, ResourceClass::NonCritical);
        let h = harness(vec![db, other]);

        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        h.metrics.set_hourly("other", &in_band_series(), now);
        h.applier.script_failure(
            "db-1",
            ApplyError::DependencyPriceOrder {
                source_id: "other".into(),
            },
        );

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Fixed);
        assert!(attempt
            .steps
            .iter()
            .any(|s| matches!(s.step, AttemptStep::SourceFix { ref source } if source == "other") && s.ok));
    }

    #[tokio::test]
    async fn test_permanent_apply_error_skips() {
        let h = harness(vec![resource(
            "db-1",
            "S2",
            200,
            50,
            ResourceClass::NonCritical,
        )]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &idle_series(), now);
        h.applier
            .script_failure("db-1", ApplyError::Permanent("quota exceeded".into()));

        let attempt = h.executor.remediate("db-1", now).await;
        assert_eq!(attempt.status, AttemptStatus::Skipped);
        assert!(attempt.detail.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_second_call_within_run_reuses_attempt() {
        let h = harness(vec![resource("db-1", "S1", 200, 50, ResourceClass::Critical)]);
        let now = Utc::now();
        h.metrics.set_hourly("db-1", &hot_series(), now);

        let first = h.executor.remediate("db-1", now).await;
        assert_eq!(first.status, AttemptStatus::Fixed);
        let calls_after_first = h.applier.call_count();

        let second = h.executor.remediate("db-1", now).await;
        assert_eq!(second.status, AttemptStatus::Fixed);
        assert_eq!(second.completed_at, first.completed_at);
        assert_eq!(h.applier.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_second_run_is_blocked_by_cooldown() {
        let catalog = Arc::new(TierCatalog::builtin());
        let inventory = Arc::new(MemoryInventory::new(vec![resource(
            "db-1",
            "S2",
            200,
            50,
            ResourceClass::NonCritical,
        )]));
        let metrics = Arc::new(MemoryMetrics::default());
        let ledger = Arc::new(ChangeLedger::with_config(LedgerConfig::default()));
        let applier = Arc::new(MemoryApplier::new(inventory.clone(), (*catalog).clone()));
        let now = Utc::now();
        metrics.set_hourly("db-1", &idle_series(), now);

        let run = |_: u32| {
            RemediationExecutor::with_config(
                catalog.clone(),
                inventory.clone(),
                MetricsAggregator::new(metrics.clone()),
                RecommendationEngine::new(catalog.clone()),
                ConstraintResolver::new(
                    catalog.clone(),
                    Arc::new(MemoryDependencyLookup::new(inventory.clone())),
                ),
                applier.clone(),
                ledger.clone(),
                ExecutorConfig {
                    retry_delay_ms: 1,
                    ..Default::default()
                },
            )
        };

        let first = run(1).remediate("db-1", now).await;
        assert_eq!(first.status, AttemptStatus::Fixed);

        let second = run(2).remediate("db-1", now).await;
        assert_eq!(second.status, AttemptStatus::Skipped);
        assert!(second
            .detail
            .as_deref()
            .unwrap()
            .contains("within cooldown"));
        assert_eq!(h_call_count(&applier), 1);
    }

    fn h_call_count(applier: &MemoryApplier) -> usize {
        applier
            .calls()
            .iter()
            .filter(|c| matches!(c, AppliedCall::SetTier { .. }))
            .count()
    }
}
