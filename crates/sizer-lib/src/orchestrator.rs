//! Run orchestration
//!
//! Owns the lifecycle of one sizing run: preflight, the read-only
//! analysis pass, the dry-run gate, dependency-aware parallel execution,
//! verification and report assembly. There is no shared accumulator
//! anywhere; every phase returns values and the orchestrator folds them
//! into the [`RunResult`] it owns.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

use crate::catalog::TierCatalog;
use crate::constraint::{ConstraintResolver, Resolution};
use crate::error::RunError;
use crate::executor::{ExecutorConfig, RemediationExecutor};
use crate::ledger::ChangeLedger;
use crate::metrics::{MetricsAggregator, WindowConfig};
use crate::models::{AttemptStatus, ChangeAttempt, RecommendedAction, Resource};
use crate::observability::{SizerMetrics, StructuredLogger};
use crate::provider::{ChangeApplier, DependencyLookup, InventoryProvider, MetricsProvider};
use crate::recommend::{BandPolicy, RecommendationEngine};
use crate::report::{projected_savings, OutcomeCounts, PlannedChange, RunMode, RunResult};
use crate::verify::Verifier;

/// Dependency components executing concurrently at once.
pub const DEFAULT_WORKER_PERMITS: usize = 4;

/// Run-level behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: RunMode,
    pub worker_permits: usize,
    /// Restrict the run to one owning scope; `None` sizes everything the
    /// inventory lists.
    pub scope: Option<String>,
    /// Re-probe touched resources after an apply run.
    pub verify_after_apply: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::DryRun,
            worker_permits: DEFAULT_WORKER_PERMITS,
            scope: None,
            verify_after_apply: true,
        }
    }
}

/// Tuning for a full engine instance, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub run: OrchestratorConfig,
    pub window: WindowConfig,
    pub policy: BandPolicy,
    pub executor: ExecutorConfig,
}

/// Drives complete sizing runs over the collaborator seams.
pub struct RunOrchestrator {
    catalog: Arc<TierCatalog>,
    inventory: Arc<dyn InventoryProvider>,
    metrics_provider: Arc<dyn MetricsProvider>,
    applier: Arc<dyn ChangeApplier>,
    dependencies: Arc<dyn DependencyLookup>,
    ledger: Arc<ChangeLedger>,
    settings: EngineSettings,
    logger: StructuredLogger,
    metrics: SizerMetrics,
}

impl RunOrchestrator {
    pub fn new(
        catalog: Arc<TierCatalog>,
        inventory: Arc<dyn InventoryProvider>,
        metrics_provider: Arc<dyn MetricsProvider>,
        applier: Arc<dyn ChangeApplier>,
        dependencies: Arc<dyn DependencyLookup>,
        ledger: Arc<ChangeLedger>,
    ) -> Self {
        Self::with_settings(
            catalog,
            inventory,
            metrics_provider,
            applier,
            dependencies,
            ledger,
            EngineSettings::default(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_settings(
        catalog: Arc<TierCatalog>,
        inventory: Arc<dyn InventoryProvider>,
        metrics_provider: Arc<dyn MetricsProvider>,
        applier: Arc<dyn ChangeApplier>,
        dependencies: Arc<dyn DependencyLookup>,
        ledger: Arc<ChangeLedger>,
        settings: EngineSettings,
    ) -> Self {
        let scope_label = settings
            .run
            .scope
            .clone()
            .unwrap_or_else(|| "all".to_string());
        Self {
            catalog,
            inventory,
            metrics_provider,
            applier,
            dependencies,
            ledger,
            settings,
            logger: StructuredLogger::new(scope_label),
            metrics: SizerMetrics::new(),
        }
    }

    /// One run without an external shutdown channel.
    pub async fn run_once(&self) -> Result<RunResult, RunError> {
        let (_keep_open, cancel) = watch::channel(false);
        self.run(cancel).await
    }

    /// One full sizing run. Flipping `cancel` to `true` stops execution
    /// between resources; resources not yet started are recorded as
    /// skipped so the outcome table stays complete.
    pub async fn run(&self, cancel: watch::Receiver<bool>) -> Result<RunResult, RunError> {
        let started_at = Utc::now();
        let run_id = format!("run-{}", started_at.format("%Y%m%dT%H%M%S%3fZ"));

        // Preflight: if the inventory cannot answer, nothing happens.
        let resources = self
            .inventory
            .list_resources(self.settings.run.scope.as_deref())
            .await
            .map_err(RunError::InventoryUnavailable)?;
        self.logger
            .log_run_started(&run_id, self.settings.run.mode, resources.len());

        // Read-only analysis pass. Non-Keep recommendations go through
        // the constraint resolver so the plan promises only tiers the
        // control plane would accept.
        let aggregator = self.build_aggregator();
        let engine = self.build_engine();
        let resolver = ConstraintResolver::new(self.catalog.clone(), self.dependencies.clone());
        let mut planned = Vec::with_capacity(resources.len());
        let mut windows_sampled = 0usize;
        for resource in &resources {
            let summary = aggregator.summarize(&resource.id, started_at).await;
            if summary.has_samples() {
                windows_sampled += 1;
            }
            match engine.recommend(resource, &summary) {
                Ok(recommendation) => {
                    let change = if recommendation.action == RecommendedAction::Keep {
                        PlannedChange::from_recommendation(resource, &recommendation, &self.catalog)
                    } else {
                        match resolver.resolve(resource, &recommendation).await {
                            Ok(Resolution::Plan(plan)) => PlannedChange::from_plan(
                                resource,
                                &recommendation,
                                &plan,
                                &self.catalog,
                            ),
                            Ok(Resolution::Infeasible(reason)) => {
                                PlannedChange::infeasible(resource, &recommendation, reason)
                            }
                            Err(error) => {
                                warn!(
                                    event = "plan_unresolved",
                                    resource_id = %resource.id,
                                    error = %error,
                                    "Constraints could not be checked; reporting the raw recommendation"
                                );
                                PlannedChange::from_recommendation(
                                    resource,
                                    &recommendation,
                                    &self.catalog,
                                )
                            }
                        }
                    };
                    if change.is_change() {
                        self.logger.log_recommendation(
                            &change.resource_id,
                            &change.from_tier,
                            &change.target_tier,
                            change.urgency,
                            &change.reason,
                            change.projected_monthly_delta,
                        );
                    }
                    planned.push(change);
                }
                Err(error) => {
                    warn!(
                        event = "analysis_skipped",
                        resource_id = %resource.id,
                        error = %error,
                        "Resource left out of the plan"
                    );
                }
            }
        }
        let projected = projected_savings(&planned);
        self.metrics.add_resources_analyzed(resources.len() as i64);
        self.metrics.set_projected_savings(projected);

        // Dry-run gate: no mutating call was issued yet, and none will be.
        if !self.settings.run.mode.is_apply() {
            let outcomes = OutcomeCounts::default();
            self.logger
                .log_run_completed(&run_id, &outcomes, projected, 0.0);
            return Ok(self.finish(
                run_id,
                started_at,
                resources.len(),
                windows_sampled,
                planned,
                Vec::new(),
                outcomes,
                projected,
                0.0,
                None,
            ));
        }

        let attempts = self.execute(&resources, started_at, cancel).await;

        for attempt in &attempts {
            match attempt.status {
                AttemptStatus::Fixed | AttemptStatus::Partial => {
                    if let Some(applied) = attempt.applied_tier.as_deref() {
                        self.logger.log_change_applied(
                            &attempt.resource_id,
                            &attempt.from_tier,
                            applied,
                            attempt.status,
                        );
                    }
                }
                AttemptStatus::Failed => {
                    self.logger.log_change_failed(
                        &attempt.resource_id,
                        &attempt.from_tier,
                        attempt.detail.as_deref().unwrap_or("no detail"),
                    );
                }
                _ => {}
            }
        }

        let outcomes = OutcomeCounts::tally(&attempts);
        let realized = self
            .ledger
            .realized_savings(&self.catalog, Some(started_at));

        let verification = if self.settings.run.verify_after_apply {
            let report = Verifier::new(self.inventory.clone()).verify(&attempts).await;
            for mismatch in &report.mismatches {
                self.logger.log_verification_mismatch(
                    &mismatch.resource_id,
                    mismatch.expected_tier.as_deref(),
                    mismatch.observed_tier.as_deref(),
                );
            }
            Some(report)
        } else {
            None
        };

        self.metrics.record_outcomes(&outcomes);
        self.metrics.set_realized_savings(realized);
        self.metrics.set_ledger_entries(self.ledger.len() as i64);
        self.logger
            .log_run_completed(&run_id, &outcomes, projected, realized);

        Ok(self.finish(
            run_id,
            started_at,
            resources.len(),
            windows_sampled,
            planned,
            attempts,
            outcomes,
            projected,
            realized,
            verification,
        ))
    }

    /// Remediate every resource, dependency components in parallel and
    /// chain members sequentially, sources first.
    async fn execute(
        &self,
        resources: &[Resource],
        started_at: chrono::DateTime<Utc>,
        cancel: watch::Receiver<bool>,
    ) -> Vec<ChangeAttempt> {
        let executor = Arc::new(RemediationExecutor::with_config(
            self.catalog.clone(),
            self.inventory.clone(),
            self.build_aggregator(),
            self.build_engine(),
            ConstraintResolver::new(self.catalog.clone(), self.dependencies.clone()),
            self.applier.clone(),
            self.ledger.clone(),
            self.settings.executor.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.settings.run.worker_permits.max(1)));
        let mut workers: JoinSet<Vec<ChangeAttempt>> = JoinSet::new();
        for component in dependency_components(resources) {
            let permit_source = semaphore.clone();
            let executor = executor.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let Ok(_permit) = permit_source.acquire_owned().await else {
                    return Vec::new();
                };
                let mut attempts = Vec::with_capacity(component.len());
                for resource in component {
                    if *cancel.borrow() {
                        attempts.push(ChangeAttempt::terminal(
                            &resource.id,
                            &resource.tier,
                            AttemptStatus::Skipped,
                            "cancelled",
                        ));
                        continue;
                    }
                    attempts.push(executor.remediate(&resource.id, started_at).await);
                }
                attempts
            });
        }

        let mut attempts: Vec<ChangeAttempt> = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(list) => attempts.extend(list),
                Err(error) => {
                    warn!(
                        event = "component_worker_failed",
                        error = %error,
                        "Execution worker did not complete"
                    );
                }
            }
        }

        // Sources remediated through a dependent but absent from the
        // listed set still belong in the outcome table.
        let mut seen: HashSet<String> = attempts.iter().map(|a| a.resource_id.clone()).collect();
        for extra in executor.attempts() {
            if seen.insert(extra.resource_id.clone()) {
                attempts.push(extra);
            }
        }
        attempts.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        attempts
    }

    fn build_aggregator(&self) -> MetricsAggregator {
        MetricsAggregator::with_config(self.metrics_provider.clone(), self.settings.window.clone())
    }

    fn build_engine(&self) -> RecommendationEngine {
        RecommendationEngine::with_policy(self.catalog.clone(), self.settings.policy.clone())
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        run_id: String,
        started_at: chrono::DateTime<Utc>,
        resources_total: usize,
        windows_sampled: usize,
        planned: Vec<PlannedChange>,
        attempts: Vec<ChangeAttempt>,
        outcomes: OutcomeCounts,
        projected: f64,
        realized: f64,
        verification: Option<crate::verify::VerificationReport>,
    ) -> RunResult {
        let finished_at = Utc::now();
        let elapsed = (finished_at - started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.metrics.observe_run_duration(elapsed);
        RunResult {
            run_id,
            mode: self.settings.run.mode,
            started_at,
            finished_at,
            resources_total,
            windows_sampled,
            planned,
            attempts,
            outcomes,
            projected_monthly_savings: projected,
            realized_monthly_savings: realized,
            verification,
        }
    }
}

/// Group resources into dependency components; each component comes back
/// ordered sources-first so a dependent never starts before the resource
/// it derives from.
fn dependency_components(resources: &[Resource]) -> Vec<Vec<Resource>> {
    let index: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.as_str(), i))
        .collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    let mut parent: Vec<usize> = (0..resources.len()).collect();
    for (i, resource) in resources.iter().enumerate() {
        // Edges to sources outside the listed set resolve at execution
        // time through the recursive source fix.
        let Some(&source) = resource.depends_on.as_deref().and_then(|id| index.get(id)) else {
            continue;
        };
        let a = find(&mut parent, i);
        let b = find(&mut parent, source);
        if a != b {
            parent[a] = b;
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..resources.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    groups
        .into_values()
        .map(|members| order_sources_first(resources, members, &index))
        .collect()
}

/// Topological order over the source-to-dependent edges inside one
/// component. A cycle leaves its members appended in listing order; the
/// executor detects and fails the loop itself.
fn order_sources_first(
    resources: &[Resource],
    members: Vec<usize>,
    index: &HashMap<&str, usize>,
) -> Vec<Resource> {
    let member_set: HashSet<usize> = members.iter().copied().collect();
    let mut indegree: HashMap<usize, usize> = members.iter().map(|&i| (i, 0)).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &i in &members {
        let Some(&source) = resources[i].depends_on.as_deref().and_then(|id| index.get(id))
        else {
            continue;
        };
        if member_set.contains(&source) {
            if let Some(count) = indegree.get_mut(&i) {
                *count += 1;
            }
            dependents.entry(source).or_default().push(i);
        }
    }

    let mut queue: VecDeque<usize> = members
        .iter()
        .copied()
        .filter(|i| indegree.get(i) == Some(&0))
        .collect();
    let mut ordered = Vec::with_capacity(members.len());
    let mut placed: HashSet<usize> = HashSet::new();
    while let Some(i) = queue.pop_front() {
        ordered.push(i);
        placed.insert(i);
        if let Some(deps) = dependents.get(&i) {
            for &dependent in deps {
                if let Some(count) = indegree.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }
    }
    for &i in &members {
        if !placed.contains(&i) {
            ordered.push(i);
        }
    }

    ordered.into_iter().map(|i| resources[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceClass;
    use crate::provider::{
        AppliedCall, MemoryApplier, MemoryDependencyLookup, MemoryInventory, MemoryMetrics,
    };

    struct Harness {
        inventory: Arc<MemoryInventory>,
        metrics: Arc<MemoryMetrics>,
        applier: Arc<MemoryApplier>,
        ledger: Arc<ChangeLedger>,
        orchestrator: RunOrchestrator,
    }

    fn harness(resources: Vec<Resource>, mode: RunMode) -> Harness {
        let catalog = Arc::new(TierCatalog::builtin());
        let inventory = Arc::new(MemoryInventory::new(resources));
        let metrics = Arc::new(MemoryMetrics::default());
        let applier = Arc::new(MemoryApplier::new(inventory.clone(), (*catalog).clone()));
        let ledger = Arc::new(ChangeLedger::new());
        let orchestrator = RunOrchestrator::with_settings(
            catalog.clone(),
            inventory.clone(),
            metrics.clone(),
            applier.clone(),
            Arc::new(MemoryDependencyLookup::new(inventory.clone())),
            ledger.clone(),
            EngineSettings {
                run: OrchestratorConfig {
                    mode,
                    ..Default::default()
                },
                executor: ExecutorConfig {
                    retry_delay_ms: 1,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        Harness {
            inventory,
            metrics,
            applier,
            ledger,
            orchestrator,
        }
    }

    fn resource(id: &str, tier: &str, limit: u64, used: u64) -> Resource {
        Resource {
            id: id.to_string(),
            scope: "proj/server".to_string(),
            tier: tier.to_string(),
            storage_limit: limit,
            storage_used: used,
            class: ResourceClass::NonCritical,
            depends_on: None,
        }
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

    fn seed_idle(h: &Harness, ids: &[&str]) {
        let now = Utc::now();
        for id in ids {
            h.metrics.set_hourly(id, &idle_series(), now);
        }
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_mutating() {
        let h = harness(
            vec![
                resource("pg-1", "S2", 200, 50),
                resource("pg-2", "S1", 200, 10),
            ],
            RunMode::DryRun,
        );
        let now = Utc::now();
        h.metrics.set_hourly("pg-1", &idle_series(), now);
        h.metrics.set_hourly("pg-2", &in_band_series(), now);

        let result = h.orchestrator.run_once().await.unwrap();
        assert_eq!(result.mode, RunMode::DryRun);
        assert_eq!(result.resources_total, 2);
        assert_eq!(result.planned.len(), 2);
        assert_eq!(result.planned_changes().count(), 1);
        assert!(result.attempts.is_empty());
        assert_eq!(result.outcomes.total(), 0);
        // S2 at 75 down to S1 at 30.
        assert_eq!(result.projected_monthly_savings, 45.0);
        assert_eq!(result.realized_monthly_savings, 0.0);
        assert_eq!(h.applier.call_count(), 0);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_retargets_oversized_downgrade() {
        // Idle P1 with 300 stored units: the engine wants S2, but only S3
        // (1024 units for 150) holds the data below P1's 465.
        let h = harness(vec![resource("db-1", "P1", 1024, 300)], RunMode::DryRun);
        seed_idle(&h, &["db-1"]);

        let result = h.orchestrator.run_once().await.unwrap();
        let planned = &result.planned[0];
        assert_eq!(planned.target_tier, "S3");
        assert_eq!(planned.projected_monthly_delta, 315.0);
        assert!(planned.infeasible.is_none());
        assert_eq!(result.projected_monthly_savings, 315.0);
        assert_eq!(h.applier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_carries_shrink_and_precondition() {
        let mut replica = resource("replica", "S3", 1024, 50);
        replica.depends_on = Some("primary".to_string());
        let h = harness(
            vec![replica, resource("primary", "S3", 250, 50)],
            RunMode::DryRun,
        );
        let now = Utc::now();
        h.metrics.set_hourly("replica", &idle_series(), now);
        h.metrics.set_hourly("primary", &in_band_series(), now);

        let result = h.orchestrator.run_once().await.unwrap();
        let planned = result
            .planned
            .iter()
            .find(|p| p.resource_id == "replica")
            .unwrap();
        assert_eq!(planned.target_tier, "S2");
        assert_eq!(planned.shrink_ceiling_to, Some(250));
        let precondition = planned.precondition.as_ref().expect("price order violated");
        assert_eq!(precondition.source_id, "primary");
        assert_eq!(precondition.max_price, 75.0);
    }

    #[tokio::test]
    async fn test_dry_run_marks_unshrinkable_data_infeasible() {
        // Every tier holding 300 units costs at least as much as S3.
        let h = harness(vec![resource("db-1", "S3", 1024, 300)], RunMode::DryRun);
        seed_idle(&h, &["db-1"]);

        let result = h.orchestrator.run_once().await.unwrap();
        let planned = &result.planned[0];
        assert_eq!(
            planned.infeasible,
            Some(crate::constraint::InfeasibleReason::DataTooLargeForDowngrade)
        );
        assert_eq!(planned.projected_monthly_delta, 0.0);
        assert_eq!(result.projected_monthly_savings, 0.0);
    }

    #[tokio::test]
    async fn test_run_counts_sampled_windows() {
        let h = harness(
            vec![
                resource("pg-1", "S2", 200, 50),
                resource("pg-2", "S1", 200, 10),
            ],
            RunMode::DryRun,
        );
        // Only pg-1 has any data in the window.
        h.metrics.set_hourly("pg-1", &idle_series(), Utc::now());

        let result = h.orchestrator.run_once().await.unwrap();
        assert_eq!(result.resources_total, 2);
        assert_eq!(result.windows_sampled, 1);
    }

    #[tokio::test]
    async fn test_apply_run_remediates_and_verifies() {
        let h = harness(
            vec![
                resource("pg-1", "S2", 200, 50),
                resource("pg-2", "S3", 200, 50),
                resource("pg-3", "S1", 200, 10),
            ],
            RunMode::Apply,
        );
        seed_idle(&h, &["pg-1", "pg-2"]);
        h.metrics
            .set_hourly("pg-3", &in_band_series(), Utc::now());

        let result = h.orchestrator.run_once().await.unwrap();
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(result.outcomes.fixed, 2);
        assert_eq!(result.outcomes.already_at_target, 1);
        assert!(!result.has_failures());

        // S2->S1 saves 45, S3->S2 saves 75.
        assert_eq!(result.projected_monthly_savings, 120.0);
        assert_eq!(result.realized_monthly_savings, 120.0);

        assert_eq!(h.inventory.get("pg-1").unwrap().tier, "S1");
        assert_eq!(h.inventory.get("pg-2").unwrap().tier, "S2");
        assert_eq!(h.ledger.len(), 2);

        let verification = result.verification.expect("verification runs after apply");
        assert_eq!(verification.checked, 2);
        assert_eq!(verification.confirmed, 2);
        assert!(verification.is_clean());

        // Attempts come back in a stable order.
        let ids: Vec<&str> = result
            .attempts
            .iter()
            .map(|a| a.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["pg-1", "pg-2", "pg-3"]);
    }

    #[tokio::test]
    async fn test_preflight_failure_aborts_before_any_mutation() {
        let h = harness(vec![resource("pg-1", "S2", 200, 50)], RunMode::Apply);
        seed_idle(&h, &["pg-1"]);
        h.inventory.set_offline(true);

        let error = h.orchestrator.run_once().await.unwrap_err();
        assert!(matches!(error, RunError::InventoryUnavailable(_)));
        assert_eq!(h.applier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_resources() {
        let h = harness(
            vec![
                resource("pg-1", "S2", 200, 50),
                resource("pg-2", "S3", 200, 50),
            ],
            RunMode::Apply,
        );
        seed_idle(&h, &["pg-1", "pg-2"]);

        let (cancel_tx, cancel_rx) = watch::channel(true);
        let result = h.orchestrator.run(cancel_rx).await.unwrap();
        drop(cancel_tx);

        assert_eq!(result.outcomes.skipped, 2);
        assert_eq!(h.applier.call_count(), 0);
        assert!(result
            .attempts
            .iter()
            .all(|a| a.detail.as_deref() == Some("cancelled")));
    }

    #[tokio::test]
    async fn test_dependency_chain_runs_source_first() {
        let mut replica = resource("replica", "S3", 2, 1);
        replica.depends_on = Some("primary".to_string());
        let h = harness(
            vec![replica, resource("primary", "S3", 2, 1)],
            RunMode::Apply,
        );
        seed_idle(&h, &["replica", "primary"]);

        let result = h.orchestrator.run_once().await.unwrap();
        assert_eq!(result.outcomes.fixed, 2);

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
    }

    #[test]
    fn test_components_group_chains_and_order_sources_first() {
        let mut replica = resource("replica", "S3", 2, 1);
        replica.depends_on = Some("primary".to_string());
        let standalone = resource("standalone", "S1", 200, 10);
        let primary = resource("primary", "S3", 2, 1);

        let components = dependency_components(&[replica, standalone, primary]);
        assert_eq!(components.len(), 2);

        let chain = components
            .iter()
            .find(|c| c.len() == 2)
            .expect("chain component");
        assert_eq!(chain[0].id, "primary");
        assert_eq!(chain[1].id, "replica");

        let single = components.iter().find(|c| c.len() == 1).unwrap();
        assert_eq!(single[0].id, "standalone");
    }

    #[test]
    fn test_components_tolerate_cycles() {
        let mut a = resource("a", "S3", 2, 1);
        a.depends_on = Some("b".to_string());
        let mut b = resource("b", "S3", 2, 1);
        b.depends_on = Some("a".to_string());

        let components = dependency_components(&[a, b]);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 2);
    }
}
