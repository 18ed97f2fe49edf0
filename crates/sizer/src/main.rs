//! Tier sizer - compute tier sizing and remediation service
//!
//! Periodically measures trailing utilization for every tiered
//! resource, recommends a tier, and in apply mode remediates the
//! fleet under its dependency and price constraints.

use anyhow::{Context, Result};
use sizer_lib::{
    catalog::TierCatalog,
    health::{Component, HealthRegistry},
    ledger::ChangeLedger,
    observability::{SizerMetrics, StructuredLogger},
    orchestrator::RunOrchestrator,
    provider::{MemoryApplier, MemoryDependencyLookup, MemoryInventory, MemoryMetrics, Snapshot},
    report::RunResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const SIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting tier-sizer");

    // Load configuration
    let config = config::SizerConfig::load()?;
    info!(
        deployment = %config.deployment,
        mode = ?config.mode(),
        interval_minutes = config.run_interval_minutes,
        "Sizer configured"
    );

    // Tier ladder
    let catalog = match &config.catalog_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading tier catalog {path}"))?;
            TierCatalog::from_json(&json)?
        }
        None => TierCatalog::builtin(),
    };

    // Fleet snapshot backing the provider seams
    let snapshot = match &config.snapshot_path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading fleet snapshot {path}"))?;
            Snapshot::from_json(&json)?
        }
        None => {
            warn!("No fleet snapshot configured, starting with an empty inventory");
            Snapshot {
                taken_at: chrono::Utc::now(),
                resources: Vec::new(),
            }
        }
    };
    let inventory = Arc::new(MemoryInventory::from_snapshot(&snapshot));
    let metrics_provider = Arc::new(MemoryMetrics::from_snapshot(&snapshot));
    let applier = Arc::new(MemoryApplier::new(inventory.clone(), catalog.clone()));
    let dependencies = Arc::new(MemoryDependencyLookup::new(inventory.clone()));

    // Change ledger, persisted when configured
    let ledger = Arc::new(ChangeLedger::with_persistence(config.ledger_config())?);

    // Initialize health registry and metrics
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;
    let _metrics = SizerMetrics::new();

    // Initialize structured logger
    let logger = StructuredLogger::new(&config.deployment);
    logger.log_startup(SIZER_VERSION, config.mode());

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(health_registry.clone()));

    // Mark sizer as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Orchestrator over the snapshot-backed seams
    let orchestrator = Arc::new(RunOrchestrator::with_settings(
        Arc::new(catalog),
        inventory,
        metrics_provider,
        applier,
        dependencies,
        ledger,
        config.engine_settings(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_handle = tokio::spawn(run_loop(
        orchestrator,
        config.run_interval_minutes,
        config.report_path.clone(),
        health_registry.clone(),
        shutdown_rx,
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);
    let _ = run_handle.await;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}

/// Periodic sizing runs, the first fired immediately. Flipping the
/// shutdown channel stops the ticker and interrupts an in-flight run
/// between resources.
async fn run_loop(
    orchestrator: Arc<RunOrchestrator>,
    interval_minutes: u64,
    report_path: Option<String>,
    health: HealthRegistry,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes.max(1) * 60));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match orchestrator.run(shutdown.clone()).await {
                    Ok(result) => {
                        reflect_run_health(&health, &result).await;
                        if let Some(path) = &report_path {
                            if let Err(error) = write_report(path, &result) {
                                warn!(error = %error, path = %path, "Could not write run report");
                            }
                        }
                    }
                    Err(error) => {
                        error!(error = %error, "Sizing run failed");
                        health
                            .set_unhealthy(Component::Inventory, error.to_string())
                            .await;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Fold one completed run into the collaborator registry. A run that
/// finished reached every seam; a non-empty inventory whose windows all
/// came back empty points at the metrics provider instead.
async fn reflect_run_health(health: &HealthRegistry, result: &RunResult) {
    health.set_healthy(Component::Inventory).await;
    health.set_healthy(Component::ChangeApplier).await;
    health.set_healthy(Component::Ledger).await;
    if result.resources_total > 0 && result.windows_sampled == 0 {
        health
            .set_degraded(
                Component::MetricsProvider,
                "no utilization samples in any window",
            )
            .await;
    } else {
        health.set_healthy(Component::MetricsProvider).await;
    }
}

fn write_report(path: &str, result: &RunResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sizer_lib::health::ComponentStatus;
    use sizer_lib::report::{OutcomeCounts, RunMode};

    fn run_result(resources_total: usize, windows_sampled: usize) -> RunResult {
        RunResult {
            run_id: "run-test".to_string(),
            mode: RunMode::DryRun,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            resources_total,
            windows_sampled,
            planned: Vec::new(),
            attempts: Vec::new(),
            outcomes: OutcomeCounts::default(),
            projected_monthly_savings: 0.0,
            realized_monthly_savings: 0.0,
            verification: None,
        }
    }

    #[tokio::test]
    async fn test_empty_windows_degrade_the_metrics_provider() {
        let health = HealthRegistry::new();
        health.register_all().await;

        reflect_run_health(&health, &run_result(3, 0)).await;
        let report = health.health().await;
        assert_eq!(
            report.components[&Component::MetricsProvider].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            report.components[&Component::Inventory].status,
            ComponentStatus::Healthy
        );

        // The next run with data clears the degradation.
        reflect_run_health(&health, &run_result(3, 3)).await;
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_empty_inventory_is_not_a_metrics_outage() {
        let health = HealthRegistry::new();
        health.register_all().await;

        reflect_run_health(&health, &run_result(0, 0)).await;
        assert_eq!(health.health().await.status, ComponentStatus::Healthy);
    }
}
