//! In-memory providers backed by a fleet snapshot
//!
//! A [`Snapshot`] (resources plus their hourly utilization history) wires up
//! all four collaborator seams without a control plane. The applier enforces
//! the same storage and dependency rules a real control plane would, so the
//! executor's fallback paths are exercised end to end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::TierCatalog;
use crate::error::{ApplyError, ProviderError};
use crate::models::{Resource, UtilizationSample};
use crate::provider::{async_trait, ChangeApplier, DependencyLookup, InventoryProvider, MetricsProvider};

/// One resource in a snapshot file, with its trailing utilization series
/// as hourly percentages ending at the snapshot timestamp (oldest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResource {
    #[serde(flatten)]
    pub resource: Resource,
    #[serde(default)]
    pub utilization: Vec<f64>,
}

/// A point-in-time capture of the fleet, loadable from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "Utc::now")]
    pub taken_at: DateTime<Utc>,
    pub resources: Vec<SnapshotResource>,
}

impl Snapshot {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Mutable fleet state shared by the inventory, applier and dependency
/// lookup. Keyed by resource id.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    resources: DashMap<String, Resource>,
    offline: AtomicBool,
}

impl MemoryInventory {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        let map = DashMap::new();
        for resource in resources {
            map.insert(resource.id.clone(), resource);
        }
        Self {
            resources: map,
            offline: AtomicBool::new(false),
        }
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::new(snapshot.resources.iter().map(|r| r.resource.clone()))
    }

    pub fn insert(&self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn remove(&self, id: &str) -> Option<Resource> {
        self.resources.remove(id).map(|(_, r)| r)
    }

    pub fn get(&self, id: &str) -> Option<Resource> {
        self.resources.get(id).map(|r| r.clone())
    }

    /// Make `list_resources`/`fetch_resource` fail with a transient error,
    /// as an unreachable control plane would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ProviderError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ProviderError::Transient("inventory unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InventoryProvider for MemoryInventory {
    async fn list_resources(
        &self,
        scope: Option<&str>,
    ) -> Result<Vec<Resource>, ProviderError> {
        self.check_online()?;
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .filter(|r| scope.map_or(true, |s| r.value().scope == s))
            .map(|r| r.value().clone())
            .collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn fetch_resource(&self, id: &str) -> Result<Resource, ProviderError> {
        self.check_online()?;
        self.get(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }
}

/// Per-resource utilization series.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    series: DashMap<String, Vec<UtilizationSample>>,
}

impl MemoryMetrics {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let metrics = Self::default();
        for entry in &snapshot.resources {
            metrics.set_hourly(&entry.resource.id, &entry.utilization, snapshot.taken_at);
        }
        metrics
    }

    pub fn set_series(&self, resource_id: &str, samples: Vec<UtilizationSample>) {
        self.series.insert(resource_id.to_string(), samples);
    }

    /// Store `percents` as hourly samples, the last one at `end`.
    pub fn set_hourly(&self, resource_id: &str, percents: &[f64], end: DateTime<Utc>) {
        let samples = percents
            .iter()
            .enumerate()
            .map(|(i, &percent)| UtilizationSample {
                timestamp: end - Duration::hours((percents.len() - 1 - i) as i64),
                percent,
            })
            .collect();
        self.set_series(resource_id, samples);
    }
}

#[async_trait]
impl MetricsProvider for MemoryMetrics {
    /// Series are stored at whatever spacing they were recorded with
    /// (hourly via [`MemoryMetrics::set_hourly`]); the granularity request
    /// only bounds the window here.
    async fn utilization(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        _granularity: Duration,
    ) -> Result<Vec<UtilizationSample>, ProviderError> {
        let samples = match self.series.get(resource_id) {
            Some(series) => series
                .iter()
                .filter(|s| s.timestamp >= from && s.timestamp <= until)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(samples)
    }
}

/// A mutating call the applier received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedCall {
    SetTier { resource_id: String, tier: String },
    SetStorageCeiling { resource_id: String, ceiling: u64 },
}

/// Control-plane emulation over a [`MemoryInventory`]. Rejects tier moves
/// that a real plane would reject: unknown tiers, data or ceiling above the
/// target tier's storage limit, and dependents priced below their source.
pub struct MemoryApplier {
    inventory: Arc<MemoryInventory>,
    catalog: TierCatalog,
    calls: Mutex<Vec<AppliedCall>>,
    scripted: DashMap<String, VecDeque<ApplyError>>,
}

impl MemoryApplier {
    pub fn new(inventory: Arc<MemoryInventory>, catalog: TierCatalog) -> Self {
        Self {
            inventory,
            catalog,
            calls: Mutex::new(Vec::new()),
            scripted: DashMap::new(),
        }
    }

    /// Queue an error to return from the next mutating call on
    /// `resource_id`, ahead of the emulated behavior.
    pub fn script_failure(&self, resource_id: &str, error: ApplyError) {
        self.scripted
            .entry(resource_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every mutating call received so far.
    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record(&self, call: AppliedCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn take_scripted(&self, resource_id: &str) -> Option<ApplyError> {
        self.scripted
            .get_mut(resource_id)
            .and_then(|mut queue| queue.pop_front())
    }
}

#[async_trait]
impl ChangeApplier for MemoryApplier {
    async fn set_tier(&self, resource_id: &str, tier: &str) -> Result<(), ApplyError> {
        self.record(AppliedCall::SetTier {
            resource_id: resource_id.to_string(),
            tier: tier.to_string(),
        });
        if let Some(error) = self.take_scripted(resource_id) {
            return Err(error);
        }

        let resource = self
            .inventory
            .get(resource_id)
            .ok_or(ApplyError::NotFound)?;
        let target = self
            .catalog
            .by_name(tier)
            .map_err(|_| ApplyError::Permanent(format!("unknown tier {tier}")))?;

        if resource.storage_used > target.max_storage
            || resource.storage_limit > target.max_storage
        {
            return Err(ApplyError::SizeExceedsTier {
                tier: tier.to_string(),
            });
        }
        if let Some(source_id) = &resource.depends_on {
            if let Some(source) = self.inventory.get(source_id) {
                let source_price = self
                    .catalog
                    .by_name(&source.tier)
                    .map(|t| t.price_monthly)
                    .unwrap_or(0.0);
                if target.price_monthly < source_price {
                    return Err(ApplyError::DependencyPriceOrder {
                        source_id: source_id.clone(),
                    });
                }
            }
        }

        let mut updated = resource;
        updated.tier = tier.to_string();
        self.inventory.insert(updated);
        Ok(())
    }

    async fn set_storage_ceiling(
        &self,
        resource_id: &str,
        ceiling: u64,
    ) -> Result<(), ApplyError> {
        self.record(AppliedCall::SetStorageCeiling {
            resource_id: resource_id.to_string(),
            ceiling,
        });
        if let Some(error) = self.take_scripted(resource_id) {
            return Err(error);
        }

        let resource = self
            .inventory
            .get(resource_id)
            .ok_or(ApplyError::NotFound)?;
        if ceiling < resource.storage_used {
            return Err(ApplyError::Permanent(format!(
                "ceiling {ceiling} below stored data {}",
                resource.storage_used
            )));
        }

        let mut updated = resource;
        updated.storage_limit = ceiling;
        self.inventory.insert(updated);
        Ok(())
    }
}

/// Resolves `depends_on` references against the shared inventory.
pub struct MemoryDependencyLookup {
    inventory: Arc<MemoryInventory>,
}

impl MemoryDependencyLookup {
    pub fn new(inventory: Arc<MemoryInventory>) -> Self {
        Self { inventory }
    }
}

#[async_trait]
impl DependencyLookup for MemoryDependencyLookup {
    async fn source_of(&self, resource_id: &str) -> Result<Option<Resource>, ProviderError> {
        let resource = match self.inventory.get(resource_id) {
            Some(r) => r,
            None => return Ok(None),
        };
        match resource.depends_on {
            Some(source_id) => {
                let source = self
                    .inventory
                    .get(&source_id)
                    .ok_or(ProviderError::NotFound(source_id))?;
                Ok(Some(source))
            }
            None => Ok(None),
        }
    }
}
