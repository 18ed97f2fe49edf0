//! Collaborator seams for the sizing engine
//!
//! The engine never talks to a control plane directly. Inventory, metrics,
//! mutations and dependency inspection go through these traits so the same
//! run pipeline drives live providers and snapshot fixtures alike.

mod memory;

pub use memory::{
    AppliedCall, MemoryApplier, MemoryDependencyLookup, MemoryInventory, MemoryMetrics, Snapshot,
    SnapshotResource,
};

use chrono::{DateTime, Duration, Utc};

use crate::error::{ApplyError, ProviderError};
use crate::models::{Resource, UtilizationSample};

pub use async_trait::async_trait;

/// Source of the resource fleet to size.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// List every resource, optionally narrowed to one owning scope. A
    /// failure here aborts the run before any analysis starts.
    async fn list_resources(&self, scope: Option<&str>)
        -> Result<Vec<Resource>, ProviderError>;

    /// Re-read a single resource. `NotFound` means it was deleted since
    /// the run's inventory pass.
    async fn fetch_resource(&self, id: &str) -> Result<Resource, ProviderError>;
}

/// Source of trailing-window utilization history.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Utilization samples for `resource_id` between `from` and `until` at
    /// the requested granularity. An empty vector is a valid answer (no
    /// data recorded).
    async fn utilization(
        &self,
        resource_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        granularity: Duration,
    ) -> Result<Vec<UtilizationSample>, ProviderError>;
}

/// Mutating surface of the control plane.
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    /// Move `resource_id` onto `tier`. Errors are the closed [`ApplyError`]
    /// set the executor dispatches on.
    async fn set_tier(&self, resource_id: &str, tier: &str) -> Result<(), ApplyError>;

    /// Lower the resource's declared storage ceiling ahead of a downgrade
    /// whose target tier allows less than the current ceiling.
    async fn set_storage_ceiling(&self, resource_id: &str, ceiling: u64)
        -> Result<(), ApplyError>;
}

/// Read side of cross-resource dependency constraints.
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// The resource `resource_id` depends on, if any. The engine consults
    /// this before planning so price-order violations surface as
    /// preconditions instead of apply failures.
    async fn source_of(&self, resource_id: &str) -> Result<Option<Resource>, ProviderError>;
}
