//! Collaborator health tracking
//!
//! The run loop reports the reachability of the engine's collaborators
//! here; the service's liveness and readiness probes read it back. The
//! registry is cheap to clone and safe to share across tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// The collaborators a sizing run depends on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Inventory,
    MetricsProvider,
    ChangeApplier,
    Ledger,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Inventory,
        Component::MetricsProvider,
        Component::ChangeApplier,
        Component::Ledger,
    ];
}

/// How a component is doing. Ordered worst-last so the overall status is
/// the maximum over components.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Having trouble but still answering.
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Last reported state of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    fn report(status: ComponentStatus, detail: Option<String>) -> Self {
        Self {
            status,
            detail,
            checked_at: Utc::now(),
        }
    }
}

/// Body of the liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of the readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    initialized: bool,
}

/// Shared registry of collaborator health plus an initialization flag.
///
/// Readiness requires both: the service finished wiring itself up, and no
/// collaborator is currently unhealthy.
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking every engine collaborator as healthy.
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for component in Component::ALL {
            state
                .components
                .insert(component, ComponentHealth::report(ComponentStatus::Healthy, None));
        }
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, detail: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(detail.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, detail: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(detail.into()))
            .await;
    }

    async fn report(&self, component: Component, status: ComponentStatus, detail: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(component, ComponentHealth::report(status, detail));
    }

    /// Flip once wiring is complete; readiness stays false until then.
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.initialized = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let health = self.health().await;
        let initialized = self.state.read().await.initialized;
        if !initialized {
            ReadinessResponse {
                ready: false,
                reason: Some("sizer not yet initialized".to_string()),
            }
        } else if !health.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("collaborator unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
