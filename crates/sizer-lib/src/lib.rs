//! Sizing library for tiered compute resources
//!
//! This crate provides the core functionality for:
//! - Trailing-window utilization aggregation
//! - Tier recommendations against a validated ladder
//! - Constraint-aware remediation with typed fallback paths
//! - Change ledger cooldowns and idempotency
//! - Health checks and observability

pub mod catalog;
pub mod constraint;
pub mod error;
pub mod executor;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod recommend;
pub mod report;
pub mod verify;

pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{SizerMetrics, StructuredLogger};
pub use orchestrator::{EngineSettings, RunOrchestrator};
pub use report::{RunMode, RunResult};
