//! Feasibility checks for a recommended tier change
//!
//! A recommendation knows nothing about stored data or dependency edges.
//! The resolver turns it into a plan that the control plane will actually
//! accept: it re-targets downgrades whose tier cannot hold the data, adds
//! the ceiling-shrink step when the declared limit exceeds the new tier,
//! and annotates plans that first need their source resource fixed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::TierCatalog;
use crate::error::ResolveError;
use crate::models::{Recommendation, RecommendedAction, Resource};
use crate::provider::DependencyLookup;

/// Why no acceptable tier exists for a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleReason {
    /// Stored data exceeds the storage limit of every tier cheaper than
    /// the current one.
    DataTooLargeForDowngrade,
}

impl InfeasibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfeasibleReason::DataTooLargeForDowngrade => "data too large for downgrade",
        }
    }
}

/// A source resource that must be repriced before the plan can apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    pub source_id: String,
    /// The source must cost at most this much for the dependent's change
    /// to satisfy price ordering.
    pub max_price: f64,
}

/// A change the control plane should accept, step by step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasiblePlan {
    pub target_tier: String,
    pub target_price: f64,
    /// Lower the declared storage ceiling to this value before changing
    /// tier. `None` when the current ceiling already fits.
    pub shrink_ceiling_to: Option<u64>,
    /// Present when the dependency check found the target priced below
    /// the resource's source.
    pub precondition: Option<Precondition>,
}

/// Outcome of resolving one recommendation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Plan(FeasiblePlan),
    Infeasible(InfeasibleReason),
}

/// Validates recommendations against storage ceilings and dependency
/// price order.
pub struct ConstraintResolver {
    catalog: Arc<TierCatalog>,
    dependencies: Arc<dyn DependencyLookup>,
}

impl ConstraintResolver {
    pub fn new(catalog: Arc<TierCatalog>, dependencies: Arc<dyn DependencyLookup>) -> Self {
        Self {
            catalog,
            dependencies,
        }
    }

    /// Turn a recommendation into an applicable plan, or report that no
    /// acceptable tier exists.
    pub async fn resolve(
        &self,
        resource: &Resource,
        recommendation: &Recommendation,
    ) -> Result<Resolution, ResolveError> {
        let current = self.catalog.by_name(&resource.tier)?;
        let mut target = self.catalog.by_name(&recommendation.target_tier)?;

        if target.max_storage < resource.storage_used {
            let replacement = match recommendation.action {
                // A downgrade may move up-ladder to fit the data, but only
                // while it still saves money against the current tier.
                RecommendedAction::Decrease => self
                    .catalog
                    .cheapest_covering_storage(resource.storage_used, current.price_monthly),
                // An upgrade keeps climbing from the recommended rung until
                // the data fits; capacity only grows on the way up.
                _ => self
                    .catalog
                    .iter()
                    .find(|t| {
                        t.position >= target.position && t.max_storage >= resource.storage_used
                    }),
            };
            target = match replacement {
                Some(tier) => {
                    tracing::debug!(
                        event = "plan_retargeted",
                        resource_id = %resource.id,
                        recommended = %recommendation.target_tier,
                        replacement = %tier.name,
                        storage_used = resource.storage_used,
                        "Recommended tier cannot hold the stored data"
                    );
                    tier
                }
                None => {
                    return Ok(Resolution::Infeasible(
                        InfeasibleReason::DataTooLargeForDowngrade,
                    ))
                }
            };
        }

        let shrink_ceiling_to = if resource.storage_limit > target.max_storage {
            Some(target.max_storage)
        } else {
            None
        };

        let precondition = match self.dependencies.source_of(&resource.id).await? {
            Some(source) => {
                let source_price = self.catalog.by_name(&source.tier)?.price_monthly;
                if target.price_monthly < source_price {
                    Some(Precondition {
                        source_id: source.id,
                        max_price: target.price_monthly,
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        Ok(Resolution::Plan(FeasiblePlan {
            target_tier: target.name.clone(),
            target_price: target.price_monthly,
            shrink_ceiling_to,
            precondition,
        }))
    }
}
