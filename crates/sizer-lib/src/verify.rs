//! Post-apply verification
//!
//! After an apply run every touched resource is re-fetched and the
//! observed tier compared against what the attempt says it applied.
//! Mismatches are reported and logged, never escalated; the run already
//! finished by the time this pass looks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProviderError;
use crate::models::{AttemptStatus, ChangeAttempt};
use crate::provider::InventoryProvider;

/// One disagreement between an attempt and the observed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMismatch {
    pub resource_id: String,
    /// Tier the attempt applied; `None` when the resource was expected to
    /// be gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_tier: Option<String>,
}

/// Outcome of re-probing every touched resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Touched resources the pass probed.
    pub checked: usize,
    /// Probes whose observed state matched the attempt.
    pub confirmed: usize,
    pub mismatches: Vec<VerificationMismatch>,
    /// Resources that vanished between apply and verification.
    pub vanished: Vec<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Re-probes attempts against the inventory.
pub struct Verifier {
    inventory: Arc<dyn InventoryProvider>,
}

impl Verifier {
    pub fn new(inventory: Arc<dyn InventoryProvider>) -> Self {
        Self { inventory }
    }

    /// Verify every attempt that claims to have changed or observed a
    /// deleted resource. Probe failures other than `NotFound` leave the
    /// resource unconfirmed.
    pub async fn verify(&self, attempts: &[ChangeAttempt]) -> VerificationReport {
        let mut report = VerificationReport::default();
        for attempt in attempts {
            match attempt.status {
                AttemptStatus::Fixed | AttemptStatus::Partial => {
                    let Some(expected) = attempt.applied_tier.as_deref() else {
                        continue;
                    };
                    report.checked += 1;
                    match self.inventory.fetch_resource(&attempt.resource_id).await {
                        Ok(resource) if resource.tier == expected => report.confirmed += 1,
                        Ok(resource) => {
                            warn!(
                                event = "verification_mismatch",
                                resource_id = %attempt.resource_id,
                                expected_tier = %expected,
                                observed_tier = %resource.tier,
                                "Applied tier does not match observed state"
                            );
                            report.mismatches.push(VerificationMismatch {
                                resource_id: attempt.resource_id.clone(),
                                expected_tier: Some(expected.to_string()),
                                observed_tier: Some(resource.tier),
                            });
                        }
                        Err(ProviderError::NotFound(_)) => {
                            warn!(
                                event = "verification_vanished",
                                resource_id = %attempt.resource_id,
                                "Changed resource disappeared before verification"
                            );
                            report.vanished.push(attempt.resource_id.clone());
                        }
                        Err(error) => {
                            warn!(
                                event = "verification_probe_failed",
                                resource_id = %attempt.resource_id,
                                error = %error,
                                "Could not re-probe resource"
                            );
                        }
                    }
                }
                AttemptStatus::AlreadyDeleted => {
                    report.checked += 1;
                    match self.inventory.fetch_resource(&attempt.resource_id).await {
                        Err(ProviderError::NotFound(_)) => report.confirmed += 1,
                        Ok(resource) => {
                            warn!(
                                event = "verification_mismatch",
                                resource_id = %attempt.resource_id,
                                observed_tier = %resource.tier,
                                "Resource recorded as deleted is still present"
                            );
                            report.mismatches.push(VerificationMismatch {
                                resource_id: attempt.resource_id.clone(),
                                expected_tier: None,
                                observed_tier: Some(resource.tier),
                            });
                        }
                        Err(error) => {
                            warn!(
                                event = "verification_probe_failed",
                                resource_id = %attempt.resource_id,
                                error = %error,
                                "Could not re-probe resource"
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        report
    }
}
