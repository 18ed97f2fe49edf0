//! Error taxonomy for the sizing engine
//!
//! Every fallible seam returns a closed, typed error so that callers branch
//! on variants instead of message content. The remediation executor in
//! particular routes each `ApplyError` kind through exactly one handler.

use thiserror::Error;

/// Errors returned by read-only collaborators (inventory, metrics).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Timeout, rate limit, or other failure worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The resource does not exist (anymore).
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Misconfiguration or a failure that will not heal on retry.
    #[error("permanent provider failure: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// Whether a bounded retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors returned by the change applier for mutating calls.
///
/// This is the closed set the executor's failure table switches on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Timeout, rate limit, or other failure worth retrying.
    #[error("transient apply failure: {0}")]
    Transient(String),

    /// The stored data does not fit under the target tier's storage limit.
    #[error("stored data exceeds the storage limit of tier {tier}")]
    SizeExceedsTier { tier: String },

    /// The change would price the resource below its source resource.
    #[error("tier price would fall below source resource {source_id}")]
    DependencyPriceOrder { source_id: String },

    /// The resource vanished between probe and apply.
    #[error("resource not found")]
    NotFound,

    /// Invalid request or target; retrying cannot help.
    #[error("permanent apply failure: {0}")]
    Permanent(String),
}

/// Errors raised while loading or querying the tier catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("tier ladder is empty")]
    EmptyLadder,

    #[error("duplicate ladder position {position}")]
    DuplicatePosition { position: u32 },

    #[error("duplicate tier name {name}")]
    DuplicateName { name: String },

    /// Capacity or price does not strictly increase with ladder position.
    #[error("{field} is not strictly increasing at ladder position {position}")]
    NotMonotonic { field: &'static str, position: u32 },

    #[error("unknown tier {name}")]
    UnknownTier { name: String },
}

/// Errors raised while validating a recommendation against constraints.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The dependency lookup service failed.
    #[error("dependency lookup failed: {0}")]
    Dependency(#[from] ProviderError),
}

/// Errors from the change ledger store or the idempotency guard.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger entry could not be encoded/decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The guard refused an entry recorded too soon after the previous one.
    #[error("change for {resource_id} recorded {elapsed_minutes}m after the previous one, inside the {window_minutes}m idempotency window")]
    CooldownViolation {
        resource_id: String,
        elapsed_minutes: i64,
        window_minutes: i64,
    },
}

/// Run-fatal errors: collaborators unreachable before any mutation.
///
/// Per-resource failures never surface here; they end as `Failed` attempts
/// inside the run result.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("inventory provider unavailable: {0}")]
    InventoryUnavailable(#[source] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ProviderError::Transient("timeout".into()).is_transient());
        assert!(!ProviderError::NotFound("db-1".into()).is_transient());
        assert!(!ProviderError::Permanent("bad scope".into()).is_transient());
    }

    #[test]
    fn apply_error_carries_context() {
        let err = ApplyError::SizeExceedsTier { tier: "S0".into() };
        assert!(err.to_string().contains("S0"));

        let err = ApplyError::DependencyPriceOrder {
            source_id: "db-primary".into(),
        };
        assert!(err.to_string().contains("db-primary"));
    }

    #[test]
    fn cooldown_violation_names_the_window() {
        let err = LedgerError::CooldownViolation {
            resource_id: "db-1".into(),
            elapsed_minutes: 600,
            window_minutes: 2880,
        };
        let msg = err.to_string();
        assert!(msg.contains("db-1"));
        assert!(msg.contains("2880"));
    }
}
