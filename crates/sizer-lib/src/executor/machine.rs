//! Per-resource remediation state machine
//!
//! The async driver in the parent module performs the remote calls; this
//! module owns the legal transitions between attempt states and the
//! disposition table that maps every apply-failure class to exactly one
//! handler. Both are pure and testable without providers.

use std::fmt;

use tracing::debug;

use crate::error::ApplyError;
use crate::models::AttemptStatus;

/// States an attempt moves through on its way to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Analyzed,
    NoChangeNeeded,
    BlockedByCooldown,
    Planning,
    Shrinking,
    ChangingTier,
    Done(AttemptStatus),
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::Pending => "pending",
            AttemptState::Analyzed => "analyzed",
            AttemptState::NoChangeNeeded => "no_change_needed",
            AttemptState::BlockedByCooldown => "blocked_by_cooldown",
            AttemptState::Planning => "planning",
            AttemptState::Shrinking => "shrinking",
            AttemptState::ChangingTier => "changing_tier",
            AttemptState::Done(_) => "done",
        };
        f.write_str(name)
    }
}

/// Whether `from -> to` is an edge of the state diagram.
///
/// Probe failures may finish an attempt from any live state, so `Done` is
/// reachable everywhere; the table constrains the forward path.
pub fn is_legal(from: AttemptState, to: AttemptState) -> bool {
    use AttemptState::*;
    match (from, to) {
        (Done(_), _) => false,
        (_, Done(_)) => true,
        (Pending, Analyzed) => true,
        (Analyzed, NoChangeNeeded | BlockedByCooldown | Planning) => true,
        (Planning, Shrinking | ChangingTier) => true,
        (Shrinking, Shrinking | ChangingTier) => true,
        // The ladder fallback and the post-source-fix retry re-enter the
        // changing state with a new target; a fallback rung may need its
        // own shrink first.
        (ChangingTier, ChangingTier | Shrinking) => true,
        _ => false,
    }
}

/// Tracks one attempt's position in the diagram and logs transitions.
#[derive(Debug)]
pub struct AttemptProgress {
    resource_id: String,
    state: AttemptState,
}

impl AttemptProgress {
    pub fn new(resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            state: AttemptState::Pending,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Move to `next` if the diagram allows it. Returns whether the move
    /// happened; an illegal transition leaves the state untouched.
    pub fn advance(&mut self, next: AttemptState) -> bool {
        if !is_legal(self.state, next) {
            debug!(
                event = "illegal_transition",
                resource_id = %self.resource_id,
                from = %self.state,
                to = %next,
                "Refusing illegal attempt transition"
            );
            return false;
        }
        debug!(
            event = "attempt_transition",
            resource_id = %self.resource_id,
            from = %self.state,
            to = %next,
            "Attempt state advanced"
        );
        self.state = next;
        true
    }
}

/// Retry allowances for one attempt. The driver decrements these; the
/// disposition table only reads them.
#[derive(Debug, Clone, Copy)]
pub struct AttemptBudget {
    /// Transient retries left before the attempt fails.
    pub transient_left: u32,
    /// Whether the one dependency source fix has been spent.
    pub dependency_fix_used: bool,
}

impl AttemptBudget {
    pub fn new(max_transient_retries: u32) -> Self {
        Self {
            transient_left: max_transient_retries,
            dependency_fix_used: false,
        }
    }

    /// Take one transient retry. False when none remain.
    pub fn consume_transient(&mut self) -> bool {
        if self.transient_left == 0 {
            return false;
        }
        self.transient_left -= 1;
        true
    }
}

/// What the driver should do about one failed mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Repeat the same call after a short delay.
    RetryAfterDelay,
    /// Walk the ladder upward and retry with the next tier that accepts
    /// the data below the original price.
    SearchLadderUp,
    /// Remediate the named source resource, then retry the blocked call
    /// once.
    FixSourceFirst { source_id: String },
    /// Stop the attempt with this terminal status.
    Terminate {
        status: AttemptStatus,
        detail: String,
    },
}

/// The one handler for each apply-failure class.
pub fn dispose(error: &ApplyError, budget: &AttemptBudget) -> FailureDisposition {
    match error {
        ApplyError::Transient(message) => {
            if budget.transient_left > 0 {
                FailureDisposition::RetryAfterDelay
            } else {
                FailureDisposition::Terminate {
                    status: AttemptStatus::Failed,
                    detail: format!("transient failures exhausted retries: {message}"),
                }
            }
        }
        ApplyError::SizeExceedsTier { .. } => FailureDisposition::SearchLadderUp,
        ApplyError::DependencyPriceOrder { source_id } => {
            if budget.dependency_fix_used {
                FailureDisposition::Terminate {
                    status: AttemptStatus::Failed,
                    detail: "unresolved dependency".to_string(),
                }
            } else {
                FailureDisposition::FixSourceFirst {
                    source_id: source_id.clone(),
                }
            }
        }
        ApplyError::NotFound => FailureDisposition::Terminate {
            status: AttemptStatus::AlreadyDeleted,
            detail: "resource vanished during the attempt".to_string(),
        },
        ApplyError::Permanent(message) => FailureDisposition::Terminate {
            status: AttemptStatus::Skipped,
            detail: format!("permanent apply failure: {message}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        let mut progress = AttemptProgress::new("db-1");
        assert!(progress.advance(AttemptState::Analyzed));
        assert!(progress.advance(AttemptState::Planning));
        assert!(progress.advance(AttemptState::Shrinking));
        assert!(progress.advance(AttemptState::ChangingTier));
        assert!(progress.advance(AttemptState::Done(AttemptStatus::Fixed)));
    }

    #[test]
    fn test_shrink_is_optional() {
        let mut progress = AttemptProgress::new("db-1");
        progress.advance(AttemptState::Analyzed);
        progress.advance(AttemptState::Planning);
        assert!(progress.advance(AttemptState::ChangingTier));
    }

    #[test]
    fn test_ladder_retry_reenters_changing_tier() {
        assert!(is_legal(
            AttemptState::ChangingTier,
            AttemptState::ChangingTier
        ));
    }

    #[test]
    fn test_illegal_transitions_are_refused() {
        let mut progress = AttemptProgress::new("db-1");
        // Cannot plan without analyzing.
        assert!(!progress.advance(AttemptState::Planning));
        assert_eq!(progress.state(), AttemptState::Pending);

        progress.advance(AttemptState::Analyzed);
        // Cannot shrink without a plan.
        assert!(!progress.advance(AttemptState::Shrinking));
        // Cannot go backwards.
        assert!(!progress.advance(AttemptState::Pending));
    }

    #[test]
    fn test_done_is_final() {
        let mut progress = AttemptProgress::new("db-1");
        progress.advance(AttemptState::Analyzed);
        progress.advance(AttemptState::Done(AttemptStatus::AlreadyDeleted));
        assert!(!progress.advance(AttemptState::Planning));
        assert!(!progress.advance(AttemptState::Done(AttemptStatus::Failed)));
    }

    #[test]
    fn test_every_live_state_can_terminate() {
        for state in [
            AttemptState::Pending,
            AttemptState::Analyzed,
            AttemptState::NoChangeNeeded,
            AttemptState::BlockedByCooldown,
            AttemptState::Planning,
            AttemptState::Shrinking,
            AttemptState::ChangingTier,
        ] {
            assert!(is_legal(state, AttemptState::Done(AttemptStatus::Failed)));
        }
    }

    #[test]
    fn test_transient_retries_until_budget_runs_out() {
        let mut budget = AttemptBudget::new(2);
        let error = ApplyError::Transient("throttled".into());

        assert_eq!(dispose(&error, &budget), FailureDisposition::RetryAfterDelay);
        assert!(budget.consume_transient());
        assert_eq!(dispose(&error, &budget), FailureDisposition::RetryAfterDelay);
        assert!(budget.consume_transient());

        match dispose(&error, &budget) {
            FailureDisposition::Terminate { status, detail } => {
                assert_eq!(status, AttemptStatus::Failed);
                assert!(detail.contains("throttled"));
            }
            other => panic!("expected terminate, got {other:?}"),
        }
        assert!(!budget.consume_transient());
    }

    #[test]
    fn test_size_rejection_searches_the_ladder() {
        let budget = AttemptBudget::new(3);
        let error = ApplyError::SizeExceedsTier { tier: "S0".into() };
        assert_eq!(dispose(&error, &budget), FailureDisposition::SearchLadderUp);
    }

    #[test]
    fn test_dependency_block_fixes_source_once() {
        let mut budget = AttemptBudget::new(3);
        let error = ApplyError::DependencyPriceOrder {
            source_id: "primary".into(),
        };

        assert_eq!(
            dispose(&error, &budget),
            FailureDisposition::FixSourceFirst {
                source_id: "primary".into()
            }
        );

        budget.dependency_fix_used = true;
        match dispose(&error, &budget) {
            FailureDisposition::Terminate { status, detail } => {
                assert_eq!(status, AttemptStatus::Failed);
                assert_eq!(detail, "unresolved dependency");
            }
            other => panic!("expected terminate, got {other:?}"),
        }
    }

    #[test]
    fn test_vanished_resource_counts_as_deleted() {
        let budget = AttemptBudget::new(3);
        match dispose(&ApplyError::NotFound, &budget) {
            FailureDisposition::Terminate { status, .. } => {
                assert_eq!(status, AttemptStatus::AlreadyDeleted);
            }
            other => panic!("expected terminate, got {other:?}"),
        }
    }

    #[test]
    fn test_permanent_failure_skips_the_resource() {
        let budget = AttemptBudget::new(3);
        let error = ApplyError::Permanent("unknown target tier".into());
        match dispose(&error, &budget) {
            FailureDisposition::Terminate { status, detail } => {
                assert_eq!(status, AttemptStatus::Skipped);
                assert!(detail.contains("unknown target tier"));
            }
            other => panic!("expected terminate, got {other:?}"),
        }
    }
}
