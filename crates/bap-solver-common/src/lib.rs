//! Common types and trait for pricing-solver backends.
//!
//! A pricing solver answers one question: given a block subproblem and a
//! pricing objective, find solutions of negative value (columns) or prove
//! there are none. Backends implement [`PricingSolver`]; the engine talks
//! to them through a [`SolverRegistry`], trying high-priority solvers
//! first and falling back along the priority order.

pub mod registry;
pub mod solver;

pub use registry::{SolverId, SolverRegistry};
pub use solver::{PricingSolver, SolveRequest, SolverOutcome};

use serde::{Deserialize, Serialize};

/// Status of one pricing-subproblem solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PricingStatus {
    /// Nothing is known; the solver did not run or gave up silently.
    #[default]
    Unknown,
    /// The subproblem was solved to optimality.
    Optimal,
    /// The subproblem is infeasible.
    Infeasible,
    /// The subproblem is unbounded (a ray was found).
    Unbounded,
    /// Infeasible or unbounded, undecided.
    InfOrUnbd,
    /// A time, node or gap limit stopped the solve; may be retried.
    LimitReached,
    /// The backend cannot handle this subproblem's structure.
    NotApplicable,
}

impl PricingStatus {
    /// Whether this status ends all work on the subproblem for the round.
    pub fn is_conclusive(self) -> bool {
        matches!(
            self,
            PricingStatus::Optimal
                | PricingStatus::Infeasible
                | PricingStatus::Unbounded
                | PricingStatus::InfOrUnbd
        )
    }

    /// Whether a limit stopped the solve, so the job may be re-queued.
    pub fn is_limit(self) -> bool {
        matches!(self, PricingStatus::LimitReached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conclusive_statuses() {
        assert!(PricingStatus::Optimal.is_conclusive());
        assert!(PricingStatus::Infeasible.is_conclusive());
        assert!(!PricingStatus::LimitReached.is_conclusive());
        assert!(!PricingStatus::Unknown.is_conclusive());
        assert!(!PricingStatus::NotApplicable.is_conclusive());
    }
}
