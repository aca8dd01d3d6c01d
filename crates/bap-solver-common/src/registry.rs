//! Registry of pricing-solver backends.
//!
//! The registry is a value owned by the engine, not process state; two
//! engines in one process keep independent solver sets. Backends are held
//! in descending priority order, so a [`SolverId`] is a position in that
//! order and stays valid until the next registration.

use tracing::debug;

use crate::solver::PricingSolver;

/// Index of a solver within a registry's priority order.
pub type SolverId = usize;

/// Priority-ordered collection of pricing solvers.
#[derive(Default)]
pub struct SolverRegistry {
    solvers: Vec<Box<dyn PricingSolver>>,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a solver, keeping descending priority order (stable for
    /// equal priorities). Returns the solver's id; earlier ids may shift,
    /// so register every backend before resolving ids.
    pub fn register(&mut self, solver: Box<dyn PricingSolver>) -> SolverId {
        let pos = self
            .solvers
            .partition_point(|s| s.priority() >= solver.priority());
        debug!(name = solver.name(), priority = solver.priority(), "registering pricing solver");
        self.solvers.insert(pos, solver);
        pos
    }

    pub fn n_solvers(&self) -> usize {
        self.solvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    pub fn solver(&self, id: SolverId) -> &dyn PricingSolver {
        self.solvers[id].as_ref()
    }

    pub fn solver_mut(&mut self, id: SolverId) -> &mut dyn PricingSolver {
        self.solvers[id].as_mut()
    }

    /// Ids in priority order, skipping fully disabled backends.
    pub fn enabled_ids(&self) -> Vec<SolverId> {
        (0..self.solvers.len())
            .filter(|&i| self.solvers[i].heur_enabled() || self.solvers[i].exact_enabled())
            .collect()
    }

    /// First enabled solver in priority order, if any.
    pub fn first_enabled(&self) -> Option<SolverId> {
        self.enabled_ids().into_iter().next()
    }

    /// Next enabled solver after `id` in priority order.
    pub fn next_enabled(&self, id: SolverId) -> Option<SolverId> {
        self.enabled_ids().into_iter().find(|&j| j > id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn PricingSolver> {
        self.solvers.iter().map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn PricingSolver>> {
        self.solvers.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{SolveRequest, SolverOutcome};
    use crate::PricingStatus;
    use bap_core::PricingResult;

    struct Dummy {
        name: &'static str,
        priority: i32,
        heur: bool,
    }

    impl PricingSolver for Dummy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn heur_enabled(&self) -> bool {
            self.heur
        }

        fn exact_enabled(&self) -> bool {
            !self.heur
        }

        fn solve_exact(&self, _req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
            Ok(SolverOutcome::nothing(PricingStatus::Unknown))
        }

        fn solve_heur(&self, _req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
            Ok(SolverOutcome::nothing(PricingStatus::Unknown))
        }
    }

    #[test]
    fn registration_orders_by_priority() {
        let mut reg = SolverRegistry::new();
        reg.register(Box::new(Dummy { name: "low", priority: 0, heur: false }));
        reg.register(Box::new(Dummy { name: "high", priority: 100, heur: true }));
        reg.register(Box::new(Dummy { name: "mid", priority: 50, heur: false }));
        let names: Vec<_> = reg.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[test]
    fn enabled_walk() {
        let mut reg = SolverRegistry::new();
        reg.register(Box::new(Dummy { name: "a", priority: 10, heur: true }));
        reg.register(Box::new(Dummy { name: "b", priority: 5, heur: false }));
        assert_eq!(reg.first_enabled(), Some(0));
        assert_eq!(reg.next_enabled(0), Some(1));
        assert_eq!(reg.next_enabled(1), None);
    }
}
