//! Pricing jobs: one (problem, solver) pairing per chunk.

use bap_solver_common::SolverId;

use crate::config::JobScoring;
use crate::pricingprob::ProbId;

/// Index of a pricing job in the controller's arena.
pub type JobId = usize;

#[derive(Debug, Clone)]
pub struct PricingJob {
    prob: ProbId,
    /// The backend this job belongs to; escalation may temporarily borrow
    /// another one, `setup` restores this.
    base_solver: SolverId,
    solver: SolverId,
    chunk: usize,
    score: f64,
    heuristic: bool,
    nheuriters: u32,
    solver_changed: bool,
}

impl PricingJob {
    pub fn new(prob: ProbId, solver: SolverId, chunk: usize) -> Self {
        PricingJob {
            prob,
            base_solver: solver,
            solver,
            chunk,
            score: 0.0,
            heuristic: false,
            nheuriters: 0,
            solver_changed: true,
        }
    }

    pub fn prob(&self) -> ProbId {
        self.prob
    }

    pub fn solver(&self) -> SolverId {
        self.solver
    }

    pub fn base_solver(&self) -> SolverId {
        self.base_solver
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_heuristic(&self) -> bool {
        self.heuristic
    }

    pub fn n_heur_iters(&self) -> u32 {
        self.nheuriters
    }

    pub fn solver_changed(&self) -> bool {
        self.solver_changed
    }

    pub fn set_solver(&mut self, solver: SolverId) {
        self.solver = solver;
        self.solver_changed = true;
    }

    pub fn solver_called(&mut self) {
        self.solver_changed = false;
    }

    /// Sets up the job at the beginning of a pricing call: computes its
    /// scheduling score and (re)enables heuristic mode when available.
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        &mut self,
        heuristic_allowed: bool,
        scoring: JobScoring,
        block: usize,
        dualsolconv: f64,
        npoints: usize,
        nrays: usize,
        ncols_last_rounds: usize,
    ) {
        self.score = match scoring {
            JobScoring::Index => -(block as f64),
            JobScoring::ConvexityDual => dualsolconv,
            JobScoring::Generation => -(0.2 * npoints as f64 + nrays as f64),
            JobScoring::LastRounds => ncols_last_rounds as f64,
        };
        self.solver = self.base_solver;
        self.heuristic = heuristic_allowed;
        self.nheuriters = 0;
        self.solver_changed = true;
    }

    /// Promotes the job from heuristic to exact mode.
    pub fn set_exact(&mut self) {
        self.heuristic = false;
    }

    /// Records one performed heuristic iteration.
    pub fn heur_iter_done(&mut self) {
        self.nheuriters += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_variants() {
        let mut job = PricingJob::new(0, 0, 0);
        job.setup(true, JobScoring::Index, 3, 0.7, 10, 2, 4);
        assert_eq!(job.score(), -3.0);
        job.setup(true, JobScoring::ConvexityDual, 3, 0.7, 10, 2, 4);
        assert_eq!(job.score(), 0.7);
        job.setup(true, JobScoring::Generation, 3, 0.7, 10, 2, 4);
        assert!((job.score() - (-4.0)).abs() < 1e-12);
        job.setup(true, JobScoring::LastRounds, 3, 0.7, 10, 2, 4);
        assert_eq!(job.score(), 4.0);
    }

    #[test]
    fn promotion_clears_heuristic_flag() {
        let mut job = PricingJob::new(1, 0, 0);
        job.setup(true, JobScoring::Index, 1, 0.0, 0, 0, 0);
        assert!(job.is_heuristic());
        job.heur_iter_done();
        assert_eq!(job.n_heur_iters(), 1);
        job.set_exact();
        assert!(!job.is_heuristic());
    }
}
