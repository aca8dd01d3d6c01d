//! Per-block pricing-problem state.
//!
//! One [`PricingProb`] exists per relevant block. It tracks the round's
//! solve status and lower bound, buffers the columns produced by the
//! pricing jobs until they move to the price store or the column pool, and
//! keeps the generic-branching stack of the current node together with a
//! rolling window of improving-column counts used by job scoring.

use bap_core::{numerics, BoundChange, Col};
use bap_solver_common::PricingStatus;

/// Index of a pricing problem in the controller's arena.
pub type ProbId = usize;

/// One level of the generic-branching stack, root-most first.
#[derive(Debug, Clone)]
pub struct BranchLevel {
    /// Dual value of the branching constraint's master-side row.
    pub dual: f64,
    /// Complete bound sequence enforced at this level, in block-local
    /// pricing-variable indices.
    pub changes: Vec<BoundChange>,
}

#[derive(Debug)]
pub struct PricingProb {
    block: usize,
    branch_levels: Vec<BranchLevel>,
    status: PricingStatus,
    lowerbound: f64,
    nimpcols: usize,
    nsolves: usize,
    /// Columns generated this round, ascending reduced cost.
    cols: Vec<Col>,
    /// Improving-column counts of past rounds, most recent first.
    ncols_round: Vec<usize>,
}

impl PricingProb {
    pub fn new(block: usize, nrounds_col: usize) -> Self {
        PricingProb {
            block,
            branch_levels: Vec::new(),
            status: PricingStatus::Unknown,
            lowerbound: -numerics::INFINITY,
            nimpcols: 0,
            nsolves: 0,
            cols: Vec::new(),
            ncols_round: vec![0; nrounds_col],
        }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn status(&self) -> PricingStatus {
        self.status
    }

    pub fn lowerbound(&self) -> f64 {
        self.lowerbound
    }

    pub fn n_imp_cols(&self) -> usize {
        self.nimpcols
    }

    pub fn n_solves(&self) -> usize {
        self.nsolves
    }

    pub fn n_cols(&self) -> usize {
        self.cols.len()
    }

    pub fn cols(&self) -> &[Col] {
        &self.cols
    }

    pub fn best_col(&self) -> Option<&Col> {
        self.cols.first()
    }

    /// Best reduced cost among this round's columns, 0.0 when none exist.
    pub fn best_redcost(&self) -> f64 {
        self.cols.first().map(Col::redcost).unwrap_or(0.0).min(0.0)
    }

    pub fn branch_levels(&self) -> &[BranchLevel] {
        &self.branch_levels
    }

    pub fn set_branch_levels(&mut self, levels: Vec<BranchLevel>) {
        self.branch_levels = levels;
    }

    /// Resets the per-round state at the beginning of a pricing call.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.nimpcols, 0);
        debug_assert!(self.cols.is_empty());
        self.status = PricingStatus::Unknown;
        self.lowerbound = -numerics::INFINITY;
        self.nsolves = 0;
    }

    /// Folds one solver call's outcome into the round state. A
    /// `NotApplicable` answer leaves everything untouched.
    pub fn update(
        &mut self,
        status: PricingStatus,
        lowerbound: f64,
        cols: Vec<Col>,
        nimpcols: usize,
    ) {
        if status == PricingStatus::NotApplicable {
            return;
        }
        self.status = status;
        if lowerbound > self.lowerbound + numerics::DUALFEASTOL {
            self.lowerbound = lowerbound;
        }
        self.nimpcols += nimpcols;
        self.nsolves += 1;
        for col in cols {
            let pos = self
                .cols
                .partition_point(|c| c.redcost() <= col.redcost());
            self.cols.insert(pos, col);
        }
    }

    /// Moves the round's columns out of the buffer.
    pub fn take_cols(&mut self) -> Vec<Col> {
        std::mem::take(&mut self.cols)
    }

    /// Drops bookkeeping for the finished round: shifts the rolling
    /// improving-column window and clears the round counters.
    pub fn finish_round(&mut self) {
        for i in (1..self.ncols_round.len()).rev() {
            self.ncols_round[i] = self.ncols_round[i - 1];
        }
        if let Some(first) = self.ncols_round.first_mut() {
            *first = self.nimpcols;
        }
        self.nimpcols = 0;
        self.cols.clear();
    }

    /// Improving columns found over the last `n` rounds.
    pub fn n_cols_last_rounds(&self, n: usize) -> usize {
        self.ncols_round.iter().take(n).sum()
    }

    /// A prob is done for the round once it found an improving column or
    /// reached a conclusive status.
    pub fn is_done(&self) -> bool {
        self.nimpcols > 0 || self.status.is_conclusive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(redcost: f64) -> Col {
        Col::new(0, vec![(0, redcost.abs().max(0.1))], false, redcost)
    }

    #[test]
    fn update_merges_status_and_bound() {
        let mut prob = PricingProb::new(0, 3);
        prob.update(PricingStatus::LimitReached, -5.0, vec![col(-1.0)], 1);
        assert_eq!(prob.status(), PricingStatus::LimitReached);
        assert_eq!(prob.lowerbound(), -5.0);
        assert_eq!(prob.n_solves(), 1);
        assert!(prob.is_done());

        prob.update(PricingStatus::Optimal, -2.0, vec![col(-2.0)], 1);
        assert_eq!(prob.status(), PricingStatus::Optimal);
        assert_eq!(prob.lowerbound(), -2.0);
        assert_eq!(prob.n_imp_cols(), 2);
        // columns are kept sorted by reduced cost
        assert_eq!(prob.best_col().unwrap().redcost(), -2.0);
    }

    #[test]
    fn not_applicable_changes_nothing() {
        let mut prob = PricingProb::new(0, 3);
        prob.update(PricingStatus::NotApplicable, 1.0, vec![], 0);
        assert_eq!(prob.status(), PricingStatus::Unknown);
        assert_eq!(prob.n_solves(), 0);
    }

    #[test]
    fn rolling_window_shifts() {
        let mut prob = PricingProb::new(0, 3);
        prob.update(PricingStatus::Optimal, -1.0, vec![col(-1.0)], 2);
        prob.finish_round();
        prob.reset();
        prob.update(PricingStatus::Optimal, -1.0, vec![col(-1.0)], 1);
        prob.finish_round();
        assert_eq!(prob.n_cols_last_rounds(3), 3);
        assert_eq!(prob.n_cols_last_rounds(1), 1);
        prob.reset();
        prob.finish_round();
        prob.finish_round();
        assert_eq!(prob.n_cols_last_rounds(3), 1);
    }

    #[test]
    fn done_on_conclusive_status_without_columns() {
        let mut prob = PricingProb::new(0, 3);
        prob.update(PricingStatus::Infeasible, numerics::INFINITY, vec![], 0);
        assert!(prob.is_done());
    }
}
