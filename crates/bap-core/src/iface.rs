//! Interfaces to the engine's external collaborators.
//!
//! The pricing core never owns the master LP, the branch-and-bound tree or
//! the decomposition; it sees them through the three traits below. The
//! master is mutated only between pricing rounds (column application runs
//! single-threaded), so [`MasterAccess`] carries no thread bounds, while
//! [`DecompAccess`] is shared read-only with the pricing workers and must
//! be `Send + Sync`.

use std::time::Duration;

use crate::col::Col;
use crate::error::PricingResult;
use crate::model::{BoundSense, PricingModel};

/// Identifier of a variable created in the master by pricing.
pub type MasterVarId = usize;

/// Identifier of a masterbranch constraint on the active path.
pub type BranchConsId = usize;

/// A master row (constraint or cut), expressed over original variables.
#[derive(Debug, Clone)]
pub struct RowData {
    pub name: String,
    /// Sparse coefficients (original-variable index, value).
    pub coefs: Vec<(usize, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

/// A variable-linking constraint `x_master - x_block = 0`.
#[derive(Debug, Clone)]
pub struct LinkingConsData {
    pub block: usize,
    /// The linking variable's index in the original problem.
    pub orig_var: usize,
    /// The block copy's index in the block's pricing model.
    pub pricing_var: usize,
    pub lhs: f64,
    pub rhs: f64,
}

/// A generic-branching bound tightening, stated on an original variable.
#[derive(Debug, Clone, Copy)]
pub struct OrigBoundChange {
    pub orig_var: usize,
    pub sense: BoundSense,
    pub bound: f64,
}

/// Dual-value queries and column insertion on the restricted master LP.
pub trait MasterAccess {
    fn n_master_conss(&self) -> usize;
    fn master_cons(&self, i: usize) -> &RowData;
    /// LP dual of master constraint `i`.
    fn cons_dual(&self, i: usize) -> f64;
    /// Farkas multiplier of master constraint `i` (infeasible LP).
    fn cons_farkas(&self, i: usize) -> f64;

    fn n_master_cuts(&self) -> usize;
    fn master_cut(&self, r: usize) -> &RowData;
    fn cut_dual(&self, r: usize) -> f64;
    fn cut_farkas(&self, r: usize) -> f64;

    /// Dual of block `b`'s convexity constraint.
    fn conv_dual(&self, b: usize) -> f64;
    fn conv_farkas(&self, b: usize) -> f64;

    /// Dual of variable-linking constraint `i`.
    fn linking_dual(&self, i: usize) -> f64;
    fn linking_farkas(&self, i: usize) -> f64;

    /// Objective value of the current restricted master LP.
    fn lp_obj_value(&self) -> f64;
    /// Whether the current master LP was solved to optimality.
    fn is_lp_optimal(&self) -> bool;
    /// Master solution value of a directly transferred original variable.
    fn master_sol_val(&self, orig_var: usize) -> f64;

    /// Lower bound of the current branch-and-bound node.
    fn node_lower_bound(&self) -> f64;
    /// Share of degenerate basic variables in the master LP, if known.
    fn lp_degeneracy(&self) -> f64 {
        0.0
    }
    /// Best known primal bound of the search.
    fn upper_bound(&self) -> f64;
    /// Remaining wall-clock budget of the master solve, if limited.
    fn remaining_time(&self) -> Option<Duration>;

    /// Creates a master variable for a priced column and returns its id.
    /// `obj` is the column's value under the original objective.
    fn add_priced_var(
        &mut self,
        name: &str,
        obj: f64,
        is_ray: bool,
        block: usize,
    ) -> PricingResult<MasterVarId>;
    fn add_linear_coef(&mut self, cons: usize, var: MasterVarId, coef: f64) -> PricingResult<()>;
    fn add_row_coef(&mut self, cut: usize, var: MasterVarId, coef: f64) -> PricingResult<()>;
    fn add_var_to_conv_cons(&mut self, b: usize, var: MasterVarId) -> PricingResult<()>;

    /// Called when reduced-cost pricing proves the master infeasible.
    fn report_infeasible(&mut self);
}

/// Access to the active masterbranch stack.
pub trait BranchingAccess {
    /// Number of the current branch-and-bound node.
    fn current_node(&self) -> u64;
    fn is_root_node(&self) -> bool;
    /// Masterbranch constraint of the current node, if any.
    fn active_cons(&self) -> Option<BranchConsId>;
    fn parent(&self, cons: BranchConsId) -> Option<BranchConsId>;
    /// Whether the constraint was created by generic (Vanderbeck) branching.
    fn is_generic_branching(&self, cons: BranchConsId) -> bool;
    /// Bound tightenings enforced by a generic-branching constraint.
    fn bound_changes(&self, cons: BranchConsId) -> Vec<OrigBoundChange>;
    /// The block whose subproblem a generic-branching constraint restricts.
    fn branch_block(&self, cons: BranchConsId) -> usize;
    /// Dual value of the constraint's master-side row.
    fn branch_dual(&self, cons: BranchConsId) -> f64;
}

/// Structural view of the Dantzig-Wolfe decomposition.
pub trait DecompAccess: Send + Sync {
    fn n_blocks(&self) -> usize;
    /// Whether block `b` carries its own pricing problem (representatives
    /// of aggregated blocks are relevant, their copies are not).
    fn is_relevant(&self, b: usize) -> bool;
    /// Number of blocks identical to `b`, including `b` itself.
    fn n_identical(&self, b: usize) -> usize;
    fn model(&self, b: usize) -> &PricingModel;
    /// Block of an original variable; `None` for master/linking variables.
    fn block_of_orig(&self, orig_var: usize) -> Option<usize>;
    /// Pricing-variable index of an original variable inside block `b`.
    fn pricing_var(&self, orig_var: usize, b: usize) -> Option<usize>;
    fn n_linking_conss(&self) -> usize;
    fn linking_cons(&self, i: usize) -> &LinkingConsData;
}

/// Computes the master-constraint coefficient vector of a column and caches
/// it inside the column.
pub fn compute_master_coefs(col: &mut Col, master: &dyn MasterAccess, decomp: &dyn DecompAccess) {
    if col.has_master_coefs() {
        return;
    }
    let n = master.n_master_conss();
    let mut coefs = vec![0.0; n];
    for (i, coef) in coefs.iter_mut().enumerate() {
        let row = master.master_cons(i);
        for &(orig, a) in &row.coefs {
            if decomp.block_of_orig(orig) != Some(col.block()) {
                continue;
            }
            if let Some(pv) = decomp.pricing_var(orig, col.block()) {
                *coef += a * col.sol_val(pv);
            }
        }
    }
    col.set_master_coefs(coefs);
}

/// Coefficient of a column in a single master cut.
pub fn cut_coef(col: &Col, row: &RowData, decomp: &dyn DecompAccess) -> f64 {
    let mut coef = 0.0;
    for &(orig, a) in &row.coefs {
        if decomp.block_of_orig(orig) != Some(col.block()) {
            continue;
        }
        if let Some(pv) = decomp.pricing_var(orig, col.block()) {
            coef += a * col.sol_val(pv);
        }
    }
    coef
}
