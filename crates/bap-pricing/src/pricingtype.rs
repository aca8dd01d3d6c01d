//! Reduced-cost vs. Farkas pricing.
//!
//! The two pricing modes differ only in which dual values they read, what
//! a pricing variable's base objective is, and when the loop may stop
//! early. [`PricingKind`] carries that dispatch table.

use bap_core::{MasterAccess, PricingVar};

use crate::config::PricingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricingKind {
    /// Regular pricing against LP duals.
    Redcost,
    /// Feasibility-repair pricing against Farkas multipliers.
    Farkas,
}

impl PricingKind {
    pub fn is_farkas(self) -> bool {
        matches!(self, PricingKind::Farkas)
    }

    pub fn cons_dual(self, master: &dyn MasterAccess, i: usize) -> f64 {
        match self {
            PricingKind::Redcost => master.cons_dual(i),
            PricingKind::Farkas => master.cons_farkas(i),
        }
    }

    pub fn row_dual(self, master: &dyn MasterAccess, r: usize) -> f64 {
        match self {
            PricingKind::Redcost => master.cut_dual(r),
            PricingKind::Farkas => master.cut_farkas(r),
        }
    }

    pub fn conv_dual(self, master: &dyn MasterAccess, b: usize) -> f64 {
        match self {
            PricingKind::Redcost => master.conv_dual(b),
            PricingKind::Farkas => master.conv_farkas(b),
        }
    }

    pub fn linking_dual(self, master: &dyn MasterAccess, i: usize) -> f64 {
        match self {
            PricingKind::Redcost => master.linking_dual(i),
            PricingKind::Farkas => master.linking_farkas(i),
        }
    }

    /// Base pricing objective of a variable: the original objective for
    /// reduced-cost pricing, zero for Farkas pricing.
    pub fn var_obj(self, var: &PricingVar) -> f64 {
        match self {
            PricingKind::Redcost => var.obj,
            PricingKind::Farkas => 0.0,
        }
    }

    /// Round cap on added columns for this pricing mode.
    pub fn max_cols_round(self, cfg: &PricingConfig, at_root: bool) -> usize {
        match self {
            PricingKind::Redcost if at_root => cfg.max_cols_round_root,
            PricingKind::Redcost => cfg.max_cols_round_redcost,
            PricingKind::Farkas => cfg.max_cols_round_farkas,
        }
    }

    /// Whether the pricing loop may stop before all jobs ran.
    ///
    /// Reduced-cost pricing stops once the round cap is filled and enough
    /// probs were solved successfully; Farkas pricing stops at the first
    /// feasibility-repairing column.
    pub fn can_abort(
        self,
        cfg: &PricingConfig,
        n_found_cols: usize,
        n_successful_probs: usize,
        n_rel_probs: usize,
        at_root: bool,
    ) -> bool {
        match self {
            PricingKind::Redcost => {
                n_found_cols >= self.max_cols_round(cfg, at_root)
                    && (n_successful_probs as f64)
                        >= cfg.rel_max_successful_probs * n_rel_probs as f64
            }
            PricingKind::Farkas => n_found_cols > 0,
        }
    }
}
