//! Dual smoothing with a dynamic alpha schedule.
//!
//! Implementation of subgradient-driven dual price smoothing following
//!
//! Pessoa, A., Sadykov, R., Uchoa, E., & Vanderbeck, F. (2013). In-Out
//! Separation and Column Generation Stabilization by Dual Price Smoothing.
//! In Experimental Algorithms (pp. 354-365). Springer Berlin Heidelberg.
//!
//! The stabilizer keeps a *stability centre* — the dual vector that
//! produced the best Lagrangian bound so far — and hands out duals blended
//! between the centre and the current LP duals: `π̃ = α·π̂ + (1−α)·π`.
//! After a successful round α moves with the sign of the subgradient
//! product; after a mispricing round a relaxed ᾱ = max(0, 1−k(1−α)) is
//! used until columns are found again.

use bap_core::{numerics, Col, DecompAccess, MasterAccess};
use tracing::debug;

use crate::pricingtype::PricingKind;

const INITIAL_ALPHA: f64 = 0.8;

#[derive(Debug)]
pub struct Stabilization {
    /// Stability centre for master constraints; index-aligned with the
    /// master, suffix zero-filled on growth.
    center_conss: Vec<f64>,
    center_cuts: Vec<f64>,
    center_linking: Vec<f64>,
    /// Convexity-constraint centre; sized by the convexity count alone and
    /// never aliased with `center_conss`.
    center_conv: Vec<f64>,
    alpha: f64,
    alpha_bar: f64,
    node: Option<u64>,
    /// Mispricing iterations in the current schedule.
    k: u32,
    /// Pricing iterations at the current node.
    t: u32,
    has_center: bool,
    center_bound: f64,
    in_mispricing: bool,
}

impl Stabilization {
    pub fn new() -> Self {
        Stabilization {
            center_conss: Vec::new(),
            center_cuts: Vec::new(),
            center_linking: Vec::new(),
            center_conv: Vec::new(),
            alpha: INITIAL_ALPHA,
            alpha_bar: INITIAL_ALPHA,
            node: None,
            k: 0,
            t: 0,
            has_center: false,
            center_bound: -numerics::INFINITY,
            in_mispricing: false,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn alpha_bar(&self) -> f64 {
        self.alpha_bar
    }

    pub fn has_center(&self) -> bool {
        self.has_center
    }

    pub fn is_in_mispricing_schedule(&self) -> bool {
        self.in_mispricing
    }

    pub fn set_n_linking_conss(&mut self, n: usize) {
        self.center_linking = vec![0.0; n];
    }

    pub fn set_n_conv_conss(&mut self, n: usize) {
        self.center_conv = vec![0.0; n];
    }

    fn ensure_conss(&mut self, n: usize) {
        if n > self.center_conss.len() {
            self.center_conss.resize(n, 0.0);
        }
    }

    fn ensure_cuts(&mut self, n: usize) {
        if n > self.center_cuts.len() {
            self.center_cuts.resize(n, 0.0);
        }
    }

    fn used_alpha(&self) -> f64 {
        if self.in_mispricing {
            self.alpha_bar
        } else {
            self.alpha
        }
    }

    fn smooth(&self, center: f64, current: f64) -> f64 {
        if self.has_center {
            let a = self.used_alpha();
            a * center + (1.0 - a) * current
        } else {
            current
        }
    }

    /// Smoothed dual of master constraint `i`.
    pub fn cons_dual(&mut self, i: usize, current: f64) -> f64 {
        self.ensure_conss(i + 1);
        self.smooth(self.center_conss[i], current)
    }

    /// Smoothed dual of master cut `r`.
    pub fn row_dual(&mut self, r: usize, current: f64) -> f64 {
        self.ensure_cuts(r + 1);
        self.smooth(self.center_cuts[r], current)
    }

    /// Smoothed dual of linking constraint `i`.
    pub fn linking_dual(&self, i: usize, current: f64) -> f64 {
        self.smooth(self.center_linking[i], current)
    }

    /// Smoothed dual of block `b`'s convexity constraint.
    pub fn conv_dual(&self, b: usize, current: f64) -> f64 {
        self.smooth(self.center_conv[b], current)
    }

    /// Resets the schedule when pricing enters another node.
    pub fn update_node(&mut self, node: u64) {
        if self.node != Some(node) {
            self.node = Some(node);
            self.k = 0;
            self.t = 1;
            self.alpha = INITIAL_ALPHA;
            self.has_center = false;
            self.center_bound = -numerics::INFINITY;
            self.in_mispricing = false;
        }
    }

    pub fn is_stabilized(&self) -> bool {
        if self.in_mispricing {
            numerics::is_positive(self.alpha_bar)
        } else {
            numerics::is_positive(self.alpha)
        }
    }

    pub fn activate_mispricing_schedule(&mut self) {
        self.in_mispricing = true;
    }

    pub fn disable_mispricing_schedule(&mut self) {
        self.in_mispricing = false;
        self.k = 0;
    }

    /// ᾱ relaxation after a round without improving columns.
    pub fn update_alpha_misprice(&mut self) {
        self.k += 1;
        self.alpha_bar = (1.0 - self.k as f64 * (1.0 - self.alpha)).max(0.0);
        debug!(
            alpha_bar = self.alpha_bar,
            k = self.k,
            t = self.t,
            "alphabar update after mispricing"
        );
    }

    /// α update after a successful round, driven by the subgradient sign.
    pub fn update_alpha(&mut self, subgradient_product: f64) {
        self.t += 1;
        if numerics::is_positive(subgradient_product) {
            self.increase_alpha();
        } else {
            self.decrease_alpha();
        }
    }

    fn increase_alpha(&mut self) {
        // numerical safety: never beyond 0.9
        self.alpha = (self.alpha + (1.0 - self.alpha) * 0.1).min(0.9);
        debug!(alpha = self.alpha, "alpha increased");
    }

    fn decrease_alpha(&mut self) {
        if self.alpha >= 0.5 && self.alpha < 1.0 {
            self.alpha /= 1.1;
        } else {
            self.alpha = (self.alpha - (1.0 - self.alpha) * 0.1).max(0.0);
        }
        debug!(alpha = self.alpha, "alpha decreased");
    }

    /// Overwrites the stability centre with the current smoothed duals if
    /// the Lagrangian bound strictly improved.
    pub fn update_stability_center(
        &mut self,
        lowerbound: f64,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
        kind: PricingKind,
        dualsolconv: &[f64],
    ) {
        if self.has_center && numerics::is_le(lowerbound, self.center_bound) {
            return;
        }
        debug!(lowerbound, old = self.center_bound, "updating stability center");

        let nconss = master.n_master_conss();
        let ncuts = master.n_master_cuts();
        self.ensure_conss(nconss);
        self.ensure_cuts(ncuts);

        // each slot only depends on itself, so in-place assignment is fine
        for i in 0..nconss {
            self.center_conss[i] = self.smooth(self.center_conss[i], kind.cons_dual(master, i));
        }
        for r in 0..ncuts {
            self.center_cuts[r] = self.smooth(self.center_cuts[r], kind.row_dual(master, r));
        }
        for i in 0..self.center_linking.len() {
            self.center_linking[i] =
                self.smooth(self.center_linking[i], kind.linking_dual(master, i));
        }
        for b in 0..self.center_conv.len().min(decomp.n_blocks()) {
            if decomp.is_relevant(b) {
                self.center_conv[b] = dualsolconv[b];
            }
        }

        self.has_center = true;
        self.center_bound = lowerbound;
    }

    /// Inner product of the subgradient at the best pricing solutions with
    /// the direction from the smoothed duals to the centre.
    pub fn calculate_subgradient(
        &mut self,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
        kind: PricingKind,
        best_cols: &[Option<Col>],
    ) -> f64 {
        let nconss = master.n_master_conss();
        let ncuts = master.n_master_cuts();
        self.ensure_conss(nconss);
        self.ensure_cuts(ncuts);

        let sol_val = |orig: usize| -> Option<f64> {
            match decomp.block_of_orig(orig) {
                None => Some(master.master_sol_val(orig)),
                Some(b) => {
                    if !decomp.is_relevant(b) {
                        return None;
                    }
                    let col = best_cols.get(b).and_then(|c| c.as_ref())?;
                    let pv = decomp.pricing_var(orig, b)?;
                    Some(col.sol_val(pv))
                }
            }
        };

        let mut gradient_product = 0.0;

        for i in 0..nconss {
            let dual = kind.cons_dual(master, i);
            let diff = self.center_conss[i] - dual;
            if numerics::is_zero(diff) {
                continue;
            }
            let row = master.master_cons(i);
            for &(orig, a) in &row.coefs {
                if let Some(val) = sol_val(orig) {
                    gradient_product += diff * a * val;
                }
            }
            let bound = if numerics::is_feas_positive(dual) {
                row.lhs
            } else if numerics::is_feas_negative(dual) {
                row.rhs
            } else {
                continue;
            };
            gradient_product -= diff * bound;
        }

        for r in 0..ncuts {
            let dual = kind.row_dual(master, r);
            let diff = self.center_cuts[r] - dual;
            if numerics::is_zero(diff) {
                continue;
            }
            let row = master.master_cut(r);
            for &(orig, a) in &row.coefs {
                if let Some(val) = sol_val(orig) {
                    gradient_product += diff * a * val;
                }
            }
            let bound = if numerics::is_feas_positive(dual) {
                row.lhs
            } else if numerics::is_feas_negative(dual) {
                row.rhs
            } else {
                continue;
            };
            gradient_product -= diff * bound;
        }

        for i in 0..decomp.n_linking_conss().min(self.center_linking.len()) {
            let link = decomp.linking_cons(i);
            let diff = self.center_linking[i] - kind.linking_dual(master, i);
            let master_val = master.master_sol_val(link.orig_var);
            let pricing_val = best_cols
                .get(link.block)
                .and_then(|c| c.as_ref())
                .map(|c| c.sol_val(link.pricing_var))
                .unwrap_or(0.0);
            gradient_product += diff * (master_val - pricing_val);
        }

        debug!(gradient_product, "subgradient update");
        gradient_product
    }

    /// Objective value of the current smoothed duals in the dual of the
    /// master LP: `Σ π̃ · b` with the row bound picked by the dual's sign.
    pub fn stabilized_dual_objective(
        &mut self,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
        kind: PricingKind,
    ) -> f64 {
        let mut dualobj = 0.0;

        for i in 0..decomp.n_linking_conss().min(self.center_linking.len()) {
            let link = decomp.linking_cons(i);
            let dual = self.linking_dual(i, kind.linking_dual(master, i));
            if numerics::is_feas_positive(dual) {
                dualobj += link.lhs * dual;
            } else if numerics::is_feas_negative(dual) {
                dualobj += link.rhs * dual;
            }
        }

        for i in 0..master.n_master_conss() {
            let dual = self.cons_dual(i, kind.cons_dual(master, i));
            let row = master.master_cons(i);
            if numerics::is_feas_positive(dual) {
                dualobj += row.lhs * dual;
            } else if numerics::is_feas_negative(dual) {
                dualobj += row.rhs * dual;
            }
        }

        for r in 0..master.n_master_cuts() {
            let dual = self.row_dual(r, kind.row_dual(master, r));
            let row = master.master_cut(r);
            if numerics::is_feas_positive(dual) {
                dualobj += row.lhs * dual;
            } else if numerics::is_feas_negative(dual) {
                dualobj += row.rhs * dual;
            }
        }

        dualobj
    }
}

impl Default for Stabilization {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centered() -> Stabilization {
        let mut stab = Stabilization::new();
        stab.update_node(1);
        stab.center_conss = vec![1.0];
        stab.has_center = true;
        stab.center_bound = 0.0;
        stab
    }

    #[test]
    fn smoothing_blends_center_and_current() {
        let mut stab = centered();
        // alpha = 0.8: 0.8 * 1.0 + 0.2 * 0.0
        assert!((stab.cons_dual(0, 0.0) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn no_center_passes_current_through() {
        let mut stab = Stabilization::new();
        stab.update_node(1);
        assert_eq!(stab.cons_dual(0, 0.4), 0.4);
    }

    #[test]
    fn mispricing_schedule_relaxes_alphabar() {
        let mut stab = centered();
        stab.activate_mispricing_schedule();
        stab.update_alpha_misprice();
        // k=1: 1 - 1*0.2 = 0.8
        assert!((stab.alpha_bar() - 0.8).abs() < 1e-12);
        stab.update_alpha_misprice();
        // k=2: 1 - 2*0.2 = 0.6
        assert!((stab.alpha_bar() - 0.6).abs() < 1e-12);
        // smoothed dual with alphabar: 0.6 * 1.0 + 0.4 * 0.0
        assert!((stab.cons_dual(0, 0.0) - 0.6).abs() < 1e-12);
        // alphabar never exceeds alpha and never drops below zero
        for _ in 0..10 {
            stab.update_alpha_misprice();
            assert!(stab.alpha_bar() >= 0.0);
            assert!(stab.alpha_bar() <= stab.alpha() + 1e-12);
        }
    }

    #[test]
    fn alpha_updates_follow_subgradient_sign() {
        let mut stab = centered();
        stab.update_alpha(1.0);
        // increase: 0.8 + 0.2 * 0.1 = 0.82
        assert!((stab.alpha() - 0.82).abs() < 1e-12);
        stab.update_alpha(-1.0);
        // decrease in [0.5, 1): divide by 1.1
        assert!((stab.alpha() - 0.82 / 1.1).abs() < 1e-12);
        for _ in 0..200 {
            stab.update_alpha(1.0);
        }
        assert!(stab.alpha() <= 0.9 + 1e-12);
        for _ in 0..200 {
            stab.update_alpha(-1.0);
        }
        assert!(stab.alpha() >= 0.0);
    }

    #[test]
    fn node_change_resets_schedule() {
        let mut stab = centered();
        stab.activate_mispricing_schedule();
        stab.update_alpha_misprice();
        stab.update_node(2);
        assert!(!stab.has_center());
        assert!(!stab.is_in_mispricing_schedule());
        assert!((stab.alpha() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn conv_center_is_sized_independently() {
        let mut stab = Stabilization::new();
        stab.update_node(1);
        stab.ensure_conss(8);
        stab.set_n_conv_conss(3);
        assert_eq!(stab.center_conv.len(), 3);
        assert_eq!(stab.center_conss.len(), 8);
        stab.set_n_conv_conss(5);
        assert_eq!(stab.center_conv.len(), 5);
        assert_eq!(stab.center_conss.len(), 8);
    }
}
