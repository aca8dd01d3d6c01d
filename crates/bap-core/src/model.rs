//! Block subproblem model.
//!
//! The engine makes no assumption about how a pricing subproblem is solved;
//! [`PricingModel`] is the plain-data description of one block — bounded
//! (integer) variables and linear constraints — that the built-in backends
//! understand. The per-round pricing objective is *not* part of the model:
//! it is recomputed from the dual solution every round and handed to the
//! solver alongside an immutable model reference, so worker threads can
//! share the model without locking.

use serde::{Deserialize, Serialize};

/// One variable of a block subproblem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingVar {
    pub name: String,
    /// Original objective coefficient (used in reduced-cost pricing).
    pub obj: f64,
    pub lb: f64,
    pub ub: f64,
    pub integral: bool,
    /// Index of the underlying variable this one resolves to; differs from
    /// the variable's own index only for aggregated copies.
    pub orig_index: usize,
    /// Affine transform to the underlying variable: `orig = (x - constant) / scalar`.
    pub scalar: f64,
    pub constant: f64,
}

/// A linear constraint `lhs <= a'x <= rhs` of a block subproblem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearCons {
    pub name: String,
    /// Sparse coefficients (variable index, value), sorted by index.
    pub coefs: Vec<(usize, f64)>,
    pub lhs: f64,
    pub rhs: f64,
}

/// Bound-change sense for generic branching tightenings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundSense {
    /// `x >= bound`
    Lower,
    /// `x <= bound`
    Upper,
}

/// A local bound tightening applied inside a pricing subproblem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundChange {
    /// Pricing-variable index within the block.
    pub var: usize,
    pub sense: BoundSense,
    pub bound: f64,
}

/// Plain-data description of one block's pricing subproblem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingModel {
    name: String,
    vars: Vec<PricingVar>,
    conss: Vec<LinearCons>,
}

impl PricingModel {
    pub fn new(name: impl Into<String>) -> Self {
        PricingModel {
            name: name.into(),
            vars: Vec::new(),
            conss: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a variable and returns its index.
    pub fn add_var(&mut self, name: impl Into<String>, obj: f64, lb: f64, ub: f64, integral: bool) -> usize {
        let idx = self.vars.len();
        self.vars.push(PricingVar {
            name: name.into(),
            obj,
            lb,
            ub,
            integral,
            orig_index: idx,
            scalar: 1.0,
            constant: 0.0,
        });
        idx
    }

    /// Adds a constraint and returns its index.
    pub fn add_cons(&mut self, name: impl Into<String>, mut coefs: Vec<(usize, f64)>, lhs: f64, rhs: f64) -> usize {
        coefs.sort_unstable_by_key(|&(i, _)| i);
        let idx = self.conss.len();
        self.conss.push(LinearCons {
            name: name.into(),
            coefs,
            lhs,
            rhs,
        });
        idx
    }

    pub fn n_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn n_conss(&self) -> usize {
        self.conss.len()
    }

    pub fn var(&self, i: usize) -> &PricingVar {
        &self.vars[i]
    }

    pub fn var_mut(&mut self, i: usize) -> &mut PricingVar {
        &mut self.vars[i]
    }

    pub fn vars(&self) -> &[PricingVar] {
        &self.vars
    }

    pub fn cons(&self, i: usize) -> &LinearCons {
        &self.conss[i]
    }

    pub fn conss(&self) -> &[LinearCons] {
        &self.conss
    }

    /// True when every variable is binary.
    pub fn is_binary(&self) -> bool {
        self.vars
            .iter()
            .all(|v| v.integral && v.lb >= 0.0 && v.ub <= 1.0)
    }

    /// Effective bounds of a variable after applying a tightening stack.
    /// Later changes win when they tighten further.
    pub fn tightened_bounds(&self, var: usize, changes: &[BoundChange]) -> (f64, f64) {
        let v = &self.vars[var];
        let mut lb = v.lb;
        let mut ub = v.ub;
        for ch in changes.iter().filter(|c| c.var == var) {
            match ch.sense {
                BoundSense::Lower => lb = lb.max(ch.bound),
                BoundSense::Upper => ub = ub.min(ch.bound),
            }
        }
        (lb, ub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_detection() {
        let mut m = PricingModel::new("b");
        m.add_var("x", 1.0, 0.0, 1.0, true);
        m.add_var("y", 1.0, 0.0, 1.0, true);
        assert!(m.is_binary());
        m.add_var("z", 1.0, 0.0, 2.0, true);
        assert!(!m.is_binary());
    }

    #[test]
    fn tightening_stack() {
        let mut m = PricingModel::new("b");
        m.add_var("x", 1.0, 0.0, 10.0, true);
        let changes = vec![
            BoundChange { var: 0, sense: BoundSense::Lower, bound: 2.0 },
            BoundChange { var: 0, sense: BoundSense::Upper, bound: 7.0 },
            BoundChange { var: 0, sense: BoundSense::Lower, bound: 1.0 },
        ];
        assert_eq!(m.tightened_bounds(0, &changes), (2.0, 7.0));
    }
}
