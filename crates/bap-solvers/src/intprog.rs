//! Exact branch-and-bound backend for bounded integer subproblems.
//!
//! The search enumerates integer assignments variable by variable, ordered
//! by descending objective magnitude. Two prunings keep it tractable:
//!
//! - a *box-relaxation bound*: the partial objective plus the best possible
//!   contribution of every unfixed variable within its bounds, and
//! - *activity propagation*: a node is cut off as soon as some constraint
//!   can no longer be satisfied by any completion.
//!
//! Heuristic mode runs the same search under a node budget. The backend
//! never emits rays; subproblems with an unbounded variable are reported as
//! [`PricingStatus::NotApplicable`].

use std::time::Instant;

use bap_core::{numerics, Col, PricingModel};
use bap_solver_common::{PricingSolver, PricingStatus, SolveRequest, SolverOutcome};
use bap_core::PricingResult;
use tracing::{debug, trace};

/// Domains larger than this make enumeration pointless.
const MAX_DOMAIN: f64 = 1e6;

/// Deadline polls happen every this many nodes.
const DEADLINE_CHECK_MASK: u64 = 0x3ff;

const DEFAULT_HEUR_NODE_BUDGET: u64 = 5_000;

/// Reference exact pricing backend.
pub struct IntProgSolver {
    heur_node_budget: u64,
}

impl IntProgSolver {
    pub fn new() -> Self {
        IntProgSolver {
            heur_node_budget: DEFAULT_HEUR_NODE_BUDGET,
        }
    }

    pub fn with_heur_node_budget(mut self, budget: u64) -> Self {
        self.heur_node_budget = budget;
        self
    }

    fn solve(&self, req: &SolveRequest<'_>, node_budget: Option<u64>) -> SolverOutcome {
        let model = req.model;
        let n = model.n_vars();
        debug_assert_eq!(req.objective.len(), n);

        let mut lb = vec![0.0; n];
        let mut ub = vec![0.0; n];
        for j in 0..n {
            let var = model.var(j);
            if !var.integral {
                return SolverOutcome::nothing(PricingStatus::NotApplicable);
            }
            let (l, u) = model.tightened_bounds(j, req.bound_changes);
            if numerics::is_infinite(l) || numerics::is_infinite(u) || u - l > MAX_DOMAIN {
                return SolverOutcome::nothing(PricingStatus::NotApplicable);
            }
            lb[j] = l.ceil();
            ub[j] = u.floor();
            if lb[j] > ub[j] {
                return SolverOutcome {
                    status: PricingStatus::Infeasible,
                    lower_bound: numerics::INFINITY,
                    cols: Vec::new(),
                };
            }
        }

        // larger objective magnitude first: fail fast on the vars that matter
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            req.objective[b]
                .abs()
                .partial_cmp(&req.objective[a].abs())
                .expect("NaN in pricing objective")
        });

        // suffix_bound[d] = best possible objective of vars order[d..]
        let mut suffix_bound = vec![0.0; n + 1];
        for d in (0..n).rev() {
            let j = order[d];
            let c = req.objective[j];
            suffix_bound[d] = suffix_bound[d + 1] + (c * lb[j]).min(c * ub[j]);
        }
        let root_bound = suffix_bound[0];

        let mut depth_of = vec![0usize; n];
        for (d, &j) in order.iter().enumerate() {
            depth_of[j] = d;
        }

        let mut search = Search {
            model,
            objective: req.objective,
            order,
            depth_of,
            lb,
            ub,
            suffix_bound,
            deadline: req.deadline,
            node_budget,
            nodes: 0,
            limit_hit: false,
            max_cols: req.max_cols.max(1),
            incumbents: Vec::new(),
            vals: vec![0.0; n],
        };
        search.dfs(0, 0.0);

        let nodes = search.nodes;
        let limit_hit = search.limit_hit;
        let cols: Vec<Col> = search
            .incumbents
            .iter()
            .map(|(obj, vals)| Col::from_solution(model, req.block, vals, false, *obj))
            .collect();
        let best = search.incumbents.first().map(|(obj, _)| *obj);

        debug!(
            block = req.block,
            nodes,
            limit_hit,
            ncols = cols.len(),
            best = ?best,
            "branch-and-bound finished"
        );

        if limit_hit {
            SolverOutcome {
                status: PricingStatus::LimitReached,
                lower_bound: root_bound,
                cols,
            }
        } else if cols.is_empty() {
            SolverOutcome {
                status: PricingStatus::Infeasible,
                lower_bound: numerics::INFINITY,
                cols,
            }
        } else {
            SolverOutcome {
                status: PricingStatus::Optimal,
                lower_bound: best.expect("optimal search without incumbent"),
                cols,
            }
        }
    }
}

impl Default for IntProgSolver {
    fn default() -> Self {
        Self::new()
    }
}

struct Search<'a> {
    model: &'a PricingModel,
    objective: &'a [f64],
    order: Vec<usize>,
    depth_of: Vec<usize>,
    lb: Vec<f64>,
    ub: Vec<f64>,
    suffix_bound: Vec<f64>,
    deadline: Option<Instant>,
    node_budget: Option<u64>,
    nodes: u64,
    limit_hit: bool,
    max_cols: usize,
    /// Best assignments so far, ascending objective.
    incumbents: Vec<(f64, Vec<f64>)>,
    vals: Vec<f64>,
}

impl Search<'_> {
    fn cutoff(&self) -> f64 {
        if self.incumbents.len() < self.max_cols {
            numerics::INFINITY
        } else {
            self.incumbents.last().expect("incumbent list empty").0
        }
    }

    fn out_of_budget(&mut self) -> bool {
        if self.limit_hit {
            return true;
        }
        if let Some(budget) = self.node_budget {
            if self.nodes >= budget {
                self.limit_hit = true;
                return true;
            }
        }
        if self.nodes & DEADLINE_CHECK_MASK == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.limit_hit = true;
                    return true;
                }
            }
        }
        false
    }

    /// Can the constraints still be satisfied given vars `order[..depth]`
    /// are fixed?
    fn propagate(&self, depth: usize) -> bool {
        for cons in self.model.conss() {
            let mut minact = 0.0;
            let mut maxact = 0.0;
            for &(j, a) in &cons.coefs {
                if self.depth_of[j] < depth {
                    let v = a * self.vals[j];
                    minact += v;
                    maxact += v;
                } else {
                    minact += (a * self.lb[j]).min(a * self.ub[j]);
                    maxact += (a * self.lb[j]).max(a * self.ub[j]);
                }
            }
            if numerics::is_feas_negative(cons.rhs - minact)
                || numerics::is_feas_negative(maxact - cons.lhs)
            {
                return false;
            }
        }
        true
    }

    fn record(&mut self, obj: f64) {
        let pos = self
            .incumbents
            .partition_point(|(o, _)| *o <= obj);
        self.incumbents.insert(pos, (obj, self.vals.clone()));
        if self.incumbents.len() > self.max_cols {
            self.incumbents.pop();
        }
        trace!(obj, "new incumbent");
    }

    fn dfs(&mut self, depth: usize, partial_obj: f64) {
        self.nodes += 1;
        if self.out_of_budget() {
            return;
        }
        if partial_obj + self.suffix_bound[depth] >= self.cutoff() - numerics::EPS {
            return;
        }
        if !self.propagate(depth) {
            return;
        }
        if depth == self.order.len() {
            self.record(partial_obj);
            return;
        }

        let j = self.order[depth];
        let c = self.objective[j];
        let lo = self.lb[j] as i64;
        let hi = self.ub[j] as i64;
        // explore objective-improving values first
        let values: Vec<i64> = if c <= 0.0 {
            (lo..=hi).rev().collect()
        } else {
            (lo..=hi).collect()
        };
        for v in values {
            self.vals[j] = v as f64;
            self.dfs(depth + 1, partial_obj + c * v as f64);
            if self.limit_hit {
                break;
            }
        }
        self.vals[j] = 0.0;
    }
}

impl PricingSolver for IntProgSolver {
    fn name(&self) -> &'static str {
        "intprog"
    }

    fn description(&self) -> &'static str {
        "exact branch-and-bound over bounded integer subproblems"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn solve_exact(&self, req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
        Ok(self.solve(req, None))
    }

    fn solve_heur(&self, req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
        // every retry of the job doubles the node budget
        let budget = self
            .heur_node_budget
            .saturating_mul(1u64 << req.heur_iteration.min(32));
        Ok(self.solve(req, Some(budget)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bap_core::model::{BoundChange, BoundSense};

    fn request<'a>(
        model: &'a PricingModel,
        objective: &'a [f64],
        bound_changes: &'a [BoundChange],
    ) -> SolveRequest<'a> {
        SolveRequest {
            block: 0,
            model,
            objective,
            bound_changes,
            deadline: None,
            max_cols: 4,
            heur_iteration: 0,
        }
    }

    /// max x0 + 2 x1 s.t. x0 + x1 <= 1 over binaries, as a minimization.
    #[test]
    fn solves_tiny_packing_problem() {
        let mut m = PricingModel::new("b0");
        m.add_var("x0", 0.0, 0.0, 1.0, true);
        m.add_var("x1", 0.0, 0.0, 1.0, true);
        m.add_cons("pack", vec![(0, 1.0), (1, 1.0)], -numerics::INFINITY, 1.0);

        let obj = [-1.0, -2.0];
        let solver = IntProgSolver::new();
        let out = solver.solve_exact(&request(&m, &obj, &[])).unwrap();
        assert_eq!(out.status, PricingStatus::Optimal);
        assert!((out.lower_bound - (-2.0)).abs() < 1e-9);
        assert_eq!(out.cols[0].sol_val(1), 1.0);
        assert_eq!(out.cols[0].sol_val(0), 0.0);
    }

    #[test]
    fn detects_infeasibility() {
        let mut m = PricingModel::new("b0");
        m.add_var("x0", 0.0, 0.0, 1.0, true);
        m.add_cons("force", vec![(0, 1.0)], 2.0, 3.0);
        let obj = [1.0];
        let out = IntProgSolver::new()
            .solve_exact(&request(&m, &obj, &[]))
            .unwrap();
        assert_eq!(out.status, PricingStatus::Infeasible);
        assert!(out.cols.is_empty());
    }

    #[test]
    fn respects_bound_tightenings() {
        let mut m = PricingModel::new("b0");
        m.add_var("x0", 0.0, 0.0, 5.0, true);
        let obj = [-1.0];
        let tighten = [BoundChange { var: 0, sense: BoundSense::Upper, bound: 2.0 }];
        let out = IntProgSolver::new()
            .solve_exact(&request(&m, &obj, &tighten))
            .unwrap();
        assert_eq!(out.status, PricingStatus::Optimal);
        assert!((out.lower_bound - (-2.0)).abs() < 1e-9);
    }

    #[test]
    fn rejects_continuous_models() {
        let mut m = PricingModel::new("b0");
        m.add_var("x0", 0.0, 0.0, 1.0, false);
        let obj = [1.0];
        let out = IntProgSolver::new()
            .solve_exact(&request(&m, &obj, &[]))
            .unwrap();
        assert_eq!(out.status, PricingStatus::NotApplicable);
    }

    #[test]
    fn node_budget_yields_limit_status() {
        let mut m = PricingModel::new("b0");
        for j in 0..12 {
            m.add_var(format!("x{j}"), 0.0, 0.0, 1.0, true);
        }
        let obj = vec![-1.0; 12];
        let solver = IntProgSolver::new().with_heur_node_budget(3);
        let out = solver.solve_heur(&request(&m, &obj, &[])).unwrap();
        assert_eq!(out.status, PricingStatus::LimitReached);
        // root box bound stays a valid lower bound
        assert!(out.lower_bound <= -12.0 + 1e-9);
    }

    #[test]
    fn returns_multiple_incumbents_best_first() {
        let mut m = PricingModel::new("b0");
        m.add_var("x0", 0.0, 0.0, 1.0, true);
        m.add_var("x1", 0.0, 0.0, 1.0, true);
        let obj = [-1.0, -2.0];
        let out = IntProgSolver::new()
            .solve_exact(&request(&m, &obj, &[]))
            .unwrap();
        assert_eq!(out.status, PricingStatus::Optimal);
        assert!(out.cols.len() >= 2);
        assert!(out.cols[0].redcost() <= out.cols[1].redcost());
        assert!((out.cols[0].redcost() - (-3.0)).abs() < 1e-9);
    }
}
