//! Heuristic pricing backend for set-packing-like blocks.
//!
//! Applicable when every variable is binary and every constraint falls
//! into one of four shapes:
//!
//! - *clique rows* `Σ_{i∈S} x_i ≤ 1`, and generally rows with positive
//!   coefficients whose right-hand side admits at most one member at 1,
//! - *conflict rows* with two positive coefficients that cannot both be 1,
//! - *aggregation rows* `x − y = 0`, merging two variables into one node,
//! - *coupling rows* `Σ_{i∈S} x_i − c·y ≤ 0` with `c ≥ |S|`, where the
//!   gate variable `y` must be 1 as soon as any member is chosen.
//!
//! The solver builds the conflict graph over aggregated nodes, spreads
//! each gate's objective over its members, and greedily picks a
//! maximum-weight stable set (most negative pricing objective first). The
//! result is a single column without any optimality claim, so the status
//! is always [`PricingStatus::Unknown`]; on any structure outside the
//! classes above it reports [`PricingStatus::NotApplicable`].

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use tracing::{debug, trace};

use bap_core::{numerics, Col, PricingResult};
use bap_solver_common::{PricingSolver, PricingStatus, SolveRequest, SolverOutcome};

/// Greedy stable-set pricing heuristic.
pub struct StableSetSolver;

impl StableSetSolver {
    pub fn new() -> Self {
        StableSetSolver
    }
}

impl Default for StableSetSolver {
    fn default() -> Self {
        Self::new()
    }
}

enum ConsClass {
    /// All-pairs conflicts among the listed variables.
    Clique(Vec<usize>),
    /// `x - y = 0`.
    Link(usize, usize),
    /// Members and their gate variable.
    Coupling(Vec<usize>, usize),
}

fn classify(cons: &bap_core::LinearCons) -> Option<ConsClass> {
    let coefs = &cons.coefs;

    // aggregation: x - y = 0
    if coefs.len() == 2
        && numerics::is_eq(cons.lhs, 0.0)
        && numerics::is_eq(cons.rhs, 0.0)
        && numerics::is_eq(coefs[0].1, 1.0)
        && numerics::is_eq(coefs[1].1, -1.0)
    {
        return Some(ConsClass::Link(coefs[0].0, coefs[1].0));
    }

    // one-sided <= rows only from here on
    if !numerics::is_infinite(-cons.lhs) {
        return None;
    }

    let negatives: Vec<usize> = (0..coefs.len())
        .filter(|&k| numerics::is_negative(coefs[k].1))
        .collect();

    if negatives.is_empty() {
        // packing row: at most one member may be 1 iff every coefficient
        // alone fits but no pair does
        let fits_alone = coefs.iter().all(|&(_, a)| numerics::is_le(a, cons.rhs));
        let mut pairwise_conflict = true;
        for i in 0..coefs.len() {
            for j in i + 1..coefs.len() {
                if numerics::is_le(coefs[i].1 + coefs[j].1, cons.rhs) {
                    pairwise_conflict = false;
                }
            }
        }
        if fits_alone && pairwise_conflict {
            return Some(ConsClass::Clique(coefs.iter().map(|&(j, _)| j).collect()));
        }
        return None;
    }

    if negatives.len() == 1 && numerics::is_zero(cons.rhs) {
        let gate_pos = negatives[0];
        let gate = coefs[gate_pos].0;
        let members: Vec<usize> = coefs
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != gate_pos)
            .map(|(_, &(j, _))| j)
            .collect();
        let member_sum: f64 = coefs
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != gate_pos)
            .map(|(_, &(_, a))| a)
            .sum();
        if coefs
            .iter()
            .enumerate()
            .filter(|&(k, _)| k != gate_pos)
            .all(|(_, &(_, a))| numerics::is_positive(a))
            && -coefs[gate_pos].1 >= member_sum - numerics::EPS
        {
            return Some(ConsClass::Coupling(members, gate));
        }
    }

    None
}

impl PricingSolver for StableSetSolver {
    fn name(&self) -> &'static str {
        "stableset"
    }

    fn description(&self) -> &'static str {
        "greedy maximum-weight stable set for packing-shaped binary blocks"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn exact_enabled(&self) -> bool {
        false
    }

    fn solve_exact(&self, _req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
        Ok(SolverOutcome::nothing(PricingStatus::NotApplicable))
    }

    fn solve_heur(&self, req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
        let model = req.model;
        let n = model.n_vars();

        if !model.is_binary() {
            debug!(block = req.block, "stableset: non-binary block");
            return Ok(SolverOutcome::nothing(PricingStatus::NotApplicable));
        }

        // bound fixings, including generic-branching tightenings
        let mut fixed = vec![None::<bool>; n];
        for j in 0..n {
            let (lb, ub) = model.tightened_bounds(j, req.bound_changes);
            if lb > ub + numerics::FEASTOL {
                return Ok(SolverOutcome {
                    status: PricingStatus::Infeasible,
                    lower_bound: numerics::INFINITY,
                    cols: Vec::new(),
                });
            }
            if ub < 0.5 {
                fixed[j] = Some(false);
            } else if lb > 0.5 {
                fixed[j] = Some(true);
            }
        }

        let mut uf: UnionFind<usize> = UnionFind::new(n);
        let mut conflicts: Vec<(usize, usize)> = Vec::new();
        let mut couplings: Vec<(Vec<usize>, usize)> = Vec::new();

        for cons in model.conss() {
            match classify(cons) {
                Some(ConsClass::Link(a, b)) => {
                    uf.union(a, b);
                }
                Some(ConsClass::Clique(members)) => {
                    for i in 0..members.len() {
                        for j in i + 1..members.len() {
                            conflicts.push((members[i], members[j]));
                        }
                    }
                }
                Some(ConsClass::Coupling(members, gate)) => {
                    couplings.push((members, gate));
                }
                None => {
                    debug!(block = req.block, cons = %cons.name, "stableset: unsupported row");
                    return Ok(SolverOutcome::nothing(PricingStatus::NotApplicable));
                }
            }
        }

        // a gate is not a stable-set node; it may not be linked or conflict
        let mut is_gate = vec![false; n];
        for (_, gate) in &couplings {
            is_gate[*gate] = true;
        }
        let gate_is_linked = (0..n).any(|j| {
            is_gate[j] && (0..n).any(|k| k != j && uf.find(k) == uf.find(j))
        });
        if conflicts.iter().any(|&(a, b)| is_gate[a] || is_gate[b]) || gate_is_linked {
            return Ok(SolverOutcome::nothing(PricingStatus::NotApplicable));
        }

        // aggregate objective over linked nodes; spread gate cost over members
        let mut weight = vec![0.0; n];
        for j in 0..n {
            if !is_gate[j] {
                weight[uf.find(j)] += req.objective[j];
            }
        }
        for (members, gate) in &couplings {
            let share = req.objective[*gate] / members.len() as f64;
            for &m in members {
                weight[uf.find(m)] += share;
            }
        }

        // conflict graph over representatives
        let mut graph: UnGraph<usize, ()> = UnGraph::new_undirected();
        let mut node_of = vec![None::<NodeIndex>; n];
        let mut rep_nodes: Vec<usize> = Vec::new();
        for j in 0..n {
            let r = uf.find(j);
            if node_of[r].is_none() {
                node_of[r] = Some(graph.add_node(r));
                if !is_gate[r] {
                    rep_nodes.push(r);
                }
            }
        }
        let mut self_conflicting = vec![false; n];
        for &(a, b) in &conflicts {
            let (ra, rb) = (uf.find(a), uf.find(b));
            if ra == rb {
                // linked conflicting vars can never be 1
                self_conflicting[ra] = true;
                continue;
            }
            let (na, nb) = (node_of[ra].expect("missing node"), node_of[rb].expect("missing node"));
            if !graph.contains_edge(na, nb) {
                graph.add_edge(na, nb, ());
            }
        }

        // representative-level fixings; contradictions mean infeasibility
        let mut rep_fixed = vec![None::<bool>; n];
        for j in 0..n {
            let r = uf.find(j);
            if let Some(f) = fixed[j] {
                match rep_fixed[r] {
                    Some(g) if g != f => {
                        return Ok(SolverOutcome {
                            status: PricingStatus::Infeasible,
                            lower_bound: numerics::INFINITY,
                            cols: Vec::new(),
                        });
                    }
                    _ => rep_fixed[r] = Some(f),
                }
            }
        }

        let mut chosen = vec![false; n];

        // forced representatives first
        for &r in &rep_nodes {
            if rep_fixed[r] == Some(true) {
                if self_conflicting[r] {
                    return Ok(SolverOutcome {
                        status: PricingStatus::Infeasible,
                        lower_bound: numerics::INFINITY,
                        cols: Vec::new(),
                    });
                }
                chosen[r] = true;
            }
        }

        // greedy: most negative aggregated weight first
        let mut order: Vec<usize> = rep_nodes
            .iter()
            .copied()
            .filter(|&r| rep_fixed[r].is_none() && !self_conflicting[r])
            .collect();
        order.sort_by(|&a, &b| {
            weight[a]
                .partial_cmp(&weight[b])
                .expect("NaN in pricing objective")
        });

        for &r in &order {
            if !numerics::is_negative(weight[r]) {
                break;
            }
            let node = node_of[r].expect("missing node");
            let blocked = graph
                .neighbors(node)
                .any(|nb| chosen[graph[nb]]);
            if !blocked {
                chosen[r] = true;
                trace!(rep = r, weight = weight[r], "stableset: picked node");
            }
        }

        // expand representatives to variables, then open gates
        let mut vals = vec![0.0; n];
        for j in 0..n {
            if !is_gate[j] && chosen[uf.find(j)] {
                vals[j] = 1.0;
            }
        }
        for (members, gate) in &couplings {
            if members.iter().any(|&m| vals[m] > 0.5) {
                vals[*gate] = 1.0;
            } else if fixed[*gate] == Some(true) {
                vals[*gate] = 1.0;
            }
        }

        let objval: f64 = vals
            .iter()
            .zip(req.objective)
            .map(|(v, c)| v * c)
            .sum();

        debug!(block = req.block, objval, "stableset: greedy solution");

        let col = Col::from_solution(model, req.block, &vals, false, objval);
        Ok(SolverOutcome {
            status: PricingStatus::Unknown,
            lower_bound: -numerics::INFINITY,
            cols: vec![col],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bap_core::PricingModel;

    fn request<'a>(model: &'a PricingModel, objective: &'a [f64]) -> SolveRequest<'a> {
        SolveRequest {
            block: 0,
            model,
            objective,
            bound_changes: &[],
            deadline: None,
            max_cols: 4,
            heur_iteration: 0,
        }
    }

    fn packing_model(nvars: usize) -> PricingModel {
        let mut m = PricingModel::new("pack");
        for j in 0..nvars {
            m.add_var(format!("x{j}"), 0.0, 0.0, 1.0, true);
        }
        m
    }

    #[test]
    fn picks_independent_set_by_weight() {
        // conflict x0-x1; x2 free
        let mut m = packing_model(3);
        m.add_cons("c01", vec![(0, 1.0), (1, 1.0)], -numerics::INFINITY, 1.0);
        let obj = [-1.0, -3.0, -2.0];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        assert_eq!(out.status, PricingStatus::Unknown);
        let col = &out.cols[0];
        assert_eq!(col.sol_val(1), 1.0);
        assert_eq!(col.sol_val(2), 1.0);
        assert_eq!(col.sol_val(0), 0.0);
        assert!((col.redcost() - (-5.0)).abs() < 1e-9);
    }

    #[test]
    fn clique_row_allows_single_member() {
        let mut m = packing_model(3);
        m.add_cons(
            "clique",
            vec![(0, 1.0), (1, 1.0), (2, 1.0)],
            -numerics::INFINITY,
            1.0,
        );
        let obj = [-1.0, -3.0, -2.0];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        let col = &out.cols[0];
        let total: f64 = (0..3).map(|j| col.sol_val(j)).sum();
        assert_eq!(total, 1.0);
        assert_eq!(col.sol_val(1), 1.0);
    }

    #[test]
    fn aggregation_links_variables() {
        let mut m = packing_model(2);
        m.add_cons("same", vec![(0, 1.0), (1, -1.0)], 0.0, 0.0);
        // combined weight is negative even though x1 alone is not
        let obj = [-2.0, 0.5];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        let col = &out.cols[0];
        assert_eq!(col.sol_val(0), 1.0);
        assert_eq!(col.sol_val(1), 1.0);
    }

    #[test]
    fn coupling_opens_gate() {
        let mut m = packing_model(3);
        // x0 + x1 - 2 y <= 0, y is var 2
        m.add_cons(
            "couple",
            vec![(0, 1.0), (1, 1.0), (2, -2.0)],
            -numerics::INFINITY,
            0.0,
        );
        let obj = [-1.0, -1.0, 0.5];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        let col = &out.cols[0];
        assert_eq!(col.sol_val(0), 1.0);
        assert_eq!(col.sol_val(1), 1.0);
        assert_eq!(col.sol_val(2), 1.0);
    }

    #[test]
    fn not_applicable_on_general_rows() {
        // two members fit together, so this is no packing row
        let mut m = packing_model(3);
        m.add_cons(
            "knap",
            vec![(0, 2.0), (1, 3.0), (2, 4.0)],
            -numerics::INFINITY,
            5.0,
        );
        let obj = [-1.0, -1.0, -1.0];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        assert_eq!(out.status, PricingStatus::NotApplicable);
    }

    #[test]
    fn not_applicable_on_integer_blocks() {
        let mut m = PricingModel::new("int");
        m.add_var("x", 0.0, 0.0, 2.0, true);
        let obj = [-1.0];
        let out = StableSetSolver::new().solve_heur(&request(&m, &obj)).unwrap();
        assert_eq!(out.status, PricingStatus::NotApplicable);
    }
}
