//! Built-in pricing-solver backends.
//!
//! Two backends ship with the engine:
//!
//! - [`IntProgSolver`]: the reference exact backend. Depth-first
//!   branch-and-bound over bounded integer subproblems, with activity-based
//!   propagation and a box-relaxation bound. Also usable heuristically
//!   under a node budget.
//! - [`StableSetSolver`]: a heuristic for set-packing-like binary blocks.
//!   Builds the conflict graph and prices by greedy maximum-weight stable
//!   set; declares itself not applicable on anything else.
//!
//! Further backends plug in through
//! [`PricingSolver`](bap_solver_common::PricingSolver).

pub mod intprog;
pub mod stableset;

pub use intprog::IntProgSolver;
pub use stableset::StableSetSolver;
