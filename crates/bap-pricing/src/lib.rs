//! # bap-pricing: the branch-and-price pricing engine
//!
//! This crate drives column generation for a Dantzig-Wolfe reformulation:
//! it owns the pricing problems and jobs, schedules the jobs across solver
//! backends and chunks, smooths the dual signal, pools and filters the
//! generated columns, and publishes valid Lagrangian lower bounds.
//!
//! ## Architecture
//!
//! | Component | Role |
//! |-----------|------|
//! | [`Pricer`] | one `price()` call per master LP round; owns everything below |
//! | [`PricingController`] | job queue, chunk rotation, heuristic-to-exact escalation |
//! | [`ColPool`] | priority-ordered, aged cache of columns across rounds |
//! | [`PriceStore`] | per-round staging with duplicate, score and orthogonality filters |
//! | [`Stabilization`] | Wentges/in-out dual smoothing with mispricing recovery |
//!
//! The master LP, the branching tree and the decomposition stay outside,
//! behind the access traits of `bap-core`. Solver backends plug in through
//! `bap-solver-common`; `bap-solvers` ships the built-in ones.
//!
//! ## Example
//!
//! ```ignore
//! use bap_pricing::{Pricer, PricingConfig, PricingKind};
//! use bap_solver_common::SolverRegistry;
//! use bap_solvers::{IntProgSolver, StableSetSolver};
//!
//! let mut registry = SolverRegistry::new();
//! registry.register(Box::new(StableSetSolver::new()));
//! registry.register(Box::new(IntProgSolver::new()));
//!
//! let mut pricer = Pricer::new(&decomp, PricingConfig::default(), registry, stats)?;
//! let outcome = pricer.price(PricingKind::Redcost, &mut master, &branching, &decomp)?;
//! println!("added {} columns", outcome.n_added);
//! ```

pub mod colpool;
pub mod config;
pub mod controller;
pub mod pqueue;
pub mod pricer;
pub mod pricestore;
pub mod pricingjob;
pub mod pricingprob;
pub mod pricingtype;
pub mod stabilization;

pub mod test_utils;

pub use colpool::ColPool;
pub use config::{
    ColPoolConfig, DisableCutoff, Efficacy, JobScoring, PriceStoreConfig, PricingConfig,
    StabilizationConfig,
};
pub use controller::{CollectedResults, PricingController};
pub use pqueue::PriorityQueue;
pub use pricer::{PriceResult, Pricer, PricingOutcome};
pub use pricestore::PriceStore;
pub use pricingjob::{JobId, PricingJob};
pub use pricingprob::{BranchLevel, PricingProb, ProbId};
pub use pricingtype::PricingKind;
pub use stabilization::Stabilization;
