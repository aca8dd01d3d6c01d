//! # bap-core: Shared data model for the branch-and-price engine
//!
//! This crate holds everything the engine crates agree on:
//!
//! - [`Col`]: one extreme point or ray of a block's pricing polyhedron,
//!   the unit moved between solvers, price store, column pool and master.
//! - [`PricingModel`]: the plain-data description of a block subproblem
//!   consumed by pricing-solver backends.
//! - The collaborator interfaces [`MasterAccess`], [`BranchingAccess`] and
//!   [`DecompAccess`] behind which the master LP, the tree and the
//!   decomposition live.
//! - [`PricingError`] and the tolerance helpers in [`numerics`].
//! - [`PricingStats`], the caller-owned statistics sink.
//!
//! The crate is deliberately free of any solving logic; see `bap-pricing`
//! for the engine and `bap-solvers` for the built-in backends.

pub mod col;
pub mod diagnostics;
pub mod error;
pub mod iface;
pub mod model;
pub mod numerics;

pub use col::{Col, ColKey};
pub use diagnostics::{PricingStats, StatsSnapshot};
pub use error::{PricingError, PricingResult};
pub use iface::{
    compute_master_coefs, cut_coef, BranchConsId, BranchingAccess, DecompAccess, LinkingConsData,
    MasterAccess, MasterVarId, OrigBoundChange, RowData,
};
pub use model::{BoundChange, BoundSense, LinearCons, PricingModel, PricingVar};
