//! In-memory collaborators for tests: a dense mock master, decomposition
//! and branching context implementing the `bap-core` access traits.

use std::collections::HashMap;
use std::time::Duration;

use bap_core::{
    BranchConsId, BranchingAccess, DecompAccess, LinkingConsData, MasterAccess, MasterVarId,
    OrigBoundChange, PricingModel, PricingResult, RowData,
};

/// A master variable created by pricing, with everything the engine wired
/// up for it.
#[derive(Debug, Clone)]
pub struct AddedVar {
    pub name: String,
    pub obj: f64,
    pub is_ray: bool,
    pub block: usize,
    pub cons_coefs: Vec<(usize, f64)>,
    pub cut_coefs: Vec<(usize, f64)>,
    pub in_conv: bool,
}

/// Dense mock of the restricted master LP.
#[derive(Debug, Default)]
pub struct MockMaster {
    pub conss: Vec<RowData>,
    pub cons_duals: Vec<f64>,
    pub cons_farkas: Vec<f64>,
    pub cuts: Vec<RowData>,
    pub cut_duals: Vec<f64>,
    pub cut_farkas: Vec<f64>,
    pub conv_duals: Vec<f64>,
    pub conv_farkas: Vec<f64>,
    pub linking_duals: Vec<f64>,
    pub linking_farkas: Vec<f64>,
    pub lp_obj: f64,
    pub lp_optimal: bool,
    pub node_lb: f64,
    pub upper: f64,
    pub sol_vals: HashMap<usize, f64>,
    pub degeneracy: f64,
    pub added: Vec<AddedVar>,
    pub infeasible_reported: bool,
}

impl MockMaster {
    pub fn new(nblocks: usize) -> Self {
        MockMaster {
            conv_duals: vec![0.0; nblocks],
            conv_farkas: vec![0.0; nblocks],
            lp_optimal: true,
            node_lb: -bap_core::numerics::INFINITY,
            upper: bap_core::numerics::INFINITY,
            ..Default::default()
        }
    }

    pub fn add_cons(&mut self, name: &str, coefs: Vec<(usize, f64)>, lhs: f64, rhs: f64, dual: f64) {
        self.conss.push(RowData {
            name: name.into(),
            coefs,
            lhs,
            rhs,
        });
        self.cons_duals.push(dual);
        self.cons_farkas.push(0.0);
    }

    pub fn add_cut(&mut self, name: &str, coefs: Vec<(usize, f64)>, lhs: f64, rhs: f64, dual: f64) {
        self.cuts.push(RowData {
            name: name.into(),
            coefs,
            lhs,
            rhs,
        });
        self.cut_duals.push(dual);
        self.cut_farkas.push(0.0);
    }
}

impl MasterAccess for MockMaster {
    fn n_master_conss(&self) -> usize {
        self.conss.len()
    }

    fn master_cons(&self, i: usize) -> &RowData {
        &self.conss[i]
    }

    fn cons_dual(&self, i: usize) -> f64 {
        self.cons_duals[i]
    }

    fn cons_farkas(&self, i: usize) -> f64 {
        self.cons_farkas[i]
    }

    fn n_master_cuts(&self) -> usize {
        self.cuts.len()
    }

    fn master_cut(&self, r: usize) -> &RowData {
        &self.cuts[r]
    }

    fn cut_dual(&self, r: usize) -> f64 {
        self.cut_duals[r]
    }

    fn cut_farkas(&self, r: usize) -> f64 {
        self.cut_farkas[r]
    }

    fn conv_dual(&self, b: usize) -> f64 {
        self.conv_duals[b]
    }

    fn conv_farkas(&self, b: usize) -> f64 {
        self.conv_farkas[b]
    }

    fn linking_dual(&self, i: usize) -> f64 {
        self.linking_duals[i]
    }

    fn linking_farkas(&self, i: usize) -> f64 {
        self.linking_farkas[i]
    }

    fn lp_obj_value(&self) -> f64 {
        self.lp_obj
    }

    fn is_lp_optimal(&self) -> bool {
        self.lp_optimal
    }

    fn master_sol_val(&self, orig_var: usize) -> f64 {
        self.sol_vals.get(&orig_var).copied().unwrap_or(0.0)
    }

    fn node_lower_bound(&self) -> f64 {
        self.node_lb
    }

    fn lp_degeneracy(&self) -> f64 {
        self.degeneracy
    }

    fn upper_bound(&self) -> f64 {
        self.upper
    }

    fn remaining_time(&self) -> Option<Duration> {
        None
    }

    fn add_priced_var(
        &mut self,
        name: &str,
        obj: f64,
        is_ray: bool,
        block: usize,
    ) -> PricingResult<MasterVarId> {
        self.added.push(AddedVar {
            name: name.into(),
            obj,
            is_ray,
            block,
            cons_coefs: Vec::new(),
            cut_coefs: Vec::new(),
            in_conv: false,
        });
        Ok(self.added.len() - 1)
    }

    fn add_linear_coef(&mut self, cons: usize, var: MasterVarId, coef: f64) -> PricingResult<()> {
        self.added[var].cons_coefs.push((cons, coef));
        Ok(())
    }

    fn add_row_coef(&mut self, cut: usize, var: MasterVarId, coef: f64) -> PricingResult<()> {
        self.added[var].cut_coefs.push((cut, coef));
        Ok(())
    }

    fn add_var_to_conv_cons(&mut self, _b: usize, var: MasterVarId) -> PricingResult<()> {
        self.added[var].in_conv = true;
        Ok(())
    }

    fn report_infeasible(&mut self) {
        self.infeasible_reported = true;
    }
}

/// Dense mock decomposition: one model per block, a global original
/// variable space, and an explicit relevant/identical structure.
#[derive(Debug, Default)]
pub struct MockDecomp {
    pub models: Vec<PricingModel>,
    pub relevant: Vec<bool>,
    pub identical: Vec<usize>,
    /// Original variable -> owning block (absent = master variable).
    pub block_of: HashMap<usize, usize>,
    /// (original variable, block) -> pricing-variable index.
    pub pricing_vars: HashMap<(usize, usize), usize>,
    pub linking: Vec<LinkingConsData>,
}

impl MockDecomp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block and returns its index. `relevant = false` marks a copy
    /// of an aggregated block.
    pub fn add_block(&mut self, model: PricingModel, relevant: bool, identical: usize) -> usize {
        self.models.push(model);
        self.relevant.push(relevant);
        self.identical.push(identical);
        self.models.len() - 1
    }

    /// Registers an original variable as the `pricing_var`-th variable of
    /// `block`.
    pub fn map_var(&mut self, orig_var: usize, block: usize, pricing_var: usize) {
        self.block_of.insert(orig_var, block);
        self.pricing_vars.insert((orig_var, block), pricing_var);
    }
}

impl DecompAccess for MockDecomp {
    fn n_blocks(&self) -> usize {
        self.models.len()
    }

    fn is_relevant(&self, b: usize) -> bool {
        self.relevant[b]
    }

    fn n_identical(&self, b: usize) -> usize {
        self.identical[b]
    }

    fn model(&self, b: usize) -> &PricingModel {
        &self.models[b]
    }

    fn block_of_orig(&self, orig_var: usize) -> Option<usize> {
        self.block_of.get(&orig_var).copied()
    }

    fn pricing_var(&self, orig_var: usize, b: usize) -> Option<usize> {
        self.pricing_vars.get(&(orig_var, b)).copied()
    }

    fn n_linking_conss(&self) -> usize {
        self.linking.len()
    }

    fn linking_cons(&self, i: usize) -> &LinkingConsData {
        &self.linking[i]
    }
}

/// One node of a mock masterbranch stack.
#[derive(Debug, Clone)]
pub struct MockBranchCons {
    pub parent: Option<BranchConsId>,
    pub generic: bool,
    pub block: usize,
    pub dual: f64,
    pub changes: Vec<OrigBoundChange>,
}

/// Mock branching context: a node number and an optional masterbranch
/// stack.
#[derive(Debug)]
pub struct MockBranching {
    pub node: u64,
    pub root: bool,
    pub conss: Vec<MockBranchCons>,
    pub active: Option<BranchConsId>,
}

impl MockBranching {
    pub fn root() -> Self {
        MockBranching {
            node: 1,
            root: true,
            conss: Vec::new(),
            active: None,
        }
    }

    pub fn at_node(node: u64) -> Self {
        MockBranching {
            node,
            root: false,
            conss: Vec::new(),
            active: None,
        }
    }
}

impl BranchingAccess for MockBranching {
    fn current_node(&self) -> u64 {
        self.node
    }

    fn is_root_node(&self) -> bool {
        self.root
    }

    fn active_cons(&self) -> Option<BranchConsId> {
        self.active
    }

    fn parent(&self, cons: BranchConsId) -> Option<BranchConsId> {
        self.conss[cons].parent
    }

    fn is_generic_branching(&self, cons: BranchConsId) -> bool {
        self.conss[cons].generic
    }

    fn bound_changes(&self, cons: BranchConsId) -> Vec<OrigBoundChange> {
        self.conss[cons].changes.clone()
    }

    fn branch_block(&self, cons: BranchConsId) -> usize {
        self.conss[cons].block
    }

    fn branch_dual(&self, cons: BranchConsId) -> f64 {
        self.conss[cons].dual
    }
}

/// A single-block binary packing fixture: `nvars` binary variables with
/// the given objective, all distinct original variables, identity var
/// mapping, no constraints in the block.
pub fn single_block(nvars: usize, objs: &[f64]) -> (MockMaster, MockDecomp) {
    let mut model = PricingModel::new("block0");
    for (j, &obj) in objs.iter().enumerate().take(nvars) {
        model.add_var(format!("x{j}"), obj, 0.0, 1.0, true);
    }
    let mut decomp = MockDecomp::new();
    decomp.add_block(model, true, 1);
    for j in 0..nvars {
        decomp.map_var(j, 0, j);
    }
    (MockMaster::new(1), decomp)
}
