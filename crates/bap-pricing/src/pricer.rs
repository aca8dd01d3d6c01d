//! The pricing loop.
//!
//! One [`Pricer::price`] call runs a full round: assemble the (possibly
//! smoothed) pricing objectives, drain the job queue with a pool of
//! workers, compute the joint Lagrangian bound, drive the stabilization
//! schedule through mispricing recovery, and finally move the best columns
//! through the price store into the master, topping up from the column
//! pool.
//!
//! Locking discipline: workers buffer generated columns inside their
//! pricing prob (one worker per prob at a time), counters are atomics, and
//! the price store sits behind its own mutex. The master is only touched
//! outside the parallel section.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bap_core::{
    compute_master_coefs, cut_coef, numerics, BranchingAccess, Col, DecompAccess, MasterAccess,
    PricingError, PricingModel, PricingResult, PricingStats,
};
use bap_solver_common::{PricingStatus, SolveRequest, SolverRegistry};
use tracing::{debug, info, warn};

use crate::colpool::ColPool;
use crate::config::PricingConfig;
use crate::controller::PricingController;
use crate::pricestore::PriceStore;
use crate::pricingprob::BranchLevel;
use crate::pricingtype::PricingKind;
use crate::stabilization::Stabilization;

/// Result classification of one pricing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceResult {
    /// Pricing ran; columns may or may not have been added.
    Success,
    /// Pricing did not run or could not price all problems.
    DidNotRun,
}

/// Outcome of one pricing call.
#[derive(Debug)]
pub struct PricingOutcome {
    pub result: PriceResult,
    /// Columns added to the master (price store plus column pool).
    pub n_added: usize,
    /// Valid Lagrangian lower bound, when one was proven.
    pub lower_bound: Option<f64>,
    /// Reduced-cost pricing proved the master infeasible.
    pub infeasible: bool,
}

/// The pricing engine: controller, pools, stabilizer and solver set.
pub struct Pricer {
    cfg: PricingConfig,
    registry: SolverRegistry,
    stats: Arc<PricingStats>,
    colpool: ColPool,
    pricestore: Mutex<PriceStore>,
    stabilization: Stabilization,
    controller: PricingController,
    /// Per-block stabilized pricing objective of the current iteration.
    pricing_objs: Vec<Vec<f64>>,
    /// Per-block unsmoothed duals, the basis of reduced-cost computation.
    real_dual_values: Vec<Vec<f64>>,
    /// Raw convexity duals per block (`-INFINITY` for irrelevant blocks).
    dualsolconv: Vec<f64>,
    /// Smoothed master-constraint duals of the current iteration.
    dual_obj: Vec<f64>,
    mispricings_at_node: u32,
    stab_disabled: bool,
    node: Option<u64>,
    var_seq: usize,
}

impl Pricer {
    pub fn new(
        decomp: &dyn DecompAccess,
        cfg: PricingConfig,
        mut registry: SolverRegistry,
        stats: Arc<PricingStats>,
    ) -> PricingResult<Self> {
        if registry.is_empty() {
            return Err(PricingError::InvalidConfiguration(
                "no pricing solver registered".into(),
            ));
        }
        for solver in registry.iter_mut() {
            solver.init()?;
        }

        let nblocks = decomp.n_blocks();
        let nrel = (0..nblocks).filter(|&b| decomp.is_relevant(b)).count();
        let soft = cfg
            .max_cols_round_any()
            .saturating_mul(nrel)
            .saturating_mul(cfg.colpool.size_factor);
        let hard = soft.saturating_mul(2).max(16);

        let controller = PricingController::new(decomp, &registry, &cfg);
        let mut stabilization = Stabilization::new();
        stabilization.set_n_linking_conss(decomp.n_linking_conss());
        stabilization.set_n_conv_conss(nblocks);

        Ok(Pricer {
            colpool: ColPool::new(cfg.colpool.age_limit, soft, hard),
            pricestore: Mutex::new(PriceStore::new(nblocks, cfg.price_store.clone())),
            stabilization,
            controller,
            pricing_objs: vec![Vec::new(); nblocks],
            real_dual_values: vec![Vec::new(); nblocks],
            dualsolconv: vec![-numerics::INFINITY; nblocks],
            dual_obj: Vec::new(),
            mispricings_at_node: 0,
            stab_disabled: false,
            node: None,
            var_seq: 0,
            cfg,
            registry,
            stats,
        })
    }

    pub fn config(&self) -> &PricingConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &PricingStats {
        &self.stats
    }

    pub fn colpool(&self) -> &ColPool {
        &self.colpool
    }

    pub fn stabilization(&self) -> &Stabilization {
        &self.stabilization
    }

    /// Branch-and-bound (re)start hook.
    pub fn init_sol(&mut self) -> PricingResult<()> {
        for solver in self.registry.iter_mut() {
            solver.init_sol()?;
        }
        Ok(())
    }

    /// Branch-and-bound end hook.
    pub fn exit_sol(&mut self) -> PricingResult<()> {
        for solver in self.registry.iter_mut() {
            solver.exit_sol()?;
        }
        Ok(())
    }

    /// Engine shutdown; releases the solver backends.
    pub fn shutdown(&mut self) -> PricingResult<()> {
        for solver in self.registry.iter_mut() {
            solver.exit()?;
        }
        Ok(())
    }

    /// Performs one pricing call of the given kind.
    pub fn price(
        &mut self,
        kind: PricingKind,
        master: &mut dyn MasterAccess,
        branching: &dyn BranchingAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<PricingOutcome> {
        let started = Instant::now();
        self.stats.record_call(kind.is_farkas());

        if kind == PricingKind::Redcost && self.can_pricing_be_aborted(master) {
            debug!("pricing aborted before any work");
            return Ok(PricingOutcome {
                result: PriceResult::DidNotRun,
                n_added: 0,
                lower_bound: None,
                infeasible: false,
            });
        }

        info!(
            kind = ?kind,
            lp_obj = master.lp_obj_value(),
            node = branching.current_node(),
            "pricing call"
        );

        let outcome = self.perform_pricing(kind, master, branching, decomp)?;

        if kind == PricingKind::Redcost {
            if self.controller.is_eager_sweep(&self.cfg) || outcome.lower_bound.is_some() {
                self.controller.reset_eager_age();
            } else {
                self.controller.increase_eager_age(&self.cfg);
            }
            if branching.is_root_node() {
                self.stats.record_root_degeneracy(master.lp_degeneracy());
            }
        }

        self.stats.record_pricing_time(started.elapsed());
        debug!(n_added = outcome.n_added, "pricing call finished");
        Ok(outcome)
    }

    /// Early-abort test before pricing starts at all.
    fn can_pricing_be_aborted(&self, master: &dyn MasterAccess) -> bool {
        let lp_obj = master.lp_obj_value();
        let node_lb = master.node_lower_bound();

        if self.cfg.abort_pricing_int
            && !numerics::is_infinite(-node_lb)
            && numerics::is_lt(lp_obj, node_lb)
            && numerics::is_eq(lp_obj.ceil(), node_lb.ceil())
        {
            return true;
        }

        if numerics::is_positive(self.cfg.abort_pricing_gap) {
            let ub = master.upper_bound();
            if !numerics::is_infinite(ub) && !numerics::is_infinite(-node_lb) {
                let gap = (ub - node_lb).abs() / ub.abs().max(node_lb.abs()).max(1.0);
                if gap < self.cfg.abort_pricing_gap {
                    return true;
                }
            }
        }

        false
    }

    /// The stabilized pricing loop, from objective assembly to column
    /// application.
    fn perform_pricing(
        &mut self,
        kind: PricingKind,
        master: &mut dyn MasterAccess,
        branching: &dyn BranchingAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<PricingOutcome> {
        let node = branching.current_node();
        let at_root = branching.is_root_node();
        let nblocks = decomp.n_blocks();
        let under_generic = under_generic_branching(branching);

        if self.node != Some(node) {
            self.node = Some(node);
            self.stab_disabled = false;
            self.mispricings_at_node = 0;
        }

        self.colpool.update_node(node);
        self.controller.init_pricing(branching, decomp);
        if kind.is_farkas() {
            self.pricestore
                .get_mut()
                .expect("price store lock poisoned")
                .start_farkas();
        }

        let mut colpool_updated = false;
        let mut best_lower_bound = -numerics::INFINITY;
        let mut have_lower_bound = false;
        let mut redcost_valid = master.is_lp_optimal() && !under_generic;
        let mut infeasible = false;
        let mut has_error = false;

        loop {
            // decide whether this iteration is stabilized
            let mut stabilized = self.cfg.stabilization.enabled
                && !self.stab_disabled
                && kind == PricingKind::Redcost
                && !under_generic;
            if stabilized {
                self.stabilization.update_node(node);
                stabilized = self.stabilization.is_stabilized();
            }

            // pricing objectives under the (smoothed) duals
            self.set_pricing_objs(kind, stabilized, master, decomp)?;
            for b in (0..nblocks).filter(|&b| decomp.is_relevant(b)) {
                for id in self.registry.enabled_ids() {
                    self.registry
                        .solver_mut(id)
                        .update(b, &self.pricing_objs[b])?;
                }
            }

            // the first iteration refreshes the pool's reduced costs
            if !colpool_updated {
                self.update_redcost_colpool(decomp);
                colpool_updated = true;
            }

            self.pricestore
                .lock()
                .expect("price store lock poisoned")
                .set_dual_objective(self.dual_obj.clone());

            // fill the queue and drain it, rotating chunks while
            // nothing is found
            self.controller
                .setup_priority_queue(&self.cfg, &self.registry, &self.dualsolconv);
            self.drain_queue(kind, stabilized, at_root, master, decomp)?;
            loop {
                let found = self
                    .controller
                    .counters
                    .n_found_cols
                    .load(AtomicOrdering::Relaxed);
                let infeas = self
                    .controller
                    .counters
                    .infeasible
                    .load(AtomicOrdering::Relaxed);
                if found > 0 || infeas || !self.controller.check_next_chunk() {
                    break;
                }
                self.controller
                    .setup_priority_queue(&self.cfg, &self.registry, &self.dualsolconv);
                self.drain_queue(kind, stabilized, at_root, master, decomp)?;
            }

            let nfoundvars = self
                .controller
                .counters
                .n_found_cols
                .load(AtomicOrdering::Relaxed);
            infeasible = self
                .controller
                .counters
                .infeasible
                .load(AtomicOrdering::Relaxed);

            if infeasible {
                break;
            }

            // joint bound and validity
            let results = self.controller.collect_results(decomp, kind);
            if !results.optimal {
                redcost_valid = false;
            }
            has_error = results.any_unknown && nfoundvars == 0;

            // stabilization bookkeeping
            if stabilized && kind == PricingKind::Redcost {
                let stab_dual_val =
                    self.stabilization
                        .stabilized_dual_objective(master, decomp, kind);
                let lower_candidate = stab_dual_val + results.best_stab_obj;

                let stab = &self.stabilization;
                let dualconvsum = self.controller.dualconv_sum(master, decomp, kind, |b, raw| {
                    stab.conv_dual(b, raw)
                });
                let best_stab_redcost = results.best_stab_obj - dualconvsum;

                if redcost_valid {
                    self.stabilization.update_stability_center(
                        lower_candidate,
                        master,
                        decomp,
                        kind,
                        &self.dualsolconv,
                    );
                    if lower_candidate > best_lower_bound {
                        best_lower_bound = lower_candidate;
                    }
                    have_lower_bound = true;
                }

                if nfoundvars == 0 {
                    debug!("mispricing: entering schedule");
                    self.stats.record_mispricing();
                    self.mispricings_at_node += 1;
                    self.stabilization.activate_mispricing_schedule();
                    self.stabilization.update_alpha_misprice();
                    if self.mispricings_at_node >= self.cfg.stabilization.max_mispricing_iters {
                        warn!(
                            mispricings = self.mispricings_at_node,
                            "giving up on stabilization for this node"
                        );
                        self.stab_disabled = true;
                    }
                } else if redcost_valid && numerics::is_negative(best_stab_redcost) {
                    if self.stabilization.is_in_mispricing_schedule() {
                        self.stabilization.disable_mispricing_schedule();
                    }
                    let best_cols = self.controller.best_cols(nblocks);
                    let g = self.stabilization.calculate_subgradient(
                        master, decomp, kind, &best_cols,
                    );
                    self.stabilization.update_alpha(g);
                }
            } else if redcost_valid && kind == PricingKind::Redcost {
                let lower_candidate = master.lp_obj_value() + results.best_redcost;
                if lower_candidate > best_lower_bound {
                    best_lower_bound = lower_candidate;
                }
                have_lower_bound = true;
                if self.stabilization.is_in_mispricing_schedule() {
                    self.stabilization.disable_mispricing_schedule();
                }
            }

            // either leave the loop or recycle and try again
            if !(stabilized && nfoundvars == 0) {
                break;
            }
            for p in 0..self.controller.n_probs() {
                for col in self.controller.prob_mut(p).take_cols() {
                    self.colpool.add_col(col);
                }
            }
            self.controller.reset_iteration();
        }

        // apply: price store first, then the column pool
        let mut n_added = 0usize;
        if !infeasible {
            let found = self
                .controller
                .counters
                .n_found_cols
                .load(AtomicOrdering::Relaxed);
            self.stats.record_cols_found(found as u64);

            self.move_cols_to_store(master, decomp);
            n_added = self.apply_store(kind, at_root, master, decomp)?;
            n_added += self.price_column_pool(kind, at_root, master, decomp)?;
            self.stats.record_cols_applied(n_added as u64);
        } else {
            // drop whatever the aborted round produced
            for p in 0..self.controller.n_probs() {
                self.controller.prob_mut(p).take_cols();
            }
            self.pricestore
                .get_mut()
                .expect("price store lock poisoned")
                .clear_cols();
            if kind == PricingKind::Redcost {
                master.report_infeasible();
            }
        }

        if kind.is_farkas() {
            self.pricestore
                .get_mut()
                .expect("price store lock poisoned")
                .end_farkas();
        }

        // ageing
        self.colpool.delete_old_columns();
        self.colpool.delete_oldest_columns();

        self.controller.exit_pricing();

        let result = if infeasible || n_added > 0 || !has_error {
            PriceResult::Success
        } else {
            PriceResult::DidNotRun
        };

        Ok(PricingOutcome {
            result,
            n_added,
            lower_bound: if kind == PricingKind::Redcost && redcost_valid && have_lower_bound {
                Some(best_lower_bound)
            } else {
                None
            },
            infeasible: infeasible && kind == PricingKind::Redcost,
        })
    }

    /// Assembles the pricing objective of every relevant block from the
    /// current (smoothed) duals and records the unsmoothed counterparts
    /// for reduced-cost computation.
    fn set_pricing_objs(
        &mut self,
        kind: PricingKind,
        stabilized: bool,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<()> {
        let nblocks = decomp.n_blocks();

        for b in 0..nblocks {
            if !decomp.is_relevant(b) {
                self.pricing_objs[b].clear();
                self.real_dual_values[b].clear();
                continue;
            }
            let model = decomp.model(b);
            self.pricing_objs[b] = model.vars().iter().map(|v| kind.var_obj(v)).collect();
            self.real_dual_values[b] = self.pricing_objs[b].clone();
        }

        // linking constraints: the block copy receives the dual
        for i in 0..decomp.n_linking_conss() {
            let raw = check_dual(kind.linking_dual(master, i), "linking constraint")?;
            let link = decomp.linking_cons(i);
            let smoothed = if stabilized {
                self.stabilization.linking_dual(i, raw)
            } else {
                raw
            };
            if decomp.is_relevant(link.block) {
                self.pricing_objs[link.block][link.pricing_var] += smoothed;
                self.real_dual_values[link.block][link.pricing_var] += raw;
            }
        }

        // master constraints
        self.dual_obj.clear();
        for i in 0..master.n_master_conss() {
            let raw = check_dual(kind.cons_dual(master, i), "master constraint")?;
            let smoothed = if stabilized {
                self.stabilization.cons_dual(i, raw)
            } else {
                raw
            };
            self.dual_obj.push(smoothed);
            if numerics::is_zero(smoothed) && numerics::is_zero(raw) {
                continue;
            }
            let row = master.master_cons(i);
            for &(orig, coef) in &row.coefs {
                if let Some(b) = decomp.block_of_orig(orig) {
                    if !decomp.is_relevant(b) {
                        continue;
                    }
                    if let Some(pv) = decomp.pricing_var(orig, b) {
                        self.pricing_objs[b][pv] -= smoothed * coef;
                        self.real_dual_values[b][pv] -= raw * coef;
                    }
                }
            }
        }

        // master cuts
        for r in 0..master.n_master_cuts() {
            let raw = check_dual(kind.row_dual(master, r), "master cut")?;
            let smoothed = if stabilized {
                self.stabilization.row_dual(r, raw)
            } else {
                raw
            };
            if numerics::is_zero(smoothed) && numerics::is_zero(raw) {
                continue;
            }
            let row = master.master_cut(r);
            for &(orig, coef) in &row.coefs {
                if let Some(b) = decomp.block_of_orig(orig) {
                    if !decomp.is_relevant(b) {
                        continue;
                    }
                    if let Some(pv) = decomp.pricing_var(orig, b) {
                        self.pricing_objs[b][pv] -= smoothed * coef;
                        self.real_dual_values[b][pv] -= raw * coef;
                    }
                }
            }
        }

        // convexity duals (always the raw values)
        for b in 0..nblocks {
            if decomp.is_relevant(b) {
                self.dualsolconv[b] = check_dual(kind.conv_dual(master, b), "convexity constraint")?;
            } else {
                self.dualsolconv[b] = -numerics::INFINITY;
            }
        }

        Ok(())
    }

    /// Recomputes the pooled columns' reduced costs against the round's
    /// unsmoothed duals (columns age here) and restores the ordering.
    fn update_redcost_colpool(&mut self, decomp: &dyn DecompAccess) {
        let levels: Vec<Vec<BranchLevel>> = (0..self.controller.n_probs())
            .map(|p| self.controller.prob_mut(p).branch_levels().to_vec())
            .collect();
        let blocks: Vec<usize> = (0..self.controller.n_probs())
            .map(|p| self.controller.prob_mut(p).block())
            .collect();
        let mut level_of_block: Vec<&[BranchLevel]> = vec![&[]; decomp.n_blocks()];
        for (p, &b) in blocks.iter().enumerate() {
            level_of_block[b] = &levels[p];
        }

        let real = &self.real_dual_values;
        let dualsolconv = &self.dualsolconv;
        self.colpool.update_redcosts(|col| {
            let b = col.block();
            compute_redcost(
                col,
                decomp.model(b),
                &real[b],
                level_of_block[b],
                dualsolconv[b],
            )
        });
    }

    /// Parallel drain of the pricing-job queue.
    fn drain_queue(
        &mut self,
        kind: PricingKind,
        stabilized: bool,
        at_root: bool,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<()> {
        let deadline = job_deadline(self.cfg.job_time_limit, master.remaining_time());
        let ctx = RoundCtx {
            controller: &self.controller,
            registry: &self.registry,
            cfg: &self.cfg,
            stats: &self.stats,
            decomp,
            pricing_objs: &self.pricing_objs,
            real_dual_values: &self.real_dual_values,
            dualsolconv: &self.dualsolconv,
            kind,
            stabilized,
            at_root,
            deadline,
            max_cols: self.cfg.max_cols_prob.min(self.cfg.max_cols_round_any()).max(1),
            stop: AtomicBool::new(false),
            error: Mutex::new(None),
        };

        let nworkers = match self.cfg.threads {
            0 => rayon::current_num_threads(),
            n => n,
        };

        if nworkers <= 1 {
            worker_loop(&ctx);
        } else {
            rayon::scope(|s| {
                for _ in 0..nworkers {
                    s.spawn(|_| worker_loop(&ctx));
                }
            });
        }

        let worker_error = ctx.error.lock().expect("worker error lock poisoned").take();
        if let Some(err) = worker_error {
            // consistent partial state: drop everything this round produced
            for p in 0..self.controller.n_probs() {
                self.controller.prob_mut(p).take_cols();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Moves the round's buffered columns into the price store, computing
    /// master coefficients on the way.
    fn move_cols_to_store(&mut self, master: &dyn MasterAccess, decomp: &dyn DecompAccess) {
        let store = self.pricestore.get_mut().expect("price store lock poisoned");
        for p in 0..self.controller.n_probs() {
            let cols = self.controller.prob_mut(p).take_cols();
            for mut col in cols {
                compute_master_coefs(&mut col, master, decomp);
                store.add_col(col, false);
            }
        }
    }

    /// Applies the price store to the master.
    fn apply_store(
        &mut self,
        kind: PricingKind,
        at_root: bool,
        master: &mut dyn MasterAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<usize> {
        let max_round = kind.max_cols_round(&self.cfg, at_root);
        let max_prob = self.cfg.max_cols_prob;
        let use_colpool = self.cfg.colpool.size_factor > 0;

        let Pricer {
            pricestore,
            colpool,
            var_seq,
            ..
        } = self;
        let store = pricestore.get_mut().expect("price store lock poisoned");

        let mut applied_per_block = vec![0usize; decomp.n_blocks()];
        let napplied = {
            let mut apply = |col: &Col, _force: bool| -> PricingResult<bool> {
                add_col_to_master(col, master, decomp, var_seq)?;
                applied_per_block[col.block()] += 1;
                Ok(true)
            };
            store.apply_cols(colpool, use_colpool, max_round, max_prob, &mut apply)?
        };

        for (b, &n) in applied_per_block.iter().enumerate() {
            if n > 0 {
                if let Some(p) = (0..self.controller.n_probs())
                    .find(|&p| self.controller.prob_mut(p).block() == b)
                {
                    self.controller.record_generated(p, n, 0);
                }
            }
        }

        Ok(napplied)
    }

    /// Takes additional columns from the pool while they price out.
    fn price_column_pool(
        &mut self,
        kind: PricingKind,
        at_root: bool,
        master: &mut dyn MasterAccess,
        decomp: &dyn DecompAccess,
    ) -> PricingResult<usize> {
        let max_round = kind.max_cols_round(&self.cfg, at_root);
        let mut nfound = 0usize;
        let mut nfound_prob = vec![0usize; decomp.n_blocks()];

        while !self.colpool.is_empty() && nfound < max_round {
            let redcost = self.colpool.best_redcost();
            let block = match self.colpool.best_block() {
                Some(b) => b,
                None => break,
            };

            if nfound_prob[block] < self.cfg.max_cols_prob
                && numerics::is_dualfeas_negative(redcost)
            {
                let mut col = self.colpool.take_best().expect("pool emptied concurrently");
                compute_master_coefs(&mut col, master, decomp);
                add_col_to_master(&col, master, decomp, &mut self.var_seq)?;
                nfound += 1;
                nfound_prob[block] += 1;
                self.stats.record_pool_cols_applied(1);
            } else {
                break;
            }
        }

        if nfound > 0 {
            debug!(nfound, "columns taken from the pool");
        }
        Ok(nfound)
    }
}

/// Per-round context shared with the workers.
struct RoundCtx<'a> {
    controller: &'a PricingController,
    registry: &'a SolverRegistry,
    cfg: &'a PricingConfig,
    stats: &'a PricingStats,
    decomp: &'a dyn DecompAccess,
    pricing_objs: &'a [Vec<f64>],
    real_dual_values: &'a [Vec<f64>],
    dualsolconv: &'a [f64],
    kind: PricingKind,
    stabilized: bool,
    at_root: bool,
    deadline: Option<Instant>,
    max_cols: usize,
    stop: AtomicBool,
    error: Mutex<Option<PricingError>>,
}

fn worker_loop(ctx: &RoundCtx<'_>) {
    let nrel = ctx.controller.n_probs();
    loop {
        if ctx.stop.load(AtomicOrdering::Relaxed) {
            break;
        }
        let infeasible = ctx
            .controller
            .counters
            .infeasible
            .load(AtomicOrdering::Relaxed);
        if (ctx
            .controller
            .can_abort_queue(ctx.kind, ctx.cfg, nrel, ctx.at_root)
            || infeasible)
            && !ctx.stabilized
        {
            break;
        }
        let Some(job_id) = ctx.controller.pop_job() else {
            break;
        };
        match process_job(ctx, job_id) {
            Ok(status) => ctx.controller.finish_job(job_id, status, ctx.cfg, ctx.registry),
            Err(err) => {
                let mut slot = ctx.error.lock().expect("worker error lock poisoned");
                if slot.is_none() {
                    *slot = Some(err);
                }
                ctx.stop.store(true, AtomicOrdering::Relaxed);
                ctx.controller
                    .finish_job(job_id, PricingStatus::Unknown, ctx.cfg, ctx.registry);
                break;
            }
        }
    }
}

/// Runs one pricing job: solve (per generic-branching level, if any),
/// compute reduced costs, buffer the columns and update the counters.
fn process_job(ctx: &RoundCtx<'_>, job_id: usize) -> PricingResult<PricingStatus> {
    let (prob_id, solver_id, heuristic, heur_iteration) = {
        let job = ctx.controller.job(job_id);
        (
            job.prob(),
            job.solver(),
            job.is_heuristic(),
            job.n_heur_iters(),
        )
    };
    let (block, branch_levels) = {
        let prob = ctx.controller.prob(prob_id);
        (prob.block(), prob.branch_levels().to_vec())
    };

    let model = ctx.decomp.model(block);
    let objective = &ctx.pricing_objs[block];
    let solver = ctx.registry.solver(solver_id);
    ctx.stats.record_solver_call(heuristic);

    let solve = |bound_changes: &[bap_core::BoundChange]| {
        let req = SolveRequest {
            block,
            model,
            objective,
            bound_changes,
            deadline: ctx.deadline,
            max_cols: ctx.max_cols,
            heur_iteration,
        };
        if heuristic {
            solver.solve_heur(&req)
        } else {
            solver.solve_exact(&req)
        }
    };

    // solve the unrestricted problem first, then walk the
    // generic-branching levels until a column prices out
    let mut outcome = solve(&[])?;
    if !branch_levels.is_empty() && !outcome.cols.is_empty() {
        let priced_out = |cols: &[Col]| {
            cols.first()
                .map(|c| {
                    numerics::is_dualfeas_negative(compute_redcost(
                        c,
                        model,
                        &ctx.real_dual_values[block],
                        &branch_levels,
                        ctx.dualsolconv[block],
                    ))
                })
                .unwrap_or(false)
        };
        if !priced_out(&outcome.cols) {
            for level in &branch_levels {
                let restricted = solve(&level.changes)?;
                if restricted.status != PricingStatus::Optimal {
                    break;
                }
                let found = priced_out(&restricted.cols);
                outcome = restricted;
                if found {
                    break;
                }
            }
            // a level-restricted bound is not a bound of the subproblem
            outcome.lower_bound = -numerics::INFINITY;
        }
    }

    validate_outcome(&outcome)?;

    // reduced costs against the unsmoothed duals
    let mut nimpcols = 0usize;
    let mut cols = outcome.cols;
    for col in &mut cols {
        let rc = compute_redcost(
            col,
            model,
            &ctx.real_dual_values[block],
            &branch_levels,
            ctx.dualsolconv[block],
        );
        col.update_redcost(rc, false);
        if numerics::is_dualfeas_negative(rc) {
            nimpcols += 1;
        }
    }

    let status = outcome.status;
    {
        let mut prob = ctx.controller.prob(prob_id);
        prob.update(status, outcome.lower_bound, cols, nimpcols);
    }
    {
        let mut job = ctx.controller.job(job_id);
        if heuristic {
            job.heur_iter_done();
        }
        job.solver_called();
    }

    let counters = &ctx.controller.counters;
    counters
        .n_solved_probs
        .fetch_add(1, AtomicOrdering::Relaxed);
    if nimpcols > 0 {
        counters
            .n_found_cols
            .fetch_add(nimpcols, AtomicOrdering::Relaxed);
        counters
            .n_successful_probs
            .fetch_add(1, AtomicOrdering::Relaxed);
    }
    if status == PricingStatus::Infeasible {
        counters.infeasible.store(true, AtomicOrdering::Relaxed);
    }

    Ok(status)
}

/// Solver contract checks: a finite world or an error.
fn validate_outcome(outcome: &bap_solver_common::SolverOutcome) -> PricingResult<()> {
    if outcome.lower_bound.is_nan() {
        return Err(PricingError::Unrecoverable(
            "solver returned NaN lower bound".into(),
        ));
    }
    if outcome.status == PricingStatus::Infeasible && !outcome.cols.is_empty() {
        return Err(PricingError::Unrecoverable(
            "solver returned columns for an infeasible subproblem".into(),
        ));
    }
    for col in &outcome.cols {
        if col.entries().iter().any(|&(_, v)| !v.is_finite()) {
            return Err(PricingError::Unrecoverable(
                "solver returned a non-finite column entry".into(),
            ));
        }
    }
    Ok(())
}

fn check_dual(value: f64, what: &str) -> PricingResult<f64> {
    if value.is_nan() || numerics::is_infinite(value) {
        return Err(PricingError::Unrecoverable(format!(
            "non-finite dual for {what}: {value}"
        )));
    }
    Ok(value)
}

/// Reduced cost of a column under the unsmoothed duals: the subproblem
/// objective value, minus the branch duals of every satisfied
/// generic-branching level, minus the convexity dual for points.
pub(crate) fn compute_redcost(
    col: &Col,
    model: &PricingModel,
    real_dual_values: &[f64],
    branch_levels: &[BranchLevel],
    dualsolconv: f64,
) -> f64 {
    let mut objvalue = 0.0;
    for (j, var) in model.vars().iter().enumerate() {
        let raw = col.sol_val(var.orig_index) * var.scalar + var.constant;
        objvalue += raw * real_dual_values[j];
    }

    for level in branch_levels {
        let satisfied = level.changes.iter().all(|ch| {
            let var = model.var(ch.var);
            let raw = col.sol_val(var.orig_index) * var.scalar + var.constant;
            match ch.sense {
                bap_core::BoundSense::Lower => numerics::is_feas_ge(raw, ch.bound),
                bap_core::BoundSense::Upper => numerics::is_feas_le(raw, ch.bound),
            }
        });
        if satisfied {
            objvalue -= level.dual;
        }
    }

    if col.is_ray() {
        objvalue
    } else {
        objvalue - dualsolconv
    }
}

/// Creates the master variable for a column and wires up its coefficients
/// in constraints, cuts and the convexity constraint.
fn add_col_to_master(
    col: &Col,
    master: &mut dyn MasterAccess,
    decomp: &dyn DecompAccess,
    var_seq: &mut usize,
) -> PricingResult<()> {
    let block = col.block();
    let model = decomp.model(block);

    let obj: f64 = model
        .vars()
        .iter()
        .map(|v| (col.sol_val(v.orig_index) * v.scalar + v.constant) * v.obj)
        .sum();

    let name = format!("p_{}_{}", block, *var_seq);
    *var_seq += 1;
    let mv = master.add_priced_var(&name, obj, col.is_ray(), block)?;

    let coefs = col
        .master_coefs()
        .expect("master coefficients must be computed before application");
    for (i, &coef) in coefs.iter().enumerate() {
        if !numerics::is_zero(coef) {
            master.add_linear_coef(i, mv, coef)?;
        }
    }
    for r in 0..master.n_master_cuts() {
        let coef = cut_coef(col, master.master_cut(r), decomp);
        if !numerics::is_zero(coef) {
            master.add_row_coef(r, mv, coef)?;
        }
    }
    if !col.is_ray() {
        master.add_var_to_conv_cons(block, mv)?;
    }
    Ok(())
}

/// Whether the current node sits beneath a generic-branching decision.
fn under_generic_branching(branching: &dyn BranchingAccess) -> bool {
    let mut cons = branching.active_cons();
    while let Some(c) = cons {
        if branching.is_generic_branching(c) {
            return true;
        }
        cons = branching.parent(c);
    }
    false
}

fn job_deadline(job_time_limit: f64, remaining: Option<Duration>) -> Option<Instant> {
    let job_budget = if job_time_limit >= 1e19 {
        None
    } else {
        Some(Duration::from_secs_f64(job_time_limit.max(0.0)))
    };
    match (job_budget, remaining) {
        (None, None) => None,
        (Some(j), None) => Some(Instant::now() + j),
        (None, Some(r)) => Some(Instant::now() + r),
        (Some(j), Some(r)) => Some(Instant::now() + j.min(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bap_core::{BoundChange, BoundSense};

    fn model_with_duals() -> (PricingModel, Vec<f64>) {
        let mut model = PricingModel::new("b0");
        model.add_var("x0", 1.0, 0.0, 2.0, true);
        model.add_var("x1", 3.0, 0.0, 1.0, true);
        (model, vec![-0.5, 2.0])
    }

    #[test]
    fn redcost_subtracts_convexity_dual_for_points() {
        let (model, duals) = model_with_duals();
        let col = Col::new(0, vec![(0, 2.0), (1, 1.0)], false, 0.0);
        // 2 * -0.5 + 1 * 2.0 = 1.0, minus convexity dual 0.25
        let rc = compute_redcost(&col, &model, &duals, &[], 0.25);
        assert!((rc - 0.75).abs() < 1e-12);

        let ray = Col::new(0, vec![(0, 2.0), (1, 1.0)], true, 0.0);
        let rc_ray = compute_redcost(&ray, &model, &duals, &[], 0.25);
        assert!((rc_ray - 1.0).abs() < 1e-12);
    }

    #[test]
    fn redcost_subtracts_satisfied_branch_duals_only() {
        let (model, duals) = model_with_duals();
        let levels = vec![
            BranchLevel {
                dual: 0.5,
                changes: vec![BoundChange { var: 0, sense: BoundSense::Lower, bound: 1.0 }],
            },
            BranchLevel {
                dual: -2.0,
                changes: vec![BoundChange { var: 1, sense: BoundSense::Upper, bound: 0.0 }],
            },
        ];
        // satisfies the first level (x0 = 2 >= 1) but not the second
        let col = Col::new(0, vec![(0, 2.0), (1, 1.0)], false, 0.0);
        let rc = compute_redcost(&col, &model, &duals, &levels, 0.0);
        assert!((rc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn redcost_is_deterministic() {
        let (model, duals) = model_with_duals();
        let col = Col::new(0, vec![(0, 1.0), (1, 1.0)], false, 0.0);
        let a = compute_redcost(&col, &model, &duals, &[], 0.125);
        let b = compute_redcost(&col, &model, &duals, &[], 0.125);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn deadline_takes_the_tighter_budget() {
        assert!(job_deadline(f64::MAX, None).is_none());

        let tight = job_deadline(3600.0, Some(Duration::from_secs(1))).unwrap();
        assert!(tight <= Instant::now() + Duration::from_secs(2));

        let capped = job_deadline(1.0, Some(Duration::from_secs(3600))).unwrap();
        assert!(capped <= Instant::now() + Duration::from_secs(2));
    }
}
