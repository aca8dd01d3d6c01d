//! Pricing controller: owns the pricing problems and jobs, schedules jobs
//! across chunks, escalates heuristic jobs to exact ones and aggregates the
//! round's results into the joint Lagrangian bound.
//!
//! Cyclic references of the original design (job ↔ prob ↔ solver) are
//! arenas here: jobs and probs live in indexed vectors, queue entries are
//! snapshots carrying a [`JobId`]. Workers interact with the controller
//! through [`pop_job`](PricingController::pop_job) /
//! [`finish_job`](PricingController::finish_job); everything else runs on
//! the coordinating thread between rounds.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use bap_core::{numerics, BoundChange, BranchingAccess, Col, DecompAccess, MasterAccess};
use bap_solver_common::{PricingStatus, SolverId, SolverRegistry};
use tracing::debug;

use crate::config::PricingConfig;
use crate::pqueue::{Compare, PriorityQueue};
use crate::pricingjob::{JobId, PricingJob};
use crate::pricingprob::{BranchLevel, PricingProb, ProbId};
use crate::pricingtype::PricingKind;

/// Snapshot of the ordering-relevant job state, taken at (re)insertion.
#[derive(Debug, Clone, Copy)]
struct JobEntry {
    job: JobId,
    prob: ProbId,
    solver_priority: i32,
    heuristic: bool,
    nsolves: usize,
    score: f64,
    seq: usize,
}

/// Job ordering: same prob decides by solver priority; otherwise
/// heuristic before exact, then fewer solves, then higher score, then
/// insertion order.
fn cmp_jobs(a: &JobEntry, b: &JobEntry) -> Ordering {
    if a.prob == b.prob {
        return b.solver_priority.cmp(&a.solver_priority);
    }
    if a.heuristic != b.heuristic {
        return b.heuristic.cmp(&a.heuristic);
    }
    match a.nsolves.cmp(&b.nsolves) {
        Ordering::Equal => {}
        other => return other,
    }
    match b.score.partial_cmp(&a.score) {
        Some(Ordering::Equal) | None => {}
        Some(other) => return other,
    }
    a.seq.cmp(&b.seq)
}

#[derive(Debug)]
struct RoundQueue {
    heap: PriorityQueue<JobEntry>,
    /// Per prob: a worker currently runs one of its jobs.
    in_flight: Vec<bool>,
    /// Per prob: the prob is done for this round.
    done: Vec<bool>,
    /// Entries popped while their prob was in flight; they return to the
    /// heap when the prob's job finishes.
    deferred: Vec<JobEntry>,
    seq: usize,
}

/// Shared counters of one pricing pass, updated by workers.
#[derive(Debug, Default)]
pub struct RoundCounters {
    pub n_found_cols: AtomicUsize,
    pub n_solved_probs: AtomicUsize,
    pub n_successful_probs: AtomicUsize,
    pub infeasible: AtomicBool,
}

impl RoundCounters {
    fn reset(&self) {
        self.n_found_cols.store(0, AtomicOrdering::Relaxed);
        self.n_solved_probs.store(0, AtomicOrdering::Relaxed);
        self.n_successful_probs.store(0, AtomicOrdering::Relaxed);
        self.infeasible.store(false, AtomicOrdering::Relaxed);
    }
}

/// Aggregated results of one queue drain (see `collect_results`).
#[derive(Debug)]
pub struct CollectedResults {
    pub infeasible: bool,
    pub optimal: bool,
    /// Per-block contribution `n_b * lb_b` to the stabilized objective.
    pub best_obj_vals: Vec<f64>,
    /// Sum of the per-block contributions.
    pub best_stab_obj: f64,
    /// Sum of best reduced costs weighted by identical-block counts.
    pub best_redcost: f64,
    pub found_cols: bool,
    /// Some prob ended the round with no status at all.
    pub any_unknown: bool,
}

pub struct PricingController {
    probs: Vec<Mutex<PricingProb>>,
    jobs: Vec<Mutex<PricingJob>>,
    queue: Mutex<RoundQueue>,
    pub counters: RoundCounters,
    /// Points/rays generated per prob so far, for `Generation` scoring.
    npoints: Vec<usize>,
    nrays: Vec<usize>,
    nchunks: usize,
    cur_chunk: usize,
    start_chunk: usize,
    eager_age: u32,
}

impl PricingController {
    pub fn new(decomp: &dyn DecompAccess, registry: &SolverRegistry, cfg: &PricingConfig) -> Self {
        let relevant: Vec<usize> = (0..decomp.n_blocks())
            .filter(|&b| decomp.is_relevant(b))
            .collect();
        let nrel = relevant.len();
        let chunk_size = cfg.chunk_size.min(nrel).max(1);
        let nchunks = nrel.div_ceil(chunk_size).max(1);

        let mut probs = Vec::with_capacity(nrel);
        let mut jobs = Vec::new();
        for (pos, &block) in relevant.iter().enumerate() {
            probs.push(Mutex::new(PricingProb::new(block, cfg.nrounds_col)));
            for solver in registry.enabled_ids() {
                jobs.push(Mutex::new(PricingJob::new(pos, solver, pos / chunk_size)));
            }
        }

        debug!(nprobs = nrel, njobs = jobs.len(), nchunks, "pricing controller created");

        PricingController {
            queue: Mutex::new(RoundQueue {
                heap: PriorityQueue::new(cmp_jobs as Compare<JobEntry>),
                in_flight: vec![false; probs.len()],
                done: vec![false; probs.len()],
                deferred: Vec::new(),
                seq: 0,
            }),
            probs,
            jobs,
            counters: RoundCounters::default(),
            npoints: vec![0; nrel],
            nrays: vec![0; nrel],
            nchunks,
            cur_chunk: nchunks - 1,
            start_chunk: nchunks - 1,
            eager_age: 0,
        }
    }

    pub fn n_probs(&self) -> usize {
        self.probs.len()
    }

    pub fn prob(&self, i: ProbId) -> std::sync::MutexGuard<'_, PricingProb> {
        self.probs[i].lock().expect("pricing prob lock poisoned")
    }

    pub fn prob_mut(&mut self, i: ProbId) -> &mut PricingProb {
        self.probs[i].get_mut().expect("pricing prob lock poisoned")
    }

    pub fn job(&self, i: JobId) -> std::sync::MutexGuard<'_, PricingJob> {
        self.jobs[i].lock().expect("pricing job lock poisoned")
    }

    pub fn record_generated(&mut self, prob: ProbId, points: usize, rays: usize) {
        self.npoints[prob] += points;
        self.nrays[prob] += rays;
    }

    /// Called at the beginning of a pricing call: rotates the chunk,
    /// resets the per-prob round state and rebuilds the generic-branching
    /// stacks of the current node.
    pub fn init_pricing(
        &mut self,
        branching: &dyn BranchingAccess,
        decomp: &dyn DecompAccess,
    ) {
        self.cur_chunk = (self.cur_chunk + 1) % self.nchunks;
        self.start_chunk = self.cur_chunk;
        debug!(chunk = self.cur_chunk + 1, nchunks = self.nchunks, "initialize pricing");

        let stacks = build_branch_stacks(branching, decomp, &self.block_map());
        for (i, prob) in self.probs.iter_mut().enumerate() {
            let prob = prob.get_mut().expect("pricing prob lock poisoned");
            prob.reset();
            prob.set_branch_levels(stacks[i].clone());
        }
        self.counters.reset();
    }

    fn block_map(&self) -> Vec<usize> {
        self.probs
            .iter()
            .map(|p| p.lock().expect("pricing prob lock poisoned").block())
            .collect()
    }

    /// Called when the pricing call is finished: rolls the per-prob
    /// improving-column windows.
    pub fn exit_pricing(&mut self) {
        for prob in &mut self.probs {
            prob.get_mut()
                .expect("pricing prob lock poisoned")
                .finish_round();
        }
    }

    /// Resets per-prob solve state for another stabilization iteration
    /// within the same pricing call.
    pub fn reset_iteration(&mut self) {
        for prob in &mut self.probs {
            let prob = prob.get_mut().expect("pricing prob lock poisoned");
            prob.reset();
        }
        self.counters.reset();
    }

    /// Fills the priority queue with the current chunk's jobs, scoring
    /// them against the convexity duals.
    pub fn setup_priority_queue(
        &mut self,
        cfg: &PricingConfig,
        registry: &SolverRegistry,
        dualsolconv: &[f64],
    ) {
        let mut queue = self.queue.lock().expect("pricing queue lock poisoned");
        queue.heap.clear();
        queue.deferred.clear();
        queue.in_flight.iter_mut().for_each(|f| *f = false);
        queue.done.iter_mut().for_each(|f| *f = false);

        for (id, job) in self.jobs.iter().enumerate() {
            let job = &mut *job.lock().expect("pricing job lock poisoned");
            let prob = self.probs[job.prob()]
                .lock()
                .expect("pricing prob lock poisoned");
            let block = prob.block();
            job.setup(
                cfg.use_heur_pricing
                    && cfg.heur_pricing_iters > 0
                    && registry.solver(job.base_solver()).heur_enabled(),
                cfg.sorting,
                block,
                dualsolconv.get(block).copied().unwrap_or(0.0),
                self.npoints[job.prob()],
                self.nrays[job.prob()],
                prob.n_cols_last_rounds(cfg.nrounds_col),
            );

            if job.chunk() == self.cur_chunk {
                let entry = JobEntry {
                    job: id,
                    prob: job.prob(),
                    solver_priority: registry.solver(job.solver()).priority(),
                    heuristic: job.is_heuristic(),
                    nsolves: prob.n_solves(),
                    score: job.score(),
                    seq: queue.seq,
                };
                queue.seq += 1;
                queue.heap.insert(entry);
            }
        }
    }

    /// Pops the next job whose prob still needs work. Marks the prob as in
    /// flight; the worker must call [`finish_job`](Self::finish_job).
    pub fn pop_job(&self) -> Option<JobId> {
        let mut queue = self.queue.lock().expect("pricing queue lock poisoned");
        while let Some(entry) = queue.heap.pop() {
            if queue.done[entry.prob] {
                continue;
            }
            if queue.in_flight[entry.prob] {
                queue.deferred.push(entry);
                continue;
            }
            queue.in_flight[entry.prob] = true;
            return Some(entry.job);
        }
        None
    }

    /// Releases the prob of a finished job, decides whether the job must
    /// be treated again (raised limit or promotion to exact) and brings
    /// deferred same-prob entries back.
    pub fn finish_job(
        &self,
        job_id: JobId,
        status: PricingStatus,
        cfg: &PricingConfig,
        registry: &SolverRegistry,
    ) {
        let (prob_id, prob_done, nsolves) = {
            let job = self.jobs[job_id].lock().expect("pricing job lock poisoned");
            let prob = self.probs[job.prob()]
                .lock()
                .expect("pricing prob lock poisoned");
            (job.prob(), prob.is_done(), prob.n_solves())
        };

        let mut queue = self.queue.lock().expect("pricing queue lock poisoned");
        queue.done[prob_id] = prob_done;
        queue.in_flight[prob_id] = false;

        // resurrect deferred entries of this prob
        let mut i = 0;
        while i < queue.deferred.len() {
            if queue.deferred[i].prob == prob_id {
                let entry = queue.deferred.swap_remove(i);
                if !prob_done {
                    queue.heap.insert(entry);
                }
            } else {
                i += 1;
            }
        }

        if prob_done {
            return;
        }

        // escalation: an unsuccessful heuristic job is requeued, either
        // with a raised limit or promoted to exact
        let mut job = self.jobs[job_id].lock().expect("pricing job lock poisoned");
        if job.is_heuristic() {
            if !status.is_limit() || job.n_heur_iters() >= cfg.heur_pricing_iters {
                if !registry.solver(job.solver()).exact_enabled() {
                    // the solver cannot price exactly; fall through to the
                    // next backend in priority order, if any
                    let next = registry
                        .enabled_ids()
                        .into_iter()
                        .find(|&id| id > job.solver() && registry.solver(id).exact_enabled());
                    match next {
                        Some(id) => job.set_solver(id),
                        None => return,
                    }
                }
                job.set_exact();
                debug!(job = job_id, prob = prob_id, "promoting job to exact");
            } else {
                debug!(job = job_id, prob = prob_id, "requeueing with raised limit");
            }
            let entry = JobEntry {
                job: job_id,
                prob: prob_id,
                solver_priority: registry.solver(job.solver()).priority(),
                heuristic: job.is_heuristic(),
                nsolves,
                score: job.score(),
                seq: queue.seq,
            };
            queue.seq += 1;
            queue.heap.insert(entry);
        }
    }

    /// Rotates to the next chunk; false when all chunks were visited.
    pub fn check_next_chunk(&mut self) -> bool {
        let next = (self.cur_chunk + 1) % self.nchunks;
        if next == self.start_chunk {
            false
        } else {
            debug!(chunk = next + 1, nchunks = self.nchunks, "moving to next chunk");
            self.cur_chunk = next;
            true
        }
    }

    /// Whether this call must solve every prob regardless of abort rules.
    pub fn is_eager_sweep(&self, cfg: &PricingConfig) -> bool {
        cfg.eager_freq > 0 && self.eager_age == cfg.eager_freq
    }

    pub fn increase_eager_age(&mut self, cfg: &PricingConfig) {
        if cfg.eager_freq > 0 {
            self.eager_age += 1;
        }
    }

    pub fn reset_eager_age(&mut self) {
        self.eager_age = 0;
    }

    /// Early-abort test used by workers between jobs.
    pub fn can_abort_queue(
        &self,
        kind: PricingKind,
        cfg: &PricingConfig,
        n_rel_probs: usize,
        at_root: bool,
    ) -> bool {
        if self.is_eager_sweep(cfg) {
            return false;
        }
        kind.can_abort(
            cfg,
            self.counters.n_found_cols.load(AtomicOrdering::Relaxed),
            self.counters
                .n_successful_probs
                .load(AtomicOrdering::Relaxed),
            n_rel_probs,
            at_root,
        )
    }

    /// Aggregates per-prob outcomes into infeasibility/optimality flags,
    /// the stabilized objective contribution and the best reduced cost.
    pub fn collect_results(
        &mut self,
        decomp: &dyn DecompAccess,
        kind: PricingKind,
    ) -> CollectedResults {
        let nblocks = decomp.n_blocks();
        let mut res = CollectedResults {
            infeasible: kind.is_farkas(),
            optimal: true,
            best_obj_vals: vec![-numerics::INFINITY; nblocks],
            best_stab_obj: 0.0,
            best_redcost: 0.0,
            found_cols: false,
            any_unknown: false,
        };

        for prob in &mut self.probs {
            let prob = prob.get_mut().expect("pricing prob lock poisoned");
            let block = prob.block();
            let nident = decomp.n_identical(block) as f64;
            let lowerbound = prob.lowerbound();

            if prob.status() == PricingStatus::Infeasible {
                res.infeasible = true;
            }
            if kind.is_farkas()
                && (prob.status() != PricingStatus::Optimal || prob.n_imp_cols() > 0)
            {
                res.infeasible = false;
            }

            res.optimal &= prob.status() == PricingStatus::Optimal;
            res.any_unknown |= prob.status() == PricingStatus::Unknown && prob.n_imp_cols() == 0;
            if prob.n_imp_cols() > 0 {
                res.found_cols = true;
            }

            if prob.n_cols() > 0 {
                res.best_obj_vals[block] = if numerics::is_infinite(lowerbound) {
                    lowerbound
                } else {
                    nident * lowerbound
                };
            }
            if numerics::is_infinite(-lowerbound) {
                res.best_stab_obj = -numerics::INFINITY;
            } else if !numerics::is_infinite(-res.best_stab_obj) {
                res.best_stab_obj += res.best_obj_vals[block];
            }

            res.best_redcost += nident * prob.best_redcost();
        }

        res
    }

    /// Sum of convexity duals over probs whose best column is a point.
    pub fn dualconv_sum(
        &mut self,
        master: &dyn MasterAccess,
        decomp: &dyn DecompAccess,
        kind: PricingKind,
        stabilized_conv: impl Fn(usize, f64) -> f64,
    ) -> f64 {
        let mut sum = 0.0;
        for prob in &mut self.probs {
            let prob = prob.get_mut().expect("pricing prob lock poisoned");
            let block = prob.block();
            let is_ray = prob.best_col().map(Col::is_ray).unwrap_or(false);
            if !(prob.n_cols() > 0 && is_ray) {
                let raw = kind.conv_dual(master, block);
                sum += decomp.n_identical(block) as f64 * stabilized_conv(block, raw);
            }
        }
        sum
    }

    /// Best column of every block, cloned for the subgradient computation.
    pub fn best_cols(&mut self, nblocks: usize) -> Vec<Option<Col>> {
        let mut best = vec![None; nblocks];
        for prob in &mut self.probs {
            let prob = prob.get_mut().expect("pricing prob lock poisoned");
            best[prob.block()] = prob.best_col().cloned();
        }
        best
    }
}

/// Walks the masterbranch stack and maps each generic-branching
/// constraint's bound sequence into block-local changes, root-most level
/// first, one stack per pricing prob.
fn build_branch_stacks(
    branching: &dyn BranchingAccess,
    decomp: &dyn DecompAccess,
    prob_blocks: &[usize],
) -> Vec<Vec<BranchLevel>> {
    let mut stacks: Vec<Vec<BranchLevel>> = vec![Vec::new(); prob_blocks.len()];

    let mut cons = branching.active_cons();
    while let Some(c) = cons {
        if branching.is_generic_branching(c) {
            let block = branching.branch_block(c);
            if let Some(pos) = prob_blocks.iter().position(|&b| b == block) {
                let changes: Vec<BoundChange> = branching
                    .bound_changes(c)
                    .into_iter()
                    .filter_map(|ch| {
                        decomp.pricing_var(ch.orig_var, block).map(|pv| BoundChange {
                            var: pv,
                            sense: ch.sense,
                            bound: ch.bound,
                        })
                    })
                    .collect();
                stacks[pos].push(BranchLevel {
                    dual: branching.branch_dual(c),
                    changes,
                });
            }
        }
        cons = branching.parent(c);
    }

    // deepest constraints were collected first; store root-most first
    for stack in &mut stacks {
        stack.reverse();
    }
    stacks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(job: JobId, prob: ProbId, heuristic: bool, nsolves: usize, score: f64) -> JobEntry {
        JobEntry {
            job,
            prob,
            solver_priority: 0,
            heuristic,
            nsolves,
            score,
            seq: job,
        }
    }

    #[test]
    fn heuristic_jobs_come_first() {
        let a = entry(0, 0, false, 0, 10.0);
        let b = entry(1, 1, true, 0, -10.0);
        assert_eq!(cmp_jobs(&b, &a), Ordering::Less);
        assert_eq!(cmp_jobs(&a, &b), Ordering::Greater);
    }

    #[test]
    fn fewer_solves_win_then_score() {
        let a = entry(0, 0, false, 1, 100.0);
        let b = entry(1, 1, false, 0, 0.0);
        assert_eq!(cmp_jobs(&b, &a), Ordering::Less);

        let c = entry(2, 2, false, 0, 5.0);
        assert_eq!(cmp_jobs(&c, &b), Ordering::Less);
    }

    #[test]
    fn same_prob_orders_by_solver_priority() {
        let mut a = entry(0, 0, true, 0, 0.0);
        let mut b = entry(1, 0, false, 3, -5.0);
        a.solver_priority = 10;
        b.solver_priority = 90;
        assert_eq!(cmp_jobs(&b, &a), Ordering::Less);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let a = entry(0, 0, false, 0, 1.0);
        let b = entry(1, 1, false, 0, 1.0);
        assert_eq!(cmp_jobs(&a, &b), Ordering::Less);
    }

    mod scheduling {
        use super::super::*;
        use crate::test_utils::MockDecomp;
        use bap_core::{PricingModel, PricingResult};
        use bap_solver_common::{PricingSolver, SolveRequest, SolverOutcome};

        struct NoopSolver;

        impl PricingSolver for NoopSolver {
            fn name(&self) -> &'static str {
                "noop"
            }

            fn priority(&self) -> i32 {
                0
            }

            fn solve_exact(&self, _req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
                Ok(SolverOutcome::nothing(PricingStatus::Optimal))
            }

            fn solve_heur(&self, _req: &SolveRequest<'_>) -> PricingResult<SolverOutcome> {
                Ok(SolverOutcome::nothing(PricingStatus::Unknown))
            }
        }

        fn fixture(nblocks: usize, chunk_size: usize) -> (PricingController, SolverRegistry, PricingConfig) {
            let mut decomp = MockDecomp::new();
            for b in 0..nblocks {
                let mut model = PricingModel::new(format!("b{b}"));
                model.add_var("x", 0.0, 0.0, 1.0, true);
                decomp.add_block(model, true, 1);
                decomp.map_var(b, b, 0);
            }
            let mut registry = SolverRegistry::new();
            registry.register(Box::new(NoopSolver));
            let mut cfg = PricingConfig::default();
            cfg.chunk_size = chunk_size;
            let controller = PricingController::new(&decomp, &registry, &cfg);
            (controller, registry, cfg)
        }

        #[test]
        fn pop_marks_prob_in_flight() {
            let (mut controller, registry, cfg) = fixture(2, usize::MAX);
            controller.setup_priority_queue(&cfg, &registry, &[0.0, 0.0]);

            let first = controller.pop_job().unwrap();
            let second = controller.pop_job().unwrap();
            assert_ne!(
                controller.job(first).prob(),
                controller.job(second).prob(),
                "one job per prob while in flight"
            );
            assert!(controller.pop_job().is_none());

            controller.finish_job(first, PricingStatus::Optimal, &cfg, &registry);
            controller.finish_job(second, PricingStatus::Optimal, &cfg, &registry);
            assert!(controller.pop_job().is_none(), "queue drained");
        }

        #[test]
        fn chunks_rotate_and_wrap() {
            let (mut controller, registry, cfg) = fixture(3, 1);
            let mut decomp = MockDecomp::new();
            for b in 0..3 {
                let mut model = PricingModel::new(format!("b{b}"));
                model.add_var("x", 0.0, 0.0, 1.0, true);
                decomp.add_block(model, true, 1);
                decomp.map_var(b, b, 0);
            }
            let branching = crate::test_utils::MockBranching::root();
            controller.init_pricing(&branching, &decomp);

            controller.setup_priority_queue(&cfg, &registry, &[0.0; 3]);
            let job = controller.pop_job().unwrap();
            let first_chunk_prob = controller.job(job).prob();
            controller.finish_job(job, PricingStatus::Optimal, &cfg, &registry);
            assert!(controller.pop_job().is_none(), "chunk holds one prob");

            // two rotations still return true, the third wraps
            assert!(controller.check_next_chunk());
            controller.setup_priority_queue(&cfg, &registry, &[0.0; 3]);
            let job = controller.pop_job().unwrap();
            assert_ne!(controller.job(job).prob(), first_chunk_prob);
            controller.finish_job(job, PricingStatus::Optimal, &cfg, &registry);
            assert!(controller.check_next_chunk());
            assert!(!controller.check_next_chunk(), "back at the start chunk");
        }

        #[test]
        fn eager_sweep_suppresses_abort() {
            let (mut controller, _registry, mut cfg) = fixture(1, usize::MAX);
            cfg.eager_freq = 2;
            cfg.max_cols_round_redcost = 0;
            cfg.max_cols_round_root = 0;
            cfg.rel_max_successful_probs = 0.0;

            // the abort condition trivially holds (cap 0)
            assert!(controller.can_abort_queue(PricingKind::Redcost, &cfg, 1, false));

            controller.increase_eager_age(&cfg);
            controller.increase_eager_age(&cfg);
            assert!(controller.is_eager_sweep(&cfg));
            assert!(
                !controller.can_abort_queue(PricingKind::Redcost, &cfg, 1, false),
                "eager sweep forces a full pass"
            );

            controller.reset_eager_age();
            assert!(!controller.is_eager_sweep(&cfg));
        }
    }
}
