//! Price store: per-round staging area for candidate columns.
//!
//! Candidates produced by the pricing jobs land here, one array set per
//! block, before the best of them enter the master. The store
//!
//! - deduplicates structurally equal columns through a hash table,
//! - keeps *forced* columns in a prefix of each block array (score +inf),
//! - scores the rest by efficacy, objective parallelism and mutual
//!   orthogonality, and
//! - filters columns that become too parallel to an applied one.
//!
//! Ownership is strict: a column lives in exactly one container. Applying
//! moves it to the master (and drops it here), rejecting moves it to the
//! column pool or drops it.

use std::collections::HashMap;

use bap_core::{numerics, Col, ColKey, PricingError, PricingResult};
use tracing::{debug, trace};

use crate::colpool::ColPool;
use crate::config::{Efficacy, PriceStoreConfig};

#[derive(Debug, Default)]
struct BlockStore {
    cols: Vec<Col>,
    objpar: Vec<f64>,
    ortho: Vec<f64>,
    score: Vec<f64>,
    nforced: usize,
}

#[derive(Debug)]
pub struct PriceStore {
    blocks: Vec<BlockStore>,
    hash: HashMap<ColKey, (usize, usize)>,
    cfg: PriceStoreConfig,
    /// Dual objective vector over master constraints, refreshed per round.
    dual_obj: Vec<f64>,
    in_farkas: bool,
    force_cols: bool,
    ncols_total: usize,
    ncols_found: usize,
    ncols_found_round: usize,
    ncols_applied: usize,
}

impl PriceStore {
    pub fn new(nblocks: usize, cfg: PriceStoreConfig) -> Self {
        PriceStore {
            blocks: (0..nblocks).map(|_| BlockStore::default()).collect(),
            hash: HashMap::new(),
            cfg,
            dual_obj: Vec::new(),
            in_farkas: false,
            force_cols: false,
            ncols_total: 0,
            ncols_found: 0,
            ncols_found_round: 0,
            ncols_applied: 0,
        }
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn n_cols(&self, b: usize) -> usize {
        self.blocks[b].cols.len()
    }

    pub fn n_forced(&self, b: usize) -> usize {
        self.blocks[b].nforced
    }

    pub fn n_cols_total(&self) -> usize {
        self.ncols_total
    }

    pub fn n_cols_found(&self) -> usize {
        self.ncols_found
    }

    pub fn n_cols_found_round(&self) -> usize {
        self.ncols_found_round
    }

    pub fn n_cols_applied(&self) -> usize {
        self.ncols_applied
    }

    pub fn cols(&self, b: usize) -> &[Col] {
        &self.blocks[b].cols
    }

    /// Sets the dual objective used for objective-parallelism scores.
    pub fn set_dual_objective(&mut self, dual_obj: Vec<f64>) {
        self.dual_obj = dual_obj;
    }

    pub fn start_farkas(&mut self) {
        debug_assert_eq!(self.ncols_total, 0);
        self.in_farkas = true;
    }

    pub fn end_farkas(&mut self) {
        debug_assert_eq!(self.ncols_total, 0);
        self.in_farkas = false;
    }

    pub fn start_force_cols(&mut self) {
        debug_assert!(!self.force_cols);
        self.force_cols = true;
    }

    pub fn end_force_cols(&mut self) {
        debug_assert!(self.force_cols);
        self.force_cols = false;
    }

    fn efficacy(&self, col: &Col) -> PricingResult<f64> {
        match self.cfg.efficacy {
            Efficacy::Dantzig => Ok(-col.redcost()),
            Efficacy::SteepestEdge => Ok(-col.redcost() / col.norm().max(numerics::EPS)),
            Efficacy::Lambda => Err(PricingError::InvalidConfiguration(
                "lambda efficacy is not implemented".into(),
            )),
        }
    }

    fn score_of(&self, b: usize, pos: usize, ortho: f64) -> PricingResult<f64> {
        let store = &self.blocks[b];
        let eff = self.efficacy(&store.cols[pos])?;
        Ok(self.cfg.efficacy_fac * eff
            + self.cfg.objpar_fac * store.objpar[pos]
            + self.cfg.ortho_fac * ortho)
    }

    /// Re-registers the column at `(b, pos)` in the hash table after moves.
    fn rehash(&mut self, b: usize, pos: usize) {
        let key = self.blocks[b].cols[pos].key();
        self.blocks[b].cols[pos].set_pos(Some(pos));
        self.hash.insert(key, (b, pos));
    }

    /// Stages a candidate column. Returns whether the store kept it; a
    /// duplicate of a stored column is dropped unless it upgrades the
    /// stored one to forced.
    pub fn add_col(&mut self, mut col: Col, force: bool) -> bool {
        let force = force || self.force_cols;
        let b = col.block();
        debug_assert!(b < self.blocks.len());
        debug_assert!(col.has_master_coefs());

        let (score, objpar) = if force {
            (numerics::INFINITY, 1.0)
        } else {
            let objpar = if numerics::is_positive(self.cfg.objpar_fac) {
                col.obj_parallelism(&self.dual_obj)
            } else {
                0.0
            };
            // score stays invalid until apply_cols initializes it
            (f64::NAN, objpar)
        };

        match self.hash.get(&col.key()).copied() {
            None => {
                let end = self.blocks[b].cols.len();
                col.set_pos(Some(end));
                let store = &mut self.blocks[b];
                store.cols.push(col);
                store.objpar.push(objpar);
                store.ortho.push(1.0);
                store.score.push(score);
                self.rehash(b, end);
                if force {
                    let fp = self.blocks[b].nforced;
                    if fp != end {
                        let store = &mut self.blocks[b];
                        store.cols.swap(fp, end);
                        store.objpar.swap(fp, end);
                        store.ortho.swap(fp, end);
                        store.score.swap(fp, end);
                        self.rehash(b, fp);
                        self.rehash(b, end);
                    }
                    self.blocks[b].nforced += 1;
                }
                self.ncols_total += 1;
                self.ncols_found += 1;
                self.ncols_found_round += 1;
                trace!(block = b, total = self.ncols_total, force, "staged column");
                true
            }
            Some((ob, opos)) if force && opos >= self.blocks[ob].nforced => {
                debug_assert_eq!(ob, b);
                // upgrade: replace the non-forced duplicate and pull it
                // into the forced prefix
                let fp = self.blocks[b].nforced;
                if opos != fp {
                    let store = &mut self.blocks[b];
                    store.cols.swap(opos, fp);
                    store.objpar.swap(opos, fp);
                    store.ortho.swap(opos, fp);
                    store.score.swap(opos, fp);
                    self.rehash(b, opos);
                }
                col.set_pos(Some(fp));
                let store = &mut self.blocks[b];
                store.cols[fp] = col;
                store.objpar[fp] = 1.0;
                store.ortho[fp] = 1.0;
                store.score[fp] = numerics::INFINITY;
                store.nforced += 1;
                self.rehash(b, fp);
                true
            }
            Some(_) => false,
        }
    }

    /// Removes the column at `(b, pos)` and returns it; the last column of
    /// the block backfills the hole.
    fn del_col(&mut self, b: usize, pos: usize) -> Col {
        debug_assert!(pos >= self.blocks[b].nforced);
        let key = self.blocks[b].cols[pos].key();
        self.hash.remove(&key);

        let store = &mut self.blocks[b];
        let last = store.cols.len() - 1;
        store.cols.swap(pos, last);
        store.objpar.swap(pos, last);
        store.ortho.swap(pos, last);
        store.score.swap(pos, last);
        let mut col = store.cols.pop().expect("block store empty");
        store.objpar.pop();
        store.ortho.pop();
        store.score.pop();
        col.set_pos(None);

        if pos < self.blocks[b].cols.len() {
            self.rehash(b, pos);
        }
        self.ncols_total -= 1;
        col
    }

    /// After `applied` entered the master, degrade or drop columns that
    /// became too parallel to it.
    fn update_orthogonalities(&mut self, applied: &Col, min_ortho: f64) -> PricingResult<()> {
        for b in 0..self.blocks.len() {
            let mut pos = self.blocks[b].nforced;
            while pos < self.blocks[b].cols.len() {
                let this_ortho = applied.orthogonality(&self.blocks[b].cols[pos]);
                if this_ortho < self.blocks[b].ortho[pos] {
                    if this_ortho < min_ortho {
                        trace!(block = b, pos, ortho = this_ortho, "dropping parallel column");
                        let _ = self.del_col(b, pos);
                        continue;
                    }
                    self.blocks[b].ortho[pos] = this_ortho;
                    self.blocks[b].score[pos] = self.score_of(b, pos, this_ortho)?;
                }
                pos += 1;
            }
        }
        Ok(())
    }

    /// Best non-forced column among blocks that still accept columns.
    fn best_col(&self, applied_per_block: &[usize], max_cols_prob: usize) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for b in 0..self.blocks.len() {
            if applied_per_block[b] >= max_cols_prob {
                continue;
            }
            let store = &self.blocks[b];
            for pos in store.nforced..store.cols.len() {
                let score = store.score[pos];
                debug_assert!(!score.is_nan());
                if best.map_or(true, |(_, _, s)| score > s) {
                    best = Some((b, pos, score));
                }
            }
        }
        best.map(|(b, pos, _)| (b, pos))
    }

    /// Any remaining non-forced column, used to drain the store once the
    /// global cap is reached.
    fn any_col(&self) -> Option<(usize, usize)> {
        (0..self.blocks.len())
            .find(|&b| self.blocks[b].nforced < self.blocks[b].cols.len())
            .map(|b| (b, self.blocks[b].nforced))
    }

    /// Applies the staged columns to the master through `apply`, recycling
    /// or dropping the rest, and clears the store. Returns the number of
    /// columns handed to the master.
    ///
    /// `apply(col, force)` must create the master variable and report
    /// whether it was added.
    pub fn apply_cols(
        &mut self,
        colpool: &mut ColPool,
        use_colpool: bool,
        max_cols_round: usize,
        max_cols_prob: usize,
        apply: &mut dyn FnMut(&Col, bool) -> PricingResult<bool>,
    ) -> PricingResult<usize> {
        let nblocks = self.blocks.len();
        let min_ortho = self.cfg.min_ortho.max(numerics::EPS);
        let update_orthos =
            numerics::is_gt(min_ortho, numerics::EPS) || numerics::is_positive(self.cfg.ortho_fac);

        debug!(total = self.ncols_total, "applying staged columns");

        let mut napplied = 0usize;
        let mut napplied_per_block = vec![0usize; nblocks];

        // initialize scores and orthogonalities of the non-forced columns
        // against the current dual solution
        for b in 0..nblocks {
            for pos in self.blocks[b].nforced..self.blocks[b].cols.len() {
                self.blocks[b].ortho[pos] = 1.0;
                self.blocks[b].score[pos] = self.score_of(b, pos, 1.0)?;
            }
        }

        // forced columns go in unconditionally
        for b in 0..nblocks {
            for pos in 0..self.blocks[b].nforced {
                debug_assert!(numerics::is_infinite(self.blocks[b].score[pos]));
                let col = self.blocks[b].cols[pos].clone();
                let added = apply(&col, true)?;
                if added {
                    napplied += 1;
                    napplied_per_block[b] += 1;
                }
                if update_orthos {
                    self.update_orthogonalities(&col, min_ortho)?;
                }
            }
        }

        loop {
            let pick = if napplied < max_cols_round {
                self.best_col(&napplied_per_block, max_cols_prob)
            } else {
                self.any_col()
            };
            let Some((b, pos)) = pick else { break };

            let redcost = self.blocks[b].cols[pos].redcost();
            if numerics::is_dualfeas_negative(redcost) && napplied < max_cols_round {
                debug_assert!(napplied_per_block[b] < max_cols_prob);
                let col = self.del_col(b, pos);
                let added = apply(&col, false)?;
                if added {
                    trace!(block = b, redcost, "applied column");
                    napplied += 1;
                    napplied_per_block[b] += 1;
                }
                if update_orthos {
                    self.update_orthogonalities(&col, min_ortho)?;
                }
            } else if use_colpool {
                let col = self.del_col(b, pos);
                colpool.add_col(col);
            } else {
                let _ = self.del_col(b, pos);
            }
        }

        self.ncols_applied += napplied;
        self.clear_cols();
        Ok(napplied)
    }

    /// Drops every staged column and resets the per-round counters.
    pub fn clear_cols(&mut self) {
        debug!(total = self.ncols_total, "clearing price store");
        for store in &mut self.blocks {
            store.cols.clear();
            store.objpar.clear();
            store.ortho.clear();
            store.score.clear();
            store.nforced = 0;
            if self.in_farkas {
                // the initial-LP round can be very large; give the memory back
                store.cols.shrink_to_fit();
                store.objpar.shrink_to_fit();
                store.ortho.shrink_to_fit();
                store.score.shrink_to_fit();
            }
        }
        self.hash.clear();
        self.ncols_total = 0;
        self.ncols_found_round = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriceStoreConfig;

    fn stored_col(block: usize, entries: &[(usize, f64)], redcost: f64, coefs: Vec<f64>) -> Col {
        let mut c = Col::new(block, entries.to_vec(), false, redcost);
        c.set_master_coefs(coefs);
        c
    }

    fn store(nblocks: usize) -> PriceStore {
        PriceStore::new(nblocks, PriceStoreConfig::default())
    }

    fn apply_all() -> impl FnMut(&Col, bool) -> PricingResult<bool> {
        |_c: &Col, _f: bool| Ok(true)
    }

    #[test]
    fn duplicate_is_dropped() {
        let mut ps = store(1);
        assert!(ps.add_col(stored_col(0, &[(0, 1.0)], -1.0, vec![1.0]), false));
        assert!(!ps.add_col(stored_col(0, &[(0, 1.0)], -2.0, vec![1.0]), false));
        assert_eq!(ps.n_cols_total(), 1);
    }

    #[test]
    fn forced_duplicate_upgrades_and_wins() {
        let mut ps = store(1);
        assert!(ps.add_col(stored_col(0, &[(0, 1.0)], -1.0, vec![1.0]), false));
        assert!(ps.add_col(stored_col(0, &[(0, 2.0)], -1.0, vec![2.0]), false));
        // same structure as the first, but forced
        assert!(ps.add_col(stored_col(0, &[(0, 1.0)], -1.0, vec![1.0]), true));
        assert_eq!(ps.n_cols_total(), 2);
        assert_eq!(ps.n_forced(0), 1);
        // the forced prefix holds the upgraded column
        assert_eq!(ps.cols(0)[0].sol_val(0), 1.0);

        let mut applied: Vec<(f64, bool)> = Vec::new();
        let mut pool = ColPool::new(10, 10, 10);
        let n = ps
            .apply_cols(&mut pool, false, 10, 10, &mut |c, f| {
                applied.push((c.sol_val(0), f));
                Ok(true)
            })
            .unwrap();
        assert_eq!(n, 2);
        // forced column is applied first
        assert_eq!(applied[0], (1.0, true));
        assert_eq!(applied[1], (2.0, false));
    }

    #[test]
    fn apply_rejects_nonnegative_and_recycles() {
        let mut ps = store(1);
        ps.add_col(stored_col(0, &[(0, 1.0)], -1.0, vec![1.0]), false);
        ps.add_col(stored_col(0, &[(0, 2.0)], 0.5, vec![2.0]), false);
        let mut pool = ColPool::new(10, 10, 10);
        let n = ps
            .apply_cols(&mut pool, true, 10, 10, &mut apply_all())
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.best_redcost(), 0.5);
        assert_eq!(ps.n_cols_total(), 0);
    }

    #[test]
    fn orthogonality_filter_drops_parallel_columns() {
        let mut cfg = PriceStoreConfig::default();
        cfg.min_ortho = 0.1;
        let mut ps = PriceStore::new(1, cfg);
        // two almost parallel columns, the better one first
        ps.add_col(stored_col(0, &[(0, 1.0)], -2.0, vec![1.0, 0.0]), false);
        ps.add_col(stored_col(0, &[(1, 1.0)], -1.9, vec![0.99, 0.14]), false);
        let mut pool = ColPool::new(10, 10, 10);
        let mut applied = 0usize;
        let n = ps
            .apply_cols(&mut pool, true, 10, 10, &mut |_c, _f| {
                applied += 1;
                Ok(true)
            })
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(applied, 1);
        // the parallel one was deleted, not recycled
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn per_block_cap_limits_applications() {
        let mut ps = store(2);
        ps.add_col(stored_col(0, &[(0, 1.0)], -3.0, vec![1.0]), false);
        ps.add_col(stored_col(0, &[(0, 2.0)], -2.0, vec![2.0]), false);
        ps.add_col(stored_col(1, &[(0, 1.0)], -1.0, vec![1.0]), false);
        let mut pool = ColPool::new(10, 10, 10);
        let n = ps
            .apply_cols(&mut pool, true, 10, 1, &mut apply_all())
            .unwrap();
        // one per block
        assert_eq!(n, 2);
        assert_eq!(ps.n_cols_total(), 0);
    }

    #[test]
    fn global_cap_recycles_leftovers() {
        let mut ps = store(1);
        ps.add_col(stored_col(0, &[(0, 1.0)], -3.0, vec![1.0]), false);
        ps.add_col(stored_col(0, &[(0, 2.0)], -2.0, vec![2.0]), false);
        let mut pool = ColPool::new(10, 10, 10);
        let n = ps
            .apply_cols(&mut pool, true, 1, 10, &mut apply_all())
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn lambda_efficacy_is_rejected() {
        let mut cfg = PriceStoreConfig::default();
        cfg.efficacy = Efficacy::Lambda;
        let mut ps = PriceStore::new(1, cfg);
        ps.add_col(stored_col(0, &[(0, 1.0)], -1.0, vec![1.0]), false);
        let mut pool = ColPool::new(10, 10, 10);
        let err = ps
            .apply_cols(&mut pool, false, 10, 10, &mut apply_all())
            .unwrap_err();
        assert!(matches!(err, PricingError::InvalidConfiguration(_)));
    }
}
