//! Pricing statistics sink.
//!
//! Callers that want call counters, column counts or degeneracy averages
//! pass a [`PricingStats`] into the engine; nothing is recorded in module
//! state. Counters are atomic because pricing workers update them
//! concurrently during a round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Shared, thread-safe statistics collector for one pricing engine.
#[derive(Debug, Default)]
pub struct PricingStats {
    redcost_calls: AtomicU64,
    farkas_calls: AtomicU64,
    solver_calls_heur: AtomicU64,
    solver_calls_exact: AtomicU64,
    cols_found: AtomicU64,
    cols_applied: AtomicU64,
    pool_cols_applied: AtomicU64,
    mispricings: AtomicU64,
    pricing_nanos: AtomicU64,
    degeneracy: Mutex<DegeneracyAvg>,
}

#[derive(Debug, Default)]
struct DegeneracyAvg {
    avg: f64,
    n: u64,
}

/// Serializable snapshot of the counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub redcost_calls: u64,
    pub farkas_calls: u64,
    pub solver_calls_heur: u64,
    pub solver_calls_exact: u64,
    pub cols_found: u64,
    pub cols_applied: u64,
    pub pool_cols_applied: u64,
    pub mispricings: u64,
    pub pricing_seconds: f64,
    pub avg_root_degeneracy: f64,
}

impl PricingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, farkas: bool) {
        if farkas {
            self.farkas_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.redcost_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_solver_call(&self, heuristic: bool) {
        if heuristic {
            self.solver_calls_heur.fetch_add(1, Ordering::Relaxed);
        } else {
            self.solver_calls_exact.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cols_found(&self, n: u64) {
        self.cols_found.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_cols_applied(&self, n: u64) {
        self.cols_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_pool_cols_applied(&self, n: u64) {
        self.pool_cols_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_mispricing(&self) {
        self.mispricings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pricing_time(&self, elapsed: std::time::Duration) {
        self.pricing_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Folds one root-node degeneracy sample into the running average.
    pub fn record_root_degeneracy(&self, degeneracy: f64) {
        let mut d = self.degeneracy.lock().expect("degeneracy lock poisoned");
        d.n += 1;
        let n = d.n as f64;
        d.avg -= d.avg / n - degeneracy / n;
    }

    pub fn cols_found(&self) -> u64 {
        self.cols_found.load(Ordering::Relaxed)
    }

    pub fn cols_applied(&self) -> u64 {
        self.cols_applied.load(Ordering::Relaxed)
    }

    pub fn mispricings(&self) -> u64 {
        self.mispricings.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let d = self.degeneracy.lock().expect("degeneracy lock poisoned");
        StatsSnapshot {
            redcost_calls: self.redcost_calls.load(Ordering::Relaxed),
            farkas_calls: self.farkas_calls.load(Ordering::Relaxed),
            solver_calls_heur: self.solver_calls_heur.load(Ordering::Relaxed),
            solver_calls_exact: self.solver_calls_exact.load(Ordering::Relaxed),
            cols_found: self.cols_found.load(Ordering::Relaxed),
            cols_applied: self.cols_applied.load(Ordering::Relaxed),
            pool_cols_applied: self.pool_cols_applied.load(Ordering::Relaxed),
            mispricings: self.mispricings.load(Ordering::Relaxed),
            pricing_seconds: self.pricing_nanos.load(Ordering::Relaxed) as f64 * 1e-9,
            avg_root_degeneracy: d.avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PricingStats::new();
        stats.record_call(false);
        stats.record_call(true);
        stats.record_cols_found(3);
        stats.record_cols_applied(2);
        let snap = stats.snapshot();
        assert_eq!(snap.redcost_calls, 1);
        assert_eq!(snap.farkas_calls, 1);
        assert_eq!(snap.cols_found, 3);
        assert_eq!(snap.cols_applied, 2);
    }

    #[test]
    fn degeneracy_running_average() {
        let stats = PricingStats::new();
        stats.record_root_degeneracy(0.2);
        stats.record_root_degeneracy(0.4);
        let snap = stats.snapshot();
        assert!((snap.avg_root_degeneracy - 0.3).abs() < 1e-12);
    }

    #[test]
    fn snapshot_serializes() {
        let stats = PricingStats::new();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("cols_found"));
    }
}
