//! Engine configuration.
//!
//! All knobs recognised by the pricing loop, grouped the way the engine
//! consumes them. Every struct derives serde so configurations can be
//! loaded from files or embedded in experiment descriptions.

use serde::{Deserialize, Serialize};

/// Order in which pricing jobs are scored at queue setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobScoring {
    /// `'i'`: negative block index; deterministic insertion order.
    #[serde(rename = "i")]
    Index,
    /// `'d'`: dual value of the block's convexity constraint.
    #[serde(rename = "d")]
    ConvexityDual,
    /// `'r'`: `-(0.2 * generated points + generated rays)`.
    #[default]
    #[serde(rename = "r")]
    Generation,
    /// `'l'`: improving columns over the last `nrounds_col` rounds.
    #[serde(rename = "l")]
    LastRounds,
}

/// How a column's efficacy enters the price-store score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Efficacy {
    /// `-redcost`
    #[default]
    Dantzig,
    /// `-redcost / ||a||`
    SteepestEdge,
    /// Reserved; rejected at apply time.
    Lambda,
}

/// Whether the master LP honours the cutoff bound during pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisableCutoff {
    On = 0,
    Off = 1,
    #[default]
    Auto = 2,
}

/// Price-store scoring and filtering weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceStoreConfig {
    /// Weight of the efficacy term in the column score.
    pub efficacy_fac: f64,
    /// Weight of the objective-parallelism term.
    pub objpar_fac: f64,
    /// Weight of the orthogonality term.
    pub ortho_fac: f64,
    /// Columns whose orthogonality to an already applied column falls
    /// below this are discarded for the round.
    pub min_ortho: f64,
    pub efficacy: Efficacy,
}

impl Default for PriceStoreConfig {
    fn default() -> Self {
        PriceStoreConfig {
            efficacy_fac: 1.0,
            objpar_fac: 0.0,
            ortho_fac: 0.0,
            min_ortho: 0.0,
            efficacy: Efficacy::Dantzig,
        }
    }
}

/// Dual-smoothing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationConfig {
    /// Master switch for dual smoothing.
    pub enabled: bool,
    /// Consecutive mispricing iterations after which smoothing is given up
    /// for the rest of the node.
    pub max_mispricing_iters: u32,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        StabilizationConfig {
            enabled: true,
            max_mispricing_iters: 10,
        }
    }
}

/// Column-pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColPoolConfig {
    /// Soft cap multiplier: soft cap = `max_cols_round * relevant blocks *
    /// size_factor`. 0 disables reuse across rounds.
    pub size_factor: usize,
    /// Columns older than this are evicted by the ageing sweep.
    pub age_limit: u32,
}

impl Default for ColPoolConfig {
    fn default() -> Self {
        ColPoolConfig {
            size_factor: 10,
            age_limit: 10,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Run a heuristic pricing pass before the exact one.
    pub use_heur_pricing: bool,
    /// Heuristic iterations per job before promotion to exact.
    pub heur_pricing_iters: u32,
    pub sorting: JobScoring,
    /// Length of the per-prob improving-column history window.
    pub nrounds_col: usize,
    /// Fraction of probs that must succeed before an early abort.
    pub rel_max_successful_probs: f64,
    /// Pricing jobs per chunk; chunks rotate between pricing calls.
    pub chunk_size: usize,
    /// Every `eager_freq` pricing calls, all probs are solved regardless of
    /// abort conditions (0 disables eager sweeps).
    pub eager_freq: u32,
    /// Extra wall-clock seconds granted to one pricing job.
    pub job_time_limit: f64,
    /// Abort pricing when LP and node lower bound agree integrally.
    pub abort_pricing_int: bool,
    /// Abort pricing below this relative gap (0 disables).
    pub abort_pricing_gap: f64,
    /// Columns accepted per prob and round.
    pub max_cols_prob: usize,
    /// Columns accepted per round of reduced-cost pricing.
    pub max_cols_round_redcost: usize,
    /// Round cap at the root node.
    pub max_cols_round_root: usize,
    /// Columns accepted per round of Farkas pricing.
    pub max_cols_round_farkas: usize,
    /// Worker threads for the job queue (0 = rayon default, 1 = serial).
    pub threads: usize,
    pub disable_cutoff: DisableCutoff,
    pub price_store: PriceStoreConfig,
    pub stabilization: StabilizationConfig,
    pub colpool: ColPoolConfig,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            use_heur_pricing: false,
            heur_pricing_iters: 1,
            sorting: JobScoring::default(),
            nrounds_col: 15,
            rel_max_successful_probs: 1.0,
            chunk_size: usize::MAX,
            eager_freq: 10,
            job_time_limit: f64::MAX,
            abort_pricing_int: true,
            abort_pricing_gap: 0.0,
            max_cols_prob: usize::MAX,
            max_cols_round_redcost: 100,
            max_cols_round_root: 100,
            max_cols_round_farkas: 10,
            threads: 0,
            disable_cutoff: DisableCutoff::default(),
            price_store: PriceStoreConfig::default(),
            stabilization: StabilizationConfig::default(),
            colpool: ColPoolConfig::default(),
        }
    }
}

impl PricingConfig {
    /// Largest round cap over all pricing types; used to size buffers and
    /// the column pool.
    pub fn max_cols_round_any(&self) -> usize {
        self.max_cols_round_redcost
            .max(self.max_cols_round_root)
            .max(self.max_cols_round_farkas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_roundtrips_as_single_letters() {
        let json = serde_json::to_string(&JobScoring::LastRounds).unwrap();
        assert_eq!(json, "\"l\"");
        let back: JobScoring = serde_json::from_str("\"d\"").unwrap();
        assert_eq!(back, JobScoring::ConvexityDual);
    }

    #[test]
    fn default_config_is_consistent() {
        let cfg = PricingConfig::default();
        assert!(cfg.rel_max_successful_probs <= 1.0);
        assert_eq!(cfg.max_cols_round_any(), 100);
        assert!(cfg.stabilization.enabled);
    }
}
