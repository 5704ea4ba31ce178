//! Quality gate - numerical acceptance checks for a respondent's design matrix.
//!
//! Epistemic foundation:
//! - K_i: Checks run cheapest first and stop at the first failure
//! - K_i: The report is always fully populated; unreached statistics hold
//!   conservative failure values
//! - K_i: Deterministic given the matrix and the stress seed
//! - I^R: Every threshold comes from GateConfig
//!
//! No intercept column is added. Grid matrices use indicator coding and layer
//! matrices reference coding, see [`Coding::for_mode`].

mod diagnostics;
mod matrix;

pub use diagnostics::*;
pub use matrix::*;

use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::models::{GateConfig, GateRejection, QcReport};

/// Norm floor used when scaling the Gram matrix into a correlation matrix.
const NORM_FLOOR: f64 = 1e-15;

/// Guard added to the residual bound so an all-zero right-hand side passes.
const RESIDUAL_GUARD: f64 = 1e-12;

/// Quality gate with fixed thresholds.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: GateConfig,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run every check against `x`.
    ///
    /// `stress_seed` seeds the random outcome vectors of the stress test.
    pub fn evaluate(&self, x: &DesignMatrix, stress_seed: u64) -> QcReport {
        let cfg = &self.config;
        let m = x.matrix();
        let p = m.ncols();
        let mut report = QcReport::failing(p, cfg.random_y);

        // 1-2. Column checks
        report.zero_var = zero_variance_columns(m);
        report.dup_pairs = duplicate_column_pairs(m);
        if p == 0 || m.nrows() == 0 || report.zero_var > 0 {
            return report.reject(GateRejection::ZeroVariance);
        }
        if cfg.enforce_unique_columns && report.dup_pairs > 0 {
            return report.reject(GateRejection::DuplicateColumns);
        }

        // 3-4. Rank and condition number from one SVD
        let singular = m.clone().svd(false, false).singular_values;
        report.rank = singular.iter().filter(|&&s| s > cfg.rank_tol).count();
        report.s_min = singular.min();
        report.s_max = singular.max();
        report.kappa = if report.s_min > 0.0 {
            report.s_max / report.s_min
        } else {
            f64::INFINITY
        };
        if report.rank < p {
            return report.reject(GateRejection::RankDeficient);
        }
        if report.kappa > cfg.kappa_max {
            return report.reject(GateRejection::IllConditioned);
        }

        // 5. Variance inflation from the correlation inverse
        let gram = m.transpose() * m;
        let (corr_inv, exact) = correlation_inverse(&gram, cfg.rank_tol);
        let Some(corr_inv) = corr_inv else {
            return report.reject(GateRejection::LowTolerance);
        };
        report.corr_inv_exact = exact;
        report.max_vif = corr_inv
            .diagonal()
            .iter()
            .map(|&v| v.max(1.0))
            .fold(1.0, f64::max);
        report.min_tolerance = 1.0 / report.max_vif;
        report.tolerance_ok = report.min_tolerance >= cfg.min_tolerance;
        if !report.tolerance_ok {
            return report.reject(GateRejection::LowTolerance);
        }

        // 6. Stress fits: one QR, K right-hand sides
        let y = random_outcomes(m.nrows(), cfg.random_y, stress_seed);
        let (fit_rank_passes, ls_passes) = stress_test(m, &gram, &y, cfg.rank_tol, cfg.ls_tol);
        report.fit_rank_passes = fit_rank_passes;
        report.ls_passes = ls_passes;
        if fit_rank_passes < cfg.random_y || ls_passes < cfg.random_y {
            return report.reject(GateRejection::StressTest);
        }

        report.passed = true;
        debug!(
            p,
            kappa = report.kappa,
            max_vif = report.max_vif,
            "Gate passed"
        );
        report
    }
}

/// Inverse of the uncentered correlation matrix D⁻¹GD⁻¹.
///
/// Falls back to a pseudo-inverse when the exact inverse fails; the flag
/// reports which one was used.
fn correlation_inverse(gram: &DMatrix<f64>, rank_tol: f64) -> (Option<DMatrix<f64>>, bool) {
    let p = gram.ncols();
    let inv_norms: Vec<f64> = (0..p)
        .map(|j| 1.0 / gram[(j, j)].sqrt().max(NORM_FLOOR))
        .collect();
    let corr = DMatrix::from_fn(p, p, |i, j| gram[(i, j)] * inv_norms[i] * inv_norms[j]);

    match corr.clone().try_inverse() {
        Some(inv) => (Some(inv), true),
        None => (corr.pseudo_inverse(rank_tol).ok(), false),
    }
}

/// `n × k` integer outcomes drawn uniformly from 1..=9.
fn random_outcomes(n: usize, k: usize, seed: u64) -> DMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    DMatrix::from_fn(n, k, |_, _| f64::from(rng.gen_range(1u8..=9)))
}

/// Returns (fits with a non-degenerate R, fits with a small normal-equations
/// residual).
fn stress_test(
    x: &DMatrix<f64>,
    gram: &DMatrix<f64>,
    y: &DMatrix<f64>,
    rank_tol: f64,
    ls_tol: f64,
) -> (usize, usize) {
    let k = y.ncols();
    let qr = x.clone().qr();
    let r = qr.r();
    let q = qr.q();

    let rdiag_ok = r.diagonal().iter().all(|d| d.abs() > rank_tol);
    if !rdiag_ok {
        return (0, 0);
    }
    let Some(b) = r.solve_upper_triangular(&(q.transpose() * y)) else {
        return (0, 0);
    };

    let xty = x.transpose() * y;
    let residual = gram * &b - &xty;
    let ls_passes = (0..k)
        .filter(|&j| residual.column(j).norm() <= ls_tol * (xty.column(j).norm() + RESIDUAL_GUARD))
        .count();
    (k, ls_passes)
}
