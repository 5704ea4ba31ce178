//! QC report and run statistics types.
//!
//! K_i: A report is created once per gate evaluation and never mutated after
//! the respondent is accepted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::RespondentDesign;

/// Which gate check rejected a design.
///
/// Ordered cheapest first, matching the order the gate runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRejection {
    /// At least one column never varies
    ZeroVariance,
    /// Two columns are bit-for-bit identical
    DuplicateColumns,
    /// Numerical rank below the column count
    RankDeficient,
    /// Condition number above the bound
    IllConditioned,
    /// Minimum tolerance (1 / max VIF) below the floor
    LowTolerance,
    /// A random-outcome least-squares fit failed
    StressTest,
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ZeroVariance => "zero-variance column",
            Self::DuplicateColumns => "duplicate columns",
            Self::RankDeficient => "rank deficient",
            Self::IllConditioned => "ill-conditioned",
            Self::LowTolerance => "low tolerance",
            Self::StressTest => "stress test failed",
        };
        f.write_str(s)
    }
}

/// Per-respondent quality gate report.
///
/// K_i: Always fully populated. On early rejection the triggering check's
/// fields are filled and the remainder hold conservative failure values
/// (rank 0, κ = ∞, max VIF = ∞, zero passes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    /// Columns with zero variance
    pub zero_var: usize,
    /// Exact duplicate column pairs
    pub dup_pairs: usize,
    /// Numerical rank
    pub rank: usize,
    /// Column count
    pub p: usize,
    /// Smallest singular value
    pub s_min: f64,
    /// Largest singular value
    pub s_max: f64,
    /// Condition number s_max / s_min
    pub kappa: f64,
    /// Largest variance-inflation factor
    pub max_vif: f64,
    /// 1 / max VIF
    pub min_tolerance: f64,
    /// Whether min_tolerance cleared the floor
    pub tolerance_ok: bool,
    /// Whether the correlation matrix inverted exactly (no pseudo-inverse)
    pub corr_inv_exact: bool,
    /// Stress fits with a non-degenerate triangular factor
    pub fit_rank_passes: usize,
    /// Stress fits with a small normal-equations residual
    pub ls_passes: usize,
    /// Stress fits attempted (K)
    pub ls_total: usize,
    /// Final verdict
    pub passed: bool,
    /// The check that rejected, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<GateRejection>,
}

impl QcReport {
    /// Report with every statistic at its conservative failure value.
    pub fn failing(p: usize, ls_total: usize) -> Self {
        Self {
            zero_var: 0,
            dup_pairs: 0,
            rank: 0,
            p,
            s_min: f64::NAN,
            s_max: f64::NAN,
            kappa: f64::INFINITY,
            max_vif: f64::INFINITY,
            min_tolerance: 0.0,
            tolerance_ok: false,
            corr_inv_exact: false,
            fit_rank_passes: 0,
            ls_passes: 0,
            ls_total,
            passed: false,
            rejection: None,
        }
    }

    /// Mark the report as rejected by `check`.
    pub fn reject(mut self, check: GateRejection) -> Self {
        self.passed = false;
        self.rejection = Some(check);
        self
    }
}

/// Largest absolute correlation between elements of different categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCorrelation {
    pub max_abs_r: f64,
    pub pair: (String, String),
}

/// Exposure balance of one respondent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureStats {
    /// Exposure count per element, layout order
    pub counts: Vec<usize>,
    pub mean: f64,
    pub std_dev: f64,
    /// Coefficient of variation across all elements
    pub cv: f64,
    /// Largest coefficient of variation within a single category
    pub max_category_cv: f64,
    /// Whether every element in each category has the same count
    pub balanced: bool,
}

/// Distribution of active-category counts across a respondent's rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowActivity {
    pub min: usize,
    pub max: usize,
    pub mean: f64,
    /// Active count → number of rows
    pub histogram: BTreeMap<usize, usize>,
}

/// Diagnostics computed for accepted respondents only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondentDiagnostics {
    pub exposure: ExposureStats,
    /// Absent slots per category, layout order
    pub absences: Vec<usize>,
    pub activity: RowActivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_correlation: Option<CrossCorrelation>,
}

/// An accepted respondent: design plus the report that certified it.
///
/// K_i: Write-once. Never mutated after acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedRespondent {
    pub design: RespondentDesign,
    pub report: QcReport,
    pub diagnostics: RespondentDiagnostics,
    /// Attempts consumed, including the accepted one
    pub attempts: u64,
    /// Attempts where the builder found no solution
    pub build_failures: u64,
    /// Attempts where the gate rejected the design
    pub gate_rejections: u64,
    /// Seed of the accepted attempt
    pub seed: u64,
}

impl AcceptedRespondent {
    pub fn respondent(&self) -> usize {
        self.design.respondent
    }
}

/// Statistics for a generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Respondents requested
    pub total_respondents: usize,

    /// Respondents accepted in this run
    pub accepted: usize,

    /// Respondents restored from a checkpoint
    pub resumed: usize,

    /// Respondents that hit the attempt ceiling
    pub failed: usize,

    /// Attempts across all respondents
    pub total_attempts: u64,

    /// Attempts where the builder found no solution
    pub build_failures: u64,

    /// Attempts where the gate rejected a built design
    pub gate_rejections: u64,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Respondents per hour throughput
    pub throughput_per_hour: f64,

    /// Share of gated designs that passed (0.0 - 1.0)
    pub gate_pass_rate: f64,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        let gated = self.accepted as u64 + self.gate_rejections;
        if gated > 0 {
            self.gate_pass_rate = self.accepted as f64 / gated as f64;
        }
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.accepted as f64 / self.runtime_secs * 3600.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_report_is_conservative() {
        let report = QcReport::failing(12, 5).reject(GateRejection::ZeroVariance);
        assert!(!report.passed);
        assert_eq!(report.rank, 0);
        assert!(report.kappa.is_infinite());
        assert_eq!(report.ls_total, 5);
        assert_eq!(report.rejection, Some(GateRejection::ZeroVariance));
    }

    #[test]
    fn test_run_stats_finalize() {
        let mut stats = RunStats {
            accepted: 4,
            gate_rejections: 4,
            runtime_secs: 3600.0,
            ..Default::default()
        };
        stats.finalize();
        assert!((stats.gate_pass_rate - 0.5).abs() < 1e-12);
        assert!((stats.throughput_per_hour - 4.0).abs() < 1e-12);
    }
}
