//! QC certificate - audit record of every accepted respondent's gate statistics.
//!
//! K_i: Carries no raw rows; the dataset id ties it to the design-matrix file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{
    AcceptedRespondent, Config, ConjointError, ExposurePolicy, GateConfig, QcReport,
    RespondentDiagnostics, Result, RowMixMode, StudyMode,
};
use crate::planner::Plan;

/// Generator identifier written into every certificate.
pub const GENERATOR: &str = concat!("conjoint ", env!("CARGO_PKG_VERSION"));

/// Run configuration as it shaped the designs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub mode: StudyMode,
    /// (category, element count), layout order
    pub categories: Vec<(String, usize)>,
    pub respondents: usize,
    /// Rows per respondent
    pub t: usize,
    /// Exposures per element
    pub e: usize,
    pub min_active: usize,
    pub max_active: usize,
    pub absence_ratio: f64,
    pub absence_min: usize,
    pub t_ratio: f64,
    pub exposure_policy: ExposurePolicy,
    pub row_mix: RowMixMode,
    pub widen: f64,
}

/// Main-effects identifiability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifiability {
    /// 1 + Σ(q_c − 1)
    pub params: usize,
    pub rows: usize,
    pub identifiable: bool,
}

/// One respondent's entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondentEntry {
    pub respondent: usize,
    pub attempts: u64,
    pub report: QcReport,
    pub diagnostics: RespondentDiagnostics,
}

/// Largest condition number across respondents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorstKappa {
    pub respondent: usize,
    pub kappa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub project: String,
    pub generator: String,
    pub created_at: DateTime<Utc>,
    pub run_id: Uuid,
    /// SHA-256 of the combined design-matrix CSV
    pub dataset_id: String,
    pub base_seed: u64,
    pub config: ConfigSummary,
    pub identifiability: Identifiability,
    pub thresholds: GateConfig,
    pub respondents: Vec<RespondentEntry>,
    /// Every requested respondent was accepted by the gate
    pub all_passed: bool,
    pub worst_kappa: Option<WorstKappa>,
}

impl Certificate {
    /// Assemble the certificate for `accepted`, ascending by id.
    pub fn new(
        config: &Config,
        plan: &Plan,
        base_seed: u64,
        dataset_id: String,
        accepted: &[AcceptedRespondent],
    ) -> Self {
        let respondents: Vec<RespondentEntry> = accepted
            .iter()
            .map(|a| RespondentEntry {
                respondent: a.respondent(),
                attempts: a.attempts,
                report: a.report.clone(),
                diagnostics: a.diagnostics.clone(),
            })
            .collect();

        // Ties go to the later respondent.
        let worst_kappa = respondents
            .iter()
            .filter(|r| r.report.kappa.is_finite())
            .fold(None::<WorstKappa>, |worst, r| match worst {
                Some(w) if w.kappa > r.report.kappa => Some(w),
                _ => Some(WorstKappa {
                    respondent: r.respondent,
                    kappa: r.report.kappa,
                }),
            });

        let all_passed = respondents.len() == config.study.respondents
            && respondents.iter().all(|r| r.report.passed);

        Self {
            project: config.study.name.clone(),
            generator: GENERATOR.to_string(),
            created_at: Utc::now(),
            run_id: Uuid::new_v4(),
            dataset_id,
            base_seed,
            config: ConfigSummary {
                mode: plan.mode,
                categories: plan
                    .categories
                    .iter()
                    .map(|c| (c.name.clone(), c.size))
                    .collect(),
                respondents: config.study.respondents,
                t: plan.t,
                e: plan.e,
                min_active: plan.min_active,
                max_active: plan.max_active,
                absence_ratio: config.planner.absence_ratio,
                absence_min: plan.absence_min,
                t_ratio: config.planner.t_ratio,
                exposure_policy: plan.exposure_policy,
                row_mix: config.builder.row_mix,
                widen: config.builder.widen,
            },
            identifiability: Identifiability {
                params: plan.params,
                rows: plan.t,
                identifiable: plan.t > plan.params,
            },
            thresholds: config.gate.clone(),
            respondents,
            all_passed,
            worst_kappa,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConjointError::Internal(format!("Serializing certificate: {e}")))
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = &self.config;
        writeln!(f, "=== QC CERTIFICATE ===")?;
        writeln!(f, "Project: {}", self.project)?;
        writeln!(f, "Generator: {}", self.generator)?;
        writeln!(f, "Timestamp: {}", self.created_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Run ID: {}", self.run_id)?;
        writeln!(f, "Dataset ID (SHA-256 of design matrix CSV): {}", self.dataset_id)?;
        writeln!(f, "Base RNG seed: {}", self.base_seed)?;
        writeln!(f)?;

        writeln!(f, "Configuration:")?;
        match cfg.mode {
            StudyMode::Grid => writeln!(f, "  Study mode: grid (actives/row {}..={})", cfg.min_active, cfg.max_active)?,
            StudyMode::Layer => writeln!(f, "  Study mode: layer")?,
        }
        let categories: Vec<String> = cfg
            .categories
            .iter()
            .map(|(name, q)| format!("{name}({q})"))
            .collect();
        writeln!(f, "  Categories: {}", categories.join(", "))?;
        writeln!(f, "  Respondents: {}", cfg.respondents)?;
        writeln!(f, "  Rows/respondent (T): {}", cfg.t)?;
        writeln!(f, "  Exposures/element (E): {}", cfg.e)?;
        writeln!(
            f,
            "  Absence policy: absence_ratio = {} (A_min used = {})",
            cfg.absence_ratio, cfg.absence_min
        )?;
        writeln!(f, "  T ratio: {}", cfg.t_ratio)?;
        match cfg.exposure_policy {
            ExposurePolicy::Exact => writeln!(f, "  Exposure policy: exact")?,
            ExposurePolicy::Soft { tolerance_cv } => {
                writeln!(f, "  Exposure policy: soft (CV ≤ {tolerance_cv})")?
            }
        }
        writeln!(f, "  Row mix: {:?}, widen = {}", cfg.row_mix, cfg.widen)?;
        writeln!(f)?;

        let id = &self.identifiability;
        writeln!(f, "Identifiability (main effects):")?;
        writeln!(f, "  P (parameters) = {} = 1 + Σ(q_c - 1)", id.params)?;
        writeln!(f, "  Identifiable? = {} (T = {})", yes_no(id.identifiable), id.rows)?;
        writeln!(f)?;

        let th = &self.thresholds;
        writeln!(f, "Gate thresholds:")?;
        writeln!(f, "  Condition number ≤ {:.1e}", th.kappa_max)?;
        writeln!(f, "  Min tolerance (1/max VIF) ≥ {:.1e}", th.min_tolerance)?;
        writeln!(
            f,
            "  Random-DV stress tests: {k}/{k} must pass (residual ≤ {:.1e})",
            th.ls_tol,
            k = th.random_y
        )?;
        writeln!(f)?;

        writeln!(f, "Per-respondent QC summary:")?;
        for entry in &self.respondents {
            write_entry(f, entry)?;
        }
        writeln!(f)?;

        writeln!(f, "Global QC verdict:")?;
        writeln!(f, "  All respondents passed: {}", yes_no(self.all_passed))?;
        match &self.worst_kappa {
            Some(w) => writeln!(
                f,
                "  Worst-case κ(X) across respondents: {:.4} (respondent {})",
                w.kappa, w.respondent
            ),
            None => writeln!(f, "  Worst-case κ(X) across respondents: n/a"),
        }
    }
}

fn write_entry(f: &mut fmt::Formatter<'_>, entry: &RespondentEntry) -> fmt::Result {
    let r = &entry.report;
    let d = &entry.diagnostics;
    writeln!(f)?;
    writeln!(f, "  Respondent {} ({} attempts)", entry.respondent, entry.attempts)?;
    if d.exposure.balanced {
        let e = d.exposure.counts.first().copied().unwrap_or(0);
        writeln!(f, "    Element exposures: balanced (first = {e})")?;
    } else {
        writeln!(
            f,
            "    Element exposures: mean {:.2}, CV {:.4} (max per-category CV {:.4})",
            d.exposure.mean, d.exposure.cv, d.exposure.max_category_cv
        )?;
    }
    let absences: Vec<String> = d.absences.iter().map(usize::to_string).collect();
    writeln!(f, "    Per-category absences: {}", absences.join(", "))?;
    writeln!(
        f,
        "    Row actives (min/max/mean): {}/{}/{:.2}",
        d.activity.min, d.activity.max, d.activity.mean
    )?;
    for (k, rows) in &d.activity.histogram {
        writeln!(f, "      - {k} actives: {rows}")?;
    }

    writeln!(f, "    Collinearity checks:")?;
    writeln!(f, "      - Zero-variance columns: {}", r.zero_var)?;
    writeln!(f, "      - Exact duplicate pairs: {}", r.dup_pairs)?;
    writeln!(f, "      - Rank / p: {} / {}", r.rank, r.p)?;
    writeln!(f, "      - s_min / s_max: {:.6} / {:.6}", r.s_min, r.s_max)?;
    writeln!(f, "      - Condition number κ(X): {:.4}", r.kappa)?;
    writeln!(
        f,
        "      - Max VIF / Min tolerance: {:.4} / {:.4}{}",
        r.max_vif,
        r.min_tolerance,
        if r.corr_inv_exact { "" } else { " (pseudo-inverse)" }
    )?;
    writeln!(
        f,
        "      - Random-DV fits (rank / LS): {}/{} & {}/{}",
        r.fit_rank_passes, r.ls_total, r.ls_passes, r.ls_total
    )?;
    if let Some(cc) = &d.cross_correlation {
        writeln!(
            f,
            "      - Max cross-category |r|: {:.3} ({} vs {})",
            cc.max_abs_r, cc.pair.0, cc.pair.1
        )?;
    }
    writeln!(f, "      - Gate: {}", if r.passed { "PASS" } else { "FAIL" })
}
