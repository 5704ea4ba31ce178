//! Planner - derives rows per respondent (T) and exposures per element (E).
//!
//! Epistemic foundation:
//! - K_i: P = M − C + 1 parameters must be identifiable, so T ≥ P + safety
//! - K_i: T can never exceed the visible-pattern capacity (rows must be unique)
//! - K_i: Deterministic. Same layout and config → same plan
//! - B_i: A workable T may not exist → Result<Plan, InfeasibleError>
//!
//! Grid mode is bound by two constraints on E at a given T:
//! the per-category absence floor `T − q_c·E ≥ ⌈ratio·E⌉` and the row cap
//! `M·E ≤ T·max_active`. Layer mode has no absences; each category's
//! exposure is `⌊T / q_c⌋` and the exposure policy decides whether the
//! remainder is acceptable.

mod capacity;

pub use capacity::*;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    Config, ExposurePolicy, InfeasibleError, Layout, PlannerConfig, Result, StudyMode,
};

/// Per-category share of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPlan {
    pub name: String,
    /// Number of elements (q_c)
    pub size: usize,
    /// Exposures per element
    pub exposure: usize,
    /// Absent slots in this category
    pub absences: usize,
    /// Elements receiving one extra exposure (layer mode only)
    pub remainder: usize,
}

impl CategoryPlan {
    /// Active slots contributed by this category.
    pub fn activations(&self) -> usize {
        self.size * self.exposure + self.remainder
    }
}

/// Generation parameters shared read-only by every respondent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub mode: StudyMode,
    /// Rows per respondent
    pub t: usize,
    /// Exposures per element (minimum across categories in layer mode)
    pub e: usize,
    pub categories: Vec<CategoryPlan>,
    /// Minimum active categories per row
    pub min_active: usize,
    /// Maximum active categories per row
    pub max_active: usize,
    /// Mean active categories per row
    pub avg_active: f64,
    /// Absence floor ⌈ratio·E⌉ (zero in layer mode)
    pub absence_min: usize,
    /// Main-effects parameter count
    pub params: usize,
    /// Visible-pattern capacity within the activity bounds
    pub capacity: u128,
    /// Exposure policy the plan satisfies
    pub exposure_policy: ExposurePolicy,
}

impl Plan {
    /// Plan for a full configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let layout = config.study.layout()?;
        let bounds = config.study.activity_bounds(&config.planner);
        Ok(plan(&layout, config.study.mode, bounds, &config.planner)?)
    }

    /// Absences per category, layout order.
    pub fn absences(&self) -> Vec<usize> {
        self.categories.iter().map(|c| c.absences).collect()
    }

    /// Total active slots per respondent.
    pub fn total_activations(&self) -> usize {
        self.categories.iter().map(CategoryPlan::activations).sum()
    }

    /// The same plan re-derived at a different row count, keeping E.
    ///
    /// Returns `None` when `t` exceeds capacity, breaks the exposure policy or
    /// leaves the activations outside the per-row bounds.
    /// Used by the preflight to bump T.
    pub fn with_rows(&self, t: usize) -> Option<Self> {
        if t as u128 > self.capacity || t == 0 {
            return None;
        }

        let categories = match self.mode {
            StudyMode::Grid => self
                .categories
                .iter()
                .map(|c| {
                    let active = c.size * self.e;
                    (t >= active + self.absence_min).then(|| CategoryPlan {
                        absences: t - active,
                        ..c.clone()
                    })
                })
                .collect::<Option<Vec<_>>>()?,
            StudyMode::Layer => {
                let sizes: Vec<usize> = self.categories.iter().map(|c| c.size).collect();
                if !layer_policy_ok(t, &sizes, self.exposure_policy) {
                    return None;
                }
                self.categories
                    .iter()
                    .map(|c| CategoryPlan {
                        exposure: t / c.size,
                        remainder: t % c.size,
                        absences: 0,
                        ..c.clone()
                    })
                    .collect()
            }
        };

        let mut next = Self {
            t,
            categories,
            ..self.clone()
        };
        let total = next.total_activations();
        if total < t * self.min_active || total > t * self.max_active {
            return None;
        }
        next.avg_active = total as f64 / t as f64;
        Some(next)
    }
}

/// Derive a plan for `layout`.
///
/// `bounds` are the inclusive per-row active-count limits (grid cap already
/// clipped to the category count).
pub fn plan(
    layout: &Layout,
    mode: StudyMode,
    bounds: (usize, usize),
    cfg: &PlannerConfig,
) -> std::result::Result<Plan, InfeasibleError> {
    let sizes = layout.sizes();
    let total_elements = layout.total_elements();
    let (min_active, max_active) = bounds;
    let params = params_main_effects(&sizes);
    let capacity = visible_capacity(&sizes, min_active, Some(max_active));

    let mut t = (params + cfg.safety_rows).max(2);
    if cfg.t_ratio > 1.0 {
        t = (t as f64 * cfg.t_ratio).ceil() as usize;
    }

    if t as u128 > capacity {
        return Err(InfeasibleError::InitialRowsExceedCapacity {
            t,
            params,
            capacity,
        });
    }

    let exposure_upper = |t_try: usize| -> usize {
        match mode {
            StudyMode::Grid => {
                let by_absence = sizes
                    .iter()
                    .map(|&q| (t_try as f64 / (q as f64 + cfg.absence_ratio)).floor() as usize)
                    .min()
                    .unwrap_or(0);
                let by_row_cap = t_try * max_active / total_elements;
                by_absence.min(by_row_cap)
            }
            StudyMode::Layer => sizes.iter().map(|&q| t_try / q).min().unwrap_or(0),
        }
    };

    let mut slack = u128::from(cfg.capacity_slack);
    let mut best_exposure = 0;
    let e = loop {
        if t as u128 > capacity.saturating_sub(slack) {
            if t as u128 > capacity {
                return Err(InfeasibleError::CapacityExhausted {
                    t,
                    capacity,
                    best_exposure,
                    min_exposure: cfg.min_exposure,
                });
            }
            slack = 0;
        }

        let e_up = exposure_upper(t);
        best_exposure = best_exposure.max(e_up);
        let policy_ok = match mode {
            StudyMode::Grid => true,
            StudyMode::Layer => layer_policy_ok(t, &sizes, cfg.exposure),
        };
        if e_up >= cfg.min_exposure && policy_ok {
            break e_up;
        }
        debug!(t, e_up, policy_ok, "Planner stepping T");
        t += 1;
    };

    let (categories, absence_min) = match mode {
        StudyMode::Grid => {
            let absence_min = (cfg.absence_ratio * e as f64).ceil() as usize;
            let categories = layout
                .categories()
                .iter()
                .map(|c| CategoryPlan {
                    name: c.name.clone(),
                    size: c.len(),
                    exposure: e,
                    absences: t - c.len() * e,
                    remainder: 0,
                })
                .collect();
            (categories, absence_min)
        }
        StudyMode::Layer => {
            let categories = layout
                .categories()
                .iter()
                .map(|c| CategoryPlan {
                    name: c.name.clone(),
                    size: c.len(),
                    exposure: t / c.len(),
                    absences: 0,
                    remainder: t % c.len(),
                })
                .collect();
            (categories, 0)
        }
    };

    let plan = Plan {
        mode,
        t,
        e,
        categories,
        min_active,
        max_active,
        avg_active: 0.0,
        absence_min,
        params,
        capacity,
        exposure_policy: cfg.exposure,
    };
    let total = plan.total_activations();
    if total < t * min_active || total > t * max_active {
        return Err(InfeasibleError::RowActivityUnreachable {
            t,
            activations: total,
            min_active,
            max_active,
        });
    }
    let plan = Plan {
        avg_active: total as f64 / t as f64,
        ..plan
    };

    info!(
        mode = %mode,
        t = plan.t,
        e = plan.e,
        params = plan.params,
        capacity = %plan.capacity,
        avg_active = format!("{:.2}", plan.avg_active),
        "Planned design"
    );
    Ok(plan)
}

/// Whether `t` rows satisfy the layer exposure policy for every category.
fn layer_policy_ok(t: usize, sizes: &[usize], policy: ExposurePolicy) -> bool {
    match policy {
        ExposurePolicy::Exact => sizes.iter().all(|&q| t % q == 0),
        ExposurePolicy::Soft { tolerance_cv } => sizes
            .iter()
            .all(|&q| balanced_cv(t, q) <= tolerance_cv + f64::EPSILON),
    }
}

/// Coefficient of variation of `t` exposures spread as evenly as possible
/// over `q` elements.
pub fn balanced_cv(t: usize, q: usize) -> f64 {
    if q == 0 || t == 0 {
        return 0.0;
    }
    let frac = (t % q) as f64 / q as f64;
    let mean = t as f64 / q as f64;
    (frac * (1.0 - frac)).sqrt() / mean
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_plan(sizes: &[(&str, usize)], cap: usize) -> std::result::Result<Plan, InfeasibleError> {
        let layout = Layout::from_sizes(sizes).unwrap();
        let cfg = PlannerConfig::default();
        let bounds = (cfg.min_active, cap.min(layout.len()));
        plan(&layout, StudyMode::Grid, bounds, &cfg)
    }

    #[test]
    fn test_grid_plan_three_by_four() {
        let plan = grid_plan(&[("A", 4), ("B", 4), ("C", 4)], 4).unwrap();
        assert_eq!(plan.params, 10);
        assert!(plan.t >= plan.params + 3);
        assert!(plan.e >= 3);
        for c in &plan.categories {
            assert_eq!(c.absences, plan.t - c.size * plan.e);
            assert!(c.absences >= plan.absence_min);
        }
        assert!(plan.total_activations() <= plan.t * plan.max_active);
        assert!(plan.total_activations() >= plan.t * plan.min_active);
        assert!(plan.t as u128 <= plan.capacity);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let a = grid_plan(&[("A", 3), ("B", 5), ("C", 2), ("D", 4)], 4).unwrap();
        let b = grid_plan(&[("A", 3), ("B", 5), ("C", 2), ("D", 4)], 4).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_initial_rows_exceed_capacity() {
        // Two categories with min_active 2: capacity is 2·2 = 4 patterns,
        // but P + safety = 3 + 3 = 6 rows are needed.
        let err = grid_plan(&[("A", 2), ("B", 2)], 4).unwrap_err();
        assert!(matches!(
            err,
            InfeasibleError::InitialRowsExceedCapacity { capacity: 4, .. }
        ));
    }

    #[test]
    fn test_capacity_exhausted_names_tradeoff() {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 2), ("C", 2)]).unwrap();
        let cfg = PlannerConfig {
            min_exposure: 50,
            ..PlannerConfig::default()
        };
        let err = plan(&layout, StudyMode::Grid, (2, 3), &cfg).unwrap_err();
        match err {
            InfeasibleError::CapacityExhausted {
                capacity,
                min_exposure,
                ..
            } => {
                assert_eq!(capacity, 20);
                assert_eq!(min_exposure, 50);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_row_activity_unreachable() {
        // Three elements per category with absence ratio 2 caps E at T/5, so
        // three categories average at most 1.8 actives per row.
        let err = grid_plan(&[("A", 3), ("B", 3), ("C", 3)], 4).unwrap_err();
        assert!(matches!(
            err,
            InfeasibleError::RowActivityUnreachable { min_active: 2, .. }
        ));
    }

    #[test]
    fn test_layer_exact_requires_divisible_t() {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 3), ("C", 4)]).unwrap();
        let cfg = PlannerConfig::default();
        let plan = plan(&layout, StudyMode::Layer, (3, 3), &cfg).unwrap();
        assert_eq!(plan.t % 12, 0);
        assert!(plan.categories.iter().all(|c| c.remainder == 0));
        assert_eq!(plan.absence_min, 0);
        assert!((plan.avg_active - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_layer_soft_allows_remainder() {
        let layout = Layout::from_sizes(&[("A", 3), ("B", 4)]).unwrap();
        let cfg = PlannerConfig {
            exposure: ExposurePolicy::Soft { tolerance_cv: 0.2 },
            ..PlannerConfig::default()
        };
        let plan = plan(&layout, StudyMode::Layer, (2, 2), &cfg).unwrap();
        for c in &plan.categories {
            assert!(balanced_cv(plan.t, c.size) <= 0.2 + 1e-12);
            assert_eq!(c.activations(), plan.t);
        }
    }

    #[test]
    fn test_with_rows_keeps_exposure() {
        let layout = Layout::from_sizes(&[("A", 4), ("B", 4), ("C", 4)]).unwrap();
        let cfg = PlannerConfig {
            min_active: 1,
            ..PlannerConfig::default()
        };
        let base = plan(&layout, StudyMode::Grid, (1, 3), &cfg).unwrap();
        let bumped = base.with_rows(base.t + 1).unwrap();
        assert_eq!(bumped.e, base.e);
        assert_eq!(bumped.t, base.t + 1);
        for (a, b) in base.categories.iter().zip(&bumped.categories) {
            assert_eq!(b.absences, a.absences + 1);
        }
        assert!(base.with_rows(base.capacity as usize + 1).is_none());
    }

    #[test]
    fn test_with_rows_rejects_unreachable_activity() {
        // 36 activations fill 18 rows at exactly two per row; one more row
        // would need a row below min_active.
        let base = grid_plan(&[("A", 4), ("B", 4), ("C", 4)], 4).unwrap();
        assert_eq!(base.total_activations(), base.t * 2);
        assert!(base.with_rows(base.t + 1).is_none());
    }

    #[test]
    fn test_balanced_cv() {
        assert_eq!(balanced_cv(12, 4), 0.0);
        // 13 over 4: counts 4,3,3,3 → std ≈ 0.433, mean 3.25
        assert!((balanced_cv(13, 4) - 0.1332).abs() < 1e-3);
    }
}
