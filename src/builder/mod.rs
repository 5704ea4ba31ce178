//! Row Builder - constructs one respondent's rows from shuffled token pools.
//!
//! Epistemic foundation:
//! - K_i: Pools fix exposures exactly; repair only ever swaps within a
//!   category column, so exposures survive every step
//! - B_i: A shuffled assembly may be unrepairable → BuildOutcome::NoSolution
//! - I^R: Search budgets come from BuilderConfig
//!
//! A failed attempt is not an error. The caller reseeds and tries again.

mod row_mix;
mod search;

pub use row_mix::plan_row_mix;
pub use search::{enforce_cap, repair, ActivityBounds};

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{BuilderConfig, Layout, Row, Slot, StudyMode};
use crate::planner::Plan;

/// Why a single build attempt produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoSolution {
    /// A category's absence count fell below the plan's floor
    AbsenceFloor {
        category: usize,
        absences: usize,
        required: usize,
    },
    /// A category's pool did not come out at T tokens
    PoolMismatch { category: usize, len: usize },
    /// Total activations do not fit the per-row bounds
    RowMixUnrepresentable { total: usize },
    /// No swap could repair this row within the budget
    NoValidSwap { row: usize },
    /// Rows still above the cap after the hard-cap pass
    CapUnresolved { rows: usize },
    /// Final uniqueness or bounds check failed
    FinalValidation,
}

impl std::fmt::Display for NoSolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbsenceFloor {
                category,
                absences,
                required,
            } => write!(
                f,
                "category {category} has {absences} absences, need {required}"
            ),
            Self::PoolMismatch { category, len } => {
                write!(f, "category {category} pool has {len} tokens")
            }
            Self::RowMixUnrepresentable { total } => {
                write!(f, "{total} activations not representable")
            }
            Self::NoValidSwap { row } => write!(f, "no valid swap for row {row}"),
            Self::CapUnresolved { rows } => write!(f, "{rows} rows above cap"),
            Self::FinalValidation => f.write_str("final validation failed"),
        }
    }
}

/// Result of a build attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(Vec<Row>),
    NoSolution(NoSolution),
}

impl BuildOutcome {
    pub fn is_built(&self) -> bool {
        matches!(self, Self::Built(_))
    }

    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Self::Built(rows) => Some(rows),
            Self::NoSolution(_) => None,
        }
    }
}

impl From<Result<Vec<Row>, NoSolution>> for BuildOutcome {
    fn from(result: Result<Vec<Row>, NoSolution>) -> Self {
        match result {
            Ok(rows) => Self::Built(rows),
            Err(reason) => Self::NoSolution(reason),
        }
    }
}

/// Builds respondent rows for a fixed plan.
///
/// Holds only shared references, so one builder serves every worker thread.
#[derive(Debug, Clone, Copy)]
pub struct RowBuilder<'a> {
    layout: &'a Layout,
    plan: &'a Plan,
    config: &'a BuilderConfig,
}

impl<'a> RowBuilder<'a> {
    pub fn new(layout: &'a Layout, plan: &'a Plan, config: &'a BuilderConfig) -> Self {
        Self {
            layout,
            plan,
            config,
        }
    }

    pub fn plan(&self) -> &Plan {
        self.plan
    }

    fn bounds(&self) -> ActivityBounds {
        ActivityBounds {
            min: self.plan.min_active,
            max: self.plan.max_active,
        }
    }

    /// One shuffled token column per category, each exactly T long.
    ///
    /// Grid pools hold every element E times plus absences. Layer pools hold
    /// every element ⌊T/q⌋ times plus one extra token for `remainder` distinct
    /// random elements.
    pub fn token_pools<R: Rng>(&self, rng: &mut R) -> Result<Vec<Vec<Slot>>, NoSolution> {
        let t = self.plan.t;
        let mut pools = Vec::with_capacity(self.plan.categories.len());

        for (index, category) in self.plan.categories.iter().enumerate() {
            if self.plan.mode == StudyMode::Grid && category.absences < self.plan.absence_min {
                return Err(NoSolution::AbsenceFloor {
                    category: index,
                    absences: category.absences,
                    required: self.plan.absence_min,
                });
            }

            let mut pool = Vec::with_capacity(t);
            for j in 0..category.size {
                pool.extend(std::iter::repeat(Slot::Active(j as u16)).take(category.exposure));
            }
            if category.remainder > 0 {
                let extra = rand::seq::index::sample(rng, category.size, category.remainder);
                pool.extend(extra.into_iter().map(|j| Slot::Active(j as u16)));
            }
            pool.extend(std::iter::repeat(Slot::Absent).take(category.absences));

            if pool.len() != t {
                return Err(NoSolution::PoolMismatch {
                    category: index,
                    len: pool.len(),
                });
            }
            pool.shuffle(rng);
            pools.push(pool);
        }

        Ok(pools)
    }

    /// A single assemble-and-repair attempt.
    pub fn build_once<R: Rng>(&self, rng: &mut R) -> BuildOutcome {
        self.try_build(rng).into()
    }

    fn try_build<R: Rng>(&self, rng: &mut R) -> Result<Vec<Row>, NoSolution> {
        let pools = self.token_pools(rng)?;
        let bounds = self.bounds();
        let total = self.plan.total_activations();

        let targets = plan_row_mix(
            self.plan.t,
            total,
            bounds.min,
            bounds.max,
            self.config.row_mix,
            self.config.widen,
        )
        .ok_or(NoSolution::RowMixUnrepresentable { total })?;

        let mut rows: Vec<Row> = (0..self.plan.t)
            .map(|i| Row::new(pools.iter().map(|pool| pool[i]).collect()))
            .collect();

        repair(&mut rows, &targets, bounds, self.config.swap_tries, rng)?;

        if self.plan.mode == StudyMode::Grid {
            enforce_cap(&mut rows, bounds, self.config.hard_cap_swap_tries)?;
        }

        if !self.is_valid(&rows) {
            return Err(NoSolution::FinalValidation);
        }
        Ok(rows)
    }

    /// Distinct signatures, T rows, every row within bounds.
    pub fn is_valid(&self, rows: &[Row]) -> bool {
        let bounds = self.bounds();
        let mut seen = HashSet::with_capacity(rows.len());
        rows.len() == self.plan.t
            && rows.iter().all(|row| {
                row.slots.len() == self.layout.len()
                    && bounds.contains(row.active_count())
                    && seen.insert(row.signature())
            })
    }

    /// Up to `restarts` attempts from the same random stream.
    ///
    /// Never changes T. Returns the last failure reason if every attempt fails.
    pub fn build_with_restarts<R: Rng>(&self, rng: &mut R) -> BuildOutcome {
        let mut last = NoSolution::FinalValidation;
        for attempt in 1..=self.config.restarts {
            match self.try_build(rng) {
                Ok(rows) => {
                    debug!(attempt, t = self.plan.t, "Build succeeded");
                    return BuildOutcome::Built(rows);
                }
                Err(reason) => {
                    if attempt % 50 == 0 {
                        debug!(attempt, restarts = self.config.restarts, %reason, "Build retrying");
                    }
                    last = reason;
                }
            }
        }
        BuildOutcome::NoSolution(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlannerConfig, RespondentDesign};
    use crate::planner::plan;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn grid_setup() -> (Layout, Plan) {
        let layout = Layout::from_sizes(&[("A", 4), ("B", 4), ("C", 4)]).unwrap();
        let plan = plan(&layout, StudyMode::Grid, (2, 3), &PlannerConfig::default()).unwrap();
        (layout, plan)
    }

    #[test]
    fn test_grid_build_respects_plan() {
        let (layout, plan) = grid_setup();
        let config = BuilderConfig::default();
        let builder = RowBuilder::new(&layout, &plan, &config);
        let mut rng = StdRng::seed_from_u64(12345);

        let rows = builder.build_with_restarts(&mut rng).into_rows().unwrap();
        assert!(builder.is_valid(&rows));

        let design = RespondentDesign::new(1, rows);
        assert!(design.has_unique_rows());
        assert!(design.exposure_counts(&layout).iter().all(|&n| n == plan.e));
        assert_eq!(design.absence_counts(layout.len()), plan.absences());
        assert!(design
            .active_counts()
            .iter()
            .all(|&k| (plan.min_active..=plan.max_active).contains(&k)));
    }

    #[test]
    fn test_build_is_reproducible() {
        let (layout, plan) = grid_setup();
        let config = BuilderConfig::default();
        let builder = RowBuilder::new(&layout, &plan, &config);

        let a = builder.build_with_restarts(&mut StdRng::seed_from_u64(99));
        let b = builder.build_with_restarts(&mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_layer_build_has_full_rows() {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 3), ("C", 4)]).unwrap();
        let plan = plan(&layout, StudyMode::Layer, (3, 3), &PlannerConfig::default()).unwrap();
        let config = BuilderConfig::default();
        let builder = RowBuilder::new(&layout, &plan, &config);

        let rows = builder
            .build_with_restarts(&mut StdRng::seed_from_u64(5))
            .into_rows()
            .unwrap();
        assert!(rows.iter().all(|r| r.active_count() == 3));

        let design = RespondentDesign::new(1, rows);
        assert!(design.has_unique_rows());
        let counts = design.exposure_counts(&layout);
        assert_eq!(&counts[0..2], &[plan.t / 2; 2]);
        assert_eq!(&counts[2..5], &[plan.t / 3; 3]);
        assert_eq!(&counts[5..9], &[plan.t / 4; 4]);
    }

    #[test]
    fn test_layer_remainder_goes_to_distinct_elements() {
        let layout = Layout::from_sizes(&[("A", 3), ("B", 4)]).unwrap();
        let plan0 = plan(&layout, StudyMode::Layer, (2, 2), &PlannerConfig::default()).unwrap();
        // 13 rows: A gets 4,4,5 in some order, B gets 3,3,3,4.
        let plan = Plan {
            t: 13,
            categories: plan0
                .categories
                .iter()
                .map(|c| crate::planner::CategoryPlan {
                    exposure: 13 / c.size,
                    remainder: 13 % c.size,
                    ..c.clone()
                })
                .collect(),
            ..plan0
        };
        let config = BuilderConfig::default();
        let builder = RowBuilder::new(&layout, &plan, &config);
        let pools = builder.token_pools(&mut StdRng::seed_from_u64(3)).unwrap();
        assert!(pools.iter().all(|p| p.len() == 13));

        let mut b_counts = [0usize; 4];
        for slot in &pools[1] {
            if let Slot::Active(j) = slot {
                b_counts[usize::from(*j)] += 1;
            }
        }
        let mut sorted = b_counts;
        sorted.sort();
        assert_eq!(sorted, [3, 3, 3, 4]);
    }

    #[test]
    fn test_absence_floor_is_no_solution() {
        let (layout, mut plan) = grid_setup();
        plan.absence_min = plan.t;
        let config = BuilderConfig::default();
        let builder = RowBuilder::new(&layout, &plan, &config);
        let outcome = builder.build_once(&mut StdRng::seed_from_u64(1));
        assert!(matches!(
            outcome,
            BuildOutcome::NoSolution(NoSolution::AbsenceFloor { category: 0, .. })
        ));
    }
}
