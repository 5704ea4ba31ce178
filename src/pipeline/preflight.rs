//! Preflight - locks the row count before any respondent is built.
//!
//! K_i: Runs once per study, single-threaded, from a fixed seed.
//! K_i: Tries the planned T and at most three bumps, never past capacity.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use super::PREFLIGHT_SEED_OFFSET;
use crate::builder::RowBuilder;
use crate::models::{BuilderConfig, InfeasibleError, Layout, PreflightPolicy};
use crate::planner::Plan;

/// Largest number of single-row bumps tried after the planned T.
pub const MAX_BUMPS: usize = 3;

/// Result of the preflight.
#[derive(Debug, Clone, PartialEq)]
pub struct Preflight {
    /// Plan every respondent will use
    pub plan: Plan,
    /// Whether a build was observed at `plan.t`
    pub locked: bool,
    /// Rows added to the planned T
    pub bumps: usize,
}

/// Verify that `plan.t` (or a small bump of it) is buildable.
///
/// On failure, `Abort` surfaces [`InfeasibleError::PreflightFailed`] and
/// `Degrade` keeps the planned T with a warning.
pub fn lock_rows(
    layout: &Layout,
    plan: &Plan,
    builder: &BuilderConfig,
    base_seed: u64,
    policy: PreflightPolicy,
) -> Result<Preflight, InfeasibleError> {
    let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(PREFLIGHT_SEED_OFFSET));

    if RowBuilder::new(layout, plan, builder)
        .build_with_restarts(&mut rng)
        .is_built()
    {
        info!(t = plan.t, "Preflight locked T");
        return Ok(Preflight {
            plan: plan.clone(),
            locked: true,
            bumps: 0,
        });
    }

    let mut max_tried = plan.t;
    for extra in 1..=MAX_BUMPS {
        let t = plan.t + extra;
        if t as u128 > plan.capacity {
            break;
        }
        max_tried = t;
        let Some(bumped) = plan.with_rows(t) else {
            continue;
        };
        if RowBuilder::new(layout, &bumped, builder)
            .build_with_restarts(&mut rng)
            .is_built()
        {
            info!(from = plan.t, to = t, "Preflight bumped T");
            return Ok(Preflight {
                plan: bumped,
                locked: true,
                bumps: extra,
            });
        }
    }

    let err = InfeasibleError::PreflightFailed {
        t: plan.t,
        max_tried,
    };
    match policy {
        PreflightPolicy::Abort => Err(err),
        PreflightPolicy::Degrade => {
            warn!(
                t = plan.t,
                error = %err,
                "Preflight could not lock T, continuing in rebuild-until-pass mode"
            );
            Ok(Preflight {
                plan: plan.clone(),
                locked: false,
                bumps: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlannerConfig, StudyMode};
    use crate::planner::plan;

    #[test]
    fn test_lock_feasible_plan() {
        let layout = Layout::from_sizes(&[("A", 3), ("B", 3), ("C", 3), ("D", 3)]).unwrap();
        let plan = plan(&layout, StudyMode::Grid, (2, 4), &PlannerConfig::default()).unwrap();
        let lock = lock_rows(
            &layout,
            &plan,
            &BuilderConfig::default(),
            12345,
            PreflightPolicy::Abort,
        )
        .unwrap();
        assert!(lock.locked);
        assert!(lock.plan.t >= plan.t && lock.plan.t <= plan.t + MAX_BUMPS);
        assert_eq!(lock.plan.e, plan.e);
    }

    /// A plan no row mix can satisfy: every row must be fully active but
    /// the pools carry absences.
    fn hopeless() -> (Layout, Plan) {
        let layout = Layout::from_sizes(&[("A", 3), ("B", 3), ("C", 3), ("D", 3)]).unwrap();
        let mut plan = plan(&layout, StudyMode::Grid, (2, 4), &PlannerConfig::default()).unwrap();
        plan.min_active = 4;
        (layout, plan)
    }

    #[test]
    fn test_abort_policy_surfaces_error() {
        let (layout, plan) = hopeless();
        let builder = BuilderConfig {
            restarts: 2,
            swap_tries: 10,
            ..BuilderConfig::default()
        };
        let err = lock_rows(&layout, &plan, &builder, 1, PreflightPolicy::Abort).unwrap_err();
        assert!(matches!(err, InfeasibleError::PreflightFailed { t, .. } if t == plan.t));
    }

    #[test]
    fn test_degrade_policy_keeps_plan() {
        let (layout, plan) = hopeless();
        let builder = BuilderConfig {
            restarts: 2,
            swap_tries: 10,
            ..BuilderConfig::default()
        };
        let lock = lock_rows(&layout, &plan, &builder, 1, PreflightPolicy::Degrade).unwrap();
        assert!(!lock.locked);
        assert_eq!(lock.plan, plan);
    }
}
