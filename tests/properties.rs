//! Property tests for the deterministic parts of the pipeline.

use conjoint::builder::plan_row_mix;
use conjoint::models::{Layout, PlannerConfig, RowMixMode, StudyMode};
use conjoint::pipeline::attempt_seed;
use conjoint::planner::{plan, visible_capacity};
use proptest::prelude::*;

fn layout_of(sizes: &[usize]) -> Layout {
    let named: Vec<(String, usize)> = sizes
        .iter()
        .enumerate()
        .map(|(i, &q)| (format!("C{i}"), q))
        .collect();
    Layout::from_sizes(&named).unwrap()
}

proptest! {
    #[test]
    fn planner_is_idempotent(
        sizes in prop::collection::vec(2usize..=5, 2..=5),
        layer in any::<bool>(),
    ) {
        let layout = layout_of(&sizes);
        let mode = if layer { StudyMode::Layer } else { StudyMode::Grid };
        let bounds = match mode {
            StudyMode::Grid => (2, sizes.len().min(4)),
            StudyMode::Layer => (sizes.len(), sizes.len()),
        };
        let cfg = PlannerConfig::default();

        let first = plan(&layout, mode, bounds, &cfg);
        let second = plan(&layout, mode, bounds, &cfg);
        prop_assert_eq!(&first, &second);

        if let Ok(p) = first {
            prop_assert!(p.t >= p.params + cfg.safety_rows);
            prop_assert!(p.t as u128 <= p.capacity);
            prop_assert!(p.e >= cfg.min_exposure);
        }
    }

    #[test]
    fn capacity_grows_with_elements(
        sizes in prop::collection::vec(1usize..=6, 1..=6),
        bump in 0usize..6,
        min_active in 0usize..4,
    ) {
        let mut bigger = sizes.clone();
        let idx = bump % bigger.len();
        bigger[idx] += 1;

        prop_assert!(
            visible_capacity(&sizes, min_active, None)
                <= visible_capacity(&bigger, min_active, None)
        );
        // Relaxing the activity floor never removes patterns.
        prop_assert!(
            visible_capacity(&sizes, min_active + 1, None)
                <= visible_capacity(&sizes, min_active, None)
        );
    }

    #[test]
    fn row_mix_hits_total_within_bounds(
        t in 1usize..40,
        min_active in 0usize..4,
        spread in 0usize..4,
        fill in 0.0f64..=1.0,
        widen in 0.0f64..=1.0,
        dense in any::<bool>(),
    ) {
        let max_active = min_active + spread;
        let lo = t * min_active;
        let hi = t * max_active;
        let total = lo + ((hi - lo) as f64 * fill).round() as usize;
        let mode = if dense { RowMixMode::Dense } else { RowMixMode::Wide };

        let targets = plan_row_mix(t, total, min_active, max_active, mode, widen).unwrap();
        prop_assert_eq!(targets.len(), t);
        prop_assert_eq!(targets.iter().sum::<usize>(), total);
        prop_assert!(targets.iter().all(|&k| (min_active..=max_active).contains(&k)));

        prop_assert!(plan_row_mix(t, hi + 1, min_active, max_active, mode, widen).is_none());
    }

    #[test]
    fn attempt_seeds_are_pure(base in any::<u64>(), respondent in 1usize..10_000, attempt in 1u64..10_000) {
        prop_assert_eq!(
            attempt_seed(base, respondent, attempt),
            attempt_seed(base, respondent, attempt)
        );
        prop_assert_ne!(
            attempt_seed(base, respondent, attempt),
            attempt_seed(base, respondent, attempt + 1)
        );
    }
}
