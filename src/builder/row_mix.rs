//! Target active-count sequences.
//!
//! Targets are soft: the repair search prefers swaps that move rows toward
//! them but never fails because of them. Only the sum and bounds are hard.

use crate::models::RowMixMode;

/// Per-row target active counts for `t` rows summing to `total`.
///
/// Returns `None` when `total` cannot be expressed with every row in
/// `[min_active, max_active]`.
pub fn plan_row_mix(
    t: usize,
    total: usize,
    min_active: usize,
    max_active: usize,
    mode: RowMixMode,
    widen: f64,
) -> Option<Vec<usize>> {
    if t == 0 || min_active > max_active {
        return None;
    }
    if total < t * min_active || total > t * max_active {
        return None;
    }

    let targets = match mode {
        RowMixMode::Dense => dense(t, total, min_active, max_active),
        RowMixMode::Wide => wide(t, total, min_active, max_active, widen),
    };
    debug_assert_eq!(targets.iter().sum::<usize>(), total);
    Some(targets)
}

/// Cluster at `min(max, max(min + 1, 4))`, then walk the rows round-robin
/// until the sum matches.
fn dense(t: usize, total: usize, min_active: usize, max_active: usize) -> Vec<usize> {
    let k0 = max_active.min((min_active + 1).max(4));
    let mut targets = vec![k0; t];
    let current = k0 * t;

    if total > current {
        let mut deficit = total - current;
        let mut i = 0;
        while deficit > 0 {
            let step = (max_active - targets[i]).min(deficit);
            targets[i] += step;
            deficit -= step;
            i = (i + 1) % t;
        }
    } else {
        let mut surplus = current - total;
        let mut i = 0;
        while surplus > 0 {
            let step = (targets[i] - min_active).min(surplus);
            targets[i] -= step;
            surplus -= step;
            i = (i + 1) % t;
        }
    }
    targets
}

/// Baseline `⌊total / t⌋`; `round(widen·t)` rows go one below it and the
/// same number plus the remainder go one above.
fn wide(t: usize, total: usize, min_active: usize, max_active: usize, widen: f64) -> Vec<usize> {
    let base = total / t;
    let remainder = total - base * t;
    let mut targets = vec![base; t];

    let can_widen = base > min_active && base < max_active;
    let pairs = if can_widen {
        let wanted = (widen.clamp(0.0, 1.0) * t as f64).round() as usize;
        wanted.min((t - remainder) / 2)
    } else {
        0
    };

    for target in targets.iter_mut().take(pairs) {
        *target -= 1;
    }
    for target in targets.iter_mut().skip(pairs).take(pairs + remainder) {
        *target += 1;
    }
    targets
}
