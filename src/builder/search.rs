//! Local-search repair over aligned token rows.
//!
//! K_i: Every move swaps two slots of the same category between two rows, so
//! per-element exposures and per-category absences never change.
//! K_i: Committed rows (indices already processed) are always within bounds
//! and pairwise distinct.

use rand::Rng;
use std::collections::HashSet;

use super::NoSolution;
use crate::models::{Row, Slot};

/// Inclusive per-row active-count bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityBounds {
    pub min: usize,
    pub max: usize,
}

impl ActivityBounds {
    pub fn contains(&self, active: usize) -> bool {
        (self.min..=self.max).contains(&active)
    }
}

fn deviation(row: &Row, target: usize) -> usize {
    let k = row.active_count();
    let d = k.abs_diff(target);
    d * d
}

/// Whether two rows hold the same slots everywhere except category `skip`.
fn agree_except(a: &Row, b: &Row, skip: usize) -> bool {
    a.slots
        .iter()
        .zip(&b.slots)
        .enumerate()
        .all(|(c, (x, y))| c == skip || x == y)
}

fn swap_slot(rows: &mut [Row], a: usize, b: usize, c: usize) {
    let tmp = rows[a].slots[c];
    rows[a].slots[c] = rows[b].slots[c];
    rows[b].slots[c] = tmp;
}

/// Process rows in order, repairing each row that is out of bounds or
/// duplicates an earlier row.
///
/// For a violating row `r`, up to `swap_tries` random (earlier row, category)
/// swaps are scored; the swap with the smallest squared deviation from the
/// targets at both rows is applied, among swaps that leave both rows within
/// bounds and all committed signatures distinct.
pub fn repair<R: Rng>(
    rows: &mut [Row],
    targets: &[usize],
    bounds: ActivityBounds,
    swap_tries: usize,
    rng: &mut R,
) -> Result<(), NoSolution> {
    let categories = rows.first().map_or(0, |r| r.slots.len());
    let mut seen: HashSet<Vec<Slot>> = HashSet::with_capacity(rows.len());

    for r in 0..rows.len() {
        let row = &rows[r];
        if bounds.contains(row.active_count()) && !seen.contains(row.signature()) {
            seen.insert(row.slots.clone());
            continue;
        }

        let mut best: Option<(usize, usize, usize)> = None;
        for _ in 0..swap_tries {
            let rc = rng.gen_range(0..=r);
            let c = rng.gen_range(0..categories);
            if rows[rc].slots[c] == rows[r].slots[c] {
                continue;
            }

            // Equal slots were skipped, which covers rc == r.
            let identity_swap = agree_except(&rows[r], &rows[rc], c);
            swap_slot(rows, r, rc, c);

            let valid = bounds.contains(rows[r].active_count())
                && bounds.contains(rows[rc].active_count())
                && !seen.contains(rows[rc].signature())
                && (identity_swap || !seen.contains(rows[r].signature()));

            if valid {
                let score = deviation(&rows[r], targets[r]) + deviation(&rows[rc], targets[rc]);
                if best.map_or(true, |(_, _, s)| score < s) {
                    best = Some((rc, c, score));
                }
            }

            swap_slot(rows, r, rc, c);

            if matches!(best, Some((_, _, 0))) {
                break;
            }
        }

        let Some((rc, c, _)) = best else {
            return Err(NoSolution::NoValidSwap { row: r });
        };

        seen.remove(rows[rc].signature());
        swap_slot(rows, r, rc, c);
        seen.insert(rows[rc].slots.clone());
        seen.insert(rows[r].slots.clone());
    }

    Ok(())
}

/// Bring rows above the cap down by moving one of their active slots into a
/// row that is absent in the same category and has room.
///
/// Swaps that would break the minimum at either row or duplicate any other
/// row are skipped.
pub fn enforce_cap(rows: &mut [Row], bounds: ActivityBounds, tries: usize) -> Result<(), NoSolution> {
    let over = |rows: &[Row]| -> Vec<usize> {
        (0..rows.len())
            .filter(|&i| rows[i].active_count() > bounds.max)
            .collect()
    };

    let mut over_idx = over(rows);
    let mut attempt = 0;
    while !over_idx.is_empty() && attempt < tries {
        attempt += 1;
        let r = over_idx[attempt % over_idx.len()];
        let active: Vec<usize> = (0..rows[r].slots.len())
            .filter(|&c| rows[r].slots[c].is_active())
            .collect();
        let c = active[attempt % active.len()];

        let mut candidates: Vec<usize> = (0..rows.len())
            .filter(|&s| s != r && !rows[s].slots[c].is_active())
            .collect();
        // Rows with room first.
        candidates.sort_by_key(|&s| rows[s].active_count() >= bounds.max);

        for s in candidates {
            swap_slot(rows, r, s, c);
            let in_bounds = bounds.contains(rows[r].active_count())
                && bounds.contains(rows[s].active_count());
            if in_bounds && is_unique_at(rows, r) && is_unique_at(rows, s) {
                break;
            }
            swap_slot(rows, r, s, c);
        }

        over_idx = over(rows);
    }

    if over_idx.is_empty() {
        Ok(())
    } else {
        Err(NoSolution::CapUnresolved {
            rows: over_idx.len(),
        })
    }
}

fn is_unique_at(rows: &[Row], i: usize) -> bool {
    rows.iter()
        .enumerate()
        .all(|(j, other)| j == i || other.slots != rows[i].slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn row(slots: &[Option<u16>]) -> Row {
        Row::new(
            slots
                .iter()
                .map(|s| s.map_or(Slot::Absent, Slot::Active))
                .collect(),
        )
    }

    #[test]
    fn test_repair_separates_duplicates() {
        // Row 3 repeats row 0 and must trade a slot with row 1 or 2.
        let mut rows = vec![
            row(&[Some(0), Some(0), None]),
            row(&[Some(1), Some(1), Some(0)]),
            row(&[None, Some(1), Some(1)]),
            row(&[Some(0), Some(0), None]),
        ];
        let before = rows.clone();
        let bounds = ActivityBounds { min: 1, max: 3 };
        let mut rng = StdRng::seed_from_u64(7);
        repair(&mut rows, &[2, 2, 2, 2], bounds, 500, &mut rng).unwrap();

        let unique: HashSet<_> = rows.iter().map(|r| r.slots.clone()).collect();
        assert_eq!(unique.len(), rows.len());

        // Column multisets are untouched.
        for c in 0..3 {
            let mut a: Vec<_> = before.iter().map(|r| r.slots[c]).collect();
            let mut b: Vec<_> = rows.iter().map(|r| r.slots[c]).collect();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_repair_fails_on_first_row_violation() {
        let mut rows = vec![row(&[None, None]), row(&[Some(0), Some(0)])];
        let bounds = ActivityBounds { min: 1, max: 2 };
        let mut rng = StdRng::seed_from_u64(1);
        let err = repair(&mut rows, &[1, 1], bounds, 100, &mut rng).unwrap_err();
        assert_eq!(err, NoSolution::NoValidSwap { row: 0 });
    }

    #[test]
    fn test_enforce_cap_moves_actives() {
        let mut rows = vec![
            row(&[Some(0), Some(0), Some(0)]),
            row(&[Some(1), None, None]),
            row(&[None, Some(1), None]),
        ];
        let bounds = ActivityBounds { min: 1, max: 2 };
        enforce_cap(&mut rows, bounds, 100).unwrap();
        assert!(rows.iter().all(|r| bounds.contains(r.active_count())));
        assert!((0..rows.len()).all(|i| is_unique_at(&rows, i)));
    }

    #[test]
    fn test_enforce_cap_gives_up() {
        // No row is absent anywhere, so nothing can move.
        let mut rows = vec![row(&[Some(0), Some(0)]), row(&[Some(1), Some(1)])];
        let bounds = ActivityBounds { min: 1, max: 1 };
        let err = enforce_cap(&mut rows, bounds, 10).unwrap_err();
        assert_eq!(err, NoSolution::CapUnresolved { rows: 2 });
    }
}
