//! Counting helpers for the planner.
//!
//! K_i: Both functions are pure and depend only on category sizes.

/// Main-effects parameter count under reference coding: `1 + Σ(q_c − 1)`.
pub fn params_main_effects(sizes: &[usize]) -> usize {
    let total: usize = sizes.iter().sum();
    total + 1 - sizes.len()
}

/// Absence-collapsed count of distinct row patterns with an active count in
/// `[min_active, max_active]`.
///
/// Every category contributes either "absent" (one way) or one of its `q_c`
/// elements, so the count of patterns with exactly k actives is the x^k
/// coefficient of Π(1 + q_c·x). Saturates instead of overflowing.
pub fn visible_capacity(sizes: &[usize], min_active: usize, max_active: Option<usize>) -> u128 {
    let c = sizes.len();
    let mut coeff = vec![0u128; c + 1];
    coeff[0] = 1;

    for &q in sizes {
        let mut next = vec![0u128; c + 1];
        for k in 0..=c {
            if coeff[k] == 0 {
                continue;
            }
            next[k] = next[k].saturating_add(coeff[k]);
            if k < c {
                next[k + 1] = next[k + 1].saturating_add(coeff[k].saturating_mul(q as u128));
            }
        }
        coeff = next;
    }

    let hi = max_active.map_or(c, |m| m.min(c));
    if min_active > hi {
        return 0;
    }
    coeff[min_active..=hi]
        .iter()
        .fold(0u128, |acc, &x| acc.saturating_add(x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_main_effects() {
        assert_eq!(params_main_effects(&[4, 4, 4]), 10);
        assert_eq!(params_main_effects(&[2]), 2);
        assert_eq!(params_main_effects(&[3, 5, 2, 4]), 11);
    }

    #[test]
    fn test_visible_capacity_small() {
        // Two categories of 2: patterns by active count are 1, 4, 4.
        assert_eq!(visible_capacity(&[2, 2], 0, None), 9);
        assert_eq!(visible_capacity(&[2, 2], 1, None), 8);
        assert_eq!(visible_capacity(&[2, 2], 2, None), 4);
        assert_eq!(visible_capacity(&[2, 2], 1, Some(1)), 4);
    }

    #[test]
    fn test_visible_capacity_full_activity_is_product() {
        assert_eq!(visible_capacity(&[3, 4, 5], 3, Some(3)), 60);
    }

    #[test]
    fn test_visible_capacity_empty_window() {
        assert_eq!(visible_capacity(&[3, 3], 3, None), 0);
        assert_eq!(visible_capacity(&[3, 3, 3], 2, Some(1)), 0);
    }

    #[test]
    fn test_visible_capacity_saturates() {
        let sizes = vec![1000usize; 40];
        assert_eq!(visible_capacity(&sizes, 0, None), u128::MAX);
    }
}
