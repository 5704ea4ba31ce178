//! Column checks and per-respondent balance statistics.
//!
//! Everything here is exact integer or closed-form arithmetic; the numerical
//! checks live in the gate itself.

use nalgebra::DMatrix;
use std::collections::{BTreeMap, HashMap};

use super::DesignMatrix;
use crate::models::{
    CrossCorrelation, ExposureStats, Layout, RespondentDesign, RespondentDiagnostics, RowActivity,
};

/// Columns whose entries are all equal.
pub fn zero_variance_columns(x: &DMatrix<f64>) -> usize {
    x.column_iter()
        .filter(|col| {
            let first = col.get(0).copied().unwrap_or(0.0);
            col.iter().all(|&v| v == first)
        })
        .count()
}

/// Columns that repeat an earlier column bit-for-bit.
pub fn duplicate_column_pairs(x: &DMatrix<f64>) -> usize {
    let mut seen: HashMap<Vec<bool>, usize> = HashMap::with_capacity(x.ncols());
    let mut dups = 0;
    for (j, col) in x.column_iter().enumerate() {
        let key: Vec<bool> = col.iter().map(|&v| v != 0.0).collect();
        if seen.insert(key, j).is_some() {
            dups += 1;
        }
    }
    dups
}

/// Largest |Pearson r| between two columns from different categories.
///
/// Pairs involving a constant column are skipped. `None` when no pair
/// qualifies.
pub fn cross_category_correlation(x: &DesignMatrix) -> Option<CrossCorrelation> {
    let m = x.matrix();
    let n = m.nrows() as f64;
    if m.nrows() < 2 {
        return None;
    }

    let centered: Vec<(Vec<f64>, f64)> = m
        .column_iter()
        .map(|col| {
            let mean = col.sum() / n;
            let dev: Vec<f64> = col.iter().map(|&v| v - mean).collect();
            let norm = dev.iter().map(|d| d * d).sum::<f64>().sqrt();
            (dev, norm)
        })
        .collect();

    let categories = x.column_category();
    let mut best: Option<(f64, usize, usize)> = None;
    for a in 0..centered.len() {
        for b in (a + 1)..centered.len() {
            if categories[a] == categories[b] {
                continue;
            }
            let (da, na) = &centered[a];
            let (db, nb) = &centered[b];
            if *na == 0.0 || *nb == 0.0 {
                continue;
            }
            let r = da.iter().zip(db).map(|(p, q)| p * q).sum::<f64>() / (na * nb);
            if best.map_or(true, |(v, _, _)| r.abs() > v) {
                best = Some((r.abs(), a, b));
            }
        }
    }

    best.map(|(max_abs_r, a, b)| CrossCorrelation {
        max_abs_r,
        pair: (x.labels()[a].clone(), x.labels()[b].clone()),
    })
}

fn mean_std(values: &[usize]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<usize>() as f64 / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, var.sqrt())
}

fn cv(mean: f64, std_dev: f64) -> f64 {
    if mean > 0.0 {
        std_dev / mean
    } else {
        0.0
    }
}

/// Exposure balance across all elements and within each category.
pub fn exposure_stats(design: &RespondentDesign, layout: &Layout) -> ExposureStats {
    let counts = design.exposure_counts(layout);
    let (mean, std_dev) = mean_std(&counts);

    let mut max_category_cv: f64 = 0.0;
    let mut balanced = true;
    let mut start = 0;
    for category in layout.categories() {
        let slice = &counts[start..start + category.len()];
        let (m, s) = mean_std(slice);
        max_category_cv = max_category_cv.max(cv(m, s));
        balanced &= slice.windows(2).all(|w| w[0] == w[1]);
        start += category.len();
    }

    ExposureStats {
        counts,
        mean,
        std_dev,
        cv: cv(mean, std_dev),
        max_category_cv,
        balanced,
    }
}

/// Distribution of active counts over rows.
pub fn row_activity(design: &RespondentDesign) -> RowActivity {
    let counts = design.active_counts();
    let mut histogram = BTreeMap::new();
    for &k in &counts {
        *histogram.entry(k).or_insert(0) += 1;
    }
    let (mean, _) = mean_std(&counts);
    RowActivity {
        min: counts.iter().copied().min().unwrap_or(0),
        max: counts.iter().copied().max().unwrap_or(0),
        mean,
        histogram,
    }
}

/// All diagnostics for an accepted respondent.
pub fn diagnose(
    design: &RespondentDesign,
    layout: &Layout,
    indicator: &DesignMatrix,
) -> RespondentDiagnostics {
    RespondentDiagnostics {
        exposure: exposure_stats(design, layout),
        absences: design.absence_counts(layout.len()),
        activity: row_activity(design),
        cross_correlation: cross_category_correlation(indicator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Coding;
    use crate::models::{Row, Slot};

    #[test]
    fn test_zero_variance_and_duplicates() {
        let x = DMatrix::from_row_slice(
            3,
            4,
            &[
                1.0, 1.0, 0.0, 1.0, //
                1.0, 0.0, 1.0, 0.0, //
                1.0, 1.0, 0.0, 1.0,
            ],
        );
        assert_eq!(zero_variance_columns(&x), 1);
        assert_eq!(duplicate_column_pairs(&x), 1);
    }

    #[test]
    fn test_cross_correlation_ignores_same_category() {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 2)]).unwrap();
        // A_1 and B_1 always co-occur; A_1/A_2 are perfectly anti-correlated
        // but share a category.
        let design = RespondentDesign::new(
            1,
            vec![
                Row::new(vec![Slot::Active(0), Slot::Active(0)]),
                Row::new(vec![Slot::Active(1), Slot::Absent]),
                Row::new(vec![Slot::Active(0), Slot::Active(0)]),
                Row::new(vec![Slot::Active(1), Slot::Active(1)]),
            ],
        );
        let x = DesignMatrix::from_design(&design, &layout, Coding::Indicator);
        let corr = cross_category_correlation(&x).unwrap();
        assert!((corr.max_abs_r - 1.0).abs() < 1e-12);
        assert_eq!(corr.pair, ("A_1".to_string(), "B_1".to_string()));
    }

    #[test]
    fn test_exposure_stats_balance() {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 1)]).unwrap();
        let design = RespondentDesign::new(
            1,
            vec![
                Row::new(vec![Slot::Active(0), Slot::Active(0)]),
                Row::new(vec![Slot::Active(1), Slot::Absent]),
                Row::new(vec![Slot::Active(0), Slot::Active(0)]),
            ],
        );
        let stats = exposure_stats(&design, &layout);
        assert_eq!(stats.counts, vec![2, 1, 2]);
        assert!(!stats.balanced);
        // Category A: counts 2,1 → mean 1.5, std 0.5
        assert!((stats.max_category_cv - 1.0 / 3.0).abs() < 1e-12);

        let activity = row_activity(&design);
        assert_eq!((activity.min, activity.max), (1, 2));
        assert_eq!(activity.histogram[&2], 2);
    }
}
