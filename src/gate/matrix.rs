//! Design-matrix expansion of a respondent's rows.

use nalgebra::DMatrix;

use crate::models::{category_offsets, Layout, RespondentDesign, Slot, StudyMode};

/// How rows are expanded into columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coding {
    /// One 0/1 column per element
    Indicator,
    /// One column per element of a full-coded category, then all but the
    /// first element of every other category
    Reference,
}

impl Coding {
    /// Coding the gate uses for a study mode.
    ///
    /// Layer rows always carry one element per category, so indicator
    /// columns of any two categories sum to the same all-ones vector.
    pub fn for_mode(mode: StudyMode) -> Self {
        match mode {
            StudyMode::Grid => Self::Indicator,
            StudyMode::Layer => Self::Reference,
        }
    }
}

/// A respondent's rows as a dense 0/1 matrix with column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    labels: Vec<String>,
    /// Category index of each column
    column_category: Vec<usize>,
}

impl DesignMatrix {
    /// Wrap an existing matrix. `labels` and `column_category` must have one
    /// entry per column.
    pub fn new(matrix: DMatrix<f64>, labels: Vec<String>, column_category: Vec<usize>) -> Self {
        debug_assert_eq!(matrix.ncols(), labels.len());
        debug_assert_eq!(matrix.ncols(), column_category.len());
        Self {
            matrix,
            labels,
            column_category,
        }
    }

    /// Expand `design` under `coding`.
    pub fn from_design(design: &RespondentDesign, layout: &Layout, coding: Coding) -> Self {
        let offsets = category_offsets(layout);
        let full_category = layout
            .categories()
            .iter()
            .position(|c| c.len() >= 2)
            .unwrap_or(0);

        // (category, element) pairs that get a column, in layout order
        let mut kept = Vec::with_capacity(layout.total_elements());
        for (c, category) in layout.categories().iter().enumerate() {
            let skip_first = coding == Coding::Reference && c != full_category;
            for j in usize::from(skip_first)..category.len() {
                kept.push((c, j));
            }
        }

        let mut column_of = vec![None; layout.total_elements()];
        for (col, &(c, j)) in kept.iter().enumerate() {
            column_of[offsets[c] + j] = Some(col);
        }

        let mut matrix = DMatrix::<f64>::zeros(design.len(), kept.len());
        for (i, row) in design.rows.iter().enumerate() {
            for (c, slot) in row.slots.iter().enumerate() {
                if let Slot::Active(j) = slot {
                    if let Some(col) = column_of[offsets[c] + usize::from(*j)] {
                        matrix[(i, col)] = 1.0;
                    }
                }
            }
        }

        let labels = kept
            .iter()
            .map(|&(c, j)| layout.categories()[c].elements[j].clone())
            .collect();
        let column_category = kept.iter().map(|&(c, _)| c).collect();

        Self::new(matrix, labels, column_category)
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn column_category(&self) -> &[usize] {
        &self.column_category
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Row `i` as 0/1 integers, for CSV output.
    pub fn row_bits(&self, i: usize) -> Vec<u8> {
        self.matrix.row(i).iter().map(|&v| u8::from(v != 0.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;

    fn design() -> (Layout, RespondentDesign) {
        let layout = Layout::from_sizes(&[("A", 2), ("B", 3)]).unwrap();
        let rows = vec![
            Row::new(vec![Slot::Active(0), Slot::Active(2)]),
            Row::new(vec![Slot::Active(1), Slot::Absent]),
            Row::new(vec![Slot::Absent, Slot::Active(1)]),
        ];
        (layout, RespondentDesign::new(1, rows))
    }

    #[test]
    fn test_indicator_expansion() {
        let (layout, design) = design();
        let x = DesignMatrix::from_design(&design, &layout, Coding::Indicator);
        assert_eq!((x.nrows(), x.ncols()), (3, 5));
        assert_eq!(x.labels(), ["A_1", "A_2", "B_1", "B_2", "B_3"]);
        assert_eq!(x.column_category(), [0, 0, 1, 1, 1]);
        assert_eq!(x.row_bits(0), vec![1, 0, 0, 0, 1]);
        assert_eq!(x.row_bits(2), vec![0, 0, 0, 1, 0]);
    }

    #[test]
    fn test_reference_expansion_drops_first_of_later_categories() {
        let (layout, design) = design();
        let x = DesignMatrix::from_design(&design, &layout, Coding::Reference);
        assert_eq!(x.labels(), ["A_1", "A_2", "B_2", "B_3"]);
        assert_eq!(x.row_bits(0), vec![1, 0, 0, 1]);
    }

    #[test]
    fn test_reference_skips_singleton_full_category() {
        let layout = Layout::from_sizes(&[("A", 1), ("B", 3)]).unwrap();
        let design = RespondentDesign::new(1, vec![Row::new(vec![Slot::Active(0), Slot::Active(1)])]);
        let x = DesignMatrix::from_design(&design, &layout, Coding::Reference);
        assert_eq!(x.labels(), ["B_1", "B_2", "B_3"]);
    }
}
