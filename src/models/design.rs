//! Layout, row and design types for conjoint.
//!
//! K_i: These types represent the core data flow through the pipeline.
//! The core only ever manipulates element identifiers; any payload attached to
//! an element (image, text) lives with the caller and is looked up by id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use super::{ConjointError, Result};

/// One row as shown to a respondent: category name to element id (or null).
pub type Task = Map<String, Value>;

/// Study mode.
///
/// K_i: Grid rows carry between `min_active` and a cap of active categories;
/// layer rows carry exactly one element from every category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyMode {
    /// K-of-N active categories per row, absences allowed
    #[default]
    Grid,
    /// Exactly one active element per category per row
    Layer,
}

impl std::fmt::Display for StudyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grid => f.write_str("grid"),
            Self::Layer => f.write_str("layer"),
        }
    }
}

/// A named category with its ordered element identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Unique category name
    pub name: String,
    /// Opaque element identifiers, in display order
    pub elements: Vec<String>,
}

impl Category {
    /// Category with generated ids `<name>_1 .. <name>_<count>`.
    pub fn with_count(name: impl Into<String>, count: usize) -> Self {
        let name = name.into();
        let elements = (1..=count).map(|j| format!("{name}_{j}")).collect();
        Self { name, elements }
    }

    /// Number of elements in this category.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Validated category layout.
///
/// K_i: At least one category, every category non-empty, names unique,
/// element ids unique across the whole layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Category>", into = "Vec<Category>")]
pub struct Layout {
    categories: Vec<Category>,
}

impl Layout {
    /// Validate and wrap a list of categories.
    pub fn new(categories: Vec<Category>) -> Result<Self> {
        if categories.is_empty() {
            return Err(ConjointError::InvalidLayout(
                "at least one category is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for category in &categories {
            if category.is_empty() {
                return Err(ConjointError::InvalidLayout(format!(
                    "category '{}' has no elements",
                    category.name
                )));
            }
            if category.len() > usize::from(u16::MAX) {
                return Err(ConjointError::InvalidLayout(format!(
                    "category '{}' has too many elements ({})",
                    category.name,
                    category.len()
                )));
            }
            if !names.insert(category.name.as_str()) {
                return Err(ConjointError::InvalidLayout(format!(
                    "duplicate category name '{}'",
                    category.name
                )));
            }
            for id in &category.elements {
                if !ids.insert(id.as_str()) {
                    return Err(ConjointError::InvalidLayout(format!(
                        "duplicate element id '{id}'"
                    )));
                }
            }
        }

        Ok(Self { categories })
    }

    /// Convenience constructor from `(name, element count)` pairs.
    pub fn from_sizes<S: AsRef<str>>(sizes: &[(S, usize)]) -> Result<Self> {
        Self::new(
            sizes
                .iter()
                .map(|(name, count)| Category::with_count(name.as_ref(), *count))
                .collect(),
        )
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Element count per category, in layout order.
    pub fn sizes(&self) -> Vec<usize> {
        self.categories.iter().map(Category::len).collect()
    }

    /// Total number of elements across all categories (M).
    pub fn total_elements(&self) -> usize {
        self.categories.iter().map(Category::len).sum()
    }

    /// All element ids, category by category.
    pub fn element_ids(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .flat_map(|c| c.elements.iter().map(String::as_str))
    }

    /// Stable textual fingerprint of names and ids, used to match checkpoints.
    pub fn fingerprint(&self) -> String {
        self.categories
            .iter()
            .map(|c| format!("{}[{}]", c.name, c.elements.join(",")))
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl TryFrom<Vec<Category>> for Layout {
    type Error = ConjointError;

    fn try_from(categories: Vec<Category>) -> Result<Self> {
        Self::new(categories)
    }
}

impl From<Layout> for Vec<Category> {
    fn from(layout: Layout) -> Self {
        layout.categories
    }
}

/// The content of one category slot in a row.
///
/// `Active` holds the element's position within its category.
/// `Absent < Active(_)` so signatures sort absences first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Absent,
    Active(u16),
}

impl Slot {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active(_))
    }
}

/// One vignette: a slot per category, in layout order.
///
/// K_i: Because slots are stored in layout order, the slot vector itself is
/// the canonical signature (sorted (category, element-or-absent) pairs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    pub slots: Vec<Slot>,
}

impl Row {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Number of categories with an active element.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_active()).count()
    }

    /// Canonical signature used for per-respondent uniqueness.
    pub fn signature(&self) -> &[Slot] {
        &self.slots
    }

    /// Map to `category name -> element id or null`, keys in layout order.
    pub fn to_task(&self, layout: &Layout) -> Task {
        layout
            .categories()
            .iter()
            .zip(&self.slots)
            .map(|(category, slot)| {
                let element = match slot {
                    Slot::Active(j) => category
                        .elements
                        .get(usize::from(*j))
                        .map_or(Value::Null, |id| Value::String(id.clone())),
                    Slot::Absent => Value::Null,
                };
                (category.name.clone(), element)
            })
            .collect()
    }
}

/// One respondent's complete set of rows.
///
/// K_i: Exactly T rows with pairwise-distinct signatures. Owned by a single
/// build attempt and never repaired across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondentDesign {
    /// 1-based respondent id
    pub respondent: usize,
    /// Ordered rows
    pub rows: Vec<Row>,
}

impl RespondentDesign {
    pub fn new(respondent: usize, rows: Vec<Row>) -> Self {
        Self { respondent, rows }
    }

    /// Number of rows (T).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether every row signature is distinct.
    pub fn has_unique_rows(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.rows.len());
        self.rows.iter().all(|r| seen.insert(r.signature()))
    }

    /// Active-category count of each row.
    pub fn active_counts(&self) -> Vec<usize> {
        self.rows.iter().map(Row::active_count).collect()
    }

    /// Exposure count of each element, flattened in layout order.
    pub fn exposure_counts(&self, layout: &Layout) -> Vec<usize> {
        let offsets = category_offsets(layout);
        let mut counts = vec![0usize; layout.total_elements()];
        for row in &self.rows {
            for (c, slot) in row.slots.iter().enumerate() {
                if let Slot::Active(j) = slot {
                    counts[offsets[c] + usize::from(*j)] += 1;
                }
            }
        }
        counts
    }

    /// Number of absent slots per category, in layout order.
    pub fn absence_counts(&self, categories: usize) -> Vec<usize> {
        let mut counts = vec![0usize; categories];
        for row in &self.rows {
            for (c, slot) in row.slots.iter().enumerate() {
                if !slot.is_active() {
                    counts[c] += 1;
                }
            }
        }
        counts
    }

    /// Task list for the web layer: one mapping per row.
    pub fn to_tasks(&self, layout: &Layout) -> Vec<Task> {
        self.rows.iter().map(|r| r.to_task(layout)).collect()
    }
}

/// Start offset of each category in the flattened element list.
pub fn category_offsets(layout: &Layout) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(layout.len());
    let mut acc = 0;
    for category in layout.categories() {
        offsets.push(acc);
        acc += category.len();
    }
    offsets
}
