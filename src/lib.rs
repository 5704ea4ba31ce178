//! conjoint - Balanced, respondent-unique vignette designs for conjoint studies.
//!
//! ## Architecture
//!
//! A study flows through five stages:
//! - **Planner**: picks rows per respondent (T), exposures per element (E) and
//!   absence counts from the layout alone, deterministically
//! - **Preflight**: proves T is buildable (bumping it by at most three rows)
//!   and locks it for every respondent
//! - **Row Builder**: assembles one respondent's rows from exposure-exact token
//!   pools with randomized swap repair
//! - **Quality Gate**: rank, conditioning, variance inflation and random-outcome
//!   fits on the respondent's design matrix
//! - **Orchestrator**: reseeds build → gate per respondent until acceptance,
//!   in parallel across respondents
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Fallible search outcomes (BuildOutcome, QcReport, Result)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Attempt ceilings and preflight bumps bound every search

pub mod builder;
pub mod checkpoint;
pub mod gate;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod planner;

// Re-exports for convenience
pub use builder::{BuildOutcome, NoSolution, RowBuilder};
pub use checkpoint::{CheckpointManager, CheckpointState, RunFingerprint};
pub use gate::{Coding, DesignMatrix, QualityGate};
pub use models::{
    AcceptedRespondent, Config, ConjointError, InfeasibleError, Layout, QcReport, Result,
    RespondentDesign, Row, Slot, StudyMode,
};
pub use output::Certificate;
pub use pipeline::{lock_rows, Orchestrator, Preflight, RunOutcome};
pub use planner::Plan;
