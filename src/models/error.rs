//! Error types for conjoint.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad config, infeasible layout)
//! - I^B materialized: Infrastructure failures (filesystem)
//! - K_i violated: Internal invariant violations (bugs)
//!
//! Build exhaustion and gate rejection are deliberately absent here: both are
//! ordinary attempt outcomes that the orchestrator absorbs by reseeding.

use thiserror::Error;

/// Top-level error type for conjoint.
#[derive(Debug, Error)]
pub enum ConjointError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Infeasible design: {0}")]
    Infeasible(#[from] InfeasibleError),

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error(
        "Respondent {respondent} unbuildable after {attempts} attempts \
         ({build_failures} build failures, {gate_rejections} gate rejections)"
    )]
    Unbuildable {
        respondent: usize,
        attempts: u64,
        build_failures: u64,
        gate_rejections: u64,
    },

    #[error("Checkpoint belongs to a different run (expected {expected}, found {found})")]
    CheckpointMismatch { expected: String, found: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration infeasibility, raised by the planner or the preflight lock.
///
/// K_i: Deterministic. Retrying with the same inputs gives the same answer,
/// so these are surfaced to the caller instead of being retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InfeasibleError {
    #[error(
        "initial rows T={t} (P={params} + safety) exceed visible capacity {capacity}; \
         add elements/categories or lower safety_rows/t_ratio"
    )]
    InitialRowsExceedCapacity {
        t: usize,
        params: usize,
        capacity: u128,
    },

    #[error(
        "T={t} exceeds visible capacity {capacity} before exposure floor was met \
         (best E={best_exposure}, need {min_exposure}); add elements/categories \
         or relax absence_ratio/t_ratio"
    )]
    CapacityExhausted {
        t: usize,
        capacity: u128,
        best_exposure: usize,
        min_exposure: usize,
    },

    #[error(
        "T={t} rows cannot carry {activations} activations within \
         {min_active}..={max_active} active categories per row; \
         adjust min_active/max_active or add elements"
    )]
    RowActivityUnreachable {
        t: usize,
        activations: usize,
        min_active: usize,
        max_active: usize,
    },

    #[error(
        "preflight could not build at T={t} or any bump up to T={max_tried}; \
         consider more elements/categories or adjust absence_ratio/t_ratio"
    )]
    PreflightFailed { t: usize, max_tried: usize },
}

impl ConjointError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether this error is a configuration infeasibility (user-visible hard failure).
    pub fn is_infeasible(&self) -> bool {
        matches!(self, Self::Infeasible(_))
    }
}

/// Result type alias for conjoint.
pub type Result<T> = std::result::Result<T, ConjointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infeasible_message_names_constraint() {
        let err: ConjointError = InfeasibleError::CapacityExhausted {
            t: 40,
            capacity: 39,
            best_exposure: 2,
            min_exposure: 3,
        }
        .into();
        assert!(err.is_infeasible());
        let msg = err.to_string();
        assert!(msg.contains("visible capacity 39"));
        assert!(msg.contains("absence_ratio"));
    }

    #[test]
    fn test_unbuildable_is_not_infeasible() {
        let err = ConjointError::Unbuildable {
            respondent: 3,
            attempts: 10,
            build_failures: 7,
            gate_rejections: 3,
        };
        assert!(!err.is_infeasible());
        assert!(err.to_string().contains("7 build failures"));
    }
}
