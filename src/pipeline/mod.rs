//! Pipeline module - preflight lock and the per-respondent orchestrator.
//!
//! Pipeline flow:
//! Plan → Preflight (lock T) → Orchestrator (build → gate → accept, per
//! respondent, in parallel) → accepted respondents

mod orchestrator;
mod preflight;

pub use orchestrator::*;
pub use preflight::*;

use rand::Rng;
use tracing::info;

/// Stride between respondents in the seed sequence.
pub const RESPONDENT_SEED_STRIDE: u64 = 7919;

/// Stride between attempts of one respondent.
pub const ATTEMPT_SEED_STRIDE: u64 = 104_729;

/// Offset of the gate's stress-test seed from the attempt seed.
pub const GATE_SEED_OFFSET: u64 = 17;

/// Offset of the preflight seed from the base seed.
pub const PREFLIGHT_SEED_OFFSET: u64 = 999_999;

/// Seed for attempt `attempt` (1-based) of respondent `respondent` (1-based).
///
/// Depends only on its inputs, so results do not depend on scheduling.
pub fn attempt_seed(base_seed: u64, respondent: usize, attempt: u64) -> u64 {
    base_seed
        .wrapping_add((respondent as u64).wrapping_mul(RESPONDENT_SEED_STRIDE))
        .wrapping_add(attempt.wrapping_mul(ATTEMPT_SEED_STRIDE))
}

/// The configured base seed, or a fresh one from OS entropy.
pub fn resolve_base_seed(configured: Option<u64>) -> u64 {
    match configured {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().gen::<u64>();
            info!(seed, "No seed configured, drew one from entropy");
            seed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_seed_strides() {
        assert_eq!(attempt_seed(12345, 1, 1), 12345 + 7919 + 104_729);
        assert_ne!(attempt_seed(0, 1, 2), attempt_seed(0, 2, 1));
        // Wraps instead of overflowing.
        let _ = attempt_seed(u64::MAX, usize::MAX, u64::MAX);
    }

    #[test]
    fn test_resolve_base_seed() {
        assert_eq!(resolve_base_seed(Some(42)), 42);
    }
}
