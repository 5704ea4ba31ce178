//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `CheckpointState`: Accepted respondents keyed by id
//! - `CheckpointManager`: Persistence and loading of checkpoint state
//! - `RunFingerprint`: The plan identity a checkpoint is bound to

mod state;

pub use state::*;
