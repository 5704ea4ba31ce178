//! Core data models for conjoint.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters
//! - I^B (Bounded): Error variants with fallback strategies

mod config;
mod design;
mod error;
mod report;

pub use config::*;
pub use design::*;
pub use error::*;
pub use report::*;
