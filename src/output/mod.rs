//! Output module - task lists, design matrix and QC certificate.

mod certificate;
mod writer;

pub use certificate::*;
pub use writer::*;
