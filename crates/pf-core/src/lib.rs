//! Shared numerics, unit types and diagnostics for the propflow workspace.

pub mod diag;
pub mod error;
pub mod numeric;
pub mod units;

pub use diag::Verbosity;
pub use error::{CoreError, CoreResult};
