//! Error types for solver operations.

use thiserror::Error;

/// Errors that can occur while setting up or running a solve.
///
/// Non-convergence is deliberately not an error; it is reported through
/// [`crate::SolveReport`] so staged initialization can proceed past a rough
/// intermediate solve.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Active subsystem is not square: {equations} equations, {unknowns} unknowns")]
    NonSquare { equations: usize, unknowns: usize },

    #[error("Numeric error: {what}")]
    Numeric { what: String },
}

pub type SolverResult<T> = Result<T, SolverError>;
