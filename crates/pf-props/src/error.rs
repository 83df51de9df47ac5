//! Error types for the property package.

use pf_solver::SolverError;
use pf_system::SystemError;
use thiserror::Error;

pub type PropResult<T> = Result<T, PropError>;

/// Errors surfaced by state-block construction and initialization.
///
/// Solver non-convergence is deliberately absent: per-stage convergence
/// quality is logged, never raised, because an intermediate stage is allowed
/// to be rough.
#[derive(Error, Debug)]
pub enum PropError {
    /// Invalid or mutually-inconsistent configuration, fatal at build time.
    #[error("Configuration error: {what}")]
    Configuration { what: String },

    /// A caller-supplied hint mapping omits a required key.
    #[error("Missing key in initialization hints: {key}")]
    MissingHint { key: String },

    /// Caller claimed state variables were fixed but the system is not
    /// fully specified.
    #[error("State variables flagged as fixed but degrees of freedom is {dof}, not zero")]
    NonZeroDegreesOfFreedom { dof: isize },

    /// A block collection handed to the initialization sequencer is not
    /// homogeneous (or is otherwise unusable as one coupled solve).
    #[error("Invalid block collection: {what}")]
    InvalidCollection { what: String },

    /// On-demand construction failed; partially-created entities have been
    /// rolled back before this was raised.
    #[error("Construction error: {what}")]
    Construction { what: String },

    #[error("System error: {0}")]
    System(#[from] SystemError),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
}
