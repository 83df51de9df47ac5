//! Square Newton solver over the active subsystem of an equation system.
//!
//! The solver operates on exactly the free variables referenced by active
//! constraints. Initialization sequences change which constraints are active
//! and which variables are fixed between calls; the solver itself is
//! stateless.

pub mod error;
pub mod jacobian;
pub mod solve;

pub use error::{SolverError, SolverResult};
pub use solve::{solve_system, SolveConfig, SolveReport};
