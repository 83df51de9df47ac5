//! Algebraic equation-system substrate.
//!
//! A property package declares variables and tagged equality constraints
//! into an [`EquationSystem`]; a solver then iterates on the free variables
//! referenced by the active constraints. Nothing here evaluates eagerly:
//! declaring an equation is a bookkeeping operation, solving is a separate
//! concern.

pub mod error;
pub mod system;
pub mod term;

pub use error::{SystemError, SystemResult};
pub use system::{Checkpoint, ConId, ConstraintTag, EquationSystem, VarId};
pub use term::Term;
