//! Error types for equation-system bookkeeping.

use thiserror::Error;

pub type SystemResult<T> = Result<T, SystemError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SystemError {
    /// A variable with this name already exists in the system.
    #[error("Duplicate declaration: {name}")]
    Duplicate { name: String },

    /// A bound pair was inverted or non-finite at declaration time.
    #[error("Invalid bounds for {name}")]
    InvalidBounds { name: String },
}
