//! Diagnostic verbosity passed explicitly into long-running routines.
//!
//! Rather than a global logger level, routines that emit progress events
//! (initialization stages, model checks) take a `Verbosity` so callers can
//! compose silent or chatty runs per invocation.

/// Output level for diagnostic events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// No per-stage output.
    Quiet,
    /// Per-stage progress and warnings.
    #[default]
    Normal,
    /// Everything, including solver detail.
    Debug,
}

impl Verbosity {
    pub fn at_least(self, level: Verbosity) -> bool {
        self >= level
    }
}
