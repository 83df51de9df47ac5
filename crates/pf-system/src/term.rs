//! Cloneable algebraic expression handles.

use crate::system::{EquationSystem, VarId};
use std::rc::Rc;

/// An algebraic expression over system variables.
///
/// Terms are returned by state-block accessors so that balance-equation
/// consumers can embed flow and density expressions into their own
/// residuals without knowing which state-variable basis produced them.
#[derive(Clone)]
pub struct Term(Rc<dyn Fn(&[f64]) -> f64>);

impl Term {
    pub fn new(f: impl Fn(&[f64]) -> f64 + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn constant(c: f64) -> Self {
        Self::new(move |_| c)
    }

    pub fn var(id: VarId) -> Self {
        Self::new(move |values| values[id.index()])
    }

    /// Evaluate against an explicit value slice.
    pub fn eval(&self, values: &[f64]) -> f64 {
        (self.0)(values)
    }

    /// Evaluate against the system's current values.
    pub fn eval_in(&self, sys: &EquationSystem) -> f64 {
        (self.0)(sys.values())
    }
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Term(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_and_var_terms() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 3.0, 0.0, f64::INFINITY).unwrap();

        let c = Term::constant(2.5);
        let v = Term::var(x);
        assert_eq!(c.eval_in(&sys), 2.5);
        assert_eq!(v.eval_in(&sys), 3.0);

        sys.set_value(x, 7.0);
        assert_eq!(v.eval_in(&sys), 7.0);
    }

    #[test]
    fn composed_term() {
        let mut sys = EquationSystem::new();
        let a = sys.add_var("a", 2.0, 0.0, f64::INFINITY).unwrap();
        let b = sys.add_var("b", 5.0, 0.0, f64::INFINITY).unwrap();
        let product = Term::new(move |v| v[a.index()] * v[b.index()]);
        assert_eq!(product.eval_in(&sys), 10.0);
    }
}
