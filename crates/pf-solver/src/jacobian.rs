//! Forward-difference Jacobians of residual vectors.

use nalgebra::{DMatrix, DVector};

/// Jacobian of `f` at `x`, column `j` being `(f(x + h e_j) - f(x)) / h`.
///
/// The step is scaled to the magnitude of `x[j]`, so pressure- and
/// enthalpy-sized variables get the same relative perturbation as
/// order-one mole fractions.
pub fn finite_difference_jacobian<F>(x: &DVector<f64>, f: F, epsilon: f64) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let r0 = f(x);
    let mut jac = DMatrix::zeros(r0.len(), x.len());
    let mut xp = x.clone();
    for j in 0..x.len() {
        let h = epsilon * x[j].abs().max(1.0);
        xp[j] = x[j] + h;
        let column = (f(&xp) - &r0) / h;
        jac.set_column(j, &column);
        xp[j] = x[j];
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_system::{ConstraintTag, EquationSystem};

    #[test]
    fn partials_of_system_residuals() {
        // x y = 6, x + y = 5: the Jacobian rows are [y, x] and [1, 1].
        let mut sys = EquationSystem::new();
        let x = sys
            .add_var("x", 2.0, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        let y = sys
            .add_var("y", 3.0, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        sys.add_con("product", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] * v[y.index()] - 6.0
        });
        sys.add_con("sum", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] + v[y.index()] - 5.0
        });

        let cons = sys.active_cons();
        let residual = |p: &DVector<f64>| {
            let vals = [p[0], p[1]];
            DVector::from_iterator(cons.len(), cons.iter().map(|&c| sys.residual(c, &vals)))
        };
        let point = DVector::from_vec(vec![2.0, 3.0]);
        let jac = finite_difference_jacobian(&point, residual, 1e-7);

        assert!((jac[(0, 0)] - 3.0).abs() < 1e-5);
        assert!((jac[(0, 1)] - 2.0).abs() < 1e-5);
        assert!((jac[(1, 0)] - 1.0).abs() < 1e-5);
        assert!((jac[(1, 1)] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn step_scales_with_variable_magnitude() {
        // A pressure-sized variable keeps relative accuracy: d(p^2)/dp = 2p.
        let f = |p: &DVector<f64>| DVector::from_element(1, p[0] * p[0]);
        let point = DVector::from_element(1, 1.0e5);
        let jac = finite_difference_jacobian(&point, f, 1e-7);
        assert!((jac[(0, 0)] - 2.0e5).abs() / 2.0e5 < 1e-5);
    }

    #[test]
    fn constraint_scale_divides_the_partials() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 4.0, 0.0, f64::INFINITY).unwrap();
        let c = sys.add_con("scaled", ConstraintTag::Property, vec![x], 10.0, move |v| {
            3.0 * v[x.index()]
        });

        let residual =
            |p: &DVector<f64>| DVector::from_element(1, sys.residual(c, &[p[0]]));
        let jac = finite_difference_jacobian(&DVector::from_element(1, 4.0), residual, 1e-7);
        assert!((jac[(0, 0)] - 0.3).abs() < 1e-6);
    }
}
