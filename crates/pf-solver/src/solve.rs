//! High-level solve entry point: Newton with line search over the active
//! subsystem of an [`EquationSystem`].

use crate::error::{SolverError, SolverResult};
use crate::jacobian::finite_difference_jacobian;
use nalgebra::DVector;
use pf_system::EquationSystem;
use tracing::{debug, warn};

/// Newton solver configuration.
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance for residual norm
    pub abs_tol: f64,
    /// Relative tolerance for residual norm
    pub rel_tol: f64,
    /// Relative perturbation for the finite-difference Jacobian
    pub fd_epsilon: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            abs_tol: 1e-7,
            rel_tol: 1e-12,
            fd_epsilon: 1e-7,
            line_search_beta: 0.5,
            max_line_search_iters: 30,
        }
    }
}

/// Outcome of one solve. Non-convergence is a report, not an error.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub converged: bool,
    pub iterations: usize,
    pub residual_norm: f64,
}

/// Solve the active constraints of `sys` for the free variables they
/// reference.
///
/// The subsystem must be square. Variable bounds are honored by the line
/// search: steps that would leave a bound are backtracked. The final iterate
/// is written back into the system whether or not the solve converged, so a
/// later stage can continue from it.
pub fn solve_system(sys: &mut EquationSystem, config: &SolveConfig) -> SolverResult<SolveReport> {
    let cons = sys.active_cons();
    let free = sys.free_referenced_vars();

    if cons.is_empty() {
        return Ok(SolveReport {
            converged: true,
            iterations: 0,
            residual_norm: 0.0,
        });
    }
    if cons.len() != free.len() {
        return Err(SolverError::NonSquare {
            equations: cons.len(),
            unknowns: free.len(),
        });
    }

    let base: Vec<f64> = sys.values().to_vec();
    let bounds: Vec<(f64, f64)> = free.iter().map(|&v| sys.bounds(v)).collect();
    let n = free.len();

    let mut x = DVector::from_iterator(n, free.iter().map(|&v| sys.value(v)));

    let (x_final, report) = {
        let sys_ref: &EquationSystem = sys;
        let residual_fn = |x: &DVector<f64>| -> DVector<f64> {
            let mut vals = base.clone();
            for (k, &v) in free.iter().enumerate() {
                vals[v.index()] = x[k];
            }
            DVector::from_iterator(n, cons.iter().map(|&c| sys_ref.residual(c, &vals)))
        };

        let mut r = residual_fn(&x);
        let mut r_norm = r.norm();
        let r0_norm = r_norm;

        if !r0_norm.is_finite() {
            return Err(SolverError::Numeric {
                what: "initial residual is non-finite".to_string(),
            });
        }

        let mut report = None;
        for iter in 0..config.max_iterations {
            if r_norm < config.abs_tol || r_norm < config.rel_tol * r0_norm {
                report = Some(SolveReport {
                    converged: true,
                    iterations: iter,
                    residual_norm: r_norm,
                });
                break;
            }

            let jac = finite_difference_jacobian(&x, residual_fn, config.fd_epsilon);

            let Some(dx) = jac.lu().solve(&(-r.clone())) else {
                warn!(iteration = iter, "Jacobian solve failed, stopping");
                report = Some(SolveReport {
                    converged: false,
                    iterations: iter,
                    residual_norm: r_norm,
                });
                break;
            };

            // Line search with bound constraints
            let mut alpha = 1.0;
            let mut accepted = false;
            for _ in 0..config.max_line_search_iters {
                let x_new = &x + alpha * &dx;
                let in_bounds = x_new
                    .iter()
                    .zip(&bounds)
                    .all(|(&xi, &(lo, hi))| xi >= lo && xi <= hi);

                if in_bounds {
                    let r_new = residual_fn(&x_new);
                    let r_new_norm = r_new.norm();
                    if r_new_norm < r_norm {
                        x = x_new;
                        r = r_new;
                        r_norm = r_new_norm;
                        accepted = true;
                        break;
                    }
                }
                alpha *= config.line_search_beta;
            }

            debug!(iteration = iter, residual = r_norm, alpha, "newton step");

            if !accepted {
                warn!(
                    iteration = iter,
                    residual = r_norm,
                    "line search stalled, stopping"
                );
                report = Some(SolveReport {
                    converged: false,
                    iterations: iter,
                    residual_norm: r_norm,
                });
                break;
            }
        }

        let report = report.unwrap_or(SolveReport {
            converged: r_norm < config.abs_tol || r_norm < config.rel_tol * r0_norm,
            iterations: config.max_iterations,
            residual_norm: r_norm,
        });
        (x, report)
    };

    for (k, &v) in free.iter().enumerate() {
        sys.set_value(v, x_final[k]);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_system::ConstraintTag;

    #[test]
    fn simple_quadratic() {
        // Solve x^2 - 4 = 0, x > 0
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 3.0, 0.0, f64::INFINITY).unwrap();
        sys.add_con("quad", ConstraintTag::Property, vec![x], 1.0, move |v| {
            v[x.index()] * v[x.index()] - 4.0
        });

        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        assert!((sys.value(x) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn coupled_pair() {
        // x + y = 3, x - y = 1 -> x = 2, y = 1
        let mut sys = EquationSystem::new();
        let x = sys
            .add_var("x", 0.0, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        let y = sys
            .add_var("y", 0.0, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        sys.add_con("sum", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] + v[y.index()] - 3.0
        });
        sys.add_con("diff", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] - v[y.index()] - 1.0
        });

        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        assert!((sys.value(x) - 2.0).abs() < 1e-6);
        assert!((sys.value(y) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn non_square_is_an_error() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 0.0, 0.0, 10.0).unwrap();
        let y = sys.add_var("y", 0.0, 0.0, 10.0).unwrap();
        sys.add_con("eq", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] + v[y.index()] - 1.0
        });

        let err = solve_system(&mut sys, &SolveConfig::default()).unwrap_err();
        assert!(matches!(err, SolverError::NonSquare { .. }));
    }

    #[test]
    fn fixed_vars_are_parameters() {
        // With y fixed, x + y = 3 is square in x alone.
        let mut sys = EquationSystem::new();
        let x = sys
            .add_var("x", 0.0, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        let y = sys.add_var("y", 1.0, 0.0, 10.0).unwrap();
        sys.fix(y);
        sys.add_con("sum", ConstraintTag::Property, vec![x, y], 1.0, move |v| {
            v[x.index()] + v[y.index()] - 3.0
        });

        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        assert!((sys.value(x) - 2.0).abs() < 1e-6);
        assert_eq!(sys.value(y), 1.0);
    }

    #[test]
    fn bounds_respected() {
        // x^2 = 4 with x in [-10, 0] converges to the negative root.
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", -3.0, -10.0, 0.0).unwrap();
        sys.add_con("quad", ConstraintTag::Property, vec![x], 1.0, move |v| {
            v[x.index()] * v[x.index()] - 4.0
        });

        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        assert!((sys.value(x) + 2.0).abs() < 1e-6);
    }

    #[test]
    fn nothing_active_solves_trivially() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 1.0, 0.0, 10.0).unwrap();
        let c = sys.add_con("eq", ConstraintTag::Property, vec![x], 1.0, move |v| {
            v[x.index()] - 5.0
        });
        sys.set_active(c, false);

        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        assert_eq!(report.iterations, 0);
        assert_eq!(sys.value(x), 1.0);
    }
}
