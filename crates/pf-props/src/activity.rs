//! Liquid-phase activity coefficient models.
//!
//! Each model exists in two forms: a closed-form evaluation used by the
//! bubble and dew point equations, and a set of declared equations (binary
//! interaction coefficients, the two mixing sums and the coefficient
//! itself) that participate in staged initialization.

use crate::error::PropResult;
use crate::params::ActivityModel;
use pf_system::{ConstraintTag, EquationSystem, VarId};

impl ActivityModel {
    /// Closed-form activity coefficients at liquid composition `x`.
    ///
    /// `x` is indexed in component declaration order and is assumed
    /// normalized; the ideal model returns all ones.
    pub fn activity_coefficients(&self, x: &[f64]) -> Vec<f64> {
        match self {
            ActivityModel::Ideal => vec![1.0; x.len()],
            ActivityModel::Nrtl { alpha, tau } => {
                let n = x.len();
                let g = |i: usize, j: usize| -> f64 {
                    if i == j {
                        1.0
                    } else {
                        (-alpha[i][j] * tau[i][j]).exp()
                    }
                };
                let den: Vec<f64> = (0..n)
                    .map(|j| (0..n).map(|k| x[k] * g(k, j)).sum())
                    .collect();
                (0..n)
                    .map(|i| {
                        let a: f64 =
                            (0..n).map(|j| x[j] * tau[j][i] * g(j, i)).sum::<f64>() / den[i];
                        let b: f64 = (0..n)
                            .map(|j| {
                                let inner: f64 = (0..n)
                                    .map(|m| x[m] * tau[m][j] * g(m, j))
                                    .sum::<f64>()
                                    / den[j];
                                x[j] * g(i, j) / den[j] * (tau[i][j] - inner)
                            })
                            .sum();
                        (a + b).exp()
                    })
                    .collect()
            }
            ActivityModel::Wilson { vol_mol, tau } => {
                let n = x.len();
                let g = |i: usize, j: usize| -> f64 {
                    if i == j {
                        1.0
                    } else {
                        vol_mol[i] / vol_mol[j] * (-tau[i][j]).exp()
                    }
                };
                let den: Vec<f64> = (0..n)
                    .map(|j| (0..n).map(|k| x[k] * g(k, j)).sum())
                    .collect();
                (0..n)
                    .map(|i| {
                        let a = (0..n).map(|j| x[j] * g(j, i)).sum::<f64>().ln();
                        let b: f64 = (0..n).map(|j| x[j] * g(i, j) / den[j]).sum();
                        (1.0 - a - b).exp()
                    })
                    .collect()
            }
        }
    }
}

/// Handles to the declared activity coefficients of one block, one per
/// component in declaration order. The intermediate Gij/A/B variables stay
/// internal; initialization reaches them through their constraint tags.
#[derive(Debug)]
pub(crate) struct ActivityVars {
    pub gamma: Vec<VarId>,
}

fn gij_value(ids: &[Vec<Option<VarId>>], i: usize, j: usize, v: &[f64]) -> f64 {
    match ids[i][j] {
        Some(id) => v[id.index()],
        None => 1.0,
    }
}

fn offdiag_ids(ids: &[Vec<Option<VarId>>]) -> Vec<VarId> {
    ids.iter().flatten().filter_map(|&id| id).collect()
}

/// Declare the activity-coefficient variables and equations for one block.
///
/// `x_liq` holds the liquid mole fraction variables in component order.
/// Returns `None` for the ideal model, which has no declared entities;
/// phase-equilibrium residuals then use a coefficient of one.
pub(crate) fn declare_activity_equations(
    sys: &mut EquationSystem,
    name: &str,
    model: &ActivityModel,
    comp_names: &[String],
    x_liq: &[VarId],
) -> PropResult<Option<ActivityVars>> {
    let (tau, gij_of): (Vec<Vec<f64>>, Box<dyn Fn(usize, usize) -> f64>) = match model {
        ActivityModel::Ideal => return Ok(None),
        ActivityModel::Nrtl { alpha, tau } => {
            let (alpha, tau) = (alpha.clone(), tau.clone());
            let t = tau.clone();
            (tau, Box::new(move |i, j| (-alpha[i][j] * t[i][j]).exp()))
        }
        ActivityModel::Wilson { vol_mol, tau } => {
            let (vol, tau) = (vol_mol.clone(), tau.clone());
            let t = tau.clone();
            (tau, Box::new(move |i, j| vol[i] / vol[j] * (-t[i][j]).exp()))
        }
    };
    let wilson = matches!(model, ActivityModel::Wilson { .. });
    let n = comp_names.len();

    // Diagonal coefficients are identically one; no variable is declared.
    let mut gij: Vec<Vec<Option<VarId>>> = vec![vec![None; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let id = sys.add_var(
                format!("{name}.Gij_coeff[{},{}]", comp_names[i], comp_names[j]),
                1.0,
                0.0,
                f64::INFINITY,
            )?;
            let target = gij_of(i, j);
            sys.add_con(
                format!("{name}.eq_Gij_coeff[{},{}]", comp_names[i], comp_names[j]),
                ConstraintTag::GijCoeff,
                vec![id],
                1.0,
                move |v| v[id.index()] - target,
            );
            gij[i][j] = Some(id);
        }
    }

    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    let mut gamma = Vec::with_capacity(n);
    for i in 0..n {
        a.push(sys.add_var(
            format!("{name}.activity_coeff_A[{}]", comp_names[i]),
            1.0,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )?);
        b.push(sys.add_var(
            format!("{name}.activity_coeff_B[{}]", comp_names[i]),
            1.0,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )?);
        gamma.push(sys.add_var(
            format!("{name}.activity_coeff[{}]", comp_names[i]),
            1.0,
            1e-10,
            f64::INFINITY,
        )?);
    }

    let x_ids = x_liq.to_vec();
    for i in 0..n {
        // First mixing sum.
        let mut uses = vec![a[i]];
        uses.extend_from_slice(&x_ids);
        uses.extend((0..n).filter_map(|j| gij[j][i]));
        let (ai, gids, xs, tau_c) = (a[i], gij.clone(), x_ids.clone(), tau.clone());
        sys.add_con(
            format!("{name}.eq_activity_A[{}]", comp_names[i]),
            ConstraintTag::ActivityA,
            uses,
            1.0,
            move |v| {
                let den: f64 = (0..n)
                    .map(|k| v[xs[k].index()] * gij_value(&gids, k, i, v))
                    .sum();
                if wilson {
                    v[ai.index()] - den.ln()
                } else {
                    let num: f64 = (0..n)
                        .map(|j| v[xs[j].index()] * tau_c[j][i] * gij_value(&gids, j, i, v))
                        .sum();
                    v[ai.index()] - num / den
                }
            },
        );

        // Second mixing sum.
        let mut uses = vec![b[i]];
        uses.extend_from_slice(&x_ids);
        uses.extend(offdiag_ids(&gij));
        let (bi, gids, xs, tau_c) = (b[i], gij.clone(), x_ids.clone(), tau.clone());
        sys.add_con(
            format!("{name}.eq_activity_B[{}]", comp_names[i]),
            ConstraintTag::ActivityB,
            uses,
            1.0,
            move |v| {
                let sum: f64 = (0..n)
                    .map(|j| {
                        let den: f64 = (0..n)
                            .map(|k| v[xs[k].index()] * gij_value(&gids, k, j, v))
                            .sum();
                        let frac = v[xs[j].index()] * gij_value(&gids, i, j, v) / den;
                        if wilson {
                            frac
                        } else {
                            let inner: f64 = (0..n)
                                .map(|m| v[xs[m].index()] * tau_c[m][j] * gij_value(&gids, m, j, v))
                                .sum::<f64>()
                                / den;
                            frac * (tau_c[i][j] - inner)
                        }
                    })
                    .sum();
                v[bi.index()] - sum
            },
        );

        let (gi, ai, bi) = (gamma[i], a[i], b[i]);
        sys.add_con(
            format!("{name}.eq_activity_coeff[{}]", comp_names[i]),
            ConstraintTag::ActivityCoeff,
            vec![gi, ai, bi],
            1.0,
            move |v| {
                let ln_gamma = v[gi.index()].ln();
                if wilson {
                    ln_gamma - (1.0 - v[ai.index()] - v[bi.index()])
                } else {
                    ln_gamma - (v[ai.index()] + v[bi.index()])
                }
            },
        );
    }

    Ok(Some(ActivityVars { gamma }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ActivityModel;
    use approx::assert_relative_eq;
    use pf_solver::{solve_system, SolveConfig};

    fn nrtl_binary() -> ActivityModel {
        ActivityModel::Nrtl {
            alpha: vec![vec![0.0, 0.3], vec![0.3, 0.0]],
            tau: vec![vec![0.0, 0.5], vec![0.3, 0.0]],
        }
    }

    fn wilson_binary() -> ActivityModel {
        ActivityModel::Wilson {
            vol_mol: vec![1.0, 1.0],
            tau: vec![vec![0.0, 0.5], vec![0.3, 0.0]],
        }
    }

    #[test]
    fn ideal_is_unity() {
        let g = ActivityModel::Ideal.activity_coefficients(&[0.3, 0.7]);
        assert_eq!(g, vec![1.0, 1.0]);
    }

    #[test]
    fn nrtl_hand_value() {
        let g = nrtl_binary().activity_coefficients(&[0.4, 0.6]);
        assert_relative_eq!(g[0].ln(), 0.274048, epsilon = 1e-4);
    }

    #[test]
    fn wilson_hand_value() {
        let g = wilson_binary().activity_coefficients(&[0.4, 0.6]);
        assert_relative_eq!(g[0].ln(), 0.263478, epsilon = 1e-4);
    }

    #[test]
    fn pure_component_limit_is_unity() {
        for model in [nrtl_binary(), wilson_binary()] {
            let g = model.activity_coefficients(&[1.0, 0.0]);
            assert!((g[0] - 1.0).abs() < 1e-12, "{} at x1=1", model.name());
        }
    }

    #[test]
    fn zero_interactions_reduce_to_ideal() {
        let model = ActivityModel::Nrtl {
            alpha: vec![vec![0.0; 2]; 2],
            tau: vec![vec![0.0; 2]; 2],
        };
        let g = model.activity_coefficients(&[0.25, 0.75]);
        assert!((g[0] - 1.0).abs() < 1e-12);
        assert!((g[1] - 1.0).abs() < 1e-12);
    }

    fn solved_gammas(model: &ActivityModel, x: [f64; 2]) -> Vec<f64> {
        let mut sys = EquationSystem::new();
        let names = vec!["b".to_string(), "t".to_string()];
        let x0 = sys.add_var("x[b]", x[0], 0.0, 1.0).unwrap();
        let x1 = sys.add_var("x[t]", x[1], 0.0, 1.0).unwrap();
        sys.fix(x0);
        sys.fix(x1);
        let vars = declare_activity_equations(&mut sys, "d", model, &names, &[x0, x1])
            .unwrap()
            .unwrap();
        let report = solve_system(&mut sys, &SolveConfig::default()).unwrap();
        assert!(report.converged);
        vars.gamma.iter().map(|&g| sys.value(g)).collect()
    }

    #[test]
    fn declared_equations_match_closed_form() {
        for model in [nrtl_binary(), wilson_binary()] {
            let solved = solved_gammas(&model, [0.4, 0.6]);
            let closed = model.activity_coefficients(&[0.4, 0.6]);
            for (s, c) in solved.iter().zip(&closed) {
                assert!((s - c).abs() < 1e-6, "{}", model.name());
            }
        }
    }

    #[test]
    fn ideal_declares_nothing() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 1.0, 0.0, 1.0).unwrap();
        let out =
            declare_activity_equations(&mut sys, "d", &ActivityModel::Ideal, &["a".into()], &[x])
                .unwrap();
        assert!(out.is_none());
        assert_eq!(sys.num_vars(), 1);
        assert_eq!(sys.num_cons(), 0);
    }
}
