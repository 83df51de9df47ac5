//! Staged initialization of state-block collections.
//!
//! The flash equations are too coupled to solve from arbitrary starting
//! values in one shot, so initialization walks a fixed activation schedule
//! over the constraint tags, each stage a square solve that leaves the
//! system on the solution manifold of the next:
//!
//! 1. vapor pressures and bubble/dew points, everything else deactivated
//! 2. material balances and phase equilibrium, activity coefficients
//!    pinned at one
//! 3. binary interaction coefficients and the two mixing sums
//! 4. the activity coefficients themselves, unpinned
//! 5. caloric property equations
//!
//! State variables are fixed at hint values for the duration and restored
//! afterwards unless the caller asks to hold them.

use crate::error::{PropError, PropResult};
use crate::params::{ComponentConstants, StateBasis};
use crate::state_block::StateBlock;
use pf_core::Verbosity;
use pf_solver::{solve_system, SolveConfig};
use pf_system::{ConstraintTag, EquationSystem, VarId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Starting values for the state variables, keyed by component name where
/// indexed. When hints are passed at all, every key the block's basis needs
/// must be present.
#[derive(Debug, Clone, Default)]
pub struct StateHints {
    pub flow_mol: Option<f64>,
    pub mole_frac: Option<BTreeMap<String, f64>>,
    pub flow_mol_comp: Option<BTreeMap<String, f64>>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
}

/// Options for [`initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Keep the state variables fixed after initialization; the caller must
    /// later call [`release_state`] with the returned flags.
    pub hold_state: bool,
    /// The caller has already fixed the state variables; initialization
    /// will verify zero degrees of freedom and not touch them.
    pub state_vars_fixed: bool,
    pub verbosity: Verbosity,
    pub solver: SolveConfig,
}

/// Which state variables of one block were already fixed before
/// initialization, so release can restore exactly the prior fixedness.
#[derive(Debug, Clone)]
struct BlockFlags {
    vars: Vec<(VarId, bool)>,
}

/// Fix/unfix bookkeeping for a whole collection, returned when the caller
/// holds the state.
#[derive(Debug, Clone)]
pub struct InitFlags {
    blocks: Vec<BlockFlags>,
}

/// Initialize a collection of state blocks sharing one equation system.
///
/// All blocks must be bound to the same parameter set and agree on phase
/// equilibrium, since each stage is a single coupled solve. Returns the
/// fix/unfix flags when `hold_state` is set, `None` otherwise.
pub fn initialize(
    sys: &mut EquationSystem,
    blocks: &[StateBlock],
    hints: Option<&StateHints>,
    opts: &InitOptions,
) -> PropResult<Option<InitFlags>> {
    let Some(first) = blocks.first() else {
        return Err(PropError::InvalidCollection {
            what: "no blocks to initialize".to_string(),
        });
    };
    for b in blocks {
        let homogeneous = Arc::ptr_eq(b.params(), first.params())
            && b.has_phase_equilibrium() == first.has_phase_equilibrium();
        if !homogeneous {
            return Err(PropError::InvalidCollection {
                what: format!(
                    "block '{}' is configured differently from '{}'",
                    b.name(),
                    first.name()
                ),
            });
        }
    }

    // Outlet mole-fraction closures stay out of the staged solves; the
    // mixture composition is fixed throughout anyway.
    for b in blocks {
        if let Some(c) = b.mole_frac_out_con() {
            sys.set_active(c, false);
        }
    }

    let flags = if opts.state_vars_fixed {
        let dof = sys.degrees_of_freedom();
        if dof != 0 {
            for b in blocks {
                if let Some(c) = b.mole_frac_out_con() {
                    sys.set_active(c, true);
                }
            }
            return Err(PropError::NonZeroDegreesOfFreedom { dof });
        }
        None
    } else {
        Some(fix_states(sys, blocks, hints)?)
    };

    let two_phase = first.is_two_phase();
    let nonideal = !first.params().activity_model().is_ideal();

    // A hard solver failure mid-schedule (non-square stage, non-finite
    // residual) must not leak the temporary fixing, the pinned activity
    // coefficients or the deactivated equations.
    if let Err(e) = run_stages(sys, blocks, opts, two_phase, nonideal) {
        for tag in STAGED_TAGS {
            sys.activate_tag(tag);
        }
        for b in blocks {
            if let Some(gammas) = b.gamma_vars() {
                for &g in gammas {
                    sys.unfix(g);
                }
            }
            if let Some(c) = b.mole_frac_out_con() {
                sys.set_active(c, true);
            }
        }
        if let Some(flags) = &flags {
            unfix_new(sys, flags);
        }
        return Err(e);
    }

    for b in blocks {
        if let Some(c) = b.mole_frac_out_con() {
            sys.set_active(c, true);
        }
    }

    if opts.state_vars_fixed {
        if opts.verbosity.at_least(Verbosity::Normal) {
            info!("initialization complete");
        }
        return Ok(None);
    }
    let flags = flags.unwrap_or(InitFlags { blocks: Vec::new() });
    if opts.hold_state {
        if opts.verbosity.at_least(Verbosity::Normal) {
            info!("initialization complete, state held");
        }
        Ok(Some(flags))
    } else {
        release_state(sys, blocks, flags, opts.verbosity)?;
        if opts.verbosity.at_least(Verbosity::Normal) {
            info!("initialization complete");
        }
        Ok(None)
    }
}

/// Undo the fixing performed by [`initialize`], restoring each state
/// variable's prior fixedness. `blocks` must be the collection the flags
/// came from.
pub fn release_state(
    sys: &mut EquationSystem,
    blocks: &[StateBlock],
    flags: InitFlags,
    verbosity: Verbosity,
) -> PropResult<()> {
    if flags.blocks.len() != blocks.len() {
        return Err(PropError::InvalidCollection {
            what: format!(
                "flags for {} blocks applied to {} blocks",
                flags.blocks.len(),
                blocks.len()
            ),
        });
    }
    unfix_new(sys, &flags);
    if verbosity.at_least(Verbosity::Normal) {
        info!("state released");
    }
    Ok(())
}

/// Equation families deactivated for stage 1 and reactivated over the
/// course of the schedule.
const STAGED_TAGS: [ConstraintTag; 12] = [
    ConstraintTag::TotalBalance,
    ConstraintTag::ComponentBalance,
    ConstraintTag::Mixing,
    ConstraintTag::SumMoleFrac,
    ConstraintTag::PhaseEquilibrium,
    ConstraintTag::EnthalpyPhase,
    ConstraintTag::EntropyPhase,
    ConstraintTag::InternalEnergyPhase,
    ConstraintTag::GijCoeff,
    ConstraintTag::ActivityA,
    ConstraintTag::ActivityB,
    ConstraintTag::ActivityCoeff,
];

fn run_stages(
    sys: &mut EquationSystem,
    blocks: &[StateBlock],
    opts: &InitOptions,
    two_phase: bool,
    nonideal: bool,
) -> PropResult<()> {
    // Stage 1: phase envelope only.
    for tag in STAGED_TAGS {
        sys.deactivate_tag(tag);
    }
    if two_phase {
        solve_stage(sys, opts, 1)?;
    } else if opts.verbosity.at_least(Verbosity::Normal) {
        info!(stage = 1, "skipped, single-phase package");
    }

    // Stage 2: balances and equilibrium, ideal activity.
    for tag in [
        ConstraintTag::TotalBalance,
        ConstraintTag::ComponentBalance,
        ConstraintTag::Mixing,
        ConstraintTag::SumMoleFrac,
        ConstraintTag::PhaseEquilibrium,
    ] {
        sys.activate_tag(tag);
    }
    for b in blocks {
        if let Some(gammas) = b.gamma_vars() {
            for &g in gammas {
                sys.fix_at(g, 1.0);
            }
        }
    }
    solve_stage(sys, opts, 2)?;

    // Stages 3 and 4: bring in the activity model, then free its
    // coefficients.
    if nonideal {
        sys.activate_tag(ConstraintTag::GijCoeff);
        sys.activate_tag(ConstraintTag::ActivityA);
        sys.activate_tag(ConstraintTag::ActivityB);
        solve_stage(sys, opts, 3)?;

        sys.activate_tag(ConstraintTag::ActivityCoeff);
        for b in blocks {
            if let Some(gammas) = b.gamma_vars() {
                for &g in gammas {
                    sys.unfix(g);
                }
            }
        }
        solve_stage(sys, opts, 4)?;
    } else if opts.verbosity.at_least(Verbosity::Normal) {
        info!(stage = 3, "skipped, ideal activity model");
    }

    // Stage 5: caloric properties.
    sys.activate_tag(ConstraintTag::EnthalpyPhase);
    sys.activate_tag(ConstraintTag::EntropyPhase);
    sys.activate_tag(ConstraintTag::InternalEnergyPhase);
    solve_stage(sys, opts, 5)
}

fn unfix_new(sys: &mut EquationSystem, flags: &InitFlags) {
    for bf in &flags.blocks {
        for &(id, was_fixed) in &bf.vars {
            if !was_fixed {
                sys.unfix(id);
            }
        }
    }
}

fn solve_stage(sys: &mut EquationSystem, opts: &InitOptions, stage: u8) -> PropResult<()> {
    let report = solve_system(sys, &opts.solver)?;
    if opts.verbosity.at_least(Verbosity::Normal) {
        if report.converged {
            info!(stage, iterations = report.iterations, "initialization stage complete");
        } else {
            warn!(
                stage,
                residual = report.residual_norm,
                "initialization stage did not converge"
            );
        }
    }
    Ok(())
}

/// Fix every unfixed state variable at its hint (or default) value,
/// remembering which were already fixed by the caller.
fn fix_states(
    sys: &mut EquationSystem,
    blocks: &[StateBlock],
    hints: Option<&StateHints>,
) -> PropResult<InitFlags> {
    let params = blocks[0].params();
    let n = params.n_components();
    let comps = params.components();

    let (flow, per_comp, temperature, pressure) = match (params.state_basis(), hints) {
        (StateBasis::FTPz, None) => (1.0, vec![1.0 / n as f64; n], 300.0, 101_325.0),
        (StateBasis::FcTP, None) => (0.0, vec![1.0 / n as f64; n], 300.0, 101_325.0),
        (StateBasis::FTPz, Some(h)) => (
            require(h.flow_mol, "flow_mol")?,
            comp_values(h.mole_frac.as_ref(), comps, "mole_frac")?,
            require(h.temperature, "temperature")?,
            require(h.pressure, "pressure")?,
        ),
        (StateBasis::FcTP, Some(h)) => (
            0.0,
            comp_values(h.flow_mol_comp.as_ref(), comps, "flow_mol_comp")?,
            require(h.temperature, "temperature")?,
            require(h.pressure, "pressure")?,
        ),
    };

    let mut out = Vec::with_capacity(blocks.len());
    for b in blocks {
        let mut vars = Vec::new();
        match params.state_basis() {
            StateBasis::FTPz => {
                let f = b.flow_mol().expect("FTPz basis");
                fix_remember(sys, &mut vars, f, flow);
                for (&z, &value) in b.mole_frac().iter().zip(&per_comp) {
                    fix_remember(sys, &mut vars, z, value);
                }
            }
            StateBasis::FcTP => {
                for (&fc, &value) in b.flow_mol_comp().iter().zip(&per_comp) {
                    fix_remember(sys, &mut vars, fc, value);
                }
            }
        }
        fix_remember(sys, &mut vars, b.temperature(), temperature);
        fix_remember(sys, &mut vars, b.pressure(), pressure);
        out.push(BlockFlags { vars });
    }
    Ok(InitFlags { blocks: out })
}

fn fix_remember(sys: &mut EquationSystem, vars: &mut Vec<(VarId, bool)>, id: VarId, value: f64) {
    let was_fixed = sys.is_fixed(id);
    if !was_fixed {
        sys.fix_at(id, value);
    }
    vars.push((id, was_fixed));
}

fn require(value: Option<f64>, key: &str) -> PropResult<f64> {
    value.ok_or_else(|| PropError::MissingHint { key: key.to_string() })
}

fn comp_values(
    map: Option<&BTreeMap<String, f64>>,
    comps: &[ComponentConstants],
    what: &str,
) -> PropResult<Vec<f64>> {
    let map = map.ok_or_else(|| PropError::MissingHint { key: what.to_string() })?;
    comps
        .iter()
        .map(|c| {
            map.get(&c.name).copied().ok_or_else(|| PropError::MissingHint {
                key: format!("{what}[{}]", c.name),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btx_constants() -> Vec<ComponentConstants> {
        vec![
            ComponentConstants {
                name: "benzene".to_string(),
                tc: 562.2,
                pc: 48.9e5,
                dh_vap: 33.87e3,
                t_boil: 353.25,
                cp_liq: [62.9, 0.236, 0.0, 0.0, 0.0],
                cp_vap: [-33.92, 0.4739, -3.017e-4, 7.130e-8, 0.0],
                psat: [-6.98273, 1.33213, -2.62863, -3.33399],
            },
            ComponentConstants {
                name: "toluene".to_string(),
                tc: 591.8,
                pc: 41.0e5,
                dh_vap: 38.26e3,
                t_boil: 383.8,
                cp_liq: [83.7, 0.167, 0.0, 0.0, 0.0],
                cp_vap: [-24.35, 0.5125, -2.765e-4, 4.911e-8, 0.0],
                psat: [-7.28607, 1.38091, -2.83433, -2.79168],
            },
        ]
    }

    #[test]
    fn missing_hint_keys_are_named() {
        let comps = btx_constants();
        let mut map = BTreeMap::new();
        map.insert("benzene".to_string(), 0.5);
        let err = comp_values(Some(&map), &comps, "mole_frac").unwrap_err();
        assert!(matches!(
            err,
            PropError::MissingHint { ref key } if key == "mole_frac[toluene]"
        ));

        let err = comp_values(None, &comps, "mole_frac").unwrap_err();
        assert!(matches!(err, PropError::MissingHint { ref key } if key == "mole_frac"));
    }

    #[test]
    fn require_reports_key() {
        assert!((require(Some(1.5), "flow_mol").unwrap() - 1.5).abs() < 1e-12);
        let err = require(None, "pressure").unwrap_err();
        assert!(matches!(err, PropError::MissingHint { ref key } if key == "pressure"));
    }
}
