//! A state block: the thermodynamic state of one material stream at one
//! point, declared as variables and equations in a caller-owned
//! [`EquationSystem`].
//!
//! Construction declares the state variables and phase-behavior equations
//! eagerly; everything else (vapor pressure, densities, caloric properties)
//! is built on first access and memoized. A failed on-demand build rolls the
//! system back to its pre-call shape before the error is returned, so a
//! caller may retry or continue without half-declared entities.

use crate::activity::{declare_activity_equations, ActivityVars};
use crate::error::{PropError, PropResult};
use crate::params::{Phase, PropertyParameters, StateBasis};
use crate::vle::{saturation_pressure, saturation_pressure_residual, smooth_max, smooth_min};
use pf_system::{ConId, ConstraintTag, EquationSystem, Term, VarId};
use std::sync::Arc;
use tracing::{error, warn};

const INF: f64 = f64::INFINITY;

/// Declaration failures during block construction surface as construction
/// errors once the partial state has been rolled back.
fn as_construction(e: PropError) -> PropError {
    match e {
        PropError::System(s) => PropError::Construction { what: s.to_string() },
        other => other,
    }
}

/// Basis of the quantities returned by [`StateBlock::material_flow_term`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialFlowBasis {
    Molar,
}

/// Material balance form this package is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialBalanceType {
    ComponentTotal,
}

/// Energy balance form this package is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyBalanceType {
    EnthalpyTotal,
}

/// Per-block construction options.
#[derive(Debug, Clone)]
pub struct StateBlockOptions {
    /// Whether the state is fully defined by upstream (an inlet). When
    /// false the block adds its own mole-fraction closure equation.
    pub defined_state: bool,
    /// Whether the block participates in phase equilibrium. Requires both
    /// phases to be valid.
    pub has_phase_equilibrium: bool,
    /// Smoothing width for `smooth_max(T, T_bubble)` [K].
    pub eps_1: f64,
    /// Smoothing width for `smooth_min(t1, T_dew)` [K].
    pub eps_2: f64,
}

impl Default for StateBlockOptions {
    fn default() -> Self {
        Self {
            defined_state: true,
            has_phase_equilibrium: false,
            eps_1: 0.01,
            eps_2: 0.0005,
        }
    }
}

/// Handles to one stream's state variables and property entities.
#[derive(Debug)]
pub struct StateBlock {
    params: Arc<PropertyParameters>,
    name: String,
    defined_state: bool,
    has_phase_equilibrium: bool,
    eps_1: f64,
    eps_2: f64,

    // State variables. `flow_mol`/`mole_frac` are used on the FTPz basis,
    // `flow_mol_comp` on FcTP; the unused set stays empty.
    flow_mol: Option<VarId>,
    mole_frac: Vec<VarId>,
    flow_mol_comp: Vec<VarId>,
    temperature: VarId,
    pressure: VarId,

    // Phase distribution, indexed [phase] / [phase][comp] in valid-phase
    // order.
    flow_mol_phase: Vec<VarId>,
    flow_mol_phase_comp: Vec<Vec<VarId>>,
    mole_frac_phase: Vec<Vec<VarId>>,

    mole_frac_out: Option<ConId>,
    activity: Option<ActivityVars>,

    temperature_bubble: Option<VarId>,
    temperature_dew: Option<VarId>,
    t1: Option<VarId>,
    temperature_eq: Option<VarId>,

    pressure_sat: Option<Vec<VarId>>,
    density_mol: Option<Vec<VarId>>,
    ds_vap: Option<Vec<VarId>>,
    enth_mol_phase_comp: Option<Vec<Vec<VarId>>>,
    enth_mol_phase: Option<Vec<VarId>>,
    entr_mol_phase_comp: Option<Vec<Vec<VarId>>>,
    entr_mol_phase: Option<Vec<VarId>>,
    energy_internal_mol_phase_comp: Option<Vec<Vec<VarId>>>,
    energy_internal_mol_phase: Option<Vec<VarId>>,
}

impl StateBlock {
    pub(crate) fn new(
        sys: &mut EquationSystem,
        params: Arc<PropertyParameters>,
        name: impl Into<String>,
        options: StateBlockOptions,
    ) -> PropResult<Self> {
        let name = name.into();
        if options.has_phase_equilibrium && !params.valid_phase().is_two_phase() {
            return Err(PropError::Configuration {
                what: format!(
                    "block '{name}' requests phase equilibrium but only one phase is valid"
                ),
            });
        }
        let cp = sys.checkpoint();
        match Self::build(sys, params, name, options) {
            Ok(blk) => Ok(blk),
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    fn build(
        sys: &mut EquationSystem,
        params: Arc<PropertyParameters>,
        name: String,
        options: StateBlockOptions,
    ) -> PropResult<Self> {
        let n = params.n_components();
        let basis = params.state_basis();

        let mut flow_mol = None;
        let mut mole_frac = Vec::new();
        let mut flow_mol_comp = Vec::new();
        match basis {
            StateBasis::FTPz => {
                flow_mol = Some(sys.add_var(format!("{name}.flow_mol"), 1.0, 0.0, INF)?);
                for c in params.components() {
                    mole_frac.push(sys.add_var(
                        format!("{name}.mole_frac[{}]", c.name),
                        1.0 / n as f64,
                        0.0,
                        1.0,
                    )?);
                }
            }
            StateBasis::FcTP => {
                for c in params.components() {
                    flow_mol_comp.push(sys.add_var(
                        format!("{name}.flow_mol_comp[{}]", c.name),
                        1.0 / n as f64,
                        0.0,
                        INF,
                    )?);
                }
            }
        }
        let pressure = sys.add_var(format!("{name}.pressure"), 101_325.0, 0.0, INF)?;
        let temperature = sys.add_var(format!("{name}.temperature"), 298.15, 0.0, INF)?;

        let mut flow_mol_phase = Vec::new();
        let mut flow_mol_phase_comp = Vec::new();
        let mut mole_frac_phase = Vec::new();
        for &p in params.phases() {
            match basis {
                StateBasis::FTPz => {
                    flow_mol_phase.push(sys.add_var(
                        format!("{name}.flow_mol_phase[{p}]"),
                        0.5,
                        0.0,
                        INF,
                    )?);
                }
                StateBasis::FcTP => {
                    let mut row = Vec::with_capacity(n);
                    for c in params.components() {
                        row.push(sys.add_var(
                            format!("{name}.flow_mol_phase_comp[{p},{}]", c.name),
                            0.5,
                            0.0,
                            INF,
                        )?);
                    }
                    flow_mol_phase_comp.push(row);
                }
            }
            let mut row = Vec::with_capacity(n);
            for c in params.components() {
                row.push(sys.add_var(
                    format!("{name}.mole_frac_phase[{p},{}]", c.name),
                    1.0 / n as f64,
                    0.0,
                    1.0,
                )?);
            }
            mole_frac_phase.push(row);
        }

        let mut blk = Self {
            params,
            name,
            defined_state: options.defined_state,
            has_phase_equilibrium: options.has_phase_equilibrium,
            eps_1: options.eps_1,
            eps_2: options.eps_2,
            flow_mol,
            mole_frac,
            flow_mol_comp,
            temperature,
            pressure,
            flow_mol_phase,
            flow_mol_phase_comp,
            mole_frac_phase,
            mole_frac_out: None,
            activity: None,
            temperature_bubble: None,
            temperature_dew: None,
            t1: None,
            temperature_eq: None,
            pressure_sat: None,
            density_mol: None,
            ds_vap: None,
            enth_mol_phase_comp: None,
            enth_mol_phase: None,
            entr_mol_phase_comp: None,
            entr_mol_phase: None,
            energy_internal_mol_phase_comp: None,
            energy_internal_mol_phase: None,
        };

        if blk.is_two_phase() {
            let comp_names: Vec<String> = blk
                .params
                .components()
                .iter()
                .map(|c| c.name.clone())
                .collect();
            let liq = blk.params.phase_index(Phase::Liq).unwrap_or(0);
            blk.activity = declare_activity_equations(
                sys,
                &blk.name,
                blk.params.activity_model(),
                &comp_names,
                &blk.mole_frac_phase[liq],
            )?;
            blk.make_flash_eq(sys)?;
        } else {
            blk.make_single_phase_eq(sys)?;
        }

        Ok(blk)
    }

    pub fn is_two_phase(&self) -> bool {
        self.params.valid_phase().is_two_phase()
    }

    pub fn params(&self) -> &Arc<PropertyParameters> {
        &self.params
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defined_state(&self) -> bool {
        self.defined_state
    }

    pub fn has_phase_equilibrium(&self) -> bool {
        self.has_phase_equilibrium
    }

    pub fn temperature(&self) -> VarId {
        self.temperature
    }

    pub fn pressure(&self) -> VarId {
        self.pressure
    }

    pub fn flow_mol(&self) -> Option<VarId> {
        self.flow_mol
    }

    pub fn mole_frac(&self) -> &[VarId] {
        &self.mole_frac
    }

    pub fn flow_mol_comp(&self) -> &[VarId] {
        &self.flow_mol_comp
    }

    pub fn flow_mol_phase(&self, phase: Phase) -> Option<VarId> {
        let p = self.params.phase_index(phase)?;
        self.flow_mol_phase.get(p).copied()
    }

    pub fn flow_mol_phase_comp(&self, phase: Phase) -> Option<&[VarId]> {
        let p = self.params.phase_index(phase)?;
        self.flow_mol_phase_comp.get(p).map(Vec::as_slice)
    }

    pub fn mole_frac_phase(&self, phase: Phase) -> Option<&[VarId]> {
        let p = self.params.phase_index(phase)?;
        self.mole_frac_phase.get(p).map(Vec::as_slice)
    }

    pub fn temperature_eq(&self) -> Option<VarId> {
        self.temperature_eq
    }

    pub fn gamma_vars(&self) -> Option<&[VarId]> {
        self.activity.as_ref().map(|a| a.gamma.as_slice())
    }

    pub(crate) fn mole_frac_out_con(&self) -> Option<ConId> {
        self.mole_frac_out
    }

    /// Overall mixture mole fraction of component `i`, as an expression
    /// valid on either state basis.
    pub fn mole_frac_term(&self, i: usize) -> Term {
        match self.params.state_basis() {
            StateBasis::FTPz => Term::var(self.mole_frac[i]),
            StateBasis::FcTP => {
                let ids = self.flow_mol_comp.clone();
                Term::new(move |v| {
                    let total: f64 = ids.iter().map(|id| v[id.index()]).sum();
                    v[ids[i].index()] / total
                })
            }
        }
    }

    /// Variables the mixture composition depends on.
    fn mixture_uses(&self) -> Vec<VarId> {
        match self.params.state_basis() {
            StateBasis::FTPz => self.mole_frac.clone(),
            StateBasis::FcTP => self.flow_mol_comp.clone(),
        }
    }

    fn make_single_phase_eq(&mut self, sys: &mut EquationSystem) -> PropResult<()> {
        let n = self.params.n_components();
        let name = self.name.clone();
        match self.params.state_basis() {
            StateBasis::FTPz => {
                let (f, fp) = (self.flow_mol.expect("FTPz basis"), self.flow_mol_phase[0]);
                sys.add_con(
                    format!("{name}.eq_total"),
                    ConstraintTag::TotalBalance,
                    vec![fp, f],
                    1.0,
                    move |v| v[fp.index()] - v[f.index()],
                );
                for i in 0..n {
                    let comp = &self.params.component(i).name;
                    let (z, x) = (self.mole_frac[i], self.mole_frac_phase[0][i]);
                    sys.add_con(
                        format!("{name}.eq_comp[{comp}]"),
                        ConstraintTag::ComponentBalance,
                        vec![f, z, fp, x],
                        1.0,
                        move |v| v[f.index()] * v[z.index()] - v[fp.index()] * v[x.index()],
                    );
                }
                if !self.defined_state {
                    let z = self.mole_frac.clone();
                    let uses = z.clone();
                    self.mole_frac_out = Some(sys.add_con(
                        format!("{name}.eq_mol_frac_out"),
                        ConstraintTag::MoleFracOut,
                        uses,
                        1.0,
                        move |v| z.iter().map(|id| v[id.index()]).sum::<f64>() - 1.0,
                    ));
                }
            }
            StateBasis::FcTP => {
                for i in 0..n {
                    let comp = &self.params.component(i).name;
                    let (fc, fpc) = (self.flow_mol_comp[i], self.flow_mol_phase_comp[0][i]);
                    sys.add_con(
                        format!("{name}.eq_comp[{comp}]"),
                        ConstraintTag::ComponentBalance,
                        vec![fc, fpc],
                        1.0,
                        move |v| v[fc.index()] - v[fpc.index()],
                    );
                }
                self.make_phase_mixing_eq(sys, 0);
            }
        }
        Ok(())
    }

    /// `mole_frac_phase[p,i] * sum_k flow_mol_phase_comp[p,k] ==
    /// flow_mol_phase_comp[p,i]` for every component of phase `p`.
    fn make_phase_mixing_eq(&mut self, sys: &mut EquationSystem, p: usize) {
        let n = self.params.n_components();
        let name = self.name.clone();
        let phase = self.params.phases()[p];
        for i in 0..n {
            let comp = &self.params.component(i).name;
            let x = self.mole_frac_phase[p][i];
            let flows = self.flow_mol_phase_comp[p].clone();
            let fpc = flows[i];
            let mut uses = vec![x];
            uses.extend_from_slice(&flows);
            sys.add_con(
                format!("{name}.eq_mole_frac[{phase},{comp}]"),
                ConstraintTag::Mixing,
                uses,
                1.0,
                move |v| {
                    let total: f64 = flows.iter().map(|id| v[id.index()]).sum();
                    v[x.index()] * total - v[fpc.index()]
                },
            );
        }
    }

    fn make_flash_eq(&mut self, sys: &mut EquationSystem) -> PropResult<()> {
        let n = self.params.n_components();
        let name = self.name.clone();
        let liq = self.params.phase_index(Phase::Liq).expect("two-phase");
        let vap = self.params.phase_index(Phase::Vap).expect("two-phase");

        match self.params.state_basis() {
            StateBasis::FTPz => {
                let f = self.flow_mol.expect("FTPz basis");
                let (fl, fv) = (self.flow_mol_phase[liq], self.flow_mol_phase[vap]);
                sys.add_con(
                    format!("{name}.eq_total"),
                    ConstraintTag::TotalBalance,
                    vec![fl, fv, f],
                    1.0,
                    move |v| v[fl.index()] + v[fv.index()] - v[f.index()],
                );
                for i in 0..n {
                    let comp = &self.params.component(i).name;
                    let z = self.mole_frac[i];
                    let x = self.mole_frac_phase[liq][i];
                    let y = self.mole_frac_phase[vap][i];
                    sys.add_con(
                        format!("{name}.eq_comp[{comp}]"),
                        ConstraintTag::ComponentBalance,
                        vec![f, z, fl, x, fv, y],
                        1.0,
                        move |v| {
                            v[f.index()] * v[z.index()]
                                - v[fl.index()] * v[x.index()]
                                - v[fv.index()] * v[y.index()]
                        },
                    );
                }
                let xs = self.mole_frac_phase[liq].clone();
                let ys = self.mole_frac_phase[vap].clone();
                let mut uses = xs.clone();
                uses.extend_from_slice(&ys);
                sys.add_con(
                    format!("{name}.eq_sum_mol_frac"),
                    ConstraintTag::SumMoleFrac,
                    uses,
                    1.0,
                    move |v| {
                        xs.iter().map(|id| v[id.index()]).sum::<f64>()
                            - ys.iter().map(|id| v[id.index()]).sum::<f64>()
                    },
                );
                if !self.defined_state {
                    let z = self.mole_frac.clone();
                    let uses = z.clone();
                    self.mole_frac_out = Some(sys.add_con(
                        format!("{name}.eq_mol_frac_out"),
                        ConstraintTag::MoleFracOut,
                        uses,
                        1.0,
                        move |v| z.iter().map(|id| v[id.index()]).sum::<f64>() - 1.0,
                    ));
                }
            }
            StateBasis::FcTP => {
                for i in 0..n {
                    let comp = &self.params.component(i).name;
                    let fc = self.flow_mol_comp[i];
                    let fl = self.flow_mol_phase_comp[liq][i];
                    let fv = self.flow_mol_phase_comp[vap][i];
                    sys.add_con(
                        format!("{name}.eq_comp[{comp}]"),
                        ConstraintTag::ComponentBalance,
                        vec![fc, fl, fv],
                        1.0,
                        move |v| v[fc.index()] - v[fl.index()] - v[fv.index()],
                    );
                }
                for p in 0..self.params.phases().len() {
                    self.make_phase_mixing_eq(sys, p);
                }
            }
        }

        let t_bubble = self.temperature_bubble(sys)?;
        let t_dew = self.temperature_dew(sys)?;

        // Smoothed equilibrium temperature.
        let t_max = self.min_critical_temperature();
        let t_now = sys.value(self.temperature);
        let t1 = sys.add_var(format!("{name}._t1"), t_now, 1.0, t_max)?;
        let teq = sys.add_var(format!("{name}._teq"), t_now, 1.0, t_max)?;
        let (t, eps_1, eps_2) = (self.temperature, self.eps_1, self.eps_2);
        sys.add_con(
            format!("{name}._t1_constraint"),
            ConstraintTag::SmoothT1,
            vec![t1, t, t_bubble],
            1.0,
            move |v| v[t1.index()] - smooth_max(v[t.index()], v[t_bubble.index()], eps_1),
        );
        sys.add_con(
            format!("{name}._teq_constraint"),
            ConstraintTag::SmoothTeq,
            vec![teq, t1, t_dew],
            1.0,
            move |v| v[teq.index()] - smooth_min(v[t1.index()], v[t_dew.index()], eps_2),
        );
        self.t1 = Some(t1);
        self.temperature_eq = Some(teq);

        // Saturation pressures are evaluated at the equilibrium temperature
        // declared just above.
        let psat = self.pressure_sat(sys)?;

        // Fugacity equality across the phase boundary, one equation per
        // component: y P == x gamma Psat.
        let scale = self.params.pressure_ref();
        for i in 0..n {
            let comp = &self.params.component(i).name;
            let x = self.mole_frac_phase[liq][i];
            let y = self.mole_frac_phase[vap][i];
            let p = self.pressure;
            let ps = psat[i];
            let gamma = self.activity.as_ref().map(|a| a.gamma[i]);
            let mut uses = vec![y, p, x, ps];
            if let Some(g) = gamma {
                uses.push(g);
            }
            sys.add_con(
                format!("{name}.eq_phase_equilibrium[{comp}]"),
                ConstraintTag::PhaseEquilibrium,
                uses,
                scale,
                move |v| {
                    let g = gamma.map_or(1.0, |g| v[g.index()]);
                    v[y.index()] * v[p.index()] - v[x.index()] * g * v[ps.index()]
                },
            );
        }
        Ok(())
    }

    /// Smallest component critical temperature: the upper bound for any
    /// temperature the vapor pressure correlation is evaluated at.
    fn min_critical_temperature(&self) -> f64 {
        self.params
            .components()
            .iter()
            .map(|c| c.tc)
            .fold(INF, f64::min)
    }

    fn require_two_phase(&self, what: &str) -> PropResult<()> {
        if self.is_two_phase() {
            Ok(())
        } else {
            Err(PropError::Configuration {
                what: format!("{what} requires both phases to be valid on block '{}'", self.name),
            })
        }
    }

    /// Bubble point temperature of the overall mixture at the block's
    /// pressure. Declared on first call.
    pub fn temperature_bubble(&mut self, sys: &mut EquationSystem) -> PropResult<VarId> {
        if let Some(id) = self.temperature_bubble {
            return Ok(id);
        }
        self.require_two_phase("temperature_bubble")?;
        let name = self.name.clone();
        let t_max = self.min_critical_temperature();
        let t_now = sys.value(self.temperature);
        let comps: Vec<_> = self.params.components().to_vec();
        let model = self.params.activity_model().clone();
        let x_terms: Vec<Term> = (0..comps.len()).map(|i| self.mole_frac_term(i)).collect();
        let p = self.pressure;
        let scale = self.params.pressure_ref();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<VarId> {
            let tb = sys.add_var(format!("{name}.temperature_bubble"), t_now, 1.0, t_max)?;
            let mut uses = self.mixture_uses();
            uses.push(p);
            uses.push(tb);
            sys.add_con(
                format!("{name}.eq_bubble_temp"),
                ConstraintTag::BubbleTemperature,
                uses,
                scale,
                move |v| {
                    let x: Vec<f64> = x_terms.iter().map(|t| t.eval(v)).collect();
                    let gamma = model.activity_coefficients(&x);
                    let tb_v = v[tb.index()];
                    let sum: f64 = x
                        .iter()
                        .zip(&gamma)
                        .zip(&comps)
                        .map(|((xi, gi), c)| xi * gi * saturation_pressure(c, tb_v))
                        .sum();
                    sum - v[p.index()]
                },
            );
            Ok(tb)
        })();
        match result {
            Ok(id) => {
                self.temperature_bubble = Some(id);
                Ok(id)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Dew point temperature of the overall mixture at the block's
    /// pressure. Declared on first call.
    pub fn temperature_dew(&mut self, sys: &mut EquationSystem) -> PropResult<VarId> {
        if let Some(id) = self.temperature_dew {
            return Ok(id);
        }
        self.require_two_phase("temperature_dew")?;
        let name = self.name.clone();
        let t_max = self.min_critical_temperature();
        let t_now = sys.value(self.temperature);
        let comps: Vec<_> = self.params.components().to_vec();
        let model = self.params.activity_model().clone();
        let x_terms: Vec<Term> = (0..comps.len()).map(|i| self.mole_frac_term(i)).collect();
        let p = self.pressure;

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<VarId> {
            let td = sys.add_var(format!("{name}.temperature_dew"), t_now, 1.0, t_max)?;
            let mut uses = self.mixture_uses();
            uses.push(p);
            uses.push(td);
            // The liquid that condenses at the dew point has the
            // coefficients of the overall composition, evaluated in closed
            // form.
            sys.add_con(
                format!("{name}.eq_dew_temp"),
                ConstraintTag::DewTemperature,
                uses,
                1.0,
                move |v| {
                    let x: Vec<f64> = x_terms.iter().map(|t| t.eval(v)).collect();
                    let gamma = model.activity_coefficients(&x);
                    let td_v = v[td.index()];
                    let sum: f64 = x
                        .iter()
                        .zip(&gamma)
                        .zip(&comps)
                        .map(|((xi, gi), c)| xi / (gi * saturation_pressure(c, td_v)))
                        .sum();
                    v[p.index()] * sum - 1.0
                },
            );
            Ok(td)
        })();
        match result {
            Ok(id) => {
                self.temperature_dew = Some(id);
                Ok(id)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Component saturation pressures, at the smoothed equilibrium
    /// temperature on two-phase blocks and at the state temperature
    /// otherwise.
    pub fn pressure_sat(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.pressure_sat {
            return Ok(ids.clone());
        }
        let name = self.name.clone();
        let tvar = self.temperature_eq.unwrap_or(self.temperature);
        let comps: Vec<_> = self.params.components().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(comps.len());
            for c in &comps {
                let ps = sys.add_var(
                    format!("{name}.pressure_sat[{}]", c.name),
                    101_325.0,
                    1e-3,
                    INF,
                )?;
                let c = c.clone();
                sys.add_con(
                    format!("{name}.eq_pressure_sat[{}]", c.name),
                    ConstraintTag::VaporPressure,
                    vec![ps, tvar],
                    1.0,
                    move |v| saturation_pressure_residual(&c, v[tvar.index()], v[ps.index()]),
                );
                ids.push(ps);
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.pressure_sat = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Molar density per phase. The vapor follows the ideal gas law; the
    /// liquid is a constant placeholder pending a real correlation.
    pub fn density_mol(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.density_mol {
            return Ok(ids.clone());
        }
        let name = self.name.clone();
        let (t, p) = (self.temperature, self.pressure);
        let r = self.params.gas_const();
        let p_scale = self.params.pressure_ref();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(phases.len());
            for &phase in &phases {
                match phase {
                    Phase::Vap => {
                        let rho =
                            sys.add_var(format!("{name}.density_mol[{phase}]"), 40.0, 0.0, INF)?;
                        sys.add_con(
                            format!("{name}.eq_density_mol[{phase}]"),
                            ConstraintTag::Property,
                            vec![rho, t, p],
                            p_scale,
                            move |v| v[rho.index()] * r * v[t.index()] - v[p.index()],
                        );
                        ids.push(rho);
                    }
                    Phase::Liq => {
                        warn!(
                            block = %name,
                            "liquid density uses a constant placeholder value"
                        );
                        let rho = sys.add_var(
                            format!("{name}.density_mol[{phase}]"),
                            11.1e3,
                            0.0,
                            INF,
                        )?;
                        sys.add_con(
                            format!("{name}.eq_density_mol[{phase}]"),
                            ConstraintTag::Property,
                            vec![rho],
                            1e3,
                            move |v| v[rho.index()] - 11.1e3,
                        );
                        ids.push(rho);
                    }
                }
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.density_mol = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Entropy of vaporization per component, `ds_vap T_boil == dh_vap`.
    pub fn ds_vap(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.ds_vap {
            return Ok(ids.clone());
        }
        let name = self.name.clone();
        let comps: Vec<_> = self.params.components().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(comps.len());
            for c in &comps {
                let ds = sys.add_var(format!("{name}.ds_vap[{}]", c.name), 86.0, 0.0, INF)?;
                let (t_boil, dh_vap) = (c.t_boil, c.dh_vap);
                sys.add_con(
                    format!("{name}.eq_ds_vap[{}]", c.name),
                    ConstraintTag::Property,
                    vec![ds],
                    1e3,
                    move |v| v[ds.index()] * t_boil - dh_vap,
                );
                ids.push(ds);
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.ds_vap = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Molar enthalpy per phase and component, relative to the reference
    /// temperature; the vapor carries the heat of vaporization.
    pub fn enth_mol_phase_comp(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<Vec<VarId>>> {
        if let Some(ids) = &self.enth_mol_phase_comp {
            return Ok(ids.clone());
        }
        let name = self.name.clone();
        let t = self.temperature;
        let t_ref = self.params.temperature_ref();
        let comps: Vec<_> = self.params.components().to_vec();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<Vec<VarId>>> {
            let mut out = Vec::with_capacity(phases.len());
            for &phase in &phases {
                let mut row = Vec::with_capacity(comps.len());
                for c in &comps {
                    let h = sys.add_var(
                        format!("{name}.enth_mol_phase_comp[{phase},{}]", c.name),
                        0.0,
                        f64::NEG_INFINITY,
                        INF,
                    )?;
                    let c = c.clone();
                    let latent = match phase {
                        Phase::Vap => c.dh_vap,
                        Phase::Liq => 0.0,
                    };
                    sys.add_con(
                        format!("{name}.eq_enth_mol_phase_comp[{phase},{}]", c.name),
                        ConstraintTag::Property,
                        vec![h, t],
                        1e3,
                        move |v| {
                            v[h.index()] - latent - c.enth_integral(phase, v[t.index()], t_ref)
                        },
                    );
                    row.push(h);
                }
                out.push(row);
            }
            Ok(out)
        })();
        match result {
            Ok(ids) => {
                self.enth_mol_phase_comp = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Phase molar enthalpy, mixed ideally from the component values.
    pub fn enth_mol_phase(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.enth_mol_phase {
            return Ok(ids.clone());
        }
        let comp_h = self.enth_mol_phase_comp(sys)?;
        let name = self.name.clone();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(phases.len());
            for (p, &phase) in phases.iter().enumerate() {
                let h = sys.add_var(
                    format!("{name}.enth_mol_phase[{phase}]"),
                    0.0,
                    f64::NEG_INFINITY,
                    INF,
                )?;
                let hs = comp_h[p].clone();
                let xs = self.mole_frac_phase[p].clone();
                let mut uses = vec![h];
                uses.extend_from_slice(&hs);
                uses.extend_from_slice(&xs);
                sys.add_con(
                    format!("{name}.eq_enth_mol_phase[{phase}]"),
                    ConstraintTag::EnthalpyPhase,
                    uses,
                    1e3,
                    move |v| {
                        let mix: f64 = hs
                            .iter()
                            .zip(&xs)
                            .map(|(hi, xi)| v[hi.index()] * v[xi.index()])
                            .sum();
                        v[h.index()] - mix
                    },
                );
                ids.push(h);
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.enth_mol_phase = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Molar entropy per phase and component. The vapor includes the
    /// entropy of vaporization and ideal-mixing partial pressure term.
    pub fn entr_mol_phase_comp(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<Vec<VarId>>> {
        if let Some(ids) = &self.entr_mol_phase_comp {
            return Ok(ids.clone());
        }
        let has_vap = self.params.phase_index(Phase::Vap).is_some();
        let ds = if has_vap {
            self.ds_vap(sys)?
        } else {
            Vec::new()
        };
        let name = self.name.clone();
        let t = self.temperature;
        let p = self.pressure;
        let t_ref = self.params.temperature_ref();
        let p_ref = self.params.pressure_ref();
        let r = self.params.gas_const();
        let comps: Vec<_> = self.params.components().to_vec();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<Vec<VarId>>> {
            let mut out = Vec::with_capacity(phases.len());
            for (pi, &phase) in phases.iter().enumerate() {
                let mut row = Vec::with_capacity(comps.len());
                for (i, c) in comps.iter().enumerate() {
                    let s = sys.add_var(
                        format!("{name}.entr_mol_phase_comp[{phase},{}]", c.name),
                        0.0,
                        f64::NEG_INFINITY,
                        INF,
                    )?;
                    let c = c.clone();
                    match phase {
                        Phase::Liq => {
                            sys.add_con(
                                format!("{name}.eq_entr_mol_phase_comp[{phase},{}]", c.name),
                                ConstraintTag::EntropyPhase,
                                vec![s, t],
                                1e2,
                                move |v| {
                                    v[s.index()] - c.entr_integral(phase, v[t.index()], t_ref)
                                },
                            );
                        }
                        Phase::Vap => {
                            let y = self.mole_frac_phase[pi][i];
                            let ds_i = ds[i];
                            sys.add_con(
                                format!("{name}.eq_entr_mol_phase_comp[{phase},{}]", c.name),
                                ConstraintTag::EntropyPhase,
                                vec![s, t, ds_i, y, p],
                                1e2,
                                move |v| {
                                    v[s.index()] - v[ds_i.index()]
                                        - c.entr_integral(phase, v[t.index()], t_ref)
                                        + r * (v[y.index()] * v[p.index()] / p_ref).ln()
                                },
                            );
                        }
                    }
                    row.push(s);
                }
                out.push(row);
            }
            Ok(out)
        })();
        match result {
            Ok(ids) => {
                self.entr_mol_phase_comp = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Phase molar entropy, mixed from the component values.
    pub fn entr_mol_phase(&mut self, sys: &mut EquationSystem) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.entr_mol_phase {
            return Ok(ids.clone());
        }
        let comp_s = self.entr_mol_phase_comp(sys)?;
        let name = self.name.clone();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(phases.len());
            for (p, &phase) in phases.iter().enumerate() {
                let s = sys.add_var(
                    format!("{name}.entr_mol_phase[{phase}]"),
                    0.0,
                    f64::NEG_INFINITY,
                    INF,
                )?;
                let ss = comp_s[p].clone();
                let xs = self.mole_frac_phase[p].clone();
                let mut uses = vec![s];
                uses.extend_from_slice(&ss);
                uses.extend_from_slice(&xs);
                sys.add_con(
                    format!("{name}.eq_entr_mol_phase[{phase}]"),
                    ConstraintTag::EntropyPhase,
                    uses,
                    1e2,
                    move |v| {
                        let mix: f64 = ss
                            .iter()
                            .zip(&xs)
                            .map(|(si, xi)| v[si.index()] * v[xi.index()])
                            .sum();
                        v[s.index()] - mix
                    },
                );
                ids.push(s);
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.entr_mol_phase = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Molar internal energy per phase and component. For the vapor,
    /// `u == h - R (T - T_ref)` under the ideal gas law; the liquid
    /// neglects the pv contribution.
    pub fn energy_internal_mol_phase_comp(
        &mut self,
        sys: &mut EquationSystem,
    ) -> PropResult<Vec<Vec<VarId>>> {
        if let Some(ids) = &self.energy_internal_mol_phase_comp {
            return Ok(ids.clone());
        }
        let comp_h = self.enth_mol_phase_comp(sys)?;
        let name = self.name.clone();
        let t = self.temperature;
        let t_ref = self.params.temperature_ref();
        let r = self.params.gas_const();
        let comps: Vec<_> = self.params.components().to_vec();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<Vec<VarId>>> {
            let mut out = Vec::with_capacity(phases.len());
            for (p, &phase) in phases.iter().enumerate() {
                let mut row = Vec::with_capacity(comps.len());
                for (i, c) in comps.iter().enumerate() {
                    let u = sys.add_var(
                        format!("{name}.energy_internal_mol_phase_comp[{phase},{}]", c.name),
                        0.0,
                        f64::NEG_INFINITY,
                        INF,
                    )?;
                    let h = comp_h[p][i];
                    match phase {
                        Phase::Vap => {
                            sys.add_con(
                                format!(
                                    "{name}.eq_energy_internal_mol_phase_comp[{phase},{}]",
                                    c.name
                                ),
                                ConstraintTag::Property,
                                vec![u, h, t],
                                1e3,
                                move |v| {
                                    v[u.index()] - v[h.index()] + r * (v[t.index()] - t_ref)
                                },
                            );
                        }
                        Phase::Liq => {
                            sys.add_con(
                                format!(
                                    "{name}.eq_energy_internal_mol_phase_comp[{phase},{}]",
                                    c.name
                                ),
                                ConstraintTag::Property,
                                vec![u, h],
                                1e3,
                                move |v| v[u.index()] - v[h.index()],
                            );
                        }
                    }
                    row.push(u);
                }
                out.push(row);
            }
            Ok(out)
        })();
        match result {
            Ok(ids) => {
                self.energy_internal_mol_phase_comp = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Phase molar internal energy, mixed from the component values.
    pub fn energy_internal_mol_phase(
        &mut self,
        sys: &mut EquationSystem,
    ) -> PropResult<Vec<VarId>> {
        if let Some(ids) = &self.energy_internal_mol_phase {
            return Ok(ids.clone());
        }
        let comp_u = self.energy_internal_mol_phase_comp(sys)?;
        let name = self.name.clone();
        let phases: Vec<Phase> = self.params.phases().to_vec();

        let cp = sys.checkpoint();
        let result = (|| -> PropResult<Vec<VarId>> {
            let mut ids = Vec::with_capacity(phases.len());
            for (p, &phase) in phases.iter().enumerate() {
                let u = sys.add_var(
                    format!("{name}.energy_internal_mol_phase[{phase}]"),
                    0.0,
                    f64::NEG_INFINITY,
                    INF,
                )?;
                let us = comp_u[p].clone();
                let xs = self.mole_frac_phase[p].clone();
                let mut uses = vec![u];
                uses.extend_from_slice(&us);
                uses.extend_from_slice(&xs);
                sys.add_con(
                    format!("{name}.eq_energy_internal_mol_phase[{phase}]"),
                    ConstraintTag::InternalEnergyPhase,
                    uses,
                    1e3,
                    move |v| {
                        let mix: f64 = us
                            .iter()
                            .zip(&xs)
                            .map(|(ui, xi)| v[ui.index()] * v[xi.index()])
                            .sum();
                        v[u.index()] - mix
                    },
                );
                ids.push(u);
            }
            Ok(ids)
        })();
        match result {
            Ok(ids) => {
                self.energy_internal_mol_phase = Some(ids.clone());
                Ok(ids)
            }
            Err(e) => {
                sys.rollback(cp);
                Err(as_construction(e))
            }
        }
    }

    /// Molar flow of `comp` carried by `phase`, for balance equations.
    /// Unknown phases or components contribute zero.
    pub fn material_flow_term(&self, phase: Phase, comp: &str) -> Term {
        let (Some(p), Some(i)) = (self.params.phase_index(phase), self.params.component_index(comp))
        else {
            return Term::constant(0.0);
        };
        match self.params.state_basis() {
            StateBasis::FTPz => {
                let (fp, x) = (self.flow_mol_phase[p], self.mole_frac_phase[p][i]);
                Term::new(move |v| v[fp.index()] * v[x.index()])
            }
            StateBasis::FcTP => Term::var(self.flow_mol_phase_comp[p][i]),
        }
    }

    /// Enthalpy flow carried by `phase`. Builds the phase enthalpy on
    /// demand.
    pub fn enthalpy_flow_term(
        &mut self,
        sys: &mut EquationSystem,
        phase: Phase,
    ) -> PropResult<Term> {
        let Some(p) = self.params.phase_index(phase) else {
            return Ok(Term::constant(0.0));
        };
        let h = self.enth_mol_phase(sys)?[p];
        match self.params.state_basis() {
            StateBasis::FTPz => {
                let fp = self.flow_mol_phase[p];
                Ok(Term::new(move |v| v[fp.index()] * v[h.index()]))
            }
            StateBasis::FcTP => {
                let flows = self.flow_mol_phase_comp[p].clone();
                Ok(Term::new(move |v| {
                    flows.iter().map(|id| v[id.index()]).sum::<f64>() * v[h.index()]
                }))
            }
        }
    }

    /// Molar holdup density of `comp` in `phase`. Builds the phase density
    /// on demand.
    pub fn material_density_term(
        &mut self,
        sys: &mut EquationSystem,
        phase: Phase,
        comp: &str,
    ) -> PropResult<Term> {
        let (Some(p), Some(i)) = (self.params.phase_index(phase), self.params.component_index(comp))
        else {
            return Ok(Term::constant(0.0));
        };
        let rho = self.density_mol(sys)?[p];
        let x = self.mole_frac_phase[p][i];
        Ok(Term::new(move |v| v[rho.index()] * v[x.index()]))
    }

    /// Internal energy holdup density of `phase`.
    pub fn energy_density_term(
        &mut self,
        sys: &mut EquationSystem,
        phase: Phase,
    ) -> PropResult<Term> {
        let Some(p) = self.params.phase_index(phase) else {
            return Ok(Term::constant(0.0));
        };
        let rho = self.density_mol(sys)?[p];
        let u = self.energy_internal_mol_phase(sys)?[p];
        Ok(Term::new(move |v| v[rho.index()] * v[u.index()]))
    }

    pub fn material_flow_basis(&self) -> MaterialFlowBasis {
        MaterialFlowBasis::Molar
    }

    pub fn default_material_balance_type(&self) -> MaterialBalanceType {
        MaterialBalanceType::ComponentTotal
    }

    pub fn default_energy_balance_type(&self) -> EnergyBalanceType {
        EnergyBalanceType::EnthalpyTotal
    }

    /// State variables in declaration order, grouped by name.
    pub fn state_variables(&self) -> Vec<(&'static str, Vec<VarId>)> {
        match self.params.state_basis() {
            StateBasis::FTPz => vec![
                ("flow_mol", vec![self.flow_mol.expect("FTPz basis")]),
                ("mole_frac", self.mole_frac.clone()),
                ("temperature", vec![self.temperature]),
                ("pressure", vec![self.pressure]),
            ],
            StateBasis::FcTP => vec![
                ("flow_mol_comp", self.flow_mol_comp.clone()),
                ("temperature", vec![self.temperature]),
                ("pressure", vec![self.pressure]),
            ],
        }
    }

    /// Sanity-check the solved state, logging rather than raising so a
    /// flowsheet-wide check can report every block.
    pub fn model_check(&self, sys: &EquationSystem) {
        for (what, id) in [("temperature", self.temperature), ("pressure", self.pressure)] {
            let value = sys.value(id);
            let (lo, hi) = sys.bounds(id);
            if value < lo {
                error!(block = %self.name, what, value, "value below lower bound");
            } else if value > hi {
                error!(block = %self.name, what, value, "value above upper bound");
            }
        }
    }
}
