//! Parameter store: per-component physical constants and package
//! configuration shared by every state block built from it.

use crate::error::{PropError, PropResult};
use crate::state_block::{StateBlock, StateBlockOptions};
use pf_core::numeric::ensure_finite;
use pf_core::units::{self, constants, MolarEnergy, Pressure, Temperature};
use pf_system::EquationSystem;
use std::fmt;
use std::sync::Arc;

/// A phase label. Phase ordering in indexed quantities is always
/// liquid first, vapor second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Liq,
    Vap,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Liq => f.write_str("Liq"),
            Phase::Vap => f.write_str("Vap"),
        }
    }
}

/// Which phases the package considers present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidPhase {
    Liq,
    Vap,
    VapLiq,
}

impl ValidPhase {
    pub fn phases(self) -> &'static [Phase] {
        match self {
            ValidPhase::Liq => &[Phase::Liq],
            ValidPhase::Vap => &[Phase::Vap],
            ValidPhase::VapLiq => &[Phase::Liq, Phase::Vap],
        }
    }

    pub fn is_two_phase(self) -> bool {
        matches!(self, ValidPhase::VapLiq)
    }
}

/// Choice of state variables.
///
/// `FTPz`: total molar flow, temperature, pressure and mixture mole
/// fractions. `FcTP`: component molar flows, temperature and pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBasis {
    FTPz,
    FcTP,
}

/// Liquid-phase activity coefficient model.
///
/// Binary interaction matrices are indexed `[i][j]` in component
/// declaration order; diagonal entries must be zero for `tau` and are
/// ignored for `alpha`.
#[derive(Debug, Clone)]
pub enum ActivityModel {
    /// Raoult's law, every coefficient identically one.
    Ideal,
    Nrtl {
        /// Non-randomness parameters.
        alpha: Vec<Vec<f64>>,
        /// Binary interaction parameters.
        tau: Vec<Vec<f64>>,
    },
    Wilson {
        /// Pure-component molar volumes, one per component.
        vol_mol: Vec<f64>,
        /// Binary interaction parameters.
        tau: Vec<Vec<f64>>,
    },
}

impl ActivityModel {
    pub fn is_ideal(&self) -> bool {
        matches!(self, ActivityModel::Ideal)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActivityModel::Ideal => "Ideal",
            ActivityModel::Nrtl { .. } => "NRTL",
            ActivityModel::Wilson { .. } => "Wilson",
        }
    }
}

/// Coefficients of the reduced-temperature vapor pressure correlation
/// `(1 - x) ln(Psat/Pc) = A x + B x^1.5 + C x^3 + D x^6` with
/// `x = (Tc - T)/Tc`.
#[derive(Debug, Clone, Copy)]
pub struct PressureSatCoeff {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

/// Pure-component data as supplied by the caller, with units carried on
/// the dimensioned quantities.
///
/// Heat capacity polynomials are `cp(T) = sum_k c[k] T^k` in J/mol.K with
/// T in K, coefficients in ascending power order.
#[derive(Debug, Clone)]
pub struct ComponentData {
    pub name: String,
    pub temperature_critical: Temperature,
    pub pressure_critical: Pressure,
    /// Molar heat of vaporization at the normal boiling point.
    pub dh_vap: MolarEnergy,
    /// Normal boiling point.
    pub temperature_boil: Temperature,
    pub cp_liq: [f64; 5],
    pub cp_vap: [f64; 5],
    pub pressure_sat_coeff: PressureSatCoeff,
}

/// Validated per-component constants in SI floats, ready for residual
/// closures.
#[derive(Debug, Clone)]
pub struct ComponentConstants {
    pub name: String,
    /// Critical temperature [K].
    pub tc: f64,
    /// Critical pressure [Pa].
    pub pc: f64,
    /// Heat of vaporization [J/mol].
    pub dh_vap: f64,
    /// Normal boiling point [K].
    pub t_boil: f64,
    pub cp_liq: [f64; 5],
    pub cp_vap: [f64; 5],
    pub psat: [f64; 4],
}

impl ComponentConstants {
    pub fn cp(&self, phase: Phase) -> &[f64; 5] {
        match phase {
            Phase::Liq => &self.cp_liq,
            Phase::Vap => &self.cp_vap,
        }
    }

    /// Integral of cp from `t_ref` to `t` [J/mol].
    pub fn enth_integral(&self, phase: Phase, t: f64, t_ref: f64) -> f64 {
        let cp = self.cp(phase);
        (0..5)
            .map(|k| cp[k] / (k as f64 + 1.0) * (t.powi(k as i32 + 1) - t_ref.powi(k as i32 + 1)))
            .sum()
    }

    /// Integral of cp/T from `t_ref` to `t` [J/mol.K].
    pub fn entr_integral(&self, phase: Phase, t: f64, t_ref: f64) -> f64 {
        let cp = self.cp(phase);
        cp[0] * (t / t_ref).ln()
            + (1..5)
                .map(|k| cp[k] / k as f64 * (t.powi(k as i32) - t_ref.powi(k as i32)))
                .sum::<f64>()
    }
}

/// One row of the supported-property table.
#[derive(Debug, Clone, Copy)]
pub struct PropertyMetadata {
    pub name: &'static str,
    /// Accessor that builds the property on demand, if it is not a state
    /// variable.
    pub method: Option<&'static str>,
    pub units: &'static str,
}

const PROPERTY_METADATA: &[PropertyMetadata] = &[
    PropertyMetadata { name: "flow_mol", method: None, units: "mol/s" },
    PropertyMetadata { name: "flow_mol_comp", method: None, units: "mol/s" },
    PropertyMetadata { name: "mole_frac", method: None, units: "-" },
    PropertyMetadata { name: "temperature", method: None, units: "K" },
    PropertyMetadata { name: "pressure", method: None, units: "Pa" },
    PropertyMetadata { name: "flow_mol_phase", method: None, units: "mol/s" },
    PropertyMetadata { name: "mole_frac_phase", method: None, units: "-" },
    PropertyMetadata { name: "temperature_bubble", method: Some("temperature_bubble"), units: "K" },
    PropertyMetadata { name: "temperature_dew", method: Some("temperature_dew"), units: "K" },
    PropertyMetadata { name: "pressure_sat", method: Some("pressure_sat"), units: "Pa" },
    PropertyMetadata { name: "density_mol", method: Some("density_mol"), units: "mol/m^3" },
    PropertyMetadata { name: "ds_vap", method: Some("ds_vap"), units: "J/mol.K" },
    PropertyMetadata { name: "enth_mol_phase_comp", method: Some("enth_mol_phase_comp"), units: "J/mol" },
    PropertyMetadata { name: "enth_mol_phase", method: Some("enth_mol_phase"), units: "J/mol" },
    PropertyMetadata { name: "entr_mol_phase_comp", method: Some("entr_mol_phase_comp"), units: "J/mol.K" },
    PropertyMetadata { name: "entr_mol_phase", method: Some("entr_mol_phase"), units: "J/mol.K" },
    PropertyMetadata {
        name: "energy_internal_mol_phase_comp",
        method: Some("energy_internal_mol_phase_comp"),
        units: "J/mol",
    },
    PropertyMetadata {
        name: "energy_internal_mol_phase",
        method: Some("energy_internal_mol_phase"),
        units: "J/mol",
    },
];

/// Base units every quantity in the package is expressed in.
#[derive(Debug, Clone, Copy)]
pub struct DefaultUnits {
    pub time: &'static str,
    pub length: &'static str,
    pub mass: &'static str,
    pub amount: &'static str,
    pub temperature: &'static str,
    pub energy: &'static str,
    pub holdup: &'static str,
}

pub const DEFAULT_UNITS: DefaultUnits = DefaultUnits {
    time: "s",
    length: "m",
    mass: "g",
    amount: "mol",
    temperature: "K",
    energy: "J",
    holdup: "mol",
};

/// Immutable, validated package configuration. Shared via `Arc` by every
/// state block built from it.
#[derive(Debug)]
pub struct PropertyParameters {
    components: Vec<ComponentConstants>,
    valid_phase: ValidPhase,
    state_basis: StateBasis,
    activity_model: ActivityModel,
    /// Thermodynamic reference temperature [K].
    temperature_ref: f64,
    /// Thermodynamic reference pressure [Pa].
    pressure_ref: f64,
}

impl PropertyParameters {
    pub fn builder() -> PropertyParametersBuilder {
        PropertyParametersBuilder::default()
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[ComponentConstants] {
        &self.components
    }

    pub fn component(&self, i: usize) -> &ComponentConstants {
        &self.components[i]
    }

    pub fn component_index(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name == name)
    }

    pub fn valid_phase(&self) -> ValidPhase {
        self.valid_phase
    }

    pub fn phases(&self) -> &'static [Phase] {
        self.valid_phase.phases()
    }

    pub fn phase_index(&self, phase: Phase) -> Option<usize> {
        self.phases().iter().position(|&p| p == phase)
    }

    pub fn state_basis(&self) -> StateBasis {
        self.state_basis
    }

    pub fn activity_model(&self) -> &ActivityModel {
        &self.activity_model
    }

    pub fn temperature_ref(&self) -> f64 {
        self.temperature_ref
    }

    pub fn pressure_ref(&self) -> f64 {
        self.pressure_ref
    }

    pub fn gas_const(&self) -> f64 {
        constants::GAS_CONST_J_PER_MOL_K
    }

    pub fn property_metadata(&self) -> &'static [PropertyMetadata] {
        PROPERTY_METADATA
    }

    pub fn default_units(&self) -> DefaultUnits {
        DEFAULT_UNITS
    }

    /// Build a state block bound to this parameter set, declaring its state
    /// variables and phase-behavior equations in `sys`.
    pub fn state_block(
        self: &Arc<Self>,
        sys: &mut EquationSystem,
        name: impl Into<String>,
        options: StateBlockOptions,
    ) -> PropResult<StateBlock> {
        StateBlock::new(sys, Arc::clone(self), name, options)
    }
}

/// Builder for [`PropertyParameters`]; `build` validates the whole
/// configuration at once.
pub struct PropertyParametersBuilder {
    components: Vec<ComponentData>,
    valid_phase: ValidPhase,
    state_basis: StateBasis,
    activity_model: ActivityModel,
    temperature_ref: Temperature,
    pressure_ref: Pressure,
}

impl Default for PropertyParametersBuilder {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            valid_phase: ValidPhase::VapLiq,
            state_basis: StateBasis::FTPz,
            activity_model: ActivityModel::Ideal,
            temperature_ref: units::k(298.15),
            pressure_ref: units::pa(101_325.0),
        }
    }
}

impl PropertyParametersBuilder {
    pub fn component(mut self, data: ComponentData) -> Self {
        self.components.push(data);
        self
    }

    pub fn valid_phase(mut self, valid_phase: ValidPhase) -> Self {
        self.valid_phase = valid_phase;
        self
    }

    pub fn state_basis(mut self, basis: StateBasis) -> Self {
        self.state_basis = basis;
        self
    }

    pub fn activity_model(mut self, model: ActivityModel) -> Self {
        self.activity_model = model;
        self
    }

    pub fn temperature_ref(mut self, t: Temperature) -> Self {
        self.temperature_ref = t;
        self
    }

    pub fn pressure_ref(mut self, p: Pressure) -> Self {
        self.pressure_ref = p;
        self
    }

    pub fn build(self) -> PropResult<Arc<PropertyParameters>> {
        let n = self.components.len();
        if n == 0 {
            return Err(config_err("at least one component is required"));
        }

        let mut components = Vec::with_capacity(n);
        for data in &self.components {
            let c = ComponentConstants {
                name: data.name.clone(),
                tc: units::to_k(data.temperature_critical),
                pc: units::to_pa(data.pressure_critical),
                dh_vap: units::to_j_per_mol(data.dh_vap),
                t_boil: units::to_k(data.temperature_boil),
                cp_liq: data.cp_liq,
                cp_vap: data.cp_vap,
                psat: [
                    data.pressure_sat_coeff.a,
                    data.pressure_sat_coeff.b,
                    data.pressure_sat_coeff.c,
                    data.pressure_sat_coeff.d,
                ],
            };
            if c.name.is_empty() {
                return Err(config_err("component names must be non-empty"));
            }
            if components.iter().any(|o: &ComponentConstants| o.name == c.name) {
                return Err(config_err(format!("duplicate component name '{}'", c.name)));
            }
            if !(c.tc > 0.0 && c.pc > 0.0 && c.t_boil > 0.0) {
                return Err(config_err(format!(
                    "component '{}' needs positive critical and boiling constants",
                    c.name
                )));
            }
            for (value, what) in [(c.dh_vap, "dh_vap")]
                .into_iter()
                .chain(c.cp_liq.iter().map(|&v| (v, "cp_liq")))
                .chain(c.cp_vap.iter().map(|&v| (v, "cp_vap")))
                .chain(c.psat.iter().map(|&v| (v, "pressure_sat_coeff")))
            {
                ensure_finite(value, what).map_err(|e| {
                    config_err(format!("component '{}': {e}", c.name))
                })?;
            }
            components.push(c);
        }

        match &self.activity_model {
            ActivityModel::Ideal => {}
            ActivityModel::Nrtl { alpha, tau } => {
                check_matrix("alpha", alpha, n)?;
                check_matrix("tau", tau, n)?;
            }
            ActivityModel::Wilson { vol_mol, tau } => {
                if vol_mol.len() != n || vol_mol.iter().any(|&v| !(v > 0.0)) {
                    return Err(config_err(
                        "Wilson vol_mol must hold one positive molar volume per component",
                    ));
                }
                check_matrix("tau", tau, n)?;
            }
        }

        let temperature_ref = units::to_k(self.temperature_ref);
        let pressure_ref = units::to_pa(self.pressure_ref);
        if !(temperature_ref > 0.0 && pressure_ref > 0.0) {
            return Err(config_err("reference temperature and pressure must be positive"));
        }

        Ok(Arc::new(PropertyParameters {
            components,
            valid_phase: self.valid_phase,
            state_basis: self.state_basis,
            activity_model: self.activity_model,
            temperature_ref,
            pressure_ref,
        }))
    }
}

fn config_err(what: impl Into<String>) -> PropError {
    PropError::Configuration { what: what.into() }
}

fn check_matrix(what: &str, m: &[Vec<f64>], n: usize) -> PropResult<()> {
    let square = m.len() == n && m.iter().all(|row| row.len() == n);
    if !square {
        return Err(config_err(format!(
            "interaction matrix {what} must be {n}x{n}"
        )));
    }
    if m.iter().flatten().any(|v| !v.is_finite()) {
        return Err(config_err(format!(
            "interaction matrix {what} has a non-finite entry"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benzene() -> ComponentData {
        ComponentData {
            name: "benzene".to_string(),
            temperature_critical: units::k(562.2),
            pressure_critical: units::pa(48.9e5),
            dh_vap: units::j_per_mol(33.87e3),
            temperature_boil: units::k(353.25),
            cp_liq: [62.9, 0.236, 0.0, 0.0, 0.0],
            cp_vap: [-33.92, 0.4739, -3.017e-4, 7.130e-8, 0.0],
            pressure_sat_coeff: PressureSatCoeff {
                a: -6.98273,
                b: 1.33213,
                c: -2.62863,
                d: -3.33399,
            },
        }
    }

    #[test]
    fn builder_defaults() {
        let params = PropertyParameters::builder().component(benzene()).build().unwrap();
        assert_eq!(params.n_components(), 1);
        assert_eq!(params.state_basis(), StateBasis::FTPz);
        assert!(params.activity_model().is_ideal());
        assert_eq!(params.phases(), &[Phase::Liq, Phase::Vap]);
        assert!((params.temperature_ref() - 298.15).abs() < 1e-9);
        assert!((params.pressure_ref() - 101_325.0).abs() < 1e-9);
    }

    #[test]
    fn empty_component_list_rejected() {
        let err = PropertyParameters::builder().build().unwrap_err();
        assert!(matches!(err, PropError::Configuration { .. }));
    }

    #[test]
    fn duplicate_component_rejected() {
        let err = PropertyParameters::builder()
            .component(benzene())
            .component(benzene())
            .build()
            .unwrap_err();
        assert!(matches!(err, PropError::Configuration { .. }));
    }

    #[test]
    fn nrtl_matrix_dimensions_checked() {
        let err = PropertyParameters::builder()
            .component(benzene())
            .activity_model(ActivityModel::Nrtl {
                alpha: vec![vec![0.0, 0.3], vec![0.3, 0.0]],
                tau: vec![vec![0.0]],
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, PropError::Configuration { .. }));
    }

    #[test]
    fn wilson_volumes_must_be_positive() {
        let err = PropertyParameters::builder()
            .component(benzene())
            .activity_model(ActivityModel::Wilson {
                vol_mol: vec![-1.0],
                tau: vec![vec![0.0]],
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, PropError::Configuration { .. }));
    }

    #[test]
    fn enthalpy_integral_of_constant_cp() {
        let params = PropertyParameters::builder().component(benzene()).build().unwrap();
        let c = params.component(0);
        // Liquid cp is linear in T: integral has a closed form to check.
        let (t, t0) = (350.0, 298.15);
        let expect = 62.9 * (t - t0) + 0.236 / 2.0 * (t * t - t0 * t0);
        assert!((c.enth_integral(Phase::Liq, t, t0) - expect).abs() < 1e-8);
    }

    #[test]
    fn entropy_integral_of_constant_cp() {
        let params = PropertyParameters::builder().component(benzene()).build().unwrap();
        let c = params.component(0);
        let (t, t0): (f64, f64) = (350.0, 298.15);
        let expect = 62.9 * (t / t0).ln() + 0.236 * (t - t0);
        assert!((c.entr_integral(Phase::Liq, t, t0) - expect).abs() < 1e-8);
    }

    #[test]
    fn metadata_names_unique() {
        let params = PropertyParameters::builder().component(benzene()).build().unwrap();
        let meta = params.property_metadata();
        for (i, row) in meta.iter().enumerate() {
            assert!(meta[i + 1..].iter().all(|o| o.name != row.name));
        }
        assert_eq!(params.default_units().amount, "mol");
    }
}
