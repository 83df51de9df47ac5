//! Shared benzene-toluene fixture for integration tests.

use pf_core::units;
use pf_props::params::PropertyParametersBuilder;
use pf_props::{ComponentData, PressureSatCoeff, PropertyParameters};

pub fn benzene() -> ComponentData {
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

pub fn toluene() -> ComponentData {
    ComponentData {
        name: "toluene".to_string(),
        temperature_critical: units::k(591.8),
        pressure_critical: units::pa(41.0e5),
        dh_vap: units::j_per_mol(38.26e3),
        temperature_boil: units::k(383.8),
        cp_liq: [83.7, 0.167, 0.0, 0.0, 0.0],
        cp_vap: [-24.35, 0.5125, -2.765e-4, 4.911e-8, 0.0],
        pressure_sat_coeff: PressureSatCoeff {
            a: -7.28607,
            b: 1.38091,
            c: -2.83433,
            d: -2.79168,
        },
    }
}

pub fn bt_builder() -> PropertyParametersBuilder {
    PropertyParameters::builder().component(benzene()).component(toluene())
}
