//! Canonical unit types and conversions at the API boundary.
//!
//! Residual closures work in bare SI floats for speed; dimensioned values
//! enter and leave through these aliases and the `to_*` extractors.

use uom::si::f64::{
    MolarEnergy as UomMolarEnergy, Pressure as UomPressure,
    ThermodynamicTemperature as UomThermodynamicTemperature,
};

// Public canonical unit types (SI, f64)
pub type MolarEnergy = UomMolarEnergy;
pub type Pressure = UomPressure;
pub type Temperature = UomThermodynamicTemperature;

#[inline]
pub fn pa(v: f64) -> Pressure {
    use uom::si::pressure::pascal;
    Pressure::new::<pascal>(v)
}

#[inline]
pub fn k(v: f64) -> Temperature {
    use uom::si::thermodynamic_temperature::kelvin;
    Temperature::new::<kelvin>(v)
}

#[inline]
pub fn j_per_mol(v: f64) -> MolarEnergy {
    use uom::si::molar_energy::joule_per_mole;
    MolarEnergy::new::<joule_per_mole>(v)
}

#[inline]
pub fn to_pa(p: Pressure) -> f64 {
    use uom::si::pressure::pascal;
    p.get::<pascal>()
}

#[inline]
pub fn to_k(t: Temperature) -> f64 {
    use uom::si::thermodynamic_temperature::kelvin;
    t.get::<kelvin>()
}

#[inline]
pub fn to_j_per_mol(e: MolarEnergy) -> f64 {
    use uom::si::molar_energy::joule_per_mole;
    e.get::<joule_per_mole>()
}

pub mod constants {
    /// Universal gas constant [J/mol.K].
    pub const GAS_CONST_J_PER_MOL_K: f64 = 8.314_462_618;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_smoke() {
        let p = pa(101_325.0);
        let t = k(300.0);
        let e = j_per_mol(33_870.0);
        assert!((to_pa(p) - 101_325.0).abs() < 1e-9);
        assert!((to_k(t) - 300.0).abs() < 1e-9);
        assert!((to_j_per_mol(e) - 33_870.0).abs() < 1e-9);
    }
}
