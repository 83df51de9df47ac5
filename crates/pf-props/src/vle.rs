//! Smoothed vapor-liquid equilibrium primitives.
//!
//! The flash formulation replaces the complementarity between phase region
//! and equilibrium temperature with two smoothed extrema:
//!
//! ```text
//! t1   = smooth_max(T, T_bubble, eps_1)
//! T_eq = smooth_min(t1, T_dew, eps_2)
//! ```
//!
//! so that one equation set covers subcooled, two-phase and superheated
//! states without discrete switches. Each operator deviates from the exact
//! extremum by at most `eps / 2`.

use crate::params::ComponentConstants;

/// Smooth approximation of `max(a, b)`, exact as `eps -> 0`.
pub fn smooth_max(a: f64, b: f64, eps: f64) -> f64 {
    0.5 * (a + b + ((a - b).powi(2) + eps * eps).sqrt())
}

/// Smooth approximation of `min(a, b)`, exact as `eps -> 0`.
pub fn smooth_min(a: f64, b: f64, eps: f64) -> f64 {
    0.5 * (a + b - ((a - b).powi(2) + eps * eps).sqrt())
}

/// Saturation pressure of a pure component at temperature `t` [K], from the
/// reduced-temperature correlation
/// `(1 - x) ln(Psat/Pc) = A x + B x^1.5 + C x^3 + D x^6`, `x = 1 - T/Tc`.
///
/// Returns NaN above the critical temperature, where the correlation has no
/// real value; the solver's line search treats that as an inadmissible step.
pub fn saturation_pressure(c: &ComponentConstants, t: f64) -> f64 {
    let x = 1.0 - t / c.tc;
    let poly =
        c.psat[0] * x + c.psat[1] * x.powf(1.5) + c.psat[2] * x.powi(3) + c.psat[3] * x.powi(6);
    c.pc * (poly / (1.0 - x)).exp()
}

/// Residual form of the same correlation, used when the saturation pressure
/// is a declared variable: `(1 - x) ln(psat/Pc) - poly(x)`.
pub fn saturation_pressure_residual(c: &ComponentConstants, t: f64, psat: f64) -> f64 {
    let x = 1.0 - t / c.tc;
    let poly =
        c.psat[0] * x + c.psat[1] * x.powf(1.5) + c.psat[2] * x.powi(3) + c.psat[3] * x.powi(6);
    (1.0 - x) * (psat / c.pc).ln() - poly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{PressureSatCoeff, PropertyParameters};
    use approx::assert_relative_eq;
    use pf_core::units;
    use proptest::prelude::*;

    fn benzene() -> ComponentConstants {
        let params = PropertyParameters::builder()
            .component(crate::params::ComponentData {
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
            })
            .build()
            .unwrap();
        params.component(0).clone()
    }

    #[test]
    fn smooth_extrema_order() {
        let (a, b, eps) = (300.0, 310.0, 0.01);
        assert!(smooth_max(a, b, eps) >= b);
        assert!(smooth_min(a, b, eps) <= a);
        assert_eq!(smooth_max(a, b, eps), smooth_max(b, a, eps));
    }

    #[test]
    fn smoothed_equilibrium_temperature_clamps() {
        // Between bubble (340) and dew (360) the equilibrium temperature
        // tracks the state temperature (350).
        let teq = smooth_min(smooth_max(350.0, 340.0, 0.01), 360.0, 0.0005);
        assert!((teq - 350.0).abs() < 0.01);
        // Subcooled: clamps to the bubble point.
        let teq = smooth_min(smooth_max(330.0, 340.0, 0.01), 360.0, 0.0005);
        assert!((teq - 340.0).abs() < 0.01);
        // Superheated: clamps to the dew point.
        let teq = smooth_min(smooth_max(370.0, 340.0, 0.01), 360.0, 0.0005);
        assert!((teq - 360.0).abs() < 0.01);
    }

    #[test]
    fn atmospheric_boiling_point_recovered() {
        // Psat at the normal boiling point is one atmosphere.
        let c = benzene();
        let p = saturation_pressure(&c, c.t_boil);
        assert_relative_eq!(p, 101_325.0, max_relative = 0.01);
    }

    #[test]
    fn saturation_pressure_is_monotone() {
        let c = benzene();
        assert!(saturation_pressure(&c, 320.0) < saturation_pressure(&c, 340.0));
        assert!(saturation_pressure(&c, 340.0) < saturation_pressure(&c, 360.0));
    }

    #[test]
    fn critical_point_limit() {
        let c = benzene();
        let p = saturation_pressure(&c, c.tc);
        assert!((p - c.pc).abs() / c.pc < 1e-9);
        assert!(saturation_pressure(&c, c.tc + 10.0).is_nan());
    }

    #[test]
    fn residual_vanishes_at_the_correlation_value() {
        let c = benzene();
        for t in [300.0, 330.0, 360.0] {
            let psat = saturation_pressure(&c, t);
            assert!(saturation_pressure_residual(&c, t, psat).abs() < 1e-10);
        }
    }

    proptest! {
        #[test]
        fn smooth_max_error_bound(a in 250.0..450.0f64, b in 250.0..450.0f64) {
            let eps = 0.01;
            let err = (smooth_max(a, b, eps) - a.max(b)).abs();
            prop_assert!(err <= eps / 2.0 + 1e-12);
        }

        #[test]
        fn smooth_min_error_bound(a in 250.0..450.0f64, b in 250.0..450.0f64) {
            let eps = 0.0005;
            let err = (smooth_min(a, b, eps) - a.min(b)).abs();
            prop_assert!(err <= eps / 2.0 + 1e-12);
        }

        #[test]
        fn smooth_operators_bracket(a in 250.0..450.0f64, b in 250.0..450.0f64) {
            let eps = 0.01;
            prop_assert!(smooth_max(a, b, eps) >= a.max(b));
            prop_assert!(smooth_min(a, b, eps) <= a.min(b));
        }
    }
}
