//! Variables, tagged constraints and activation bookkeeping.

use crate::error::{SystemError, SystemResult};
use pf_core::numeric::Real;
use std::collections::HashSet;

/// Handle to a variable in an [`EquationSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a constraint in an [`EquationSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConId(usize);

impl ConId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Families of equations, used for staged activation during initialization.
///
/// `Property` marks per-component definitional equations (each defines its
/// own variable from already-determined quantities) that stay active through
/// every initialization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintTag {
    TotalBalance,
    ComponentBalance,
    Mixing,
    SumMoleFrac,
    MoleFracOut,
    VaporPressure,
    BubbleTemperature,
    DewTemperature,
    SmoothT1,
    SmoothTeq,
    PhaseEquilibrium,
    GijCoeff,
    ActivityA,
    ActivityB,
    ActivityCoeff,
    EnthalpyPhase,
    EntropyPhase,
    InternalEnergyPhase,
    Property,
}

struct Variable {
    name: String,
    lower: Real,
    upper: Real,
    fixed: bool,
}

struct Constraint {
    name: String,
    tag: ConstraintTag,
    active: bool,
    scale: Real,
    uses: Vec<VarId>,
    residual: Box<dyn Fn(&[Real]) -> Real>,
}

/// Marker for rolling back entities declared after a point in time.
///
/// Rollback removes exactly the variables and constraints created since the
/// checkpoint was taken, restoring name bookkeeping along with them. This is
/// the substrate for the "remove partially-built state, then re-raise"
/// contract of on-demand property construction.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    vars: usize,
    cons: usize,
}

/// A set of variables and equality constraints, declared incrementally.
#[derive(Default)]
pub struct EquationSystem {
    vars: Vec<Variable>,
    values: Vec<Real>,
    cons: Vec<Constraint>,
    names: HashSet<String>,
}

impl EquationSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable. Names must be unique within the system.
    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        value: Real,
        lower: Real,
        upper: Real,
    ) -> SystemResult<VarId> {
        let name = name.into();
        if lower > upper || lower.is_nan() || upper.is_nan() {
            return Err(SystemError::InvalidBounds { name });
        }
        if !self.names.insert(name.clone()) {
            return Err(SystemError::Duplicate { name });
        }
        let id = VarId(self.vars.len());
        self.vars.push(Variable {
            name,
            lower,
            upper,
            fixed: false,
        });
        self.values.push(value);
        Ok(id)
    }

    /// Declare an equality constraint `residual(values) == 0`.
    ///
    /// `uses` must list every variable the residual reads; the solver relies
    /// on it to decide which free variables belong to a solve. `scale`
    /// divides the residual so that differently-dimensioned equations are
    /// comparable in one norm.
    pub fn add_con(
        &mut self,
        name: impl Into<String>,
        tag: ConstraintTag,
        uses: Vec<VarId>,
        scale: Real,
        residual: impl Fn(&[Real]) -> Real + 'static,
    ) -> ConId {
        let id = ConId(self.cons.len());
        self.cons.push(Constraint {
            name: name.into(),
            tag,
            active: true,
            scale,
            uses,
            residual: Box::new(residual),
        });
        id
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn num_cons(&self) -> usize {
        self.cons.len()
    }

    pub fn values(&self) -> &[Real] {
        &self.values
    }

    pub fn value(&self, id: VarId) -> Real {
        self.values[id.0]
    }

    pub fn set_value(&mut self, id: VarId, value: Real) {
        self.values[id.0] = value;
    }

    pub fn bounds(&self, id: VarId) -> (Real, Real) {
        (self.vars[id.0].lower, self.vars[id.0].upper)
    }

    pub fn var_name(&self, id: VarId) -> &str {
        &self.vars[id.0].name
    }

    pub fn find_var(&self, name: &str) -> Option<VarId> {
        self.vars.iter().position(|v| v.name == name).map(VarId)
    }

    pub fn is_fixed(&self, id: VarId) -> bool {
        self.vars[id.0].fixed
    }

    pub fn fix(&mut self, id: VarId) {
        self.vars[id.0].fixed = true;
    }

    /// Set a value and fix the variable there.
    pub fn fix_at(&mut self, id: VarId, value: Real) {
        self.values[id.0] = value;
        self.vars[id.0].fixed = true;
    }

    pub fn unfix(&mut self, id: VarId) {
        self.vars[id.0].fixed = false;
    }

    pub fn con_name(&self, id: ConId) -> &str {
        &self.cons[id.0].name
    }

    pub fn con_tag(&self, id: ConId) -> ConstraintTag {
        self.cons[id.0].tag
    }

    pub fn is_active(&self, id: ConId) -> bool {
        self.cons[id.0].active
    }

    pub fn set_active(&mut self, id: ConId, active: bool) {
        self.cons[id.0].active = active;
    }

    pub fn activate_tag(&mut self, tag: ConstraintTag) {
        for c in &mut self.cons {
            if c.tag == tag {
                c.active = true;
            }
        }
    }

    pub fn deactivate_tag(&mut self, tag: ConstraintTag) {
        for c in &mut self.cons {
            if c.tag == tag {
                c.active = false;
            }
        }
    }

    pub fn cons_with_tag(&self, tag: ConstraintTag) -> Vec<ConId> {
        self.cons
            .iter()
            .enumerate()
            .filter(|(_, c)| c.tag == tag)
            .map(|(i, _)| ConId(i))
            .collect()
    }

    pub fn active_cons(&self) -> Vec<ConId> {
        self.cons
            .iter()
            .enumerate()
            .filter(|(_, c)| c.active)
            .map(|(i, _)| ConId(i))
            .collect()
    }

    /// Scaled residual of one constraint at the given values.
    pub fn residual(&self, id: ConId, values: &[Real]) -> Real {
        let c = &self.cons[id.0];
        (c.residual)(values) / c.scale
    }

    /// Scaled residual at the system's current values.
    pub fn residual_now(&self, id: ConId) -> Real {
        self.residual(id, &self.values)
    }

    /// Free variables referenced by at least one active constraint, in
    /// declaration order, deduplicated.
    pub fn free_referenced_vars(&self) -> Vec<VarId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for c in self.cons.iter().filter(|c| c.active) {
            for &v in &c.uses {
                if !self.vars[v.0].fixed && seen.insert(v) {
                    out.push(v);
                }
            }
        }
        out.sort_by_key(|v| v.0);
        out
    }

    /// Free referenced variables minus active constraints.
    pub fn degrees_of_freedom(&self) -> isize {
        let free = self.free_referenced_vars().len() as isize;
        let active = self.cons.iter().filter(|c| c.active).count() as isize;
        free - active
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            vars: self.vars.len(),
            cons: self.cons.len(),
        }
    }

    /// Remove every variable and constraint declared after `cp`.
    pub fn rollback(&mut self, cp: Checkpoint) {
        for v in self.vars.drain(cp.vars..) {
            self.names.remove(&v.name);
        }
        self.values.truncate(cp.vars);
        self.cons.truncate(cp.cons);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_system() -> (EquationSystem, VarId, VarId) {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 1.0, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let y = sys.add_var("y", 1.0, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        sys.add_con(
            "eq1",
            ConstraintTag::Property,
            vec![x, y],
            1.0,
            move |v| v[x.index()] + v[y.index()] - 3.0,
        );
        (sys, x, y)
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut sys = EquationSystem::new();
        sys.add_var("x", 0.0, 0.0, 1.0).unwrap();
        let err = sys.add_var("x", 0.0, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, SystemError::Duplicate { .. }));
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut sys = EquationSystem::new();
        let err = sys.add_var("x", 0.0, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, SystemError::InvalidBounds { .. }));
    }

    #[test]
    fn residual_and_dof() {
        let (sys, _, _) = linear_system();
        let cons = sys.active_cons();
        assert_eq!(cons.len(), 1);
        assert!((sys.residual_now(cons[0]) - (-1.0)).abs() < 1e-12);
        assert_eq!(sys.degrees_of_freedom(), 1);
    }

    #[test]
    fn fixing_changes_dof() {
        let (mut sys, x, y) = linear_system();
        sys.fix_at(x, 2.0);
        assert_eq!(sys.degrees_of_freedom(), 0);
        assert_eq!(sys.free_referenced_vars(), vec![y]);
        sys.unfix(x);
        assert_eq!(sys.degrees_of_freedom(), 1);
    }

    #[test]
    fn tag_activation() {
        let (mut sys, x, _) = linear_system();
        sys.add_con(
            "eq2",
            ConstraintTag::SumMoleFrac,
            vec![x],
            1.0,
            move |v| v[x.index()] - 1.0,
        );
        sys.deactivate_tag(ConstraintTag::SumMoleFrac);
        assert_eq!(sys.active_cons().len(), 1);
        sys.activate_tag(ConstraintTag::SumMoleFrac);
        assert_eq!(sys.active_cons().len(), 2);
    }

    #[test]
    fn rollback_removes_tail_entities() {
        let (mut sys, _, _) = linear_system();
        let cp = sys.checkpoint();
        let z = sys.add_var("z", 0.0, 0.0, 1.0).unwrap();
        sys.add_con("eq_z", ConstraintTag::Property, vec![z], 1.0, move |v| {
            v[z.index()]
        });
        assert_eq!(sys.num_vars(), 3);
        assert_eq!(sys.num_cons(), 2);

        sys.rollback(cp);
        assert_eq!(sys.num_vars(), 2);
        assert_eq!(sys.num_cons(), 1);
        // The name is free again after rollback.
        sys.add_var("z", 0.0, 0.0, 1.0).unwrap();
    }

    #[test]
    fn residual_scaling() {
        let mut sys = EquationSystem::new();
        let x = sys.add_var("x", 5.0, 0.0, f64::INFINITY).unwrap();
        let c = sys.add_con(
            "scaled",
            ConstraintTag::Property,
            vec![x],
            10.0,
            move |v| v[x.index()],
        );
        assert!((sys.residual_now(c) - 0.5).abs() < 1e-12);
    }
}
