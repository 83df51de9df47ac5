//! Activity-coefficient vapor-liquid equilibrium property package.
//!
//! An ideal vapor phase over a liquid described by an activity coefficient
//! model (ideal, NRTL or Wilson), with a smoothed flash formulation that
//! covers subcooled, two-phase and superheated states in one equation set.
//!
//! A [`params::PropertyParameters`] holds the validated component constants
//! and package configuration. Each [`state_block::StateBlock`] built from it
//! declares one stream's state into a caller-owned
//! [`pf_system::EquationSystem`]; [`initialize`] then walks a collection of
//! blocks through the staged activation schedule that makes the coupled
//! flash solvable from cold starting values.

pub mod activity;
pub mod error;
pub mod initialize;
pub mod params;
pub mod state_block;
pub mod vle;

pub use error::{PropError, PropResult};
pub use initialize::{initialize, release_state, InitFlags, InitOptions, StateHints};
pub use params::{
    ActivityModel, ComponentData, Phase, PressureSatCoeff, PropertyParameters, StateBasis,
    ValidPhase,
};
pub use state_block::{
    EnergyBalanceType, MaterialBalanceType, MaterialFlowBasis, StateBlock, StateBlockOptions,
};
