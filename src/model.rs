use crate::curves::{CurveIndex, CurveVec};
use crate::turbine::{Turbine, TurbineIndex, TurbineVec};
use crate::units::{UnitConfig, UnitSystem};
use crate::HydrodpError;
use std::fmt;
use std::fmt::{Display, Formatter};
use tracing::debug;

const RATING_TOL: f64 = 1E-6;

/// Number of significant figures preserved in the plant totals.
const CONFIG_SIGFIGS: i32 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SolveMode {
    /// Allocate total plant power; flow is the companion variable.
    ForPower,
    /// Allocate total plant discharge; power is the companion variable.
    ForFlow,
}

impl Display for SolveMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForPower => write!(f, "power"),
            Self::ForFlow => write!(f, "flow"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum WeightPolicy {
    #[default]
    Default,
    Equal,
    /// Preference given to larger units.
    MaxPower,
    MaxFlow,
    /// Preference given to smaller units.
    MinPower,
    MinFlow,
}

impl Display for WeightPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Equal => write!(f, "equal"),
            Self::MaxPower => write!(f, "maxpower"),
            Self::MaxFlow => write!(f, "maxflow"),
            Self::MinPower => write!(f, "minpower"),
            Self::MinFlow => write!(f, "minflow"),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Weighting {
    pub policy: WeightPolicy,
    pub relative: bool,
}

/// Adjustment level of a plant total.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Adjustment {
    /// Head-adjusted and scaled by generator capacity.
    HeadAdjusted = 0,
    /// Faceplate rating scaled by generator capacity.
    CapacityScaled = 1,
    /// Faceplate rating alone.
    Faceplate = 2,
}

/// Plant-wide capacity aggregates at the three adjustment levels.
///
/// Levels 0 and 1 are rounded to two significant figures so the problem
/// grid lands on clean steps.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct PlantTotals {
    pub total_power: [f64; 3],
    pub total_flow: [f64; 3],
    pub max_power: [f64; 3],
    pub max_flow: [f64; 3],
    pub min_max_power: [f64; 3],
    pub min_max_flow: [f64; 3],
}

impl PlantTotals {
    pub fn total(&self, mode: SolveMode, adjustment: Adjustment) -> f64 {
        match mode {
            SolveMode::ForPower => self.total_power[adjustment as usize],
            SolveMode::ForFlow => self.total_flow[adjustment as usize],
        }
    }

    pub fn max(&self, mode: SolveMode, adjustment: Adjustment) -> f64 {
        match mode {
            SolveMode::ForPower => self.max_power[adjustment as usize],
            SolveMode::ForFlow => self.max_flow[adjustment as usize],
        }
    }

    pub fn min_max(&self, mode: SolveMode, adjustment: Adjustment) -> f64 {
        match mode {
            SolveMode::ForPower => self.min_max_power[adjustment as usize],
            SolveMode::ForFlow => self.min_max_flow[adjustment as usize],
        }
    }

    /// The same aggregates with the power and flow roles exchanged, so
    /// reading with the solve mode yields the companion variable.
    pub fn alt(&self) -> PlantTotals {
        PlantTotals {
            total_power: self.total_flow,
            total_flow: self.total_power,
            max_power: self.max_flow,
            max_flow: self.max_power,
            min_max_power: self.min_max_flow,
            min_max_flow: self.min_max_power,
        }
    }
}

fn round_sigfigs(value: f64, sigfigs: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let whole_digits = value.abs().log10().floor() as i32 + 1;
    let scale = 10f64.powi(whole_digits - sigfigs);
    (value.abs() / scale + 0.5).floor() * scale * value.signum()
}

/// A hydro plant: the curve and unit registries plus the global solve
/// configuration. Read-shared during a solve; mutations happen between
/// solves.
pub struct Model {
    curves: CurveVec,
    turbines: TurbineVec,
    units: UnitConfig,
    head: f64,
    plant_loss_coef: f64,
    coordination_a: f64,
    coordination_b: f64,
    weighting: Weighting,
    user_step_count: usize,
    solve_mode: Option<SolveMode>,
    state_min: f64,
    state_max: f64,
    totals: PlantTotals,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            curves: CurveVec::with_builtins(),
            turbines: TurbineVec::default(),
            units: UnitConfig::default(),
            head: 1.0,
            plant_loss_coef: 0.0,
            coordination_a: 0.95,
            coordination_b: 0.6,
            weighting: Weighting::default(),
            user_step_count: 0,
            solve_mode: None,
            state_min: 0.0,
            state_max: 0.0,
            totals: PlantTotals::default(),
        }
    }
}

impl Model {
    pub fn curves(&self) -> &CurveVec {
        &self.curves
    }

    pub fn turbines(&self) -> &TurbineVec {
        &self.turbines
    }

    pub fn units(&self) -> &UnitConfig {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitConfig {
        &mut self.units
    }

    pub fn head(&self) -> f64 {
        self.head
    }

    pub fn set_head(&mut self, head: f64) {
        self.head = head;
    }

    pub fn set_units(&mut self, system: UnitSystem) -> Result<(), HydrodpError> {
        self.units.set_system(system)
    }

    pub fn conversion_factor(&self) -> f64 {
        self.units.conversion_factor()
    }

    pub fn plant_loss_coef(&self) -> f64 {
        self.plant_loss_coef
    }

    pub fn set_loss_coef(&mut self, coef: f64) {
        self.plant_loss_coef = coef;
    }

    pub fn coordination_a(&self) -> f64 {
        self.coordination_a
    }

    pub fn set_coordination_a(&mut self, a: f64) {
        self.coordination_a = a;
    }

    pub fn coordination_b(&self) -> f64 {
        self.coordination_b
    }

    pub fn set_coordination_b(&mut self, b: f64) {
        self.coordination_b = b;
    }

    pub fn weighting(&self) -> Weighting {
        self.weighting
    }

    pub fn set_weight_policy(&mut self, policy: WeightPolicy, relative: bool) {
        self.weighting = Weighting { policy, relative };
    }

    pub fn user_step_count(&self) -> usize {
        self.user_step_count
    }

    pub fn set_user_steps(&mut self, steps: usize) {
        self.user_step_count = steps;
    }

    pub fn solve_mode(&self) -> Result<SolveMode, HydrodpError> {
        self.solve_mode.ok_or(HydrodpError::SolveModeUnspecified)
    }

    pub fn set_solve_mode(&mut self, mode: SolveMode) {
        self.solve_mode = Some(mode);
    }

    pub fn state_min(&self) -> f64 {
        self.state_min
    }

    pub fn set_min_state(&mut self, value: f64) {
        self.state_min = value;
    }

    pub fn state_max(&self) -> f64 {
        self.state_max
    }

    pub fn set_max_state(&mut self, value: f64) {
        self.state_max = value;
    }

    /// The specified state span is not honoured by the grid heuristic;
    /// both bounds restart at zero for each sizing pass.
    pub fn reset_state_span(&mut self) {
        self.state_min = 0.0;
        self.state_max = 0.0;
    }

    pub fn totals(&self) -> &PlantTotals {
        &self.totals
    }

    pub fn register_curve(
        &mut self,
        name: &str,
        flow_fraction: Vec<f64>,
        power_fraction: Vec<f64>,
        efficiency: Vec<f64>,
    ) -> Result<CurveIndex, HydrodpError> {
        if self.curves.find(name).is_some() {
            return Err(HydrodpError::CurveNameAlreadyExists(name.to_string()));
        }
        self.curves.push_new(name, flow_fraction, power_fraction, efficiency, false)
    }

    pub fn get_curve_index_by_name(&self, name: &str) -> Result<CurveIndex, HydrodpError> {
        self.curves
            .find(name)
            .ok_or_else(|| HydrodpError::CurveNotFound(name.to_string()))
    }

    pub fn register_turbine(
        &mut self,
        name: &str,
        curve: CurveIndex,
        rated_head: f64,
        max_flow: f64,
        max_power: f64,
    ) -> Result<TurbineIndex, HydrodpError> {
        if self.turbines.find(name).is_some() {
            return Err(HydrodpError::TurbineNameAlreadyExists(name.to_string()));
        }
        self.curves.get(&curve)?;
        Ok(self.turbines.push_new(name, curve, rated_head, max_flow, max_power))
    }

    pub fn get_turbine_index_by_name(&self, name: &str) -> Result<TurbineIndex, HydrodpError> {
        self.turbines
            .find(name)
            .ok_or_else(|| HydrodpError::TurbineNotFound(name.to_string()))
    }

    pub fn get_turbine(&self, index: &TurbineIndex) -> Result<&Turbine, HydrodpError> {
        self.turbines.get(index)
    }

    pub fn set_turbine_weight(&mut self, index: &TurbineIndex, weight: f64) -> Result<(), HydrodpError> {
        self.turbines.get_mut(index)?.set_weight(weight);
        Ok(())
    }

    pub fn set_turbine_headloss(&mut self, index: &TurbineIndex, coef: f64) -> Result<(), HydrodpError> {
        self.turbines.get_mut(index)?.set_headloss_coef(coef);
        Ok(())
    }

    pub fn set_turbine_gencap(&mut self, index: &TurbineIndex, capacity: f64) -> Result<(), HydrodpError> {
        self.turbines.get_mut(index)?.set_gen_capacity(capacity);
        Ok(())
    }

    pub fn set_turbine_geneff(&mut self, index: &TurbineIndex, efficiency: f64) -> Result<(), HydrodpError> {
        self.turbines.get_mut(index)?.set_gen_efficiency(efficiency);
        Ok(())
    }

    pub fn set_turbine_gencurve(&mut self, index: &TurbineIndex, curve: CurveIndex) -> Result<(), HydrodpError> {
        self.curves.get(&curve)?;
        self.turbines.get_mut(index)?.set_gen_curve(curve);
        Ok(())
    }

    /// Convenience lookups through the registries.
    pub fn turbine_power(&self, index: &TurbineIndex, head: f64, flow: f64) -> Result<f64, HydrodpError> {
        self.turbines
            .get(index)?
            .power(&self.curves, self.conversion_factor(), self.plant_loss_coef, head, flow)
    }

    pub fn turbine_discharge(&self, index: &TurbineIndex, head: f64, power: f64) -> Result<f64, HydrodpError> {
        self.turbines
            .get(index)?
            .discharge(&self.curves, self.conversion_factor(), self.plant_loss_coef, head, power)
    }

    /// Recompute the plant totals and apply the weighting policy to the
    /// stored unit weights.
    pub fn assign_weights(&mut self) {
        let mut totals = PlantTotals {
            min_max_power: [9E9; 3],
            min_max_flow: [9E9; 3],
            ..PlantTotals::default()
        };

        for turbine in self.turbines.iter() {
            let p = [
                turbine.max_power_at(self.head),
                turbine.max_power(),
                turbine.max_power(),
            ];
            let q = [turbine.max_flow_at(self.head), turbine.max_flow(), turbine.max_flow()];

            for u in 0..3 {
                let cap_factor = if u == 2 { 1.0 } else { turbine.gen_capacity() };

                let pu = if turbine.max_power() < RATING_TOL { 0.0 } else { p[u] };
                let qu = if turbine.max_flow() < RATING_TOL { 0.0 } else { q[u] };

                totals.max_power[u] = totals.max_power[u].max(pu * cap_factor);
                totals.max_flow[u] = totals.max_flow[u].max(qu * cap_factor);
                if cap_factor > RATING_TOL {
                    totals.min_max_power[u] = totals.min_max_power[u].min(pu * cap_factor);
                    totals.min_max_flow[u] = totals.min_max_flow[u].min(qu * cap_factor);
                }

                totals.total_power[u] += pu * cap_factor;
                totals.total_flow[u] += qu * cap_factor;
            }
        }

        for u in 0..2 {
            totals.max_power[u] = round_sigfigs(totals.max_power[u], CONFIG_SIGFIGS);
            totals.max_flow[u] = round_sigfigs(totals.max_flow[u], CONFIG_SIGFIGS);
            totals.min_max_power[u] = round_sigfigs(totals.min_max_power[u], CONFIG_SIGFIGS);
            totals.min_max_flow[u] = round_sigfigs(totals.min_max_flow[u], CONFIG_SIGFIGS);
            totals.total_power[u] = round_sigfigs(totals.total_power[u], CONFIG_SIGFIGS);
            totals.total_flow[u] = round_sigfigs(totals.total_flow[u], CONFIG_SIGFIGS);
        }

        self.totals = totals;

        // Weights always work from the faceplate ratings.
        let weighting = self.weighting;
        for turbine in self.turbines.iter_mut() {
            let mut weight = match weighting.policy {
                WeightPolicy::Default => turbine.weight(),
                WeightPolicy::Equal => 1.0,
                WeightPolicy::MaxPower => turbine.max_power(),
                WeightPolicy::MaxFlow => turbine.max_flow(),
                WeightPolicy::MinPower => totals.total_power[1] - turbine.max_power(),
                WeightPolicy::MinFlow => totals.total_flow[1] - turbine.max_flow(),
            };
            if weighting.relative {
                match weighting.policy {
                    WeightPolicy::MaxPower | WeightPolicy::MinPower => weight /= totals.total_power[1],
                    WeightPolicy::MaxFlow | WeightPolicy::MinFlow => weight /= totals.total_flow[1],
                    _ => {}
                }
            }
            if turbine.max_power() < RATING_TOL || turbine.max_flow() < RATING_TOL {
                weight = 0.0;
            }
            turbine.set_weight(weight);
            debug!("weight {} {}", turbine.name(), weight);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;

    #[test]
    fn test_round_sigfigs() {
        assert_almost_eq!(round_sigfigs(1234.0, 2), 1200.0);
        // rounds away from zero at the midpoint
        assert_almost_eq!(round_sigfigs(1250.0, 2), 1300.0);
        assert_almost_eq!(round_sigfigs(-1234.0, 2), -1200.0);
        assert!((round_sigfigs(0.0456, 2) - 0.046).abs() < 1E-12);
        assert_eq!(round_sigfigs(0.0, 2), 0.0);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = Model::default();
        let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
        model.register_turbine("u1", kaplan, 65.0, 1000.0, 1500.0).unwrap();
        assert_eq!(
            model.register_turbine("u1", kaplan, 65.0, 1000.0, 1500.0),
            Err(HydrodpError::TurbineNameAlreadyExists("u1".to_string()))
        );
        assert_eq!(
            model.register_curve("kaplan", vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 0.9]),
            Err(HydrodpError::CurveNameAlreadyExists("kaplan".to_string()))
        );
    }

    #[test]
    fn test_totals_at_rated_head() {
        let mut model = Model::default();
        model.set_units(crate::units::UnitSystem::Imperial).unwrap();
        let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
        model.register_turbine("u1", kaplan, 65.0, 1000.0, 1500.0).unwrap();
        model.register_turbine("u2", kaplan, 65.0, 500.0, 700.0).unwrap();
        model.set_head(65.0);
        model.assign_weights();

        let totals = model.totals();
        // At rated head the adjustment factor is 1, so levels agree
        assert_almost_eq!(totals.total_power[0], 2200.0);
        assert_almost_eq!(totals.total_flow[0], 1500.0);
        assert_almost_eq!(totals.max_power[0], 1500.0);
        assert_almost_eq!(totals.min_max_flow[0], 500.0);
    }

    #[test]
    fn test_weight_policies() {
        let mut model = Model::default();
        let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
        let u1 = model.register_turbine("u1", kaplan, 65.0, 1000.0, 1500.0).unwrap();
        let u2 = model.register_turbine("u2", kaplan, 65.0, 500.0, 500.0).unwrap();
        model.set_head(65.0);

        model.set_weight_policy(WeightPolicy::MaxPower, false);
        model.assign_weights();
        assert_almost_eq!(model.get_turbine(&u1).unwrap().weight(), 1500.0);
        assert_almost_eq!(model.get_turbine(&u2).unwrap().weight(), 500.0);

        model.set_weight_policy(WeightPolicy::MinPower, false);
        model.assign_weights();
        assert_almost_eq!(model.get_turbine(&u1).unwrap().weight(), 500.0);
        assert_almost_eq!(model.get_turbine(&u2).unwrap().weight(), 1500.0);

        model.set_weight_policy(WeightPolicy::MaxFlow, true);
        model.assign_weights();
        assert_almost_eq!(model.get_turbine(&u1).unwrap().weight(), 1000.0 / 1500.0);
    }
}
