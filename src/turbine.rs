use crate::curves::{Curve, CurveIndex, CurveVec};
use crate::utils::clean;
use crate::HydrodpError;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use tracing::debug;

/// Efficiency threshold below which a unit is treated as off.
const EFF_TOL: f64 = 1E-3;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TurbineIndex(usize);

impl TurbineIndex {
    pub fn new(idx: usize) -> Self {
        Self(idx)
    }
}

impl Deref for TurbineIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TurbineIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the generator coupled to a turbine converts shaft power.
///
/// Exactly one mode is active; assigning one replaces the other.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum GeneratorEfficiency {
    Fixed(f64),
    Curve(CurveIndex),
}

/// Jim Gordon adjustment: efficiency effect of running away from rated
/// head. The loss (or gain) is capped at 20%.
pub fn head_adjustment_factor(h_net: f64, h_rated: f64, exponent: f64) -> f64 {
    let adj = (0.5 * ((h_net - h_rated).abs() / h_rated).powf(exponent)).min(0.20);
    if h_net < h_rated {
        1.0 - adj
    } else {
        1.0 + adj
    }
}

/// A turbine-generator unit. Called a turbine throughout although the
/// generator capacity, efficiency and yard-loss factors ride along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Turbine {
    name: String,
    curve: CurveIndex,
    rated_head: f64,
    max_flow: f64,
    max_power: f64,
    weight: f64,
    /// Hydraulic loss coefficient k in the loss term k * (q / q_max)^2.
    headloss_coef: f64,
    /// Fractional over-rating of the generator relative to the turbine.
    gen_capacity: f64,
    gen_efficiency: GeneratorEfficiency,
}

impl Turbine {
    fn new(name: &str, curve: CurveIndex, rated_head: f64, max_flow: f64, max_power: f64) -> Self {
        Self {
            name: name.to_string(),
            curve,
            rated_head,
            max_flow,
            max_power,
            weight: 1.0,
            headloss_coef: 0.0,
            gen_capacity: 1.0,
            gen_efficiency: GeneratorEfficiency::Fixed(0.95),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn curve(&self) -> CurveIndex {
        self.curve
    }

    pub fn rated_head(&self) -> f64 {
        self.rated_head
    }

    pub fn max_flow(&self) -> f64 {
        self.max_flow
    }

    pub fn max_power(&self) -> f64 {
        self.max_power
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    pub fn headloss_coef(&self) -> f64 {
        self.headloss_coef
    }

    pub fn set_headloss_coef(&mut self, coef: f64) {
        self.headloss_coef = coef;
    }

    pub fn gen_capacity(&self) -> f64 {
        self.gen_capacity
    }

    pub fn set_gen_capacity(&mut self, capacity: f64) {
        self.gen_capacity = capacity;
    }

    pub fn gen_efficiency(&self) -> GeneratorEfficiency {
        self.gen_efficiency
    }

    pub fn set_gen_efficiency(&mut self, efficiency: f64) {
        self.gen_efficiency = GeneratorEfficiency::Fixed(efficiency);
    }

    pub fn set_gen_curve(&mut self, curve: CurveIndex) {
        self.gen_efficiency = GeneratorEfficiency::Curve(curve);
    }

    /// Maximum deliverable power at the given head.
    pub fn max_power_at(&self, head: f64) -> f64 {
        self.max_power * head_adjustment_factor(head, self.rated_head, 2.0)
    }

    /// Maximum usable discharge at the given head.
    pub fn max_flow_at(&self, head: f64) -> f64 {
        self.max_flow * head_adjustment_factor(head, self.rated_head, 2.0)
    }

    fn gen_efficiency_at(&self, curves: &CurveVec, fraction: f64) -> Result<f64, HydrodpError> {
        match self.gen_efficiency {
            GeneratorEfficiency::Fixed(e) => Ok(e),
            GeneratorEfficiency::Curve(idx) => Ok(curves.get(&idx)?.eff_from_flow_fraction(fraction)),
        }
    }

    fn efficiency_curve<'c>(&self, curves: &'c CurveVec) -> Result<&'c Curve, HydrodpError> {
        curves.get(&self.curve)
    }

    /// Power delivered to the yard for a discharge `flow` at head `head`.
    ///
    /// The gross-head energy term is scaled by the head-adjustment factor
    /// evaluated at net head, so the hydraulic loss enters through the
    /// adjustment rather than the energy term itself.
    pub fn power(
        &self,
        curves: &CurveVec,
        conv_factor: f64,
        plant_loss_coef: f64,
        head: f64,
        flow: f64,
    ) -> Result<f64, HydrodpError> {
        if flow <= 0.0 {
            return Ok(0.0);
        }

        let flow_fraction = flow / self.max_flow;
        let gen_efficiency = self.gen_efficiency_at(curves, flow_fraction)?;
        let hydraulic_loss = self.headloss_coef * flow_fraction.powf(2.0);
        let h_net = head - hydraulic_loss;
        let adj_factor = head_adjustment_factor(h_net, self.rated_head, 2.0);
        let gen_and_yard = (1.0 - plant_loss_coef) * gen_efficiency;

        let efficiency = self.efficiency_curve(curves)?.eff_from_flow_fraction(flow_fraction);
        let power = (adj_factor * efficiency * (flow * head * conv_factor) * gen_and_yard).max(0.0);

        if flow > self.max_flow {
            debug!(
                "condition on unit {}: discharge {} at head {} exceeds maximum rating ({} at {})",
                self.name, flow, head, self.max_flow, self.rated_head
            );
        }
        if efficiency < EFF_TOL {
            debug!(
                "condition on unit {}: efficiency of {} at discharge {} too low for rating of {} at {}",
                self.name, efficiency, flow, self.max_flow, self.rated_head
            );
        }
        if power > self.max_power {
            debug!(
                "condition on unit {}: power {} at head {} exceeds maximum rating ({} at {})",
                self.name, power, head, self.max_power, self.rated_head
            );
        }

        Ok(clean(power))
    }

    /// Discharge required to deliver `power` to the yard at head `head`;
    /// the inverse of [`Turbine::power`] solved through the power axis of
    /// the efficiency curve.
    pub fn discharge(
        &self,
        curves: &CurveVec,
        conv_factor: f64,
        plant_loss_coef: f64,
        head: f64,
        power: f64,
    ) -> Result<f64, HydrodpError> {
        if power <= 0.0 {
            return Ok(0.0);
        }

        let power_fraction = power / self.max_power;
        // The generator curve is sampled on its flow axis at the power
        // fraction; an approximation inherited from the forward relation.
        let gen_efficiency = self.gen_efficiency_at(curves, power_fraction)?;
        let hydraulic_loss = self.headloss_coef * power_fraction.powf(2.0);
        let h_net = head - hydraulic_loss;
        let adj_factor = head_adjustment_factor(h_net, self.rated_head, 2.0);
        let gen_and_yard = (1.0 - plant_loss_coef) * gen_efficiency;

        let p_turbine = power / gen_and_yard;
        let efficiency = self
            .efficiency_curve(curves)?
            .eff_from_power_fraction(p_turbine / self.max_power);
        let flow = (p_turbine / (adj_factor * efficiency * (head * conv_factor))).max(0.0);

        if p_turbine > self.max_power {
            debug!(
                "condition on unit {}: power {} at head {} exceeds maximum rating ({} at {})",
                self.name, p_turbine, head, self.max_power, self.rated_head
            );
        }
        if efficiency < EFF_TOL {
            debug!(
                "condition on unit {}: efficiency of {} at power {} too low for rating of {} at {}",
                self.name, efficiency, power, self.max_power, self.rated_head
            );
        }
        if flow > self.max_flow {
            debug!(
                "condition on unit {}: discharge {} at head {} exceeds maximum rating ({} at {})",
                self.name, flow, head, self.max_flow, self.rated_head
            );
        }

        Ok(clean(flow))
    }
}

#[derive(Default)]
pub struct TurbineVec {
    turbines: Vec<Turbine>,
}

impl Deref for TurbineVec {
    type Target = Vec<Turbine>;

    fn deref(&self) -> &Self::Target {
        &self.turbines
    }
}

impl TurbineVec {
    pub fn get(&self, index: &TurbineIndex) -> Result<&Turbine, HydrodpError> {
        self.turbines
            .get(index.0)
            .ok_or(HydrodpError::TurbineIndexNotFound(*index))
    }

    pub fn get_mut(&mut self, index: &TurbineIndex) -> Result<&mut Turbine, HydrodpError> {
        self.turbines
            .get_mut(index.0)
            .ok_or(HydrodpError::TurbineIndexNotFound(*index))
    }

    pub fn push_new(
        &mut self,
        name: &str,
        curve: CurveIndex,
        rated_head: f64,
        max_flow: f64,
        max_power: f64,
    ) -> TurbineIndex {
        let turbine_index = TurbineIndex(self.turbines.len());
        self.turbines.push(Turbine::new(name, curve, rated_head, max_flow, max_power));
        turbine_index
    }

    pub fn find(&self, name: &str) -> Option<TurbineIndex> {
        self.turbines
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
            .map(TurbineIndex)
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Turbine> {
        self.turbines.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::UnitSystem;

    fn high_head_unit() -> (CurveVec, Turbine) {
        let curves = CurveVec::with_builtins();
        let kaplan = curves.find("Kaplan").unwrap();
        let turbine = Turbine::new("TestUnit1", kaplan, 220.0, 8673.0, 167000.0);
        (curves, turbine)
    }

    #[test]
    fn test_head_adjustment_factor() {
        // At rated head there is no adjustment
        assert_eq!(head_adjustment_factor(100.0, 100.0, 2.0), 1.0);
        // Symmetric and capped at 20% either side
        assert!(head_adjustment_factor(99.0, 100.0, 2.0) < 1.0);
        assert!(head_adjustment_factor(101.0, 100.0, 2.0) > 1.0);
        crate::assert_almost_eq!(head_adjustment_factor(1.0, 100.0, 2.0), 0.80);
        crate::assert_almost_eq!(head_adjustment_factor(400.0, 100.0, 2.0), 1.20);
    }

    #[test]
    fn test_power_increases_with_head() {
        let (curves, turbine) = high_head_unit();
        let conv = UnitSystem::Imperial.conversion_factor();
        let q = 0.75 * turbine.max_flow();

        let p1 = turbine.power(&curves, conv, 0.0, turbine.rated_head(), q).unwrap();
        let p2 = turbine.power(&curves, conv, 0.0, 1.1 * turbine.rated_head(), q).unwrap();
        assert!(p1 > 0.0);
        assert!(p2 >= p1);
    }

    #[test]
    fn test_discharge_decreases_with_head() {
        let (curves, turbine) = high_head_unit();
        let conv = UnitSystem::Imperial.conversion_factor();
        let p = 0.75 * turbine.max_power();

        let q1 = turbine.discharge(&curves, conv, 0.0, turbine.rated_head(), p).unwrap();
        let q2 = turbine.discharge(&curves, conv, 0.0, 1.1 * turbine.rated_head(), p).unwrap();
        assert!(q1 > 0.0);
        assert!(q2 <= q1);
    }

    #[test]
    fn test_degenerate_operating_points() {
        let (curves, turbine) = high_head_unit();
        let conv = UnitSystem::Imperial.conversion_factor();

        assert_eq!(turbine.power(&curves, conv, 0.0, 220.0, 0.0).unwrap(), 0.0);
        assert_eq!(turbine.power(&curves, conv, 0.0, 220.0, -10.0).unwrap(), 0.0);
        assert_eq!(turbine.discharge(&curves, conv, 0.0, 220.0, 0.0).unwrap(), 0.0);
        // Zero conversion factor (units never declared) cleans through to zero
        assert_eq!(turbine.discharge(&curves, 0.0, 0.0, 220.0, 1000.0).unwrap(), 0.0);
    }

    #[test]
    fn test_generator_modes_are_exclusive() {
        let (curves, mut turbine) = high_head_unit();
        let pelton = curves.find("Pelton").unwrap();

        turbine.set_gen_curve(pelton);
        assert_eq!(turbine.gen_efficiency(), GeneratorEfficiency::Curve(pelton));
        turbine.set_gen_efficiency(0.9);
        assert_eq!(turbine.gen_efficiency(), GeneratorEfficiency::Fixed(0.9));
    }
}
