use crate::model::{Adjustment, Model};
use crate::solver::DpSolver;
use crate::HydrodpError;
use tracing::debug;

const REGRESS_TOL: f64 = 1E-6;

/// Linear fits of average H/K against an external dependent variable
/// (typically the current head), sampled at fractional plant capacities.
///
/// Each call to [`OpRegression::regress`] samples the current solution;
/// the two most recent samples define the fit. The first call alone
/// degenerates to a flat line through the sampled value.
#[derive(Debug, Default, Clone)]
pub struct OpRegression {
    capacities: Vec<f64>,
    dependents: [f64; 2],
    /// Sampled H/K per capacity for the two most recent solves.
    values: [Vec<f64>; 2],
    slope: Vec<f64>,
    intercept: Vec<f64>,
    regressions: usize,
}

impl OpRegression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the capacity fractions of interest. Resets the sample
    /// history.
    pub fn set_capacities(&mut self, capacities: &[f64]) {
        self.capacities = capacities.to_vec();
        self.dependents = [0.0; 2];
        self.values = [vec![0.0; capacities.len()], vec![0.0; capacities.len()]];
        self.slope = vec![0.0; capacities.len()];
        self.intercept = vec![0.0; capacities.len()];
        self.regressions = 0;
    }

    /// Record the dependent-variable value for the upcoming sample.
    pub fn set_dependent(&mut self, dependent: f64) {
        self.dependents[self.regressions & 1] = dependent;
    }

    pub fn capacities(&self) -> &[f64] {
        &self.capacities
    }

    /// Fitted slopes, one per capacity.
    pub fn slope(&self) -> &[f64] {
        &self.slope
    }

    /// Fitted intercepts, one per capacity.
    pub fn intercept(&self) -> &[f64] {
        &self.intercept
    }

    /// Sample average H/K at each capacity fraction of the plant total and
    /// refresh the linear fits.
    pub fn regress(&mut self, model: &Model, solver: &DpSolver) -> Result<(), HydrodpError> {
        if self.capacities.is_empty() {
            return Err(HydrodpError::NoOperatingPoints);
        }
        let grid = match solver.grid() {
            Some(g) => g.clone(),
            None => return Err(HydrodpError::NoSolution),
        };

        let total_decision = model.totals().total(grid.mode, Adjustment::HeadAdjusted);
        let totals = solver.primary_totals();
        let avg_hk = solver.avg_hk();
        let states = grid.states;
        if totals.len() < states || avg_hk.len() < states || states < 2 {
            return Err(HydrodpError::NoSolution);
        }
        let current = self.regressions & 1;

        for point in 0..self.capacities.len() {
            let target = self.capacities[point] * total_decision;

            // Locate the bracketing states. The table may carry rounding
            // run-off, so a local decrease ends the scan early.
            let mut state = 1;
            while state < states {
                if totals[state] > target {
                    break;
                }
                if totals[state] < totals[state - 1] {
                    state -= 1;
                    break;
                }
                state += 1;
            }
            if state == states {
                debug!(
                    "regress: operating point {} extends past the solution table",
                    self.capacities[point]
                );
                state -= 1;
            }
            let state = state.max(1);

            // Interpolate H/K at the target; the same expression
            // extrapolates past the table end.
            let sol_base = totals[state - 1];
            let cap_delta = target - sol_base;
            let sol_delta = totals[state] - sol_base;
            let hk_base = avg_hk[state - 1];
            let hk_delta = avg_hk[state] - hk_base;
            let value = if sol_delta < 1.0 {
                hk_base
            } else {
                hk_base + hk_delta * (cap_delta / sol_delta)
            };
            self.values[current][point] = value;

            let (slope, intercept) = if self.regressions == 0 {
                (0.0, self.values[0][point])
            } else {
                // fit through the earlier (A) and most recent (B) samples
                let a = if current == 1 { 0 } else { 1 };
                let b = 1 - a;
                let value_delta = self.values[b][point] - self.values[a][point];
                let dep_delta = self.dependents[b] - self.dependents[a];
                let slope = if value_delta.abs() <= REGRESS_TOL || dep_delta.abs() <= REGRESS_TOL {
                    0.0
                } else {
                    value_delta / dep_delta
                };
                (slope, self.values[b][point] - slope * self.dependents[b])
            };
            self.slope[point] = slope;
            self.intercept[point] = intercept;
        }

        self.regressions += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SolveMode;
    use crate::solver::DpSolver;
    use crate::test_utils::mixed_plant;

    #[test]
    fn test_no_capacities_is_an_error() {
        let mut op = OpRegression::new();
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();
        assert_eq!(op.regress(&model, &solver), Err(HydrodpError::NoOperatingPoints));
    }

    #[test]
    fn test_first_regression_is_degenerate() {
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let mut op = OpRegression::new();
        op.set_capacities(&[0.25, 0.5, 0.75]);
        op.set_dependent(68.0);
        op.regress(&model, &solver).unwrap();

        for point in 0..3 {
            assert_eq!(op.slope()[point], 0.0);
            // the intercept carries the interpolated H/K, which is positive
            // for any capacity inside the solved span
            assert!(op.intercept()[point] > 0.0);
        }
    }

    #[test]
    fn test_two_head_fit_passes_through_both_samples() {
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();

        let mut op = OpRegression::new();
        op.set_capacities(&[0.25, 0.5, 0.75]);

        model.set_head(60.0);
        solver.run(&mut model).unwrap();
        op.set_dependent(60.0);
        op.regress(&model, &solver).unwrap();
        let at_60: Vec<f64> = op.intercept().to_vec();

        model.set_head(70.0);
        solver.run(&mut model).unwrap();
        op.set_dependent(70.0);
        op.regress(&model, &solver).unwrap();

        for point in 0..3 {
            let m = op.slope()[point];
            let b = op.intercept()[point];
            // the fitted line reproduces the first sample at its head
            assert!((b + m * 60.0 - at_60[point]).abs() < 1E-5);
        }
    }
}
