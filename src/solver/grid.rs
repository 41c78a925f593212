use crate::model::{Adjustment, Model, SolveMode};
use crate::HydrodpError;
use tracing::{debug, info};

/// Hard bounds on the step-count search.
const MAX_NONZERO_STEPS: usize = 200;
const MIN_STEP_SIZE: f64 = 10.0;

/// The sized problem: stage count, discretised state count and the step
/// sizes translating state indices into decision-variable quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub mode: SolveMode,
    pub stages: usize,
    pub states: usize,
    /// Adjusted objective-function step count.
    pub steps: usize,
    /// Step size in the decision variable.
    pub delta: f64,
    /// Step size converting a state index to the companion variable.
    pub other_delta: f64,
    pub state_min: f64,
    pub state_max: f64,
}

impl Grid {
    /// Choose the problem discretisation for the current plant.
    ///
    /// The heuristic hunts for a step size on which the plant total, the
    /// largest unit and the smallest unit all land near whole step counts,
    /// scoring candidates by the summed squared fractional parts.
    pub fn size(model: &Model) -> Result<Self, HydrodpError> {
        let mode = model.solve_mode()?;
        info!("Solving for {}.", mode);

        let user_steps = model.user_step_count();
        if user_steps < 5 {
            return Err(HydrodpError::TooFewSteps);
        }

        let stages = model.turbines().len();
        let totals = model.totals();
        let alt_totals = totals.alt();

        let max_decision = totals.max(mode, Adjustment::HeadAdjusted);
        let min_max_decision = totals.min_max(mode, Adjustment::HeadAdjusted);
        let total_decision = totals.total(mode, Adjustment::HeadAdjusted);
        let max_alt_decision = alt_totals.max(mode, Adjustment::HeadAdjusted);

        debug!(
            "max decision: {}   min-max decision: {}   total decision: {}",
            max_decision, min_max_decision, total_decision
        );

        // Discount the zero step from the user's count.
        let mut nonzero_steps = user_steps - 1;
        let mut step_size = min_max_decision / nonzero_steps as f64;

        let mut best_square = 4E4;
        let mut best_nonzero_steps = 0usize;

        if min_max_decision <= nonzero_steps as f64 {
            debug!("smallest unit maximum {} is below the step count", min_max_decision);
        }

        while nonzero_steps < MAX_NONZERO_STEPS && step_size > MIN_STEP_SIZE {
            step_size = max_decision / nonzero_steps as f64;

            let frac_total = (total_decision / step_size).fract();
            let frac_max = (max_decision / step_size).fract();
            let frac_min_max = (min_max_decision / step_size).fract();
            let square = frac_total * frac_total + frac_max * frac_max + frac_min_max * frac_min_max;

            if square < best_square {
                best_nonzero_steps = nonzero_steps;
                best_square = square;
                // good enough once the total and the largest unit agree
                if (frac_max - frac_total).abs() < 1E-1 {
                    break;
                }
            }
            nonzero_steps += 1;
        }

        // Re-include the zero step.
        let steps = if best_nonzero_steps == 0 {
            user_steps
        } else {
            best_nonzero_steps + 1
        };
        if steps != user_steps {
            info!(
                "UnitSteps adjusted by {} to improve rounding.",
                steps as isize - user_steps as isize
            );
        }

        let divisor = if best_nonzero_steps == 0 {
            user_steps - 1
        } else {
            best_nonzero_steps
        };
        let delta = max_decision / divisor as f64;

        if !delta.is_finite() || delta <= 0.0 {
            return Err(HydrodpError::ZeroProblem);
        }

        let other_delta = delta * (max_alt_decision / max_decision);
        let whole_steps = (total_decision / delta).trunc();
        let states = whole_steps as usize + 1;
        let state_max = whole_steps * delta;

        Ok(Self {
            mode,
            stages,
            states,
            steps,
            delta,
            other_delta,
            state_min: 0.0,
            state_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use crate::model::Model;
    use crate::units::UnitSystem;

    fn plant(ratings: &[(f64, f64, f64)]) -> Model {
        let mut model = Model::default();
        model.set_units(UnitSystem::Imperial).unwrap();
        let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
        for (i, (h, q, p)) in ratings.iter().enumerate() {
            model
                .register_turbine(&format!("u{}", i + 1), kaplan, *h, *q, *p)
                .unwrap();
        }
        model
    }

    #[test]
    fn test_single_unit_grid() {
        let mut model = plant(&[(65.0, 1000.0, 1500.0)]);
        model.set_head(65.0);
        model.set_user_steps(5);
        model.set_solve_mode(SolveMode::ForPower);
        model.assign_weights();

        let grid = Grid::size(&model).unwrap();
        assert_eq!(grid.stages, 1);
        // total == max, so the seed step count already scores zero
        assert_eq!(grid.steps, 5);
        assert_almost_eq!(grid.delta, 375.0);
        assert_eq!(grid.states, 5);
        assert_almost_eq!(grid.state_max, 1500.0);
    }

    #[test]
    fn test_grid_covers_plant() {
        let mut model = plant(&[(65.0, 1400.0, 1700.0), (55.0, 730.0, 1500.0), (50.0, 1000.0, 1500.0)]);
        model.set_head(60.0);
        model.set_user_steps(5);
        model.set_solve_mode(SolveMode::ForFlow);
        model.assign_weights();

        let grid = Grid::size(&model).unwrap();
        let total = model.totals().total(SolveMode::ForFlow, Adjustment::HeadAdjusted);
        assert!(grid.states as f64 * grid.delta >= total);
        assert!(grid.steps >= 5);
    }

    #[test]
    fn test_missing_mode_and_steps() {
        let mut model = plant(&[(65.0, 1000.0, 1500.0)]);
        model.assign_weights();
        assert_eq!(Grid::size(&model), Err(HydrodpError::SolveModeUnspecified));

        model.set_solve_mode(SolveMode::ForPower);
        model.set_user_steps(3);
        assert_eq!(Grid::size(&model), Err(HydrodpError::TooFewSteps));
    }
}
