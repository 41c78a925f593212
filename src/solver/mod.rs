mod backward;
mod forward;
mod grid;
mod tables;

pub use grid::Grid;

use crate::model::{Model, SolveMode};
use crate::HydrodpError;
use ndarray::Array2;
use tracing::debug;

/// Value below which a table entry is treated as "not running".
pub(crate) const VALUE_TOL: f64 = 1E-6;
/// Filter applied to solution entries when summarising.
pub(crate) const SUMMARY_TOL: f64 = 1E-3;

/// Every buffer a solve writes into. All retained allocations are zeroed on
/// reacquisition: the passes only write affirmative results, so an
/// untouched cell must read as "no solution".
pub(crate) struct Tables {
    stages: usize,
    states: usize,
    steps: usize,

    /// Objective grid, `[stages, steps]`.
    pub hk: Array2<f64>,
    pub power: Array2<f64>,
    pub flow: Array2<f64>,

    /// Best cumulative H/K from each stage onward, `[stages, states]`.
    pub gdv: Array2<f64>,
    /// Units running in that best plan.
    pub gdc: Array2<u32>,
    /// Local decision index committed by the stage.
    pub gdm: Array2<usize>,
    /// Decision-variable quantity for `gdm`, for display.
    pub gda: Array2<f64>,

    /// Forward-pass reconstruction, `[stages, states]`.
    pub sol: Array2<Option<usize>>,
    pub sol_power: Array2<f64>,
    pub sol_flow: Array2<f64>,
    pub sol_hk: Array2<f64>,

    /// State axes, `[states]`.
    pub axis: Vec<f64>,
    pub axis_other: Vec<f64>,

    /// Summary rows, `[states]`.
    pub primary_totals: Vec<f64>,
    pub secondary_totals: Vec<f64>,
    pub avg_hk: Vec<f64>,

    /// Per-stage precomputations, `[stages]`.
    pub active: Vec<bool>,
    pub opt: Vec<usize>,
    pub maxop: Vec<usize>,
    pub nearopt: Vec<usize>,
    pub metric: Vec<f64>,
    /// Stage ids sorted by ascending integrated H/K.
    pub priority: Vec<usize>,
}

impl Tables {
    fn new(stages: usize, states: usize, steps: usize) -> Self {
        Self {
            stages,
            states,
            steps,
            hk: Array2::zeros((stages, steps)),
            power: Array2::zeros((stages, steps)),
            flow: Array2::zeros((stages, steps)),
            gdv: Array2::zeros((stages, states)),
            gdc: Array2::zeros((stages, states)),
            gdm: Array2::from_elem((stages, states), 0),
            gda: Array2::zeros((stages, states)),
            sol: Array2::from_elem((stages, states), None),
            sol_power: Array2::zeros((stages, states)),
            sol_flow: Array2::zeros((stages, states)),
            sol_hk: Array2::zeros((stages, states)),
            axis: vec![0.0; states],
            axis_other: vec![0.0; states],
            primary_totals: vec![0.0; states],
            secondary_totals: vec![0.0; states],
            avg_hk: vec![0.0; states],
            active: vec![false; stages],
            opt: vec![0; stages],
            maxop: vec![0; stages],
            nearopt: vec![0; stages],
            metric: vec![0.0; stages],
            priority: vec![0; stages],
        }
    }

    fn dims(&self) -> (usize, usize, usize) {
        (self.stages, self.states, self.steps)
    }

    fn reset(&mut self) {
        self.hk.fill(0.0);
        self.power.fill(0.0);
        self.flow.fill(0.0);
        self.gdv.fill(0.0);
        self.gdc.fill(0);
        self.gdm.fill(0);
        self.gda.fill(0.0);
        self.sol.fill(None);
        self.sol_power.fill(0.0);
        self.sol_flow.fill(0.0);
        self.sol_hk.fill(0.0);
        self.axis.fill(0.0);
        self.axis_other.fill(0.0);
        self.primary_totals.fill(0.0);
        self.secondary_totals.fill(0.0);
        self.avg_hk.fill(0.0);
        self.active.fill(false);
        self.opt.fill(0);
        self.maxop.fill(0);
        self.nearopt.fill(0);
        self.metric.fill(0.0);
        self.priority.fill(0);
    }

    /// Blank the consumer-facing solution after a verified inconsistency.
    fn blank_solution(&mut self) {
        self.sol.fill(None);
        self.sol_power.fill(0.0);
        self.sol_flow.fill(0.0);
        self.sol_hk.fill(0.0);
        self.primary_totals.fill(0.0);
        self.secondary_totals.fill(0.0);
        self.avg_hk.fill(0.0);
    }
}

/// The solve context: sized grid, table storage and the sticky fail flag.
///
/// A solver is exclusive for the duration of resize → allocate → solve →
/// consumer reads; sequential solves may retain allocations through the
/// cache mode.
#[derive(Default)]
pub struct DpSolver {
    grid: Option<Grid>,
    tables: Option<Tables>,
    cache_enabled: bool,
    failed: bool,
}

impl DpSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn did_fail(&self) -> bool {
        self.failed
    }

    pub fn fail_set(&mut self) {
        self.failed = true;
    }

    pub fn fail_clear(&mut self) {
        self.failed = false;
    }

    /// Keep table allocations alive across solves of identical shape.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    /// Drop all retained allocations.
    pub fn flush(&mut self) {
        self.tables = None;
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn mode(&self) -> Option<SolveMode> {
        self.grid.as_ref().map(|g| g.mode)
    }

    pub fn stages(&self) -> usize {
        self.grid.as_ref().map_or(0, |g| g.stages)
    }

    pub fn states(&self) -> usize {
        self.grid.as_ref().map_or(0, |g| g.states)
    }

    pub fn steps(&self) -> usize {
        self.grid.as_ref().map_or(0, |g| g.steps)
    }

    pub fn delta(&self) -> f64 {
        self.grid.as_ref().map_or(0.0, |g| g.delta)
    }

    /// Determine the problem size for the current plant.
    pub fn resize(&mut self, model: &Model) -> Result<(), HydrodpError> {
        self.fail_clear();
        match Grid::size(model) {
            Ok(grid) => {
                self.grid = Some(grid);
                Ok(())
            }
            Err(e) => {
                self.fail_set();
                self.grid = None;
                Err(e)
            }
        }
    }

    /// Acquire (or reacquire) the table storage for the sized problem.
    pub fn allocate(&mut self) -> Result<(), HydrodpError> {
        let grid = match &self.grid {
            Some(g) => g,
            None => {
                self.fail_set();
                return Err(HydrodpError::ZeroProblem);
            }
        };
        if grid.stages * grid.states == 0 {
            self.fail_set();
            return Err(HydrodpError::ZeroProblem);
        }

        let dims = (grid.stages, grid.states, grid.steps);
        match &mut self.tables {
            Some(tables) if self.cache_enabled && tables.dims() == dims => {
                tables.reset();
            }
            slot => {
                *slot = Some(Tables::new(dims.0, dims.1, dims.2));
            }
        }
        debug!("allocated tables for {} stages x {} states", grid.stages, grid.states);
        Ok(())
    }

    /// Run the full solve: tabulate the objective, perform the backward
    /// recursion and reconstruct the dispatch table. On a verified
    /// inconsistency the outputs are blanked and the fail flag is left set;
    /// the solver itself never panics on plant data.
    pub fn solve(&mut self, model: &Model) -> Result<(), HydrodpError> {
        self.fail_clear();

        let grid = match &self.grid {
            Some(g) => g.clone(),
            None => {
                self.failed = true;
                return Err(HydrodpError::ZeroProblem);
            }
        };
        let tables = match &mut self.tables {
            Some(t) if t.dims() == (grid.stages, grid.states, grid.steps) => t,
            _ => {
                self.failed = true;
                return Err(HydrodpError::ZeroProblem);
            }
        };

        if model.head() <= VALUE_TOL {
            tables.blank_solution();
            self.failed = true;
            return Err(HydrodpError::ZeroHead);
        }

        // state axes
        for (i, v) in tables.axis.iter_mut().enumerate() {
            *v = grid.state_min + i as f64 * grid.delta;
        }
        for (i, v) in tables.axis_other.iter_mut().enumerate() {
            *v = grid.state_min + i as f64 * grid.other_delta;
        }

        if let Err(e) = tables::tabulate(model, &grid, tables) {
            tables.blank_solution();
            self.failed = true;
            return Err(e);
        }

        if let Err(e) = tables::precompute_stages(model, &grid, tables) {
            tables.blank_solution();
            self.failed = true;
            return Err(e);
        }

        backward::backward_pass(model, &grid, tables);
        forward::forward_pass(&grid, tables);

        Ok(())
    }

    /// Convenience wrapper running the complete solve lifecycle.
    pub fn run(&mut self, model: &mut Model) -> Result<(), HydrodpError> {
        model.assign_weights();
        model.reset_state_span();
        self.resize(model)?;
        self.allocate()?;
        self.solve(model)
    }

    // Post-solve reads. Out-of-range or pre-solve reads return the
    // "no solution" values rather than panicking.

    pub fn solution_index(&self, stage: usize, state: usize) -> Option<usize> {
        self.tables
            .as_ref()
            .and_then(|t| t.sol.get((stage, state)).copied().flatten())
    }

    pub fn power_solution(&self, stage: usize, state: usize) -> f64 {
        self.tables
            .as_ref()
            .and_then(|t| t.sol_power.get((stage, state)).copied())
            .unwrap_or(0.0)
    }

    pub fn flow_solution(&self, stage: usize, state: usize) -> f64 {
        self.tables
            .as_ref()
            .and_then(|t| t.sol_flow.get((stage, state)).copied())
            .unwrap_or(0.0)
    }

    pub fn hk_solution(&self, stage: usize, state: usize) -> f64 {
        self.tables
            .as_ref()
            .and_then(|t| t.sol_hk.get((stage, state)).copied())
            .unwrap_or(0.0)
    }

    /// Totals of the decision variable per state.
    pub fn primary_totals(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.primary_totals)
    }

    /// Totals of the companion variable per state.
    pub fn secondary_totals(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.secondary_totals)
    }

    pub fn avg_hk(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.avg_hk)
    }

    pub fn state_axis(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.axis)
    }

    /// State indices translated into the companion variable.
    pub fn companion_axis(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.axis_other)
    }

    pub fn stage_priority(&self) -> &[usize] {
        self.tables.as_ref().map_or(&[], |t| &t.priority)
    }

    pub fn stage_metric(&self) -> &[f64] {
        self.tables.as_ref().map_or(&[], |t| &t.metric)
    }

    pub fn max_operating_point(&self, stage: usize) -> usize {
        self.tables.as_ref().map_or(0, |t| t.maxop.get(stage).copied().unwrap_or(0))
    }

    /// The efficient operating point of a stage's objective column.
    pub fn optimum_point(&self, stage: usize) -> usize {
        self.tables.as_ref().map_or(0, |t| t.opt.get(stage).copied().unwrap_or(0))
    }

    /// The coordination lower bound: the smallest state still within
    /// factor `a` of the stage's best H/K.
    pub fn near_optimum_point(&self, stage: usize) -> usize {
        self.tables.as_ref().map_or(0, |t| t.nearopt.get(stage).copied().unwrap_or(0))
    }

    /// Decision tables behind the forward pass, one row per stage; exposed
    /// for the debug printout.
    pub fn decision_values(&self) -> Vec<Vec<f64>> {
        self.tables
            .as_ref()
            .map_or_else(Vec::new, |t| t.gdv.rows().into_iter().map(|r| r.to_vec()).collect())
    }

    pub fn decision_counts(&self) -> Vec<Vec<f64>> {
        self.tables.as_ref().map_or_else(Vec::new, |t| {
            t.gdc.rows().into_iter().map(|r| r.iter().map(|&c| c as f64).collect()).collect()
        })
    }

    pub fn decision_allocations(&self) -> Vec<Vec<f64>> {
        self.tables
            .as_ref()
            .map_or_else(Vec::new, |t| t.gda.rows().into_iter().map(|r| r.to_vec()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;
    use crate::model::SolveMode;
    use crate::test_utils::{mixed_plant, single_kaplan_plant, twin_pelton_plant};
    use crate::units::UnitSystem;

    #[test]
    fn test_single_kaplan_power() {
        let mut model = single_kaplan_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();
        assert!(!solver.did_fail());

        let states = solver.states();
        assert_eq!(states, 5);
        assert_almost_eq!(solver.delta(), 375.0);

        // The single unit carries the whole plant at every state it can
        // reach, so the top state maps straight through.
        assert_eq!(solver.solution_index(0, states - 1), Some(states - 1));
        let top = solver.primary_totals()[states - 1];
        assert!((top - 1500.0).abs() / 1500.0 < 0.01);

        // The average H/K of a one-unit plant is that unit's H/K.
        assert_almost_eq!(solver.avg_hk()[states - 1], solver.hk_solution(0, states - 1));
        assert!(solver.avg_hk()[states - 1] > 0.0);
    }

    #[test]
    fn test_single_stage_identity_and_over_demand() {
        // A faceplate rating just below the rounded grid maximum leaves the
        // top state beyond the unit's reach.
        let mut model = Model::default();
        model.set_units(UnitSystem::Imperial).unwrap();
        let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
        model.register_turbine("u1", kaplan, 65.0, 1000.0, 1480.0).unwrap();
        model.set_head(65.0);
        model.set_user_steps(5);
        model.set_solve_mode(SolveMode::ForPower);

        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let states = solver.states();
        let maxop = solver.max_operating_point(0);
        assert!(maxop < states - 1);

        for state in 0..states {
            if state <= maxop {
                assert_eq!(solver.solution_index(0, state), Some(state));
            } else {
                // over-demanded; the plant serves nothing
                assert_eq!(solver.solution_index(0, state), None);
                assert_eq!(solver.primary_totals()[state], 0.0);
            }
        }
    }

    #[test]
    fn test_twin_peltons_flow_symmetry() {
        let mut model = twin_pelton_plant();
        model.set_solve_mode(SolveMode::ForFlow);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let states = solver.states();
        let top = states - 1;
        assert_eq!(solver.solution_index(0, top), solver.solution_index(1, top));
        let total_flow = solver.primary_totals()[top];
        assert!((total_flow - 2000.0).abs() / 2000.0 < 0.01);
    }

    #[test]
    fn test_forward_backward_consistency() {
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let delta = solver.delta();
        for state in 0..solver.states() {
            // the decision variable decodes to whole grid steps, so the
            // total must equal the allocated step count times delta
            let allocated: usize = (0..solver.stages())
                .filter_map(|s| solver.solution_index(s, state))
                .sum();
            assert!(allocated <= state);
            let expected = allocated as f64 * delta;
            assert!((solver.primary_totals()[state] - expected).abs() < 1E-6 * delta.max(1.0));
        }
    }

    #[test]
    fn test_mixed_plant_ranking_and_turn_on() {
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        // the priority order is the stable ascending sort of the
        // integrated H/K metric
        let metric = solver.stage_metric().to_vec();
        let priority = solver.stage_priority().to_vec();
        let mut expected: Vec<usize> = (0..solver.stages()).collect();
        expected.sort_by(|&a, &b| metric[a].partial_cmp(&metric[b]).unwrap());
        assert_eq!(priority, expected);
        // four distinct units, four distinct qualities
        assert!(metric.iter().all(|&m| m > 0.0));

        // the per-stage landmarks are ordered: coordination bound at or
        // below the optimum, optimum at or below the maximum
        for stage in 0..solver.stages() {
            assert!(solver.near_optimum_point(stage) <= solver.optimum_point(stage));
            assert!(solver.optimum_point(stage) <= solver.max_operating_point(stage));
        }

        // the companion axis climbs in companion-variable steps
        let other_delta = solver.grid().unwrap().other_delta;
        assert_almost_eq!(solver.companion_axis()[1], other_delta);

        // every unit turns on somewhere, at distinct demand levels, and
        // the fully-allocated top of the table runs the whole plant
        let turn_on: Vec<usize> = (0..solver.stages())
            .map(|stage| {
                (0..solver.states())
                    .find(|&state| solver.solution_index(stage, state).map_or(false, |i| i > 0))
                    .unwrap()
            })
            .collect();
        assert!(turn_on.iter().all(|&s| s >= 1));

        let full = (0..solver.states())
            .rev()
            .find(|&state| solver.primary_totals()[state] > 0.0)
            .unwrap();
        for stage in 0..solver.stages() {
            assert!(solver.solution_index(stage, full).map_or(false, |i| i > 0));
        }
    }

    #[test]
    fn test_zero_head_fails_clean() {
        let mut model = single_kaplan_plant();
        model.set_solve_mode(SolveMode::ForPower);
        model.set_head(0.0);

        let mut solver = DpSolver::new();
        let result = solver.run(&mut model);
        assert_eq!(result, Err(HydrodpError::ZeroHead));
        assert!(solver.did_fail());

        for state in 0..solver.states() {
            assert_eq!(solver.primary_totals()[state], 0.0);
            assert_eq!(solver.avg_hk()[state], 0.0);
            for stage in 0..solver.stages() {
                assert_eq!(solver.solution_index(stage, state), None);
                assert_eq!(solver.hk_solution(stage, state), 0.0);
            }
        }
    }

    #[test]
    fn test_unspecified_mode_fails() {
        let mut model = single_kaplan_plant();
        let mut solver = DpSolver::new();
        assert_eq!(solver.run(&mut model), Err(HydrodpError::SolveModeUnspecified));
        assert!(solver.did_fail());
    }

    #[test]
    fn test_cached_allocations_resolve_identically() {
        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);

        let mut solver = DpSolver::new();
        solver.set_cache_enabled(true);
        solver.run(&mut model).unwrap();
        let first_totals = solver.primary_totals().to_vec();
        let first_hk = solver.avg_hk().to_vec();

        // identical grid; the retained buffers must be zeroed and refilled
        solver.run(&mut model).unwrap();
        assert_eq!(solver.primary_totals(), first_totals.as_slice());
        assert_eq!(solver.avg_hk(), first_hk.as_slice());

        solver.flush();
        solver.run(&mut model).unwrap();
        assert_eq!(solver.primary_totals(), first_totals.as_slice());
    }

    #[test]
    fn test_dispatch_idempotence_across_grid() {
        use crate::dispatch::DispatchSolution;

        let mut model = mixed_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        // The top usable state resolves through the extrapolation branch,
        // so exact idempotence holds for the interior of the table. The
        // search contract also needs a strictly climbing table; truncated
        // states would make the lookup ambiguous.
        let totals = solver.primary_totals().to_vec();
        let usable = (0..solver.states()).rev().find(|&i| totals[i] >= 1.0).unwrap();
        if (1..=usable).any(|i| totals[i] <= totals[i - 1]) {
            return;
        }
        for state in 1..usable {
            let demand = totals[state];
            if demand < 1.0 {
                continue;
            }
            let dispatch = DispatchSolution::from_solution(&solver, demand).unwrap();
            for stage in 0..solver.stages() {
                assert_almost_eq!(dispatch.power()[stage], solver.power_solution(stage, state));
            }
        }
    }
}
