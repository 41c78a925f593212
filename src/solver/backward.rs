use super::{Grid, Tables, VALUE_TOL};
use crate::model::Model;
use tracing::debug;

/// Tolerance below which a local H/K contribution is discarded.
const LOCAL_TOL: f64 = 1E-9;

/// One candidate way to serve a scenario: the stage's own decision plus
/// the best downstream plan for the remainder.
#[derive(Copy, Clone, Default)]
struct Candidate {
    value: f64,
    local_index: usize,
    count: u32,
}

/// The multi-stage backward recursion.
///
/// Stages are folded in from the strongest (by integrated H/K) to the
/// weakest, so the trivial boundary problem belongs to the strongest
/// stage. Because the figure of merit is an average rather than a sum,
/// each committed plan carries both its summed H/K and its running-unit
/// count, and scenarios are decided on the best mean.
pub(super) fn backward_pass(model: &Model, grid: &Grid, tables: &mut Tables) {
    let stages = grid.stages;
    let states = grid.states;

    // trivial problem: the strongest stage serves each scenario alone
    let last_stage = tables.priority[stages - 1];
    let mut fr_state = tables.maxop[last_stage];
    let fr_count = (fr_state + 1).min(states);
    for state in 0..fr_count {
        let hk = tables.hk[[last_stage, state]];
        tables.gdm[[last_stage, state]] = state;
        tables.gdv[[last_stage, state]] = hk;
        tables.gdc[[last_stage, state]] = u32::from(hk >= VALUE_TOL);
    }

    let mut local_decisions = vec![0usize; states];

    for position in (0..stages.saturating_sub(1)).rev() {
        let stage = tables.priority[position];
        let next_stage = tables.priority[position + 1];
        // stages already folded into the downstream table
        let stages_behind = (stages - 1 - position) as u32;

        let maxop = tables.maxop[stage];
        let coordination_state = ((maxop as f64 * model.coordination_b()) as usize).min(maxop);

        fr_state += maxop;
        let fr_count = (fr_state + 1).min(states);

        // Feasible local decisions per requested amount. Below the unit
        // maximum any decision is legal (off-cam running keeps the plant
        // curve smooth); above it the decision wraps through the on-cam
        // range and earlier stages absorb the excess.
        let on_cam_states = maxop - coordination_state + 1;
        for (state, decision) in local_decisions.iter_mut().enumerate().take(states) {
            *decision = if state <= maxop {
                state
            } else {
                coordination_state + state % on_cam_states
            };
        }

        for scenario in 0..fr_count {
            // Default commit: the stage sits out and the downstream plan
            // carries the whole scenario.
            let mut committed = candidate(tables, stage, next_stage, local_decisions[0], scenario, maxop, stages_behind);
            let mut best_mean = 0.0;

            for decision_state in 0..=scenario {
                let c = candidate(
                    tables,
                    stage,
                    next_stage,
                    local_decisions[decision_state],
                    scenario,
                    maxop,
                    stages_behind,
                );
                if c.count > 0 {
                    let mean = c.value / c.count as f64;
                    if mean > best_mean {
                        best_mean = mean;
                        committed = c;
                    }
                }
            }

            tables.gdv[[stage, scenario]] = committed.value;
            tables.gdm[[stage, scenario]] = committed.local_index;
            tables.gdc[[stage, scenario]] = committed.count;
        }

        debug!("backward pass: stage {} feasible region {}", stage, fr_count);
    }

    // unmap committed decision indices to display quantities
    for stage in 0..stages {
        for state in 0..states {
            let idx = tables.gdm[[stage, state]];
            tables.gda[[stage, state]] = tables.axis.get(idx).copied().unwrap_or(0.0);
        }
    }

    // Non-choices carry no residue forward; clearing them here keeps the
    // forward pass from chasing value that has no allocation behind it.
    for stage in 0..stages {
        for state in 0..states {
            if tables.gdm[[stage, state]] == 0 {
                tables.gdv[[stage, state]] = 0.0;
                tables.gdc[[stage, state]] = 0;
            }
        }
    }
}

fn candidate(
    tables: &Tables,
    stage: usize,
    next_stage: usize,
    local_index: usize,
    scenario: usize,
    maxop: usize,
    stages_behind: u32,
) -> Candidate {
    let mut local_index = local_index;
    let mut local_value = tables.hk[[stage, local_index]];
    if local_value < LOCAL_TOL {
        local_value = 0.0;
        local_index = 0;
    }

    let global_index = scenario - local_index;
    let global_value = tables.gdv[[next_stage, global_index]];
    let global_count = tables.gdc[[next_stage, global_index]];

    // Suppress plans that run fewer units than the stages behind this one
    // while the scenario exceeds the local maximum; such plans tend to be
    // local minima that strand the remaining budget.
    if global_count < stages_behind && scenario > maxop {
        local_value = 0.0;
        local_index = 0;
    }

    Candidate {
        value: local_value + global_value,
        local_index,
        count: global_count + u32::from(local_index != 0),
    }
}
