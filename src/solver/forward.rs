use super::{Grid, Tables, SUMMARY_TOL};
use crate::model::SolveMode;
use crate::utils::clean;
use rayon::prelude::*;
use tracing::debug;

/// Reconstruct the per-stage allocations for every target state, decode
/// them into flow and power, and build the summary rows.
pub(super) fn forward_pass(grid: &Grid, tables: &mut Tables) {
    let stages = grid.stages;
    let states = grid.states;
    let steps = grid.steps;

    let mut checklist = vec![false; stages];

    for state in 0..states {
        checklist.copy_from_slice(&tables.active);
        let mut remaining = state;

        while remaining != 0 {
            // Best value-per-unit among the stages still available,
            // scanning the priority order strongest-first so ties fall to
            // the stronger stage.
            let mut chosen: Option<usize> = None;
            let mut best_mean = 0.0;
            for position in (0..stages).rev() {
                let stage = tables.priority[position];
                if !checklist[stage] {
                    continue;
                }
                let count = tables.gdc[[stage, remaining]];
                if count > 0 {
                    let mean = tables.gdv[[stage, remaining]] / count as f64;
                    if mean > best_mean {
                        best_mean = mean;
                        chosen = Some(stage);
                    }
                }
            }

            let stage = match chosen {
                Some(s) => s,
                None => {
                    debug!("state {}: {} left unallocated", state, remaining);
                    break;
                }
            };

            let mut allocated = tables.gdm[[stage, remaining]];
            if allocated >= steps {
                // recoverable: clamp to the last step
                allocated = steps - 1;
            }

            tables.sol[[stage, state]] = Some(allocated);
            remaining = remaining.saturating_sub(allocated);
            checklist[stage] = false;
        }
    }

    // decode state indices into flow and power; stage rows are disjoint
    let decoded: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = (0..stages)
        .into_par_iter()
        .map(|stage| {
            let mut power = vec![0.0; states];
            let mut flow = vec![0.0; states];
            let mut hk = vec![0.0; states];
            for state in 0..states {
                if let Some(idx) = tables.sol[[stage, state]] {
                    power[state] = tables.power[[stage, idx]];
                    flow[state] = tables.flow[[stage, idx]];
                }
                hk[state] = clean(power[state] / flow[state]);
            }
            (power, flow, hk)
        })
        .collect();

    for (stage, (power, flow, hk)) in decoded.into_iter().enumerate() {
        for state in 0..states {
            tables.sol_power[[stage, state]] = power[state];
            tables.sol_flow[[stage, state]] = flow[state];
            tables.sol_hk[[stage, state]] = hk[state];
        }
    }

    // summary rows
    let (primary, secondary) = match grid.mode {
        SolveMode::ForPower => (&tables.sol_power, &tables.sol_flow),
        SolveMode::ForFlow => (&tables.sol_flow, &tables.sol_power),
    };
    for state in 0..states {
        let mut sum_primary = 0.0;
        let mut sum_secondary = 0.0;
        let mut hk_sum = 0.0;
        let mut hk_count = 0usize;
        for stage in 0..stages {
            let p = primary[[stage, state]];
            if p.is_finite() && p > SUMMARY_TOL {
                sum_primary += p;
            }
            let s = secondary[[stage, state]];
            if s.is_finite() && s > SUMMARY_TOL {
                sum_secondary += s;
            }
            let hk = tables.sol_hk[[stage, state]];
            if hk.is_finite() && hk > SUMMARY_TOL {
                hk_sum += hk;
                hk_count += 1;
            }
        }
        tables.primary_totals[state] = sum_primary;
        tables.secondary_totals[state] = sum_secondary;
        tables.avg_hk[state] = if hk_count > 0 { hk_sum / hk_count as f64 } else { 0.0 };
    }
}
