use super::{Grid, Tables, VALUE_TOL};
use crate::model::{Model, SolveMode};
use crate::utils::clean;
use crate::HydrodpError;
use rayon::prelude::*;
use tracing::debug;

struct StageColumn {
    power: Vec<f64>,
    flow: Vec<f64>,
    hk: Vec<f64>,
    active: bool,
}

/// Build the per-stage objective columns: the decision-variable ladder, the
/// companion variable from the turbine model, and the weighted H/K figure.
/// Stage columns are independent, so they are computed in parallel.
pub(super) fn tabulate(model: &Model, grid: &Grid, tables: &mut Tables) -> Result<(), HydrodpError> {
    let steps = grid.steps;
    let columns: Result<Vec<StageColumn>, HydrodpError> = (0..grid.stages)
        .into_par_iter()
        .map(|stage| {
            let turbine = model.turbines().get(&crate::turbine::TurbineIndex::new(stage))?;
            let mut power = vec![0.0; steps];
            let mut flow = vec![0.0; steps];
            let mut hk = vec![0.0; steps];

            let active = turbine.weight() >= VALUE_TOL;
            if active {
                let max_param = match grid.mode {
                    SolveMode::ForPower => turbine.max_power(),
                    SolveMode::ForFlow => turbine.max_flow(),
                };
                let max_decision = max_param * turbine.gen_capacity();
                let entries = ((max_decision / grid.delta) as usize + 1).min(steps);

                let (indep, dep): (&mut Vec<f64>, &mut Vec<f64>) = match grid.mode {
                    SolveMode::ForPower => (&mut power, &mut flow),
                    SolveMode::ForFlow => (&mut flow, &mut power),
                };
                for (i, v) in indep.iter_mut().take(entries).enumerate() {
                    *v = i as f64 * grid.delta;
                }
                for i in 0..steps {
                    let x = indep[i];
                    dep[i] = if x < VALUE_TOL {
                        0.0
                    } else {
                        match grid.mode {
                            SolveMode::ForPower => turbine.discharge(
                                model.curves(),
                                model.conversion_factor(),
                                model.plant_loss_coef(),
                                model.head(),
                                x,
                            )?,
                            SolveMode::ForFlow => turbine.power(
                                model.curves(),
                                model.conversion_factor(),
                                model.plant_loss_coef(),
                                model.head(),
                                x,
                            )?,
                        }
                    };
                }

                let weight = turbine.weight();
                for i in 0..steps {
                    hk[i] = clean(power[i] / flow[i]) * weight;
                }
            }

            Ok(StageColumn {
                power,
                flow,
                hk,
                active,
            })
        })
        .collect();

    for (stage, column) in columns?.into_iter().enumerate() {
        for i in 0..steps {
            tables.power[[stage, i]] = column.power[i];
            tables.flow[[stage, i]] = column.flow[i];
            tables.hk[[stage, i]] = column.hk[i];
        }
        tables.active[stage] = column.active;
    }

    Ok(())
}

/// Per-stage landmarks of the objective columns plus the stage priority
/// order used by both passes.
pub(super) fn precompute_stages(model: &Model, grid: &Grid, tables: &mut Tables) -> Result<(), HydrodpError> {
    for stage in 0..grid.stages {
        let row = tables.hk.row(stage);

        // efficient operating point: first index of the row maximum
        let mut opt = 0;
        let mut best = row[0];
        for (i, &v) in row.iter().enumerate().skip(1) {
            if v > best {
                opt = i;
                best = v;
            }
        }
        tables.opt[stage] = opt;

        // highest allowed operating point
        let mut maxop = 0;
        for (i, &v) in row.iter().enumerate() {
            if v > VALUE_TOL {
                maxop = i;
            }
        }
        tables.maxop[stage] = maxop;

        // coordination lower bound: how far below the optimum the stage can
        // run while staying within factor `a` of its best H/K
        let threshold = row[opt] * model.coordination_a();
        let mut nearopt = opt;
        for i in (0..opt).rev() {
            if row[i] >= threshold {
                nearopt = i;
            } else {
                break;
            }
        }
        tables.nearopt[stage] = nearopt;

        tables.metric[stage] = row.iter().sum();
    }

    // infeasible when no stage can move off zero
    if tables.maxop.iter().sum::<usize>() == 0 {
        return Err(HydrodpError::FlatObjective);
    }

    // curve-shape sanity: a drooping tail implies the optimum sits below
    // the maximum operating point, a rising tail implies they coincide
    for stage in 0..grid.stages {
        let turbine = model.turbines().get(&crate::turbine::TurbineIndex::new(stage))?;
        let curve = model.curves().get(&turbine.curve())?;
        if curve.points() > 1 {
            let eff = curve.efficiency();
            let tail_droops = eff[curve.points() - 2] > eff[curve.points() - 1];
            let ok_drooping = tail_droops && tables.opt[stage] < tables.maxop[stage];
            let ok_rising = !tail_droops && tables.opt[stage] == tables.maxop[stage];
            if !(ok_drooping ^ ok_rising) {
                debug!(
                    "condition on unit {}: maximum operating point at H/K of {} and optimum operating point at H/K of {}",
                    turbine.name(),
                    tables.hk[[stage, tables.maxop[stage]]],
                    tables.hk[[stage, tables.opt[stage]]],
                );
            }
        }
    }

    // rank stages from weakest to strongest integrated H/K; a stable sort
    // keyed on (metric, stage id) keeps the order deterministic
    for (i, p) in tables.priority.iter_mut().enumerate() {
        *p = i;
    }
    let metric = &tables.metric;
    tables
        .priority
        .sort_by(|&a, &b| metric[a].partial_cmp(&metric[b]).unwrap_or(std::cmp::Ordering::Equal));

    debug!("stage priority order: {:?}", tables.priority);

    Ok(())
}
