mod csv;

pub use self::csv::CsvRecorder;

use crate::dispatch::DispatchSolution;
use crate::model::{Model, SolveMode};
use crate::regression::OpRegression;
use crate::solver::DpSolver;
use crate::turbine::GeneratorEfficiency;
use crate::units::Quantity;
use crate::HydrodpError;
use std::io;
use std::io::Write;

/// Meta data common to all recorders.
#[derive(Debug, Clone)]
pub struct RecorderMeta {
    pub name: String,
}

impl RecorderMeta {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Persist or display one solved dispatch table.
pub trait SolutionRecorder {
    fn meta(&self) -> &RecorderMeta;
    fn save(&mut self, model: &Model, solver: &DpSolver) -> Result<(), HydrodpError>;
}

/// Variable-width float formatting tuned so columns line up across the
/// magnitudes a dispatch table mixes.
pub(crate) fn format_float(value: f64) -> String {
    let a = value.abs();
    if value.is_nan() {
        "    NAN".to_string()
    } else if value.is_infinite() {
        "    INF".to_string()
    } else if a > 1E7 {
        format!("{:.4e}", value)
    } else if value.fract().abs() < 1E-5 {
        format!("{:7.0}", value)
    } else if a >= 1E6 {
        format!("{:.0}", value)
    } else if a >= 1E5 {
        format!("{:7.0}", value)
    } else if a >= 1E4 {
        format!("{:7.1}", value)
    } else if a >= 1E3 {
        format!("{:7.2}", value)
    } else if a >= 1E2 {
        format!("{:7.3}", value)
    } else if a >= 10.0 {
        format!("{:7.4}", value)
    } else if a >= 1E-3 {
        format!("{:7.5}", value)
    } else if a < 1E-10 {
        format!("{:5.1}", value)
    } else {
        format!("{:7.8}", value)
    }
}

fn row<W: Write>(out: &mut W, label: &str, values: &[f64], delimiter: char) -> io::Result<()> {
    write!(out, "{}{}", label, delimiter)?;
    for (i, v) in values.iter().enumerate() {
        let sep = if i + 1 == values.len() { '\n' } else { delimiter };
        write!(out, "{}{}", format_float(*v), sep)?;
    }
    if values.is_empty() {
        writeln!(out)?;
    }
    Ok(())
}

fn variable_labels(mode: SolveMode) -> (&'static str, &'static str) {
    match mode {
        SolveMode::ForPower => ("Power", "Flow"),
        SolveMode::ForFlow => ("Flow", "Power"),
    }
}

pub fn print_units<W: Write>(out: &mut W, model: &Model) -> io::Result<()> {
    for turbine in model.turbines().iter() {
        let curve_name = model
            .curves()
            .get(&turbine.curve())
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        let gen_curve = match turbine.gen_efficiency() {
            GeneratorEfficiency::Curve(idx) => model
                .curves()
                .get(&idx)
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            GeneratorEfficiency::Fixed(_) => "nil".to_string(),
        };
        let gen_eff = match turbine.gen_efficiency() {
            GeneratorEfficiency::Fixed(e) => e,
            GeneratorEfficiency::Curve(_) => 1.0,
        };
        writeln!(
            out,
            "unit {} {} {} {} {} {} {} {} capacity {} weight {} headloss {} geneff {} gencurve {}",
            turbine.name(),
            curve_name,
            format_float(turbine.rated_head()).trim(),
            model.units().label(Quantity::Length),
            format_float(turbine.max_flow()).trim(),
            model.units().label(Quantity::Flow),
            format_float(turbine.max_power()).trim(),
            model.units().label(Quantity::Power),
            format_float(turbine.gen_capacity()).trim(),
            format_float(turbine.weight()).trim(),
            format_float(turbine.headloss_coef()).trim(),
            format_float(gen_eff).trim(),
            gen_curve,
        )?;
    }
    Ok(())
}

pub fn print_curves<W: Write>(out: &mut W, model: &Model, user_only: bool) -> io::Result<()> {
    for curve in model.curves().iter() {
        if user_only && curve.is_builtin() {
            continue;
        }
        for (axis, values) in [
            ("flo", curve.flow_fraction()),
            ("pow", curve.power_fraction()),
            ("eff", curve.efficiency()),
        ] {
            write!(out, "curve {} {} ", curve.name(), axis)?;
            for v in values {
                write!(out, "{} ", format_float(*v).trim())?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn print_weights<W: Write>(out: &mut W, model: &Model) -> io::Result<()> {
    for turbine in model.turbines().iter() {
        writeln!(out, "weight {:>20} {}", turbine.name(), format_float(turbine.weight()))?;
    }
    Ok(())
}

pub fn print_weighting<W: Write>(out: &mut W, model: &Model) -> io::Result<()> {
    let weighting = model.weighting();
    if weighting.relative {
        writeln!(out, "weighting relative {}", weighting.policy)
    } else {
        writeln!(out, "weighting {}", weighting.policy)
    }
}

pub fn print_config<W: Write>(out: &mut W, model: &Model) -> io::Result<()> {
    writeln!(
        out,
        "losscoef {} coordinationfactora {} coordinationfactorb {} head {} {} min {} {} max {} {} unitsteps {}",
        format_float(model.plant_loss_coef()).trim(),
        format_float(model.coordination_a()).trim(),
        format_float(model.coordination_b()).trim(),
        format_float(model.head()).trim(),
        model.units().label(Quantity::Length),
        format_float(model.state_min()).trim(),
        model.units().label(Quantity::Flow),
        format_float(model.state_max()).trim(),
        model.units().label(Quantity::Flow),
        model.user_step_count(),
    )
}

/// The solution table in the layout the command language promises:
/// an average H/K row, the companion totals, the decision totals, then one
/// row per unit. Debug mode appends the companion and H/K unit rows plus
/// the decision tables behind the forward pass.
pub struct SolutionPrinter<W: Write> {
    meta: RecorderMeta,
    out: W,
    pub delimiter: char,
    pub transpose: bool,
    pub debug: bool,
}

impl<W: Write> SolutionPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            meta: RecorderMeta::new("solution-printer"),
            out,
            delimiter: ' ',
            transpose: false,
            debug: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn primary_rows(&self, model: &Model, solver: &DpSolver) -> (Vec<String>, Vec<Vec<f64>>) {
        let mode = solver.mode().expect("printer called before a solve");
        let states = solver.states();
        let (primary_label, secondary_label) = variable_labels(mode);

        let mut labels = vec![
            "KW/CFS".to_string(),
            secondary_label.to_string(),
            primary_label.to_string(),
        ];
        let mut rows = vec![
            solver.avg_hk().to_vec(),
            solver.secondary_totals().to_vec(),
            solver.primary_totals().to_vec(),
        ];
        for (stage, turbine) in model.turbines().iter().enumerate() {
            labels.push(turbine.name().to_string());
            rows.push(
                (0..states)
                    .map(|state| match mode {
                        SolveMode::ForPower => solver.power_solution(stage, state),
                        SolveMode::ForFlow => solver.flow_solution(stage, state),
                    })
                    .collect(),
            );
        }
        (labels, rows)
    }

    fn save_impl(&mut self, model: &Model, solver: &DpSolver) -> io::Result<()> {
        let mode = match solver.mode() {
            Some(m) => m,
            None => return Ok(()),
        };
        let states = solver.states();
        if solver.primary_totals().len() < states {
            return Ok(());
        }
        let (labels, rows) = self.primary_rows(model, solver);

        if !self.transpose {
            writeln!(self.out)?;
            for (label, values) in labels.iter().zip(rows.iter()) {
                row(&mut self.out, label, values, self.delimiter)?;
            }

            if self.debug {
                let (_, secondary_label) = variable_labels(mode);
                writeln!(self.out)?;
                writeln!(self.out, "{}", secondary_label)?;
                for (stage, turbine) in model.turbines().iter().enumerate() {
                    let values: Vec<f64> = (0..states)
                        .map(|state| match mode {
                            SolveMode::ForPower => solver.flow_solution(stage, state),
                            SolveMode::ForFlow => solver.power_solution(stage, state),
                        })
                        .collect();
                    row(&mut self.out, turbine.name(), &values, self.delimiter)?;
                }

                writeln!(self.out, "KW/CFS")?;
                for (stage, turbine) in model.turbines().iter().enumerate() {
                    let values: Vec<f64> = (0..states).map(|state| solver.hk_solution(stage, state)).collect();
                    row(&mut self.out, turbine.name(), &values, self.delimiter)?;
                }

                for (title, table) in [
                    ("DecisionValues", solver.decision_values()),
                    ("DecisionCounts", solver.decision_counts()),
                    ("DecisionAllocations", solver.decision_allocations()),
                ] {
                    writeln!(self.out, "{}", title)?;
                    for (stage, turbine) in model.turbines().iter().enumerate() {
                        row(&mut self.out, turbine.name(), &table[stage], self.delimiter)?;
                    }
                }
            }
        } else {
            for label in &labels {
                write!(self.out, "{}{}", label, self.delimiter)?;
            }
            writeln!(self.out)?;
            for state in 0..states {
                for (i, values) in rows.iter().enumerate() {
                    let sep = if i + 1 == rows.len() { '\n' } else { self.delimiter };
                    write!(self.out, "{}{}", format_float(values[state]), sep)?;
                }
            }
        }
        Ok(())
    }
}

impl<W: Write> SolutionRecorder for SolutionPrinter<W> {
    fn meta(&self) -> &RecorderMeta {
        &self.meta
    }

    fn save(&mut self, model: &Model, solver: &DpSolver) -> Result<(), HydrodpError> {
        self.save_impl(model, solver).map_err(|e| HydrodpError::Io(e.to_string()))
    }
}

pub fn print_dispatch<W: Write>(
    out: &mut W,
    mode: SolveMode,
    dispatch: &DispatchSolution,
    delimiter: char,
    transpose: bool,
) -> io::Result<()> {
    let (primary_label, secondary_label) = variable_labels(mode);
    let (primary, secondary) = match mode {
        SolveMode::ForPower => (dispatch.power(), dispatch.flow()),
        SolveMode::ForFlow => (dispatch.flow(), dispatch.power()),
    };

    if !transpose {
        row(out, &format!("{:>8}:", primary_label), primary, delimiter)?;
        row(out, &format!("{:>8}:", secondary_label), secondary, delimiter)?;
        row(out, &format!("{:>8}:", "H/K"), dispatch.hk(), delimiter)?;
        writeln!(out)
    } else {
        let sum_primary: f64 = primary.iter().sum();
        let sum_secondary: f64 = secondary.iter().sum();
        write!(out, "{}{}", format_float(sum_primary), delimiter)?;
        for v in primary {
            write!(out, "{}{}", format_float(*v), delimiter)?;
        }
        write!(out, "{}{}", format_float(sum_secondary), delimiter)?;
        for v in secondary {
            write!(out, "{}{}", format_float(*v), delimiter)?;
        }
        let plant_hk = if sum_secondary != 0.0 || sum_primary != 0.0 {
            match mode {
                SolveMode::ForPower => sum_primary / sum_secondary,
                SolveMode::ForFlow => sum_secondary / sum_primary,
            }
        } else {
            0.0
        };
        write!(out, "{}{}", format_float(plant_hk), delimiter)?;
        for v in dispatch.hk() {
            write!(out, "{}{}", format_float(*v), delimiter)?;
        }
        writeln!(out)
    }
}

pub fn print_op<W: Write>(out: &mut W, op: &OpRegression, delimiter: char) -> io::Result<()> {
    writeln!(out, "operating points")?;
    writeln!(out, "capacity{}slope{}intercept", delimiter, delimiter)?;
    for point in 0..op.capacities().len() {
        writeln!(
            out,
            "{}{}{}{}{}",
            format_float(op.capacities()[point]),
            delimiter,
            format_float(op.slope()[point]),
            delimiter,
            format_float(op.intercept()[point]),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SolveMode;
    use crate::solver::DpSolver;
    use crate::test_utils::single_kaplan_plant;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(f64::NAN), "    NAN");
        assert_eq!(format_float(f64::INFINITY), "    INF");
        assert_eq!(format_float(1500.0), "   1500");
        assert_eq!(format_float(0.0), "      0");
    }

    #[test]
    fn test_solution_printer_shape() {
        let mut model = single_kaplan_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let mut printer = SolutionPrinter::new(Vec::new());
        printer.save(&model, &solver).unwrap();
        let text = String::from_utf8(printer.into_inner()).unwrap();

        // header rows plus one row per unit
        assert!(text.contains("KW/CFS"));
        assert!(text.contains("Power"));
        assert!(text.contains("Flow"));
        assert!(text.contains("u1"));
        let rows: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_transposed_printer_shape() {
        let mut model = single_kaplan_plant();
        model.set_solve_mode(SolveMode::ForPower);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let mut printer = SolutionPrinter::new(Vec::new());
        printer.transpose = true;
        printer.delimiter = ',';
        printer.save(&model, &solver).unwrap();
        let text = String::from_utf8(printer.into_inner()).unwrap();

        // one header line plus one line per state
        assert_eq!(text.lines().count(), 1 + solver.states());
    }
}
