use super::{RecorderMeta, SolutionRecorder};
use crate::model::{Model, SolveMode};
use crate::solver::DpSolver;
use crate::HydrodpError;
use std::path::PathBuf;

/// Write the solved dispatch table to a CSV file, one row per state.
#[derive(Clone, Debug)]
pub struct CsvRecorder {
    meta: RecorderMeta,
    filename: PathBuf,
}

impl CsvRecorder {
    pub fn new<P: Into<PathBuf>>(name: &str, filename: P) -> Self {
        Self {
            meta: RecorderMeta::new(name),
            filename: filename.into(),
        }
    }
}

impl SolutionRecorder for CsvRecorder {
    fn meta(&self) -> &RecorderMeta {
        &self.meta
    }

    fn save(&mut self, model: &Model, solver: &DpSolver) -> Result<(), HydrodpError> {
        let mode = match solver.mode() {
            Some(m) => m,
            None => return Err(HydrodpError::NoSolution),
        };
        let mut writer = csv::Writer::from_path(&self.filename).map_err(|e| HydrodpError::CsvError(e.to_string()))?;

        let (primary_label, secondary_label) = match mode {
            SolveMode::ForPower => ("power", "flow"),
            SolveMode::ForFlow => ("flow", "power"),
        };

        let mut header = vec![
            "state".to_string(),
            "kw_per_cfs".to_string(),
            secondary_label.to_string(),
            primary_label.to_string(),
        ];
        for turbine in model.turbines().iter() {
            header.push(turbine.name().to_string());
        }
        writer
            .write_record(&header)
            .map_err(|e| HydrodpError::CsvError(e.to_string()))?;

        for state in 0..solver.states() {
            let mut record = vec![
                state.to_string(),
                solver.avg_hk()[state].to_string(),
                solver.secondary_totals()[state].to_string(),
                solver.primary_totals()[state].to_string(),
            ];
            for stage in 0..solver.stages() {
                let value = match mode {
                    SolveMode::ForPower => solver.power_solution(stage, state),
                    SolveMode::ForFlow => solver.flow_solution(stage, state),
                };
                record.push(value.to_string());
            }
            writer
                .write_record(&record)
                .map_err(|e| HydrodpError::CsvError(e.to_string()))?;
        }

        writer.flush().map_err(|e| HydrodpError::CsvError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SolveMode;
    use crate::test_utils::twin_pelton_plant;

    #[test]
    fn test_csv_recorder_shape() {
        let mut model = twin_pelton_plant();
        model.set_solve_mode(SolveMode::ForFlow);
        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.csv");
        let mut recorder = CsvRecorder::new("csv", &path);
        recorder.save(&model, &solver).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "state,kw_per_cfs,power,flow,u1,u2");
        assert_eq!(text.lines().count(), 1 + solver.states());
    }
}
