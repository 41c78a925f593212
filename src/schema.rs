use crate::model::{Model, SolveMode};
use crate::units::UnitSystem;
use crate::HydrodpError;
use serde::{Deserialize, Serialize};

/// JSON plant definitions: the same information the command language
/// carries, in a form other tools can generate.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CurveSchema {
    pub name: String,
    pub flo: Vec<f64>,
    pub pow: Vec<f64>,
    pub eff: Vec<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UnitSchema {
    pub name: String,
    pub curve: String,
    pub rated_head: f64,
    pub max_flow: f64,
    pub max_power: f64,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub headloss: Option<f64>,
    #[serde(default)]
    pub geneff: Option<f64>,
    #[serde(default)]
    pub gencurve: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystemSchema {
    Imperial,
    Metric,
}

impl From<UnitSystemSchema> for UnitSystem {
    fn from(schema: UnitSystemSchema) -> Self {
        match schema {
            UnitSystemSchema::Imperial => UnitSystem::Imperial,
            UnitSystemSchema::Metric => UnitSystem::Metric,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SolveModeSchema {
    Power,
    Flow,
}

impl From<SolveModeSchema> for SolveMode {
    fn from(schema: SolveModeSchema) -> Self {
        match schema {
            SolveModeSchema::Power => SolveMode::ForPower,
            SolveModeSchema::Flow => SolveMode::ForFlow,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlantSchema {
    pub units: UnitSystemSchema,
    pub head: f64,
    pub unitsteps: usize,
    pub solve: SolveModeSchema,
    #[serde(default)]
    pub losscoef: Option<f64>,
    #[serde(default)]
    pub coordination_a: Option<f64>,
    #[serde(default)]
    pub coordination_b: Option<f64>,
    #[serde(default)]
    pub curves: Vec<CurveSchema>,
    pub turbines: Vec<UnitSchema>,
    #[serde(default)]
    pub dispatch: Option<f64>,
}

impl PlantSchema {
    pub fn from_json(data: &str) -> Result<Self, HydrodpError> {
        serde_json::from_str(data).map_err(|e| HydrodpError::SchemaLoad(e.to_string()))
    }

    /// Build a [`Model`] exactly as the equivalent command script would.
    pub fn try_into_model(self) -> Result<Model, HydrodpError> {
        let mut model = Model::default();
        model.set_units(self.units.into())?;
        model.set_head(self.head);
        model.set_user_steps(self.unitsteps);
        model.set_solve_mode(self.solve.into());
        if let Some(losscoef) = self.losscoef {
            model.set_loss_coef(losscoef);
        }
        if let Some(a) = self.coordination_a {
            model.set_coordination_a(a);
        }
        if let Some(b) = self.coordination_b {
            model.set_coordination_b(b);
        }

        for curve in self.curves {
            model.register_curve(&curve.name, curve.flo, curve.pow, curve.eff)?;
        }

        for unit in self.turbines {
            let curve = model.get_curve_index_by_name(&unit.curve)?;
            let index = model.register_turbine(&unit.name, curve, unit.rated_head, unit.max_flow, unit.max_power)?;
            if let Some(capacity) = unit.capacity {
                model.set_turbine_gencap(&index, capacity)?;
            }
            if let Some(weight) = unit.weight {
                model.set_turbine_weight(&index, weight)?;
            }
            if let Some(headloss) = unit.headloss {
                model.set_turbine_headloss(&index, headloss)?;
            }
            if let Some(geneff) = unit.geneff {
                model.set_turbine_geneff(&index, geneff)?;
            }
            if let Some(gencurve) = unit.gencurve {
                let gen_curve = model.get_curve_index_by_name(&gencurve)?;
                model.set_turbine_gencurve(&index, gen_curve)?;
            }
        }

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::DpSolver;

    const PLANT_JSON: &str = r#"{
        "units": "imperial",
        "head": 65.0,
        "unitsteps": 5,
        "solve": "power",
        "turbines": [
            {"name": "u1", "curve": "Kaplan", "rated_head": 65.0, "max_flow": 1000.0, "max_power": 1500.0},
            {"name": "u2", "curve": "Pelton", "rated_head": 65.0, "max_flow": 1000.0, "max_power": 1500.0, "weight": 0.5, "headloss": 1.5}
        ]
    }"#;

    #[test]
    fn test_schema_builds_model() {
        let schema = PlantSchema::from_json(PLANT_JSON).unwrap();
        let mut model = schema.try_into_model().unwrap();

        assert_eq!(model.turbines().len(), 2);
        let u2 = model.get_turbine_index_by_name("u2").unwrap();
        assert_eq!(model.get_turbine(&u2).unwrap().weight(), 0.5);
        assert_eq!(model.get_turbine(&u2).unwrap().headloss_coef(), 1.5);

        let mut solver = DpSolver::new();
        solver.run(&mut model).unwrap();
        assert!(!solver.did_fail());
        assert!(solver.primary_totals().iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_schema_rejects_unknown_curve() {
        let bad = PLANT_JSON.replace("Kaplan", "NoSuchCurve");
        let schema = PlantSchema::from_json(&bad).unwrap();
        assert_eq!(
            schema.try_into_model().err(),
            Some(HydrodpError::CurveNotFound("NoSuchCurve".to_string()))
        );
    }

    #[test]
    fn test_schema_load_error() {
        assert!(matches!(
            PlantSchema::from_json("{not json"),
            Err(HydrodpError::SchemaLoad(_))
        ));
    }
}
