use crate::curves::CurveIndex;
use crate::turbine::TurbineIndex;
use thiserror::Error;

pub mod curves;
pub mod dispatch;
pub mod model;
pub mod recorders;
pub mod regression;
pub mod schema;
pub mod script;
pub mod solver;
pub mod test_utils;
pub mod turbine;
pub mod units;
mod utils;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HydrodpError {
    #[error("curve index {0} not found")]
    CurveIndexNotFound(CurveIndex),
    #[error("curve with name {0} not found")]
    CurveNotFound(String),
    #[error("curve name `{0}` already exists")]
    CurveNameAlreadyExists(String),
    #[error("curve `{0}` needs at least two samples")]
    CurveTooShort(String),
    #[error("curve `{0}` has mismatched column lengths")]
    CurveColumnMismatch(String),
    #[error("turbine index {0} not found")]
    TurbineIndexNotFound(TurbineIndex),
    #[error("turbine with name {0} not found")]
    TurbineNotFound(String),
    #[error("turbine name `{0}` already exists")]
    TurbineNameAlreadyExists(String),
    #[error("can't mix and match unit systems")]
    MixedUnitSystems,
    #[error("unrecognised unit `{0}`")]
    UnrecognisedUnit(String),
    #[error("unspecified solve mode")]
    SolveModeUnspecified,
    #[error("at least 5 unit steps are required")]
    TooFewSteps,
    #[error("either zero stages or states")]
    ZeroProblem,
    #[error("infeasible problem: zero head")]
    ZeroHead,
    #[error("infeasible problem: zero objective function")]
    FlatObjective,
    #[error("no solution available")]
    NoSolution,
    #[error("unit dispatch: no stages defined")]
    NoStages,
    #[error("unit dispatch: unable to dispatch negative quantity")]
    NegativeDispatch,
    #[error("unit dispatch: demand does not bracket the table neighbours")]
    DispatchNotBracketed,
    #[error("can't determine operating points - none defined")]
    NoOperatingPoints,
    #[error("parse error `{0}`")]
    ScriptParse(String),
    #[error("parse error: missing parameter for `{0}`")]
    ScriptMissingParameter(String),
    #[error("label `{0}` not found")]
    LabelNotFound(String),
    #[error("failed to load plant schema: {0}")]
    SchemaLoad(String),
    #[error("csv error: {0}")]
    CsvError(String),
    #[error("io error: {0}")]
    Io(String),
}
