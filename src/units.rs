use crate::HydrodpError;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Conversion from ft-cfs to kw: pounds per cubic ft * kw per hp / ft-pounds per hp.
pub const IMPERIAL_CONV_FACTOR: f64 = 62.4 * 0.746 / 550.0;
/// Conversion from m-cms to kw: water density in kg/m3 * g / watts per kw.
pub const METRIC_CONV_FACTOR: f64 = 1000.0 * 9.81 / 1000.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitSystem {
    Imperial,
    Metric,
}

impl UnitSystem {
    pub fn conversion_factor(&self) -> f64 {
        match self {
            Self::Imperial => IMPERIAL_CONV_FACTOR,
            Self::Metric => METRIC_CONV_FACTOR,
        }
    }
}

impl Display for UnitSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imperial => write!(f, "imperial"),
            Self::Metric => write!(f, "metric"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Quantity {
    Length,
    Flow,
    Power,
}

/// Measurement-unit configuration for a plant.
///
/// The system is latched by the first dimensioned unit token seen; later
/// tokens from the other system are an error. Power tokens are universal
/// and only switch the display mode between kw and mw.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UnitConfig {
    system: Option<UnitSystem>,
    mw_mode: bool,
}

impl UnitConfig {
    pub fn system(&self) -> Option<UnitSystem> {
        self.system
    }

    /// The head * flow -> power constant; zero until a system is chosen.
    pub fn conversion_factor(&self) -> f64 {
        self.system.map_or(0.0, |s| s.conversion_factor())
    }

    pub fn set_system(&mut self, system: UnitSystem) -> Result<(), HydrodpError> {
        match self.system {
            None => {
                self.system = Some(system);
                Ok(())
            }
            Some(current) if current == system => Ok(()),
            Some(_) => Err(HydrodpError::MixedUnitSystems),
        }
    }

    /// Interpret a unit token from a script or schema.
    pub fn parse_token(&mut self, token: &str) -> Result<(), HydrodpError> {
        match token.to_ascii_lowercase().as_str() {
            "kw" => {
                self.mw_mode = false;
                Ok(())
            }
            "mw" => {
                self.mw_mode = true;
                Ok(())
            }
            "ft" | "cfs" | "kcfs" => self.set_system(UnitSystem::Imperial),
            "m" | "cms" => self.set_system(UnitSystem::Metric),
            _ => Err(HydrodpError::UnrecognisedUnit(token.to_string())),
        }
    }

    pub fn reset(&mut self) {
        self.system = None;
        self.mw_mode = false;
    }

    pub fn label(&self, quantity: Quantity) -> &'static str {
        let system = match self.system {
            None => return " ? ",
            Some(system) => system,
        };
        match (system, quantity) {
            (_, Quantity::Power) => {
                if self.mw_mode {
                    "mw"
                } else {
                    "kw"
                }
            }
            (UnitSystem::Imperial, Quantity::Length) => "ft",
            (UnitSystem::Imperial, Quantity::Flow) => {
                if self.mw_mode {
                    "kcfs"
                } else {
                    "cfs"
                }
            }
            (UnitSystem::Metric, Quantity::Length) => "m",
            (UnitSystem::Metric, Quantity::Flow) => "cms",
        }
    }
}
