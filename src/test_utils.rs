/// Plant builders for unit tests and the random smoke path.
use crate::model::Model;
use crate::units::UnitSystem;
use crate::HydrodpError;
use rand::Rng;

/// A single Kaplan unit at rated head.
pub fn single_kaplan_plant() -> Model {
    let mut model = Model::default();
    model.set_units(UnitSystem::Imperial).unwrap();
    let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
    model.register_turbine("u1", kaplan, 65.0, 1000.0, 1500.0).unwrap();
    model.set_head(65.0);
    model.set_user_steps(5);
    model
}

/// Two identical Pelton units.
pub fn twin_pelton_plant() -> Model {
    let mut model = Model::default();
    model.set_units(UnitSystem::Imperial).unwrap();
    let pelton = model.get_curve_index_by_name("Pelton").unwrap();
    model.register_turbine("u1", pelton, 65.0, 1000.0, 1500.0).unwrap();
    model.register_turbine("u2", pelton, 65.0, 1000.0, 1500.0).unwrap();
    model.set_head(65.0);
    model.set_user_steps(5);
    model
}

/// Four heterogeneous units; exercises the coordination machinery.
pub fn mixed_plant() -> Model {
    let mut model = Model::default();
    model.set_units(UnitSystem::Imperial).unwrap();
    let crossflow = model.get_curve_index_by_name("CrossFlow").unwrap();
    let francis = model.get_curve_index_by_name("Francis").unwrap();
    let kaplan = model.get_curve_index_by_name("Kaplan").unwrap();
    let fixed_prop = model.get_curve_index_by_name("FixedPropeller").unwrap();

    model.register_turbine("u2", crossflow, 65.0, 1400.0, 1700.0).unwrap();
    model.register_turbine("u3", francis, 55.0, 730.0, 1500.0).unwrap();
    model.register_turbine("u4", kaplan, 50.0, 1000.0, 1500.0).unwrap();
    model.register_turbine("u1", fixed_prop, 68.0, 1250.0, 1250.0).unwrap();
    model.set_head(68.0);
    model.set_user_steps(5);
    model
}

/// Build a random plant of `num_units` units drawn from the builtin curves.
pub fn make_random_plant(num_units: usize, rng: &mut impl Rng) -> Result<Model, HydrodpError> {
    const CURVES: [&str; 6] = ["CrossFlow", "FixedPropeller", "Francis", "Kaplan", "Pelton", "Turgo"];

    let mut model = Model::default();
    model.set_units(UnitSystem::Imperial)?;

    let mut head_sum = 0.0;
    for i in 0..num_units {
        let curve = model.get_curve_index_by_name(CURVES[rng.gen_range(0..CURVES.len())])?;
        let rated_head = rng.gen_range(40.0..120.0);
        let max_flow = rng.gen_range(300.0..1500.0);
        let max_power = rng.gen_range(500.0..2500.0);
        model.register_turbine(&format!("unit{}", i + 1), curve, rated_head, max_flow, max_power)?;
        head_sum += rated_head;
    }

    model.set_head(head_sum / num_units as f64);
    model.set_user_steps(9);
    Ok(model)
}
