use crate::HydrodpError;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Deref;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CurveIndex(usize);

impl CurveIndex {
    pub fn new(idx: usize) -> Self {
        Self(idx)
    }
}

impl Deref for CurveIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for CurveIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An efficiency curve sampled over the normalised operating range.
///
/// The three columns are flow fraction, power fraction and the conversion
/// efficiency at that operating point. Flow and power columns are
/// non-decreasing over the working range; a curve may bend backward at the
/// very top (overspeed), which the search handles segment by segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    name: String,
    flow_fraction: Vec<f64>,
    power_fraction: Vec<f64>,
    efficiency: Vec<f64>,
    builtin: bool,
}

impl Curve {
    fn new(
        name: &str,
        flow_fraction: Vec<f64>,
        power_fraction: Vec<f64>,
        efficiency: Vec<f64>,
        builtin: bool,
    ) -> Result<Self, HydrodpError> {
        if flow_fraction.len() < 2 {
            return Err(HydrodpError::CurveTooShort(name.to_string()));
        }
        if flow_fraction.len() != power_fraction.len() || flow_fraction.len() != efficiency.len() {
            return Err(HydrodpError::CurveColumnMismatch(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            flow_fraction,
            power_fraction,
            efficiency,
            builtin,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }

    pub fn points(&self) -> usize {
        self.flow_fraction.len()
    }

    pub fn flow_fraction(&self) -> &[f64] {
        &self.flow_fraction
    }

    pub fn power_fraction(&self) -> &[f64] {
        &self.power_fraction
    }

    pub fn efficiency(&self) -> &[f64] {
        &self.efficiency
    }

    /// Efficiency at a flow fraction of the rated maximum.
    pub fn eff_from_flow_fraction(&self, flow_fraction: f64) -> f64 {
        self.eff_from_axis(&self.flow_fraction, flow_fraction)
    }

    /// Efficiency at a power fraction of the rated maximum.
    pub fn eff_from_power_fraction(&self, power_fraction: f64) -> f64 {
        self.eff_from_axis(&self.power_fraction, power_fraction)
    }

    fn eff_from_axis(&self, axis: &[f64], x: f64) -> f64 {
        let upper = find_larger(axis, x);
        if upper == 0 {
            // below cut-in; the discontinuity is intentional
            0.0
        } else {
            interpolate(
                x,
                axis[upper - 1],
                axis[upper],
                self.efficiency[upper - 1],
                self.efficiency[upper],
            )
        }
    }
}

/// Find the upper sample index of the segment containing `x`.
///
/// The scan runs from the tail backward so the common near-capacity lookups
/// touch memory coherently. Each step tests against the local segment
/// orientation, so a curve that bends backward at the top is searched the
/// same way as a plain ascending one. A return of 0 means `x` precedes the
/// first sample.
fn find_larger(axis: &[f64], x: f64) -> usize {
    let mut u = axis.len() as isize - 2;
    while u >= 0 {
        let i = u as usize;
        if axis[i] < axis[i + 1] {
            if axis[i] <= x {
                break;
            }
        } else if axis[i] >= x {
            break;
        }
        u -= 1;
    }
    if u < 0 {
        0
    } else {
        u as usize + 1
    }
}

/// Linear interpolation along one curve segment. Values past the segment
/// continue on its line; a degenerate segment returns the lower value.
fn interpolate(value: f64, lower_bound: f64, upper_bound: f64, lower_value: f64, upper_value: f64) -> f64 {
    if (upper_bound - lower_bound).abs() < 1E-9 {
        lower_value
    } else {
        lower_value + (upper_value - lower_value) * (value - lower_bound) / (upper_bound - lower_bound)
    }
}

#[derive(Default)]
pub struct CurveVec {
    curves: Vec<Curve>,
}

impl Deref for CurveVec {
    type Target = Vec<Curve>;

    fn deref(&self) -> &Self::Target {
        &self.curves
    }
}

impl CurveVec {
    pub fn get(&self, index: &CurveIndex) -> Result<&Curve, HydrodpError> {
        self.curves.get(index.0).ok_or(HydrodpError::CurveIndexNotFound(*index))
    }

    pub fn push_new(
        &mut self,
        name: &str,
        flow_fraction: Vec<f64>,
        power_fraction: Vec<f64>,
        efficiency: Vec<f64>,
        builtin: bool,
    ) -> Result<CurveIndex, HydrodpError> {
        let curve = Curve::new(name, flow_fraction, power_fraction, efficiency, builtin)?;
        let curve_index = CurveIndex(self.curves.len());
        self.curves.push(curve);
        Ok(curve_index)
    }

    /// Name lookup is case-insensitive, as the command language is.
    pub fn find(&self, name: &str) -> Option<CurveIndex> {
        self.curves
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .map(CurveIndex)
    }

    /// The reference turbine types registered on startup.
    pub fn with_builtins() -> Self {
        let mut curves = Self::default();

        let flo = vec![
            0.0, 0.10, 0.11, 0.13, 0.16, 0.182, 0.21, 0.232, 0.275, 0.31, 0.35, 0.40, 0.48, 0.60, 0.80, 0.91, 1.00,
            1.10,
        ];
        let eff = vec![
            0.0, 0.655, 0.68, 0.71, 0.735, 0.75, 0.765, 0.775, 0.79, 0.80, 0.81, 0.8175, 0.825, 0.83, 0.83, 0.825,
            0.82, 0.815,
        ];
        curves.push_new("CrossFlow", flo.clone(), flo, eff, true).unwrap();

        let flo = vec![
            0.0, 0.175, 0.22, 0.25, 0.285, 0.325, 0.375, 0.435, 0.485, 0.525, 0.60, 0.68, 0.75, 0.82, 0.91, 1.00, 1.08,
        ];
        let eff = vec![
            0.0, 0.65, 0.70, 0.725, 0.75, 0.775, 0.80, 0.825, 0.84, 0.85, 0.86, 0.865, 0.8675, 0.8675, 0.865, 0.858,
            0.85,
        ];
        curves.push_new("FixedPropeller", flo.clone(), flo, eff, true).unwrap();

        let flo = vec![
            0.0, 0.25, 0.30, 0.34, 0.388, 0.44, 0.477, 0.49, 0.54, 0.66, 0.71, 0.765, 0.82, 0.89, 0.91, 0.94, 1.00,
        ];
        let eff = vec![
            0.0, 0.435, 0.50, 0.55, 0.60, 0.65, 0.68, 0.70, 0.73, 0.80, 0.825, 0.85, 0.87, 0.89, 0.89, 0.885, 0.85,
        ];
        curves.push_new("Francis", flo.clone(), flo, eff, true).unwrap();

        let flo = vec![
            0.0, 0.161, 0.20, 0.24, 0.288, 0.338, 0.406, 0.482, 0.565, 0.663, 0.80, 0.88, 0.91, 1.00,
        ];
        let eff = vec![
            0.0, 0.45, 0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.92, 0.92, 0.88,
        ];
        curves.push_new("Kaplan", flo.clone(), flo, eff, true).unwrap();

        let flo = vec![
            0.0, 0.035, 0.05, 0.066, 0.079, 0.089, 0.102, 0.12, 0.145, 0.172, 0.21, 0.264, 0.345, 0.42, 0.495, 0.56,
            0.68, 0.85, 1.00, 1.10,
        ];
        let eff = vec![
            0.0, 0.40, 0.50, 0.60, 0.65, 0.675, 0.70, 0.725, 0.75, 0.775, 0.80, 0.825, 0.85, 0.865, 0.875, 0.88,
            0.885, 0.885, 0.88, 0.875,
        ];
        curves.push_new("Pelton", flo.clone(), flo, eff, true).unwrap();

        let flo = vec![
            0.0, 0.12, 0.15, 0.18, 0.21, 0.25, 0.28, 0.325, 0.37, 0.43, 0.49, 0.60, 0.68, 0.80, 0.90, 1.00, 1.10,
        ];
        let eff = vec![
            0.0, 0.61, 0.68, 0.72, 0.75, 0.78, 0.80, 0.82, 0.835, 0.85, 0.86, 0.87, 0.873, 0.872, 0.869, 0.864, 0.856,
        ];
        curves.push_new("Turgo", flo.clone(), flo, eff, true).unwrap();

        curves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_almost_eq;

    #[test]
    fn test_interpolate() {
        // Middle of a segment
        assert_almost_eq!(interpolate(0.5, 0.0, 1.0, 0.0, 1.0), 0.5);
        assert_almost_eq!(interpolate(0.25, 0.0, 1.0, 0.0, 1.0), 0.25);
        // At the bounds
        assert_almost_eq!(interpolate(0.0, 0.0, 1.0, 0.2, 0.8), 0.2);
        assert_almost_eq!(interpolate(1.0, 0.0, 1.0, 0.2, 0.8), 0.8);
        // Past the upper bound; continues on the segment line
        assert_almost_eq!(interpolate(1.5, 0.0, 1.0, 0.0, 1.0), 1.5);
        // Degenerate segment; returns the lower value
        assert_almost_eq!(interpolate(0.5, 0.5, 0.5, 0.3, 0.9), 0.3);
    }

    #[test]
    fn test_find_larger_ascending() {
        let axis = [0.0, 0.25, 0.5, 1.0];
        assert_eq!(find_larger(&axis, 0.1), 1);
        assert_eq!(find_larger(&axis, 0.25), 2);
        assert_eq!(find_larger(&axis, 0.7), 3);
        // Beyond the table; last segment
        assert_eq!(find_larger(&axis, 1.3), 3);
        // Before the table
        assert_eq!(find_larger(&axis, -0.1), 0);
    }

    #[test]
    fn test_find_larger_backward_bend() {
        // Flow keeps rising but power bends backward past the top. The
        // tail-backward scan resolves anything at or below the bend to the
        // overspeed segment; values above it fall through to the ascending
        // segment underneath.
        let axis = [0.0, 0.5, 1.0, 0.95];
        assert_eq!(find_larger(&axis, 0.97), 3);
        assert_eq!(find_larger(&axis, 0.6), 3);
        assert_eq!(find_larger(&axis, 1.05), 2);
    }

    #[test]
    fn test_builtin_samples() {
        let curves = CurveVec::with_builtins();
        assert_eq!(curves.len(), 6);
        let kaplan = curves.get(&curves.find("kaplan").unwrap()).unwrap();
        assert!(kaplan.is_builtin());

        // Exactly on a sample
        assert_almost_eq!(kaplan.eff_from_flow_fraction(0.80), 0.90);
        // Between samples
        assert_almost_eq!(kaplan.eff_from_flow_fraction(0.955), 0.9);
        // Below cut-in
        assert_almost_eq!(kaplan.eff_from_flow_fraction(-0.5), 0.0);
        // Past the last sample; the final segment's line continues
        assert!(kaplan.eff_from_flow_fraction(1.05) < 0.88);
    }

    #[test]
    fn test_interpolation_bounds() {
        // Within the sampled span the interpolant stays inside the
        // efficiency envelope for every builtin.
        let curves = CurveVec::with_builtins();
        for curve in curves.iter() {
            let lo = curve.flow_fraction().first().copied().unwrap();
            let hi = curve.flow_fraction().last().copied().unwrap();
            let min_eff = curve.efficiency().iter().cloned().fold(f64::INFINITY, f64::min);
            let max_eff = curve.efficiency().iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            for i in 0..=100 {
                let x = lo + (hi - lo) * (i as f64) / 100.0;
                let e = curve.eff_from_flow_fraction(x);
                assert!(e >= min_eff - 1E-9 && e <= max_eff + 1E-9);
            }
        }
    }

    #[test]
    fn test_validation() {
        let mut curves = CurveVec::default();
        assert_eq!(
            curves.push_new("short", vec![0.0], vec![0.0], vec![0.0], false),
            Err(HydrodpError::CurveTooShort("short".to_string()))
        );
        assert_eq!(
            curves.push_new("ragged", vec![0.0, 1.0], vec![0.0], vec![0.0, 0.9], false),
            Err(HydrodpError::CurveColumnMismatch("ragged".to_string()))
        );
    }
}
