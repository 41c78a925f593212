/// Collapse arithmetic faults to zero. Untouched table cells mean
/// "no solution", and a failed computation must read the same way.
pub(crate) fn clean(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[macro_export]
macro_rules! assert_almost_eq {
    ($left:expr, $right:expr) => {{
        use float_cmp::ApproxEq;
        match ($left, $right) {
            (left_val, right_val) => {
                if !left_val.approx_eq(right_val, (0.0, 2)) {
                    panic!(
                        "assertion failed: `(left == right)`\n      left: `{:?}`,\n     right: `{:?}`",
                        left_val, right_val
                    )
                }
            }
        }
    }};
}
