pub mod history;
pub mod portfolio;

/// Round to 2 decimal places, half away from zero.
/// Applied once, at the boundary of each public computation.
#[inline]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
