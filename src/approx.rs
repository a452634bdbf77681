//! Utilities to approximate equality of floating point values.

use crate::tensors::Ten64;
use serde::{Deserialize, Serialize};

/// Absolute tolerance used when none is given.
pub const DEFAULT_ATOL: f64 = 1e-5;

/// Relative tolerance used when none is given.
pub const DEFAULT_RTOL: f64 = 1e-3;

/// Mixed absolute/relative tolerance.
///
/// `actual` is accepted against `expected` when
/// `|actual - expected| <= atol + rtol * |expected|`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Absolute part.
    pub atol: f64,
    /// Relative part, scaled by the magnitude of the expected value.
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            atol: DEFAULT_ATOL,
            rtol: DEFAULT_RTOL,
        }
    }
}

impl Tolerance {
    /// A tolerance with the given parts.
    #[must_use]
    pub const fn new(atol: f64, rtol: f64) -> Self {
        Self { atol, rtol }
    }

    /// Whether `actual` is close enough to `expected`. `NaN` is never accepted.
    #[must_use]
    pub fn accepts(&self, actual: f64, expected: f64) -> bool {
        (actual - expected).abs() <= self.atol + self.rtol * expected.abs()
    }
}

/// Element-wise [`Tolerance::accepts`] over two tensors of the same shape.
///
/// Tensors of different shapes are never close.
#[must_use]
pub fn allclose(actual: &Ten64, expected: &Ten64, tolerance: Tolerance) -> bool {
    actual.shape == expected.shape
        && actual
            .data
            .iter()
            .zip(&expected.data)
            .all(|(&a, &e)| tolerance.accepts(a, e))
}

/// Largest element-wise absolute difference, or `None` if the shapes differ.
///
/// Any NaN difference makes the result NaN.
#[must_use]
pub fn max_abs_diff(lhs: &Ten64, rhs: &Ten64) -> Option<f64> {
    (lhs.shape == rhs.shape).then(|| {
        lhs.data
            .iter()
            .zip(&rhs.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, |acc: f64, d| if acc.is_nan() || d.is_nan() { f64::NAN } else { acc.max(d) })
    })
}
