// compare.rs — expected vs. actual within a tolerance.
//
// Component i matches when
//
//     expected[i] == actual[i]   ||   |expected[i] - actual[i]| < epsilon_i
//
// The exact-equality arm makes `compare(x, x, Absolute(0.0))` pass; it also
// means matching infinities pass. NaN never matches anything, a NaN result is
// always reported.
//
// TOLERANCE POLICY
// ─────────────────
// Kernels in this library output values of very different magnitudes (a hue
// in [0, 1), a YUV chroma around ±0.1, an RGB channel above 2.0). A single
// hard-coded epsilon is either too loose for the small ones or too tight for
// the large ones, so two policies exist:
//
//   Absolute(eps)           epsilon_i = eps
//   Relative { rel, floor } epsilon_i = max(floor, rel * |expected[i]|)
//
// `Tolerance::default()` is Absolute(1e-4), which is what the fixture values
// (given to 4 decimal places) are written against. `Tolerance::for_expected`
// picks Relative(1e-3, floor 1e-4) for callers that prefer scaling.

use std::fmt;

use crate::error::ComparisonFailure;

/// Default absolute epsilon.
pub const DEFAULT_EPSILON: f32 = 1e-4;
/// Relative factor used by [`Tolerance::for_expected`].
pub const DEFAULT_RELATIVE: f32 = 1e-3;

/// How close two components must be to match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    Absolute(f32),
    Relative { rel: f32, floor: f32 },
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance::Absolute(DEFAULT_EPSILON)
    }
}

impl Tolerance {
    /// Relative tolerance scaled to the expected values, never tighter than
    /// [`DEFAULT_EPSILON`].
    pub fn for_expected() -> Self {
        Tolerance::Relative {
            rel: DEFAULT_RELATIVE,
            floor: DEFAULT_EPSILON,
        }
    }

    /// The epsilon applied to a component whose expected value is `expected`.
    pub fn epsilon_for(&self, expected: f32) -> f32 {
        match *self {
            Tolerance::Absolute(eps) => eps,
            Tolerance::Relative { rel, floor } => (rel * expected.abs()).max(floor),
        }
    }

    /// Whether a single pair of components matches.
    pub fn accepts(&self, expected: f32, actual: f32) -> bool {
        expected == actual || (expected - actual).abs() < self.epsilon_for(expected)
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tolerance::Absolute(eps) => write!(f, "epsilon {eps:e}"),
            Tolerance::Relative { rel, floor } => write!(f, "relative {rel:e}, floor {floor:e}"),
        }
    }
}

impl From<f32> for Tolerance {
    fn from(eps: f32) -> Self {
        Tolerance::Absolute(eps)
    }
}

/// Compare two sequences component-wise.
///
/// On failure the error carries both complete sequences.
pub fn compare(
    expected: &[f32],
    actual: &[f32],
    tolerance: impl Into<Tolerance>,
) -> Result<(), ComparisonFailure> {
    let tolerance = tolerance.into();
    if expected.len() != actual.len() {
        return Err(ComparisonFailure::LengthMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }

    let mut worst: Option<(usize, f32)> = None;
    for (i, (&e, &a)) in expected.iter().zip(actual).enumerate() {
        if tolerance.accepts(e, a) {
            continue;
        }
        let diff = (e - a).abs();
        // NaN diffs always count as the worst.
        let is_worse = match worst {
            None => true,
            Some((_, w)) => (diff.is_nan() && !w.is_nan()) || diff > w,
        };
        if is_worse {
            worst = Some((i, diff));
        }
    }

    match worst {
        None => Ok(()),
        Some((worst_index, worst_diff)) => Err(ComparisonFailure::OutOfTolerance {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
            tolerance,
            worst_index,
            worst_diff,
        }),
    }
}

/// Largest absolute component difference (NaN if any difference is NaN).
pub fn max_abs_diff(expected: &[f32], actual: &[f32]) -> f32 {
    expected
        .iter()
        .zip(actual)
        .map(|(e, a)| (e - a).abs())
        .fold(0.0_f32, |acc, d| if d.is_nan() || acc.is_nan() { f32::NAN } else { acc.max(d) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_tolerance_passes() {
        let expected = [0.6643, -0.0822, -0.0502];
        let actual = [0.66430, -0.082209, -0.050222];
        assert!(compare(&expected, &actual, 1e-4_f32).is_ok());
    }

    #[test]
    fn test_out_of_tolerance_reports_worst() {
        let expected = [0.6643, -0.0822, -0.0502];
        let actual = [0.6473, -0.0725, -0.0415];
        let err = compare(&expected, &actual, 1e-4_f32).unwrap_err();
        match err {
            ComparisonFailure::OutOfTolerance { worst_index, worst_diff, .. } => {
                assert_eq!(worst_index, 0);
                assert!((worst_diff - 0.017).abs() < 1e-5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_length_mismatch_distinct() {
        let err = compare(&[1.0, 2.0], &[1.0], 1e-4_f32).unwrap_err();
        assert!(matches!(err, ComparisonFailure::LengthMismatch { .. }));
    }

    #[test]
    fn test_zero_epsilon_exact_match() {
        assert!(compare(&[0.25, -3.0], &[0.25, -3.0], 0.0_f32).is_ok());
        assert!(compare(&[0.25], &[0.2500001], 0.0_f32).is_err());
    }

    #[test]
    fn test_boundary_is_exclusive() {
        // |1.5 - 1.0| == 0.5 is not < 0.5
        assert!(compare(&[1.5], &[1.0], 0.5_f32).is_err());
        assert!(compare(&[1.5], &[1.0], 0.5001_f32).is_ok());
    }

    #[test]
    fn test_nan_never_matches() {
        assert!(compare(&[f32::NAN], &[f32::NAN], 1.0_f32).is_err());
        assert!(compare(&[0.0], &[f32::NAN], 1.0_f32).is_err());
    }

    #[test]
    fn test_infinities_match_exactly() {
        assert!(compare(&[f32::INFINITY], &[f32::INFINITY], 1e-4_f32).is_ok());
        assert!(compare(&[f32::INFINITY], &[f32::NEG_INFINITY], 1e-4_f32).is_err());
    }

    #[test]
    fn test_relative_tolerance_scales() {
        let tol = Tolerance::for_expected();
        // 2.0896 * 1e-3 ≈ 2.1e-3: a 1e-3 error on a large value passes.
        assert!(tol.accepts(2.0896, 2.0886));
        // The floor keeps small values at 1e-4.
        assert!((tol.epsilon_for(0.01) - DEFAULT_EPSILON).abs() < f32::EPSILON);
        assert!(!tol.accepts(0.01, 0.0102));
    }

    #[test]
    fn test_uninitialised_result_fails_nonzero_expectation() {
        // Zero-filled readback from a kernel that never wrote its result.
        assert!(compare(&[0.6705, 0.7068, 0.5741], &[0.0, 0.0, 0.0], 1e-4_f32).is_err());
    }

    #[test]
    fn test_max_abs_diff() {
        assert_eq!(max_abs_diff(&[1.0, 2.0, 3.0], &[1.0, 2.5, 2.0]), 1.0);
        assert!(max_abs_diff(&[1.0], &[f32::NAN]).is_nan());
        assert_eq!(max_abs_diff(&[], &[]), 0.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Tolerance::Absolute(1e-4).to_string(), "epsilon 1e-4");
    }
}
