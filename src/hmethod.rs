//! H-Method: compares two feature sets through their eigenvalue-weighted
//! "total eigenvector".
//!
//! Experimental. The angle is very sensitive to the number of features and is
//! only near zero when the two total eigenvectors almost coincide, so it is
//! not a production pass/fail metric. Eigenvector signs are whatever the
//! solver returns, which can flip a total eigenvector and report an angle
//! near 180 degrees for inputs that point the same way.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use log::debug;
use ndarray::{Array1, ArrayView2, Axis};

use crate::eigen::eigen_decompose;
use crate::error::{PcaError, Result};
use crate::stats::{covariance, CovarianceOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AngleUnit {
    #[default]
    Degrees,
    Radians,
}

impl FromStr for AngleUnit {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "d" => Ok(AngleUnit::Degrees),
            "r" => Ok(AngleUnit::Radians),
            _ => Err(PcaError::InvalidUnit(s.to_string())),
        }
    }
}

impl fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleUnit::Degrees => write!(f, "d"),
            AngleUnit::Radians => write!(f, "r"),
        }
    }
}

/// Unit-length sum of the eigenvectors of `transpose(A) x A`, each weighted by
/// its eigenvalue. `A` may be a single unit (one row).
pub fn total_eigenvector(dataset: ArrayView2<f64>) -> Result<Array1<f64>> {
    let gram = covariance(dataset, &CovarianceOptions::gram())?;
    let eigen = eigen_decompose(gram.view())?;

    let weighted = eigen.vectors() * eigen.values();
    let total = weighted.sum_axis(Axis(1));

    // The columns are orthonormal, so the magnitude is at least the largest
    // eigenvalue and only vanishes for all-zero data.
    let scale = eigen.values().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let magnitude = total.dot(&total).sqrt();
    if !magnitude.is_finite() || magnitude <= scale * f64::EPSILON {
        return match dataset
            .axis_iter(Axis(1))
            .position(|c| c.iter().all(|v| *v == 0.0))
        {
            Some(column) => Err(PcaError::DegenerateVariance { column }),
            None => Err(PcaError::Eigen(format!(
                "total eigenvector has magnitude {} for non-zero data",
                magnitude
            ))),
        };
    }
    Ok(total / magnitude)
}

/// Angle between the total eigenvectors of a test and a reference feature set.
pub fn angle_between(
    test: ArrayView2<f64>,
    reference: ArrayView2<f64>,
    unit: AngleUnit,
) -> Result<f64> {
    if test.ncols() != reference.ncols() {
        return Err(PcaError::shape_mismatch(
            "test vs reference feature count",
            reference.ncols(),
            test.ncols(),
        ));
    }
    let test_total = total_eigenvector(test)?;
    let reference_total = total_eigenvector(reference)?;

    // Rounding can push a unit-vector dot product just past +-1.
    let cosine = reference_total.dot(&test_total).clamp(-1.0, 1.0);
    let radians = cosine.acos();
    debug!("H-Method cosine {:.12}, angle {:.6} rad", cosine, radians);

    Ok(match unit {
        AngleUnit::Degrees => radians * (180.0 / PI),
        AngleUnit::Radians => radians,
    })
}

/// Same as [`angle_between`] with the unit given as text ("d" or "r").
pub fn angle_between_str(test: ArrayView2<f64>, reference: ArrayView2<f64>, unit: &str) -> Result<f64> {
    angle_between(test, reference, unit.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_identical_inputs_have_zero_angle() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        for rows in [1usize, 3, 8] {
            let x = Array2::from_shape_fn((rows, 5), |_| rng.random_range(0.5..2.0));
            let angle = angle_between(x.view(), x.view(), AngleUnit::Degrees).unwrap();
            assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_small_scale_data_has_zero_self_angle() {
        let x = array![[3e-9, 4e-9], [1e-9, 2e-9]];
        let angle = angle_between(x.view(), x.view(), AngleUnit::Degrees).unwrap();
        assert_abs_diff_eq!(angle, 0.0, epsilon = 1e-5);

        let t = total_eigenvector(x.view()).unwrap();
        assert_abs_diff_eq!(t.dot(&t), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_total_eigenvector_is_unit_length() {
        let x = array![[1.0, 2.0, 3.0], [2.0, 1.0, 0.5]];
        let t = total_eigenvector(x.view()).unwrap();
        assert_eq!(t.len(), 3);
        assert_abs_diff_eq!(t.dot(&t), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_row_follows_the_row_direction() {
        // The Gram matrix of one row has rank one, so the total eigenvector is the row itself up to sign.
        let x = array![[3.0, 4.0]];
        let t = total_eigenvector(x.view()).unwrap();
        assert_abs_diff_eq!(t[0].abs(), 0.6, epsilon = 1e-9);
        assert_abs_diff_eq!(t[1].abs(), 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_orthogonal_rows_report_right_angle() {
        let a = array![[1.0, 0.0]];
        let b = array![[0.0, 2.0]];
        let deg = angle_between(a.view(), b.view(), AngleUnit::Degrees).unwrap();
        assert_abs_diff_eq!(deg, 90.0, epsilon = 1e-6);
        let rad = angle_between(a.view(), b.view(), AngleUnit::Radians).unwrap();
        assert_abs_diff_eq!(rad, PI / 2.0, epsilon = 1e-8);
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("d".parse::<AngleUnit>().unwrap(), AngleUnit::Degrees);
        assert_eq!("R".parse::<AngleUnit>().unwrap(), AngleUnit::Radians);
        let x = array![[1.0, 2.0]];
        assert!(matches!(
            angle_between_str(x.view(), x.view(), "grad"),
            Err(PcaError::InvalidUnit(_))
        ));
    }

    #[test]
    fn test_all_zero_dataset_is_degenerate() {
        let zero = Array2::<f64>::zeros((2, 3));
        let x = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            angle_between(zero.view(), x.view(), AngleUnit::Degrees),
            Err(PcaError::DegenerateVariance { column: 0 })
        ));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let a = array![[1.0, 2.0]];
        let b = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            angle_between(a.view(), b.view(), AngleUnit::Degrees),
            Err(PcaError::ShapeMismatch { .. })
        ));
    }
}
