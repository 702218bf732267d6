//! Covariance/correlation matrices and total-variance accounting.

use log::debug;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::error::{PcaError, Result};

/// A standard deviation at or below this fraction of its column's mean
/// magnitude is rounding noise around a constant column.
pub const VARIANCE_EPSILON: f64 = 1e-12;

/// The three independent axes that shape a covariance computation.
///
/// Scoring against a stored reference only makes sense with the same
/// configuration that produced the reference, so callers keep this around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CovarianceOptions {
    pub center_around_mean: bool,
    pub scale_by_nrows: bool,
    pub correlation: bool,
}

impl Default for CovarianceOptions {
    fn default() -> Self {
        Self {
            center_around_mean: true,
            scale_by_nrows: true,
            correlation: false,
        }
    }
}

impl CovarianceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `transpose(A) x A` with no centering and no row-count division.
    pub fn gram() -> Self {
        Self {
            center_around_mean: false,
            scale_by_nrows: false,
            correlation: false,
        }
    }

    pub fn center_around_mean(mut self, center: bool) -> Self {
        self.center_around_mean = center;
        self
    }

    pub fn scale_by_nrows(mut self, scale: bool) -> Self {
        self.scale_by_nrows = scale;
        self
    }

    pub fn correlation(mut self, correlation: bool) -> Self {
        self.correlation = correlation;
        self
    }
}

fn ensure_non_empty(dataset: &ArrayView2<f64>) -> Result<()> {
    if dataset.nrows() == 0 || dataset.ncols() == 0 {
        return Err(PcaError::EmptyDataset);
    }
    Ok(())
}

/// Per-column means.
pub fn column_means(dataset: ArrayView2<f64>) -> Result<Array1<f64>> {
    ensure_non_empty(&dataset)?;
    dataset.mean_axis(Axis(0)).ok_or(PcaError::EmptyDataset)
}

/// Per-column population standard deviations (divides by n, not n - 1).
pub fn column_std_devs(dataset: ArrayView2<f64>) -> Result<Array1<f64>> {
    ensure_non_empty(&dataset)?;
    Ok(dataset.std_axis(Axis(0), 0.0))
}

/// Returns the index of the first column with zero variance.
///
/// The cutoff is relative to the column mean, so features measured in very
/// small units are kept while constant columns with rounding noise are not.
pub(crate) fn first_degenerate_column(std_devs: &Array1<f64>, means: &Array1<f64>) -> Option<usize> {
    std_devs
        .iter()
        .zip(means.iter())
        .position(|(s, m)| *s == 0.0 || s.abs() <= VARIANCE_EPSILON * m.abs())
}

/// Covariance (or correlation) matrix of `dataset`, rows = units, columns = features.
///
/// Correlation form divides each column by its population standard deviation
/// before the outer product; a constant column yields
/// [`PcaError::DegenerateVariance`] rather than NaN/Inf entries.
/// Scaling divides by `n_rows - 1`, so it needs at least two rows; the
/// single-row Gram matrix used by the H-Method must pass `scale_by_nrows = false`.
pub fn covariance(dataset: ArrayView2<f64>, options: &CovarianceOptions) -> Result<Array2<f64>> {
    ensure_non_empty(&dataset)?;
    let n_rows = dataset.nrows();

    if options.scale_by_nrows && n_rows < 2 {
        return Err(PcaError::InsufficientUnits {
            required: 2,
            actual: n_rows,
        });
    }

    let mut a = dataset.to_owned();
    let means = column_means(dataset)?;

    if options.center_around_mean {
        a -= &means;
    }

    if options.correlation {
        let std_devs = column_std_devs(dataset)?;
        if let Some(column) = first_degenerate_column(&std_devs, &means) {
            return Err(PcaError::DegenerateVariance { column });
        }
        a /= &std_devs;
    }

    let mut result = a.t().dot(&a);
    if options.scale_by_nrows {
        result /= (n_rows - 1) as f64;
    }

    debug!(
        "Computed {}x{} covariance from {} rows ({:?})",
        result.nrows(),
        result.ncols(),
        n_rows,
        options
    );
    Ok(result)
}

/// What `total_variance` is being asked to sum: raw unit data or an already
/// computed covariance matrix. The caller says which; nothing is inferred from
/// the shape or symmetry of the input.
#[derive(Debug, Clone, Copy)]
pub enum VarianceSource<'a> {
    Raw(ArrayView2<'a, f64>),
    Covariance(ArrayView2<'a, f64>),
}

/// Sum of the covariance diagonal. Raw data goes through [`covariance`] with
/// the default options first.
pub fn total_variance(source: VarianceSource<'_>) -> Result<f64> {
    match source {
        VarianceSource::Raw(dataset) => {
            let cov = covariance(dataset, &CovarianceOptions::default())?;
            Ok(cov.diag().sum())
        }
        VarianceSource::Covariance(matrix) => {
            ensure_non_empty(&matrix)?;
            if matrix.nrows() != matrix.ncols() {
                return Err(PcaError::shape_mismatch(
                    "covariance matrix columns",
                    matrix.nrows(),
                    matrix.ncols(),
                ));
            }
            Ok(matrix.diag().sum())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_covariance_hand_computed() {
        let d = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let cov = covariance(d.view(), &CovarianceOptions::default()).unwrap();
        let expected = array![[4.0, 4.0], [4.0, 4.0]];
        for (got, want) in cov.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_row_gram_matrix() {
        let d = array![[1.0, 2.0, 3.0]];
        let cov = covariance(d.view(), &CovarianceOptions::gram()).unwrap();
        assert_eq!(cov, array![[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [3.0, 6.0, 9.0]]);
    }

    #[test]
    fn test_single_row_needs_unscaled() {
        let d = array![[1.0, 2.0, 3.0]];
        let err = covariance(d.view(), &CovarianceOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            PcaError::InsufficientUnits {
                required: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_uncentered_scaled() {
        let d = array![[1.0, 0.0], [0.0, 2.0]];
        let opts = CovarianceOptions::new().center_around_mean(false);
        let cov = covariance(d.view(), &opts).unwrap();
        assert_eq!(cov, array![[1.0, 0.0], [0.0, 4.0]]);
    }

    #[test]
    fn test_correlation_has_unit_scaled_diagonal() {
        let d = array![[1.0, 10.0, 3.0], [2.0, 30.0, 1.0], [4.0, 20.0, 2.0], [3.0, 50.0, 7.0]];
        let opts = CovarianceOptions::new().correlation(true);
        let corr = covariance(d.view(), &opts).unwrap();
        // Population std in the normalisation, n - 1 in the scaling.
        let n = d.nrows() as f64;
        for i in 0..3 {
            assert_abs_diff_eq!(corr[[i, i]], n / (n - 1.0), epsilon = 1e-12);
        }
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(corr[[i, j]], corr[[j, i]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_correlation_rejects_constant_column() {
        let d = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let opts = CovarianceOptions::new().correlation(true);
        let err = covariance(d.view(), &opts).unwrap_err();
        assert!(matches!(err, PcaError::DegenerateVariance { column: 1 }));
    }

    #[test]
    fn test_correlation_keeps_small_unit_columns() {
        let d = array![[1e-13, 1.0], [3e-13, 2.0], [2e-13, 4.0]];
        let opts = CovarianceOptions::new().correlation(true);
        let corr = covariance(d.view(), &opts).unwrap();
        assert_abs_diff_eq!(corr[[0, 0]], 1.5, epsilon = 1e-9);
        assert!(corr.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rounding_noise_counts_as_constant() {
        let d = array![[0.1, 1.0], [0.1, 2.0], [0.1, 4.0]];
        let opts = CovarianceOptions::new().correlation(true);
        assert!(matches!(
            covariance(d.view(), &opts),
            Err(PcaError::DegenerateVariance { column: 0 })
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let d = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            covariance(d.view(), &CovarianceOptions::default()),
            Err(PcaError::EmptyDataset)
        ));
    }

    #[test]
    fn test_std_devs_are_population() {
        let d = array![[1.0], [3.0]];
        let s = column_std_devs(d.view()).unwrap();
        assert_abs_diff_eq!(s[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_total_variance_explicit_tagging() {
        // Symmetric by coincidence: tagged as raw data it is still treated as units x features.
        let d = array![[1.0, 2.0], [2.0, 1.0]];
        let raw = total_variance(VarianceSource::Raw(d.view())).unwrap();
        assert_abs_diff_eq!(raw, 1.0, epsilon = 1e-12);

        let as_cov = total_variance(VarianceSource::Covariance(d.view())).unwrap();
        assert_abs_diff_eq!(as_cov, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_total_variance_non_square_covariance() {
        let d = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert!(matches!(
            total_variance(VarianceSource::Covariance(d.view())),
            Err(PcaError::ShapeMismatch { .. })
        ));
    }
}
