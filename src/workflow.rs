//! The four end-to-end jobs the command line runs, expressed over
//! [`FeatureTable`]s so they can be driven without touching files.

use log::{info, warn};
use ndarray::{Array1, Array2, Axis};

use crate::eigen::{eigen_decompose, EigenSet};
use crate::error::{PcaError, Result};
use crate::hmethod::{angle_between, AngleUnit};
use crate::pca::{pc_scores, resolve_components};
use crate::snapshot::ReferenceSnapshot;
use crate::stats::{column_means, column_std_devs, covariance, first_degenerate_column, total_variance, CovarianceOptions, VarianceSource};
use crate::table::FeatureTable;

/// Scores of a test population against a stored reference.
#[derive(Debug, Clone)]
pub struct ScoreReport {
    pub unit_ids: Vec<String>,
    pub scores: Array2<f64>,
    pub limit_violations: Option<Vec<usize>>,
}

/// Self-PCA of a single population.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub unit_ids: Vec<String>,
    pub covariance: Array2<f64>,
    pub eigen: EigenSet,
    pub scores: Array2<f64>,
    /// Cumulative proportion of variance after 1, 2, ... components.
    pub variance_curve: Array1<f64>,
    pub limit_violations: Option<Vec<usize>>,
}

fn violations(table: &FeatureTable) -> Option<Vec<usize>> {
    table.limits().map(|_| table.limit_violations())
}

/// Fits a reference snapshot to known-good units.
pub fn store_reference(table: &FeatureTable, use_correlation: bool) -> Result<ReferenceSnapshot> {
    if table.n_units() < 2 {
        return Err(PcaError::InsufficientUnits {
            required: 2,
            actual: table.n_units(),
        });
    }
    ReferenceSnapshot::fit(table.data(), use_correlation)
}

/// Projects every test unit onto the reference snapshot.
pub fn score_against_reference(
    snapshot: &ReferenceSnapshot,
    table: &FeatureTable,
    n_components: Option<usize>,
) -> Result<ScoreReport> {
    let scores = snapshot.score_components(table.data(), n_components)?;
    info!(
        "Scored {} units on {} components.",
        scores.nrows(),
        scores.ncols()
    );
    Ok(ScoreReport {
        unit_ids: table.unit_ids().to_vec(),
        scores,
        limit_violations: violations(table),
    })
}

/// PCA of `table` against itself.
///
/// Scores are centred on the table's own means (and scaled by its own
/// standard deviations when `options.correlation` is set). The variance curve
/// is relative to the trace of the matrix that was decomposed.
pub fn analyze(
    table: &FeatureTable,
    options: &CovarianceOptions,
    n_components: Option<usize>,
) -> Result<Analysis> {
    let data = table.data();
    let cov = covariance(data, options)?;
    let eigen = eigen_decompose(cov.view())?;
    let k = resolve_components(n_components, eigen.len())?;

    let scores = if options.correlation {
        let std_devs = column_std_devs(data)?;
        if let Some(column) = first_degenerate_column(&std_devs, &column_means(data)?) {
            return Err(PcaError::DegenerateVariance { column });
        }
        pc_scores((&data / &std_devs).view(), &eigen, Some(k))?
    } else {
        pc_scores(data, &eigen, Some(k))?
    };

    let total = total_variance(VarianceSource::Covariance(cov.view()))?;
    if total <= 0.0 {
        warn!("Total variance is {}; variance curve will not be meaningful.", total);
    }
    let mut running = 0.0;
    let variance_curve: Array1<f64> = eigen
        .values()
        .iter()
        .take(k)
        .map(|&value| {
            running += value;
            running / total
        })
        .collect();

    info!(
        "Analyzed {} units x {} features; {} components explain {:.4} of the variance.",
        table.n_units(),
        table.n_features(),
        k,
        variance_curve.last().copied().unwrap_or(0.0)
    );
    Ok(Analysis {
        unit_ids: table.unit_ids().to_vec(),
        covariance: cov,
        eigen,
        scores,
        variance_curve,
        limit_violations: violations(table),
    })
}

/// H-Method angle of every test unit against the whole reference population.
pub fn hmethod_angles(
    test: &FeatureTable,
    reference: &FeatureTable,
    unit: AngleUnit,
) -> Result<Vec<f64>> {
    if test.n_units() == 0 {
        return Err(PcaError::EmptyDataset);
    }
    test.data()
        .axis_iter(Axis(0))
        .map(|row| angle_between(row.insert_axis(Axis(0)), reference.data(), unit))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LimitPair;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn table(rows: usize, cols: usize, seed: u64) -> FeatureTable {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = Array2::from_shape_fn((rows, cols), |(_, j)| {
            50.0 + (j as f64 + 1.0) * rng.random_range(-1.0..1.0)
        });
        FeatureTable::new(
            data,
            (0..rows).map(|i| format!("SN{}", i)).collect(),
            (0..cols).map(|j| format!("F{}", j)).collect(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_reference_units_score_to_zero_mean() {
        let reference = table(40, 5, 3);
        let snapshot = store_reference(&reference, false).unwrap();
        let report = score_against_reference(&snapshot, &reference, None).unwrap();
        assert_eq!(report.scores.dim(), (40, 5));
        for column in report.scores.axis_iter(Axis(1)) {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-9);
        }
        assert!(report.limit_violations.is_none());
    }

    #[test]
    fn test_store_needs_two_units() {
        let one = table(1, 3, 0);
        assert!(matches!(
            store_reference(&one, false),
            Err(PcaError::InsufficientUnits { required: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_score_reports_limit_violations() {
        let reference = table(10, 2, 5);
        let snapshot = store_reference(&reference, true).unwrap();
        let test = FeatureTable::new(
            ndarray::array![[50.0, 50.0], [80.0, 50.0]],
            vec!["T1".into(), "T2".into()],
            vec!["F0".into(), "F1".into()],
            Some(vec![LimitPair::new(40.0, 60.0), LimitPair::new(40.0, 60.0)]),
        )
        .unwrap();
        let report = score_against_reference(&snapshot, &test, Some(1)).unwrap();
        assert_eq!(report.scores.ncols(), 1);
        assert_eq!(report.limit_violations, Some(vec![0, 1]));
    }

    #[test]
    fn test_analysis_curve_reaches_one() {
        let t = table(30, 4, 11);
        for options in [CovarianceOptions::default(), CovarianceOptions::default().correlation(true)] {
            let analysis = analyze(&t, &options, None).unwrap();
            assert_eq!(analysis.scores.dim(), (30, 4));
            assert_eq!(analysis.variance_curve.len(), 4);
            assert_abs_diff_eq!(analysis.variance_curve[3], 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_analysis_truncates_components() {
        let t = table(12, 5, 2);
        let analysis = analyze(&t, &CovarianceOptions::default(), Some(2)).unwrap();
        assert_eq!(analysis.scores.ncols(), 2);
        assert_eq!(analysis.variance_curve.len(), 2);
        assert_eq!(analysis.eigen.len(), 5);
    }

    #[test]
    fn test_hmethod_one_angle_per_unit() {
        let reference = table(20, 4, 8);
        let test = table(3, 4, 9);
        let angles = hmethod_angles(&test, &reference, AngleUnit::Degrees).unwrap();
        assert_eq!(angles.len(), 3);
        assert!(angles.iter().all(|a| (0.0..=180.0).contains(a)));
    }
}
