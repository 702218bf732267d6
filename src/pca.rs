//! Score projection and variance-explained accounting.
//!
//! These functions centre the dataset on its *own* column means. Scoring new
//! units against a stored reference goes through
//! [`ReferenceSnapshot::score`](crate::snapshot::ReferenceSnapshot::score) instead.

use log::warn;
use ndarray::{s, Array1, Array2, ArrayView2};

use crate::eigen::EigenSet;
use crate::error::{PcaError, Result};
use crate::stats::{column_means, total_variance, VarianceSource};

/// Resolves an optional component count against what the eigen set holds.
///
/// `None` means all of them; requests beyond that are capped with a warning.
pub fn resolve_components(requested: Option<usize>, available: usize) -> Result<usize> {
    match requested {
        None => Ok(available),
        Some(0) => Err(PcaError::InvalidComponentCount { available }),
        Some(k) if k > available => {
            warn!(
                "Requested {} components exceeds the {} available, adjusting to {}.",
                k, available, available
            );
            Ok(available)
        }
        Some(k) => Ok(k),
    }
}

fn check_feature_count(dataset: &ArrayView2<f64>, eigen: &EigenSet) -> Result<()> {
    let n_features = eigen.vectors().nrows();
    if dataset.ncols() != n_features {
        return Err(PcaError::shape_mismatch(
            "dataset columns vs eigenvector length",
            n_features,
            dataset.ncols(),
        ));
    }
    Ok(())
}

/// Principal component scores, shape `(n_units, n_components)`.
///
/// Column `j` is the projection onto the eigenvector of the `j`-th largest
/// eigenvalue.
pub fn pc_scores(
    dataset: ArrayView2<f64>,
    eigen: &EigenSet,
    n_components: Option<usize>,
) -> Result<Array2<f64>> {
    check_feature_count(&dataset, eigen)?;
    let k = resolve_components(n_components, eigen.len())?;

    let means = column_means(dataset)?;
    let centered = &dataset - &means;
    Ok(centered.dot(&eigen.vectors().slice(s![.., ..k])))
}

/// Share of the dataset's total variance carried by the first `n_components`
/// eigenvalues. With every component of the dataset's own covariance this is 1.
pub fn cumulative_variance_explained(
    dataset: ArrayView2<f64>,
    eigen: &EigenSet,
    n_components: Option<usize>,
) -> Result<f64> {
    check_feature_count(&dataset, eigen)?;
    let k = resolve_components(n_components, eigen.len())?;
    let total = total_variance(VarianceSource::Raw(dataset))?;
    Ok(eigen.values().slice(s![..k]).sum() / total)
}

/// Cumulative proportion of variance after 1, 2, ..., `n_components` components.
pub fn variance_explained_curve(
    dataset: ArrayView2<f64>,
    eigen: &EigenSet,
    n_components: Option<usize>,
) -> Result<Array1<f64>> {
    check_feature_count(&dataset, eigen)?;
    let k = resolve_components(n_components, eigen.len())?;
    let total = total_variance(VarianceSource::Raw(dataset))?;

    let mut running = 0.0;
    Ok(eigen
        .values()
        .iter()
        .take(k)
        .map(|&value| {
            running += value;
            running / total
        })
        .collect())
}
