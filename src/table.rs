//! The tabular contract every input reader hands to the PCA core.

use ndarray::{Array2, ArrayView2};

use crate::error::{PcaError, Result};

/// Lower/upper acceptance limit for one feature column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitPair {
    pub lower: f64,
    pub upper: f64,
}

impl LimitPair {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Units x features matrix with its row and column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    data: Array2<f64>,
    unit_ids: Vec<String>,
    labels: Vec<String>,
    limits: Option<Vec<LimitPair>>,
}

impl FeatureTable {
    /// Checks that rows match `unit_ids`, columns match `labels` and, when
    /// present, `limits` has one pair per column.
    pub fn new(
        data: Array2<f64>,
        unit_ids: Vec<String>,
        labels: Vec<String>,
        limits: Option<Vec<LimitPair>>,
    ) -> Result<Self> {
        if data.nrows() != unit_ids.len() {
            return Err(PcaError::shape_mismatch("unit identifiers", data.nrows(), unit_ids.len()));
        }
        if data.ncols() != labels.len() {
            return Err(PcaError::shape_mismatch("column labels", data.ncols(), labels.len()));
        }
        if let Some(limits) = &limits {
            if limits.len() != data.ncols() {
                return Err(PcaError::shape_mismatch("limit pairs", data.ncols(), limits.len()));
            }
        }
        Ok(Self {
            data,
            unit_ids,
            labels,
            limits,
        })
    }

    pub fn data(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn unit_ids(&self) -> &[String] {
        &self.unit_ids
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn limits(&self) -> Option<&[LimitPair]> {
        self.limits.as_deref()
    }

    pub fn n_units(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    /// Number of out-of-limit cells per unit; all zero when there are no limits.
    pub fn limit_violations(&self) -> Vec<usize> {
        let Some(limits) = &self.limits else {
            return vec![0; self.n_units()];
        };
        self.data
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(limits)
                    .filter(|(value, limit)| !limit.contains(**value))
                    .count()
            })
            .collect()
    }

    /// A one-unit table holding row `index`.
    pub fn unit(&self, index: usize) -> Option<FeatureTable> {
        if index >= self.n_units() {
            return None;
        }
        let row = self.data.row(index).insert_axis(ndarray::Axis(0)).to_owned();
        Some(Self {
            data: row,
            unit_ids: vec![self.unit_ids[index].clone()],
            labels: self.labels.clone(),
            limits: self.limits.clone(),
        })
    }
}

/// Anything that can produce a [`FeatureTable`], usually a file reader.
pub trait FeatureSource {
    fn read_table(&self) -> Result<FeatureTable>;
}

impl FeatureSource for FeatureTable {
    fn read_table(&self) -> Result<FeatureTable> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SN{:03}", i)).collect()
    }

    #[test]
    fn test_invariants_enforced() {
        let data = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(FeatureTable::new(data.clone(), ids(2), ids(2), None).is_ok());
        assert!(matches!(
            FeatureTable::new(data.clone(), ids(3), ids(2), None),
            Err(PcaError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            FeatureTable::new(data.clone(), ids(2), ids(1), None),
            Err(PcaError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            FeatureTable::new(data, ids(2), ids(2), Some(vec![LimitPair::new(0.0, 1.0)])),
            Err(PcaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_limit_violations() {
        let data = array![[1.0, 2.0], [3.0, 9.0], [-1.0, 9.0]];
        let limits = vec![LimitPair::new(0.0, 3.0), LimitPair::new(0.0, 5.0)];
        let table = FeatureTable::new(data, ids(3), ids(2), Some(limits)).unwrap();
        assert_eq!(table.limit_violations(), vec![0, 1, 2]);

        let plain = FeatureTable::new(array![[1.0]], ids(1), ids(1), None).unwrap();
        assert_eq!(plain.limit_violations(), vec![0]);
    }

    #[test]
    fn test_unit_extraction() {
        let data = array![[1.0, 2.0], [3.0, 4.0]];
        let table = FeatureTable::new(data, ids(2), ids(2), None).unwrap();
        let second = table.unit(1).unwrap();
        assert_eq!(second.data(), array![[3.0, 4.0]]);
        assert_eq!(second.unit_ids(), &["SN001".to_string()]);
        assert!(table.unit(2).is_none());
    }
}
