//! Principal component analysis and H-Method comparison for per-unit
//! vibration test features.
//!
//! A reference population of known-good units is reduced to a
//! [`ReferenceSnapshot`](snapshot::ReferenceSnapshot) (means, standard
//! deviations and the eigen decomposition of its covariance or correlation
//! matrix); later test units are projected onto it.

pub mod eigen;
pub mod error;
pub mod hmethod;
pub mod input;
pub mod output_writer;
pub mod pca;
pub mod snapshot;
pub mod stats;
pub mod table;
pub mod workflow;

pub use eigen::{eigen_decompose, EigenSet, SymmetricEigenSolver};
pub use error::{PcaError, Result};
pub use hmethod::{angle_between, AngleUnit};
pub use input::{AsciiTestCaseReader, InputFormat, UnitDataReader};
pub use snapshot::ReferenceSnapshot;
pub use stats::{covariance, total_variance, CovarianceOptions, VarianceSource};
pub use table::{FeatureSource, FeatureTable, LimitPair};
