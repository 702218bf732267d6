//! Error types for the PCA core and its collaborators.

use thiserror::Error;

/// Main error type for `qc_pca` operations.
#[derive(Error, Debug)]
pub enum PcaError {
    /// Dimensionality of two inputs disagrees.
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A column with zero variance was asked to be variance-normalised.
    #[error("Column {column} has zero variance; correlation form is undefined")]
    DegenerateVariance { column: usize },

    /// A reference snapshot is missing a required section or is inconsistent.
    #[error("Malformed reference snapshot: {0}")]
    MalformedSnapshot(String),

    /// Angle unit other than "d" or "r".
    #[error("Invalid angle unit '{0}': use 'd' for degrees or 'r' for radians")]
    InvalidUnit(String),

    /// Not enough units (rows) for the requested statistic.
    #[error("Need at least {required} units, got {actual}")]
    InsufficientUnits { required: usize, actual: usize },

    /// Zero components requested.
    #[error("Number of components must be at least 1 (at most {available} available)")]
    InvalidComponentCount { available: usize },

    /// Dataset has no rows or no columns.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// The eigensolver failed.
    #[error("Eigendecomposition failed: {0}")]
    Eigen(String),

    /// A collaborator input file could not be parsed.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for `qc_pca` operations.
pub type Result<T> = std::result::Result<T, PcaError>;

impl PcaError {
    #[must_use]
    pub fn shape_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    #[must_use]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSnapshot(msg.into())
    }

    #[must_use]
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PcaError::shape_mismatch("score", 4, 3);
        let msg = err.to_string();
        assert!(msg.contains("score"));
        assert!(msg.contains('4'));
        assert!(msg.contains('3'));

        let err = PcaError::DegenerateVariance { column: 2 };
        assert!(err.to_string().contains("Column 2"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PcaError = io.into();
        assert!(matches!(err, PcaError::Io(_)));
    }
}
