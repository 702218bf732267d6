//! Reference snapshots: fit once on known-good units, score many test units.
//!
//! On-disk layout (comma-separated, sections in this order):
//!
//! ```text
//! BEGINAVGVECTOR
//! m1,m2,...,mn
//! ENDAVGVECTOR
//! BEGINSTANDDEV
//! s1,s2,...,sn
//! ENDSTANDDEV
//! ISCORRMATRIX
//! True|False
//! ENDCORRMATRIX
//! BEGINEVALS
//! l1,l2,...,lk
//! ENDEVALS
//! BEGINEVECS
//! v1_1,...,v1_n        <- eigenvector of l1
//! ...
//! vk_1,...,vk_n
//! ENDEVECS
//! ```

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2};

use crate::eigen::{eigen_decompose, EigenSet};
use crate::error::{PcaError, Result};
use crate::pca::resolve_components;
use crate::stats::{column_means, column_std_devs, covariance, first_degenerate_column, CovarianceOptions};

const AVG_BEGIN: &str = "BEGINAVGVECTOR";
const AVG_END: &str = "ENDAVGVECTOR";
const STD_BEGIN: &str = "BEGINSTANDDEV";
const STD_END: &str = "ENDSTANDDEV";
const CORR_BEGIN: &str = "ISCORRMATRIX";
const CORR_END: &str = "ENDCORRMATRIX";
const EVALS_BEGIN: &str = "BEGINEVALS";
const EVALS_END: &str = "ENDEVALS";
const EVECS_BEGIN: &str = "BEGINEVECS";
const EVECS_END: &str = "ENDEVECS";

/// Everything needed to score new units against a reference population.
///
/// Immutable once built; refit to change it.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSnapshot {
    mean: Array1<f64>,
    std_dev: Array1<f64>,
    uses_correlation_matrix: bool,
    eigen: EigenSet,
}

impl ReferenceSnapshot {
    /// Builds a snapshot from its parts, checking that the dimensions agree.
    pub fn from_parts(
        mean: Array1<f64>,
        std_dev: Array1<f64>,
        uses_correlation_matrix: bool,
        eigen: EigenSet,
    ) -> Result<Self> {
        let n = mean.len();
        if n == 0 {
            return Err(PcaError::EmptyDataset);
        }
        if std_dev.len() != n {
            return Err(PcaError::shape_mismatch("standard deviation vector", n, std_dev.len()));
        }
        if eigen.vectors().nrows() != n {
            return Err(PcaError::shape_mismatch(
                "eigenvector length",
                n,
                eigen.vectors().nrows(),
            ));
        }
        Ok(Self {
            mean,
            std_dev,
            uses_correlation_matrix,
            eigen,
        })
    }

    /// Fits a snapshot to a reference dataset (rows = units).
    ///
    /// The decomposition is always mean-centred and scaled by `n - 1`;
    /// `use_correlation` switches to the correlation matrix.
    pub fn fit(reference: ArrayView2<f64>, use_correlation: bool) -> Result<Self> {
        let mean = column_means(reference)?;
        let std_dev = column_std_devs(reference)?;
        let options = CovarianceOptions::default().correlation(use_correlation);
        let cov = covariance(reference, &options)?;
        let eigen = eigen_decompose(cov.view())?;

        info!(
            "Fitted reference snapshot on {} units x {} features (correlation: {}).",
            reference.nrows(),
            reference.ncols(),
            use_correlation
        );
        Self::from_parts(mean, std_dev, use_correlation, eigen)
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn std_dev(&self) -> &Array1<f64> {
        &self.std_dev
    }

    pub fn uses_correlation_matrix(&self) -> bool {
        self.uses_correlation_matrix
    }

    pub fn eigen(&self) -> &EigenSet {
        &self.eigen
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        self.eigen.values()
    }

    /// Eigenvectors as columns, same order as [`eigenvalues`](Self::eigenvalues).
    pub fn eigenvectors(&self) -> &Array2<f64> {
        self.eigen.vectors()
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Projects `test` onto the reference eigenvectors using the *stored*
    /// mean (and standard deviation, for correlation snapshots).
    pub fn score(&self, test: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.score_components(test, None)
    }

    /// Like [`score`](Self::score), keeping only the first `n_components` columns.
    pub fn score_components(
        &self,
        test: ArrayView2<f64>,
        n_components: Option<usize>,
    ) -> Result<Array2<f64>> {
        if test.ncols() != self.n_features() {
            return Err(PcaError::shape_mismatch(
                "test dataset columns vs reference snapshot",
                self.n_features(),
                test.ncols(),
            ));
        }
        let k = resolve_components(n_components, self.eigen.len())?;

        let mut centered = &test - &self.mean;
        if self.uses_correlation_matrix {
            if let Some(column) = first_degenerate_column(&self.std_dev, &self.mean) {
                return Err(PcaError::DegenerateVariance { column });
            }
            centered /= &self.std_dev;
        }
        let vectors = self.eigen.vectors().slice(ndarray::s![.., ..k]);
        Ok(centered.dot(&vectors))
    }

    /// Renders the snapshot in the section-marker text format.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        push_section(&mut out, AVG_BEGIN, AVG_END, &[join_row(self.mean.iter())]);
        push_section(&mut out, STD_BEGIN, STD_END, &[join_row(self.std_dev.iter())]);
        let flag = if self.uses_correlation_matrix { "True" } else { "False" };
        push_section(&mut out, CORR_BEGIN, CORR_END, &[flag.to_string()]);
        push_section(&mut out, EVALS_BEGIN, EVALS_END, &[join_row(self.eigen.values().iter())]);
        let evecs: Vec<String> = self
            .eigen
            .vectors()
            .columns()
            .into_iter()
            .map(|column| join_row(column.iter()))
            .collect();
        push_section(&mut out, EVECS_BEGIN, EVECS_END, &evecs);
        out
    }

    /// Parses the section-marker text format.
    ///
    /// Sections are located by marker wherever they appear; anything outside
    /// them is ignored. The mean, eigenvalue and eigenvector sections are
    /// required. A missing correlation flag means `False`; a missing standard
    /// deviation section is only accepted for covariance snapshots and reads
    /// as all ones.
    ///
    /// Each line of the eigenvector section is read as one eigenvector, in
    /// eigenvalue order. Archives that stored one row of the eigenvector
    /// matrix per line have the same shape and load transposed without any
    /// error; re-fit those from their reference data.
    pub fn from_text(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.lines().map(str::trim).collect();

        let mean = match section(&lines, AVG_BEGIN, AVG_END)? {
            Some(body) => parse_single_row(AVG_BEGIN, body)?,
            None => return Err(PcaError::malformed(format!("missing {} section", AVG_BEGIN))),
        };
        let uses_correlation_matrix = match section(&lines, CORR_BEGIN, CORR_END)? {
            Some(body) => parse_flag(body)?,
            None => {
                warn!("Reference snapshot has no {} section; assuming covariance.", CORR_BEGIN);
                false
            }
        };
        let std_dev = match section(&lines, STD_BEGIN, STD_END)? {
            Some(body) => parse_single_row(STD_BEGIN, body)?,
            None if uses_correlation_matrix => {
                return Err(PcaError::malformed(format!(
                    "correlation snapshot is missing its {} section",
                    STD_BEGIN
                )))
            }
            None => Array1::ones(mean.len()),
        };
        let values = match section(&lines, EVALS_BEGIN, EVALS_END)? {
            Some(body) => parse_single_row(EVALS_BEGIN, body)?,
            None => return Err(PcaError::malformed(format!("missing {} section", EVALS_BEGIN))),
        };
        let evec_rows = match section(&lines, EVECS_BEGIN, EVECS_END)? {
            Some(body) => body
                .iter()
                .filter(|line| !line.is_empty())
                .map(|line| parse_row(EVECS_BEGIN, line))
                .collect::<Result<Vec<Vec<f64>>>>()?,
            None => return Err(PcaError::malformed(format!("missing {} section", EVECS_BEGIN))),
        };

        let n = mean.len();
        if evec_rows.len() != values.len() {
            return Err(PcaError::malformed(format!(
                "{} eigenvalues but {} eigenvectors",
                values.len(),
                evec_rows.len()
            )));
        }
        if let Some(bad) = evec_rows.iter().position(|row| row.len() != n) {
            return Err(PcaError::malformed(format!(
                "eigenvector {} has {} entries, expected {}",
                bad + 1,
                evec_rows[bad].len(),
                n
            )));
        }
        let vectors = Array2::from_shape_fn((n, evec_rows.len()), |(i, j)| evec_rows[j][i]);
        let eigen = EigenSet::from_unsorted(values, vectors)?;

        debug!(
            "Parsed reference snapshot: {} features, {} components, correlation: {}",
            n,
            eigen.len(),
            uses_correlation_matrix
        );
        Self::from_parts(mean, std_dev, uses_correlation_matrix, eigen)
            .map_err(|e| PcaError::malformed(e.to_string()))
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_text())?;
        info!("Wrote reference snapshot to {}", path.display());
        Ok(())
    }

    pub fn read_from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_text(&text)
    }
}

impl FromStr for ReferenceSnapshot {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_text(s)
    }
}

fn join_row<'a>(values: impl Iterator<Item = &'a f64>) -> String {
    let mut row = String::new();
    for (i, v) in values.enumerate() {
        if i > 0 {
            row.push(',');
        }
        // Display for f64 prints the shortest text that parses back to the same value.
        let _ = write!(row, "{}", v);
    }
    row
}

fn push_section(out: &mut String, begin: &str, end: &str, body: &[String]) {
    out.push_str(begin);
    out.push('\n');
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(end);
    out.push('\n');
}

fn is_marker(line: &str, marker: &str) -> bool {
    line.split(',').any(|cell| cell.trim().trim_matches('"') == marker)
}

/// Lines strictly between the first `begin` marker and the following `end` marker.
fn section<'a>(lines: &'a [&'a str], begin: &str, end: &str) -> Result<Option<&'a [&'a str]>> {
    let Some(start) = lines.iter().position(|line| is_marker(line, begin)) else {
        return Ok(None);
    };
    let body = &lines[start + 1..];
    match body.iter().position(|line| is_marker(line, end)) {
        Some(stop) => Ok(Some(&body[..stop])),
        None => Err(PcaError::malformed(format!("{} without matching {}", begin, end))),
    }
}

fn parse_row(name: &str, line: &str) -> Result<Vec<f64>> {
    line.split(',')
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(|cell| {
            cell.parse::<f64>()
                .map_err(|e| PcaError::malformed(format!("{}: cannot parse '{}': {}", name, cell, e)))
        })
        .collect()
}

fn parse_single_row(name: &str, body: &[&str]) -> Result<Array1<f64>> {
    let line = body
        .iter()
        .find(|line| !line.is_empty())
        .ok_or_else(|| PcaError::malformed(format!("{} section is empty", name)))?;
    Ok(Array1::from(parse_row(name, line)?))
}

fn parse_flag(body: &[&str]) -> Result<bool> {
    let line = body
        .iter()
        .find(|line| !line.is_empty())
        .ok_or_else(|| PcaError::malformed(format!("{} section is empty", CORR_BEGIN)))?;
    let cell = line
        .split(',')
        .map(|c| c.trim().trim_matches('"'))
        .find(|c| !c.is_empty())
        .unwrap_or_default();
    match cell {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => Err(PcaError::malformed(format!(
            "{} must be True or False, found '{}'",
            CORR_BEGIN, other
        ))),
    }
}
