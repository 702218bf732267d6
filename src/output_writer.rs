//! CSV output tables written next to an `--out` prefix.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Result};
use log::{info, warn};
use ndarray::{Array1, Array2};

use crate::hmethod::AngleUnit;

/// Creates the parent directory of `prefix` if it does not exist yet.
pub fn ensure_output_dir(prefix: &str) -> Result<()> {
    if let Some(parent) = Path::new(prefix).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create output directory {}: {}", parent.display(), e))?;
            info!("Created output directory: {}", parent.display());
        }
    }
    Ok(())
}

fn create_output_file(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
    let filename = format!("{}.{}", prefix, suffix);
    File::create(&filename)
        .map(BufWriter::new)
        .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
}

/// `Serial Number,1,2,...,k[,Limit Violations]`, one row per unit.
pub fn write_pc_scores(
    prefix: &str,
    suffix: &str,
    unit_ids: &[String],
    scores: &Array2<f64>,
    limit_violations: Option<&[usize]>,
    precision: usize,
) -> Result<()> {
    if unit_ids.len() != scores.nrows() {
        return Err(anyhow!(
            "{} unit identifiers for {} score rows",
            unit_ids.len(),
            scores.nrows()
        ));
    }
    let mut writer = create_output_file(prefix, suffix)?;
    info!("Writing PC scores to {}.{}", prefix, suffix);

    write!(writer, "Serial Number")?;
    for i in 1..=scores.ncols() {
        write!(writer, ",{}", i)?;
    }
    if limit_violations.is_some() {
        write!(writer, ",Limit Violations")?;
    }
    writeln!(writer)?;

    for (unit_idx, unit_id) in unit_ids.iter().enumerate() {
        write!(writer, "{}", unit_id)?;
        for value in scores.row(unit_idx) {
            write!(writer, ",{:.*}", precision, value)?;
        }
        if let Some(counts) = limit_violations {
            match counts.get(unit_idx) {
                Some(count) => write!(writer, ",{}", count)?,
                None => {
                    warn!("No limit-violation count for unit {}. Writing NA.", unit_id);
                    write!(writer, ",NA")?;
                }
            }
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// `PC,Eigenvalue,CumulativeProportion`, one row per component in the curve.
pub fn write_variance(
    prefix: &str,
    eigenvalues: &Array1<f64>,
    curve: &Array1<f64>,
    precision: usize,
) -> Result<()> {
    if curve.is_empty() {
        info!("No variance curve to write.");
        return Ok(());
    }
    let mut writer = create_output_file(prefix, "variance.csv")?;
    info!("Writing variance explained to {}.variance.csv", prefix);

    writeln!(writer, "PC,Eigenvalue,CumulativeProportion")?;
    for (i, (value, proportion)) in eigenvalues.iter().zip(curve.iter()).enumerate() {
        writeln!(writer, "{},{:.*},{:.*}", i + 1, precision, value, precision, proportion)?;
    }
    writer.flush()?;
    Ok(())
}

/// `Serial Number,Angle (<unit>)`, one row per test unit.
pub fn write_angles(
    prefix: &str,
    unit_ids: &[String],
    angles: &[f64],
    unit: AngleUnit,
    precision: usize,
) -> Result<()> {
    if unit_ids.len() != angles.len() {
        return Err(anyhow!("{} unit identifiers for {} angles", unit_ids.len(), angles.len()));
    }
    let mut writer = create_output_file(prefix, "angles.csv")?;
    info!("Writing H-Method angles to {}.angles.csv", prefix);

    let unit_name = match unit {
        AngleUnit::Degrees => "degrees",
        AngleUnit::Radians => "radians",
    };
    writeln!(writer, "Serial Number,Angle ({})", unit_name)?;
    for (unit_id, angle) in unit_ids.iter().zip(angles) {
        writeln!(writer, "{},{:.*}", unit_id, precision, angle)?;
    }
    writer.flush()?;
    Ok(())
}
