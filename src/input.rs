//! Readers for the two ASCII export formats produced by the test stations.
//!
//! Both are plain delimiter-separated text scanned line by line; the numeric
//! core only ever sees the resulting [`FeatureTable`].

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use ndarray::Array2;

use crate::error::{PcaError, Result};
use crate::table::{FeatureSource, FeatureTable, LimitPair};

/// Placeholder the unit-data export writes for a missing measurement.
pub const MISSING_VALUE_PLACEHOLDER: &str = "--------";

/// The supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Test-case data (ASCII) export: one section per test case.
    AsciiTestCase,
    /// Unit-data export: one row per unit, one column per test case.
    UnitData,
}

impl InputFormat {
    pub fn reader(self, path: &Path) -> Box<dyn FeatureSource + Send + Sync> {
        match self {
            InputFormat::AsciiTestCase => Box::new(AsciiTestCaseReader::new(path)),
            InputFormat::UnitData => Box::new(UnitDataReader::new(path)),
        }
    }
}

/// An input line split into trimmed cells, with its 1-based line number.
/// Blank lines have no cells.
#[derive(Debug)]
struct Row<'a> {
    line: usize,
    cells: Vec<&'a str>,
}

impl Row<'_> {
    fn has_marker(&self, marker: &str) -> bool {
        self.cells.iter().any(|c| *c == marker)
    }

    fn joined(&self) -> String {
        self.cells.concat()
    }

    fn is_blank(&self) -> bool {
        self.cells.is_empty()
    }
}

fn split_rows(text: &str, delimiter: char) -> Vec<Row<'_>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| Row {
            line: i + 1,
            cells: if line.trim().is_empty() {
                Vec::new()
            } else {
                line.split(delimiter)
                    .map(|c| c.trim().trim_matches('"'))
                    .collect()
            },
        })
        .collect()
}

fn parse_value(cell: &str, line: usize) -> Result<f64> {
    if cell == MISSING_VALUE_PLACEHOLDER {
        return Ok(0.0);
    }
    cell.parse::<f64>()
        .map_err(|e| PcaError::parse(line, format!("cannot parse '{}' as a number: {}", cell, e)))
}

fn read_text(path: &Path) -> Result<String> {
    info!("Reading {}", path.display());
    Ok(fs::read_to_string(path)?)
}

// --- Unit-data export ---

/// Reader for the unit-data export.
///
/// Row 0 holds acceptance-test names and row 1 test-case names (both from
/// column 3 on); each following row is `serial, date, time, values...`.
#[derive(Debug, Clone)]
pub struct UnitDataReader {
    path: PathBuf,
    delimiter: char,
}

impl UnitDataReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: ',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn parse(text: &str, delimiter: char) -> Result<FeatureTable> {
        const FIRST_VALUE_COLUMN: usize = 3;

        let rows: Vec<Row<'_>> = split_rows(text, delimiter)
            .into_iter()
            .filter(|row| !row.is_blank())
            .collect();
        if rows.len() < 3 {
            return Err(PcaError::parse(
                rows.last().map_or(1, |r| r.line),
                "unit data needs a test-name row, a case-name row and at least one unit row",
            ));
        }

        let test_names = &rows[0].cells;
        let case_names = &rows[1].cells;
        if case_names.len() <= FIRST_VALUE_COLUMN {
            return Err(PcaError::parse(rows[1].line, "no test-case columns found"));
        }
        let labels: Vec<String> = case_names[FIRST_VALUE_COLUMN..]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if test_names.len() != case_names.len() {
            warn!(
                "Test-name row has {} cells but case-name row has {}.",
                test_names.len(),
                case_names.len()
            );
        }

        let n_features = labels.len();
        let mut unit_ids = Vec::with_capacity(rows.len() - 2);
        let mut values = Vec::with_capacity((rows.len() - 2) * n_features);
        let mut placeholders = 0usize;

        for row in &rows[2..] {
            if row.cells.len() != FIRST_VALUE_COLUMN + n_features {
                return Err(PcaError::parse(
                    row.line,
                    format!(
                        "expected {} cells, found {}",
                        FIRST_VALUE_COLUMN + n_features,
                        row.cells.len()
                    ),
                ));
            }
            unit_ids.push(row.cells[0].to_string());
            for cell in &row.cells[FIRST_VALUE_COLUMN..] {
                if *cell == MISSING_VALUE_PLACEHOLDER {
                    placeholders += 1;
                }
                values.push(parse_value(cell, row.line)?);
            }
        }
        if placeholders > 0 {
            warn!("{} missing measurements were read as 0.0.", placeholders);
        }

        let data = Array2::from_shape_vec((unit_ids.len(), n_features), values)
            .map_err(|e| PcaError::parse(rows[2].line, e.to_string()))?;
        debug!("Unit data: {} units x {} test cases", data.nrows(), data.ncols());
        FeatureTable::new(data, unit_ids, labels, None)
    }
}

impl FeatureSource for UnitDataReader {
    fn read_table(&self) -> Result<FeatureTable> {
        let text = read_text(&self.path)?;
        Self::parse(&text, self.delimiter)
    }
}

// --- ASCII test-case export ---

#[derive(Debug, Clone, Default)]
struct CaseHeader {
    product: String,
    case: String,
}

#[derive(Debug)]
struct CaseMatrix {
    header: CaseHeader,
    line: usize,
    domains: Vec<String>,
    serials: Vec<String>,
    values: Vec<Vec<f64>>,
}

#[derive(Debug)]
struct RawLimits<'a> {
    lower: Row<'a>,
    upper: Row<'a>,
}

/// Reader for the test-case data (ASCII) export.
///
/// Sections: `BEGINHEADER` (product, test and case names, data source,
/// function type, element count, an unused line, x and y units),
/// `BEGINDATA`..`ENDDATA` (domain row, then `serial, timestamp, values...`),
/// and `BEGINLIMITS`..`ENDLIMITS` (domain row, lower row, upper row).
/// Every test case becomes a block of columns labelled `"<case> <domain>"`.
#[derive(Debug, Clone)]
pub struct AsciiTestCaseReader {
    path: PathBuf,
    delimiter: char,
}

impl AsciiTestCaseReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: ',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn parse(text: &str, delimiter: char) -> Result<FeatureTable> {
        let rows = split_rows(text, delimiter);
        let mut header: Option<CaseHeader> = None;
        let mut matrices: Vec<CaseMatrix> = Vec::new();
        let mut limits: Vec<RawLimits> = Vec::new();

        let mut i = 0;
        while i < rows.len() {
            let row = &rows[i];
            if row.has_marker("BEGINHEADER") {
                let field = |offset: usize| -> Result<String> {
                    rows.get(i + offset)
                        .map(Row::joined)
                        .ok_or_else(|| PcaError::parse(row.line, "truncated BEGINHEADER section"))
                };
                header = Some(CaseHeader {
                    product: field(1)?,
                    case: field(3)?,
                });
                // Positional, blank lines included: product, test, case, source,
                // function type, elements, unused, x units, y units, unused.
                i += 11;
                continue;
            }
            if row.has_marker("BEGINDATA") {
                let current = header.clone().ok_or_else(|| {
                    PcaError::parse(row.line, "BEGINDATA before any BEGINHEADER")
                })?;
                let (matrix, next) = Self::read_data(&rows, i, current)?;
                matrices.push(matrix);
                i = next;
                continue;
            }
            if row.has_marker("BEGINLIMITS") {
                let (lower, upper) = match (rows.get(i + 2), rows.get(i + 3)) {
                    (Some(l), Some(u)) => (l, u),
                    _ => return Err(PcaError::parse(row.line, "truncated BEGINLIMITS section")),
                };
                limits.push(RawLimits {
                    lower: Row { line: lower.line, cells: lower.cells.clone() },
                    upper: Row { line: upper.line, cells: upper.cells.clone() },
                });
                i = rows[i..]
                    .iter()
                    .position(|r| r.has_marker("ENDLIMITS"))
                    .map(|p| i + p + 1)
                    .ok_or_else(|| PcaError::parse(row.line, "BEGINLIMITS without ENDLIMITS"))?;
                continue;
            }
            i += 1;
        }

        Self::stack(matrices, limits)
    }

    fn read_data(rows: &[Row<'_>], begin: usize, header: CaseHeader) -> Result<(CaseMatrix, usize)> {
        let begin_line = rows[begin].line;
        let domain_row = rows
            .get(begin + 1)
            .ok_or_else(|| PcaError::parse(begin_line, "truncated BEGINDATA section"))?;
        let domains: Vec<String> = domain_row.cells.iter().skip(2).map(|s| s.to_string()).collect();

        let mut serials = Vec::new();
        let mut values = Vec::new();
        let mut i = begin + 2;
        loop {
            let row = rows
                .get(i)
                .ok_or_else(|| PcaError::parse(begin_line, "BEGINDATA without ENDDATA"))?;
            if row.has_marker("ENDDATA") {
                break;
            }
            if row.is_blank() {
                i += 1;
                continue;
            }
            if row.cells.len() != domains.len() + 2 {
                return Err(PcaError::parse(
                    row.line,
                    format!("expected {} cells, found {}", domains.len() + 2, row.cells.len()),
                ));
            }
            serials.push(row.cells[0].to_string());
            values.push(
                row.cells[2..]
                    .iter()
                    .map(|c| parse_value(c, row.line))
                    .collect::<Result<Vec<f64>>>()?,
            );
            i += 1;
        }

        Ok((
            CaseMatrix {
                header,
                line: begin_line,
                domains,
                serials,
                values,
            },
            i + 1,
        ))
    }

    fn parse_limit_row(row: &Row<'_>, n: usize) -> Result<Vec<f64>> {
        if row.cells.len() < n {
            return Err(PcaError::parse(
                row.line,
                format!("limit row has {} cells, expected at least {}", row.cells.len(), n),
            ));
        }
        row.cells[row.cells.len() - n..]
            .iter()
            .map(|c| parse_value(c, row.line))
            .collect()
    }

    fn stack(matrices: Vec<CaseMatrix>, limits: Vec<RawLimits<'_>>) -> Result<FeatureTable> {
        let first = matrices
            .first()
            .ok_or_else(|| PcaError::parse(1, "no BEGINDATA section found"))?;
        let unit_ids = first.serials.clone();
        let n_units = unit_ids.len();

        for m in &matrices[1..] {
            if m.serials != unit_ids {
                return Err(PcaError::parse(
                    m.line,
                    format!(
                        "test case '{}' lists different units than test case '{}'",
                        m.header.case, first.header.case
                    ),
                ));
            }
        }

        let keep_limits = if limits.is_empty() {
            false
        } else if limits.len() != matrices.len() {
            warn!(
                "Found {} limit sections for {} test cases; ignoring limits.",
                limits.len(),
                matrices.len()
            );
            false
        } else {
            true
        };

        let n_features: usize = matrices.iter().map(|m| m.domains.len()).sum();
        let mut data = Array2::<f64>::zeros((n_units, n_features));
        let mut labels = Vec::with_capacity(n_features);
        let mut limit_pairs = Vec::with_capacity(if keep_limits { n_features } else { 0 });

        let mut offset = 0;
        for (k, m) in matrices.iter().enumerate() {
            for (u, unit_values) in m.values.iter().enumerate() {
                for (j, v) in unit_values.iter().enumerate() {
                    data[[u, offset + j]] = *v;
                }
            }
            labels.extend(m.domains.iter().map(|d| format!("{} {}", m.header.case, d)));
            if keep_limits {
                let lower = Self::parse_limit_row(&limits[k].lower, m.domains.len())?;
                let upper = Self::parse_limit_row(&limits[k].upper, m.domains.len())?;
                limit_pairs.extend(lower.into_iter().zip(upper).map(|(l, u)| LimitPair::new(l, u)));
            }
            offset += m.domains.len();
        }

        info!(
            "Stacked {} test case(s) of product '{}': {} units x {} features.",
            matrices.len(),
            first.header.product,
            n_units,
            n_features
        );
        FeatureTable::new(data, unit_ids, labels, keep_limits.then_some(limit_pairs))
    }
}

impl FeatureSource for AsciiTestCaseReader {
    fn read_table(&self) -> Result<FeatureTable> {
        let text = read_text(&self.path)?;
        Self::parse(&text, self.delimiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const UNIT_DATA: &str = "\
Serial,Date,Time,1-GOPEN,1-GOPEN,2-CLOSE
,,,RL Start Click,RL Run,Stop Click
A001,2017-08-01,10:00,1.5,2.0,3.0
A002,2017-08-01,10:05,--------,2.5,3.5

A003,2017-08-01,10:09,1.0,2.25,4.0
";

    const ASCII_CASES: &str = "\
BEGINHEADER
Gearbox
1-GOPEN
Order Track
Mic 1
Spectrum
3
0
Hz
dB
x
BEGINDATA
Serial,Time,100,200,300
U1,t0,1,2,3
U2,t1,4,5,6
ENDDATA
BEGINLIMITS
Domain,,100,200,300
Lower,,0,0,0
Upper,,5,5,5
ENDLIMITS
BEGINHEADER
Gearbox
1-GOPEN
Peak
Mic 1
Scalar
1
0
-
g
x
BEGINDATA
Serial,Time,Peak
U1,t0,7
U2,t1,8
ENDDATA
BEGINLIMITS
Domain,,Peak
Lower,,6
Upper,,7.5
ENDLIMITS
";

    #[test]
    fn test_unit_data_parsing() {
        let table = UnitDataReader::parse(UNIT_DATA, ',').unwrap();
        assert_eq!(table.unit_ids(), &["A001", "A002", "A003"]);
        assert_eq!(table.labels(), &["RL Start Click", "RL Run", "Stop Click"]);
        assert_eq!(
            table.data(),
            array![[1.5, 2.0, 3.0], [0.0, 2.5, 3.5], [1.0, 2.25, 4.0]]
        );
        assert!(table.limits().is_none());
    }

    #[test]
    fn test_unit_data_ragged_row() {
        let text = "a,b,c,t1\n,,,c1\nU1,d,t,1.0,2.0\n";
        let err = UnitDataReader::parse(text, ',').unwrap_err();
        assert!(matches!(err, PcaError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_unit_data_tab_delimited() {
        let text = "S\tD\tT\tt1\n\t\t\tc1\nU1\td\tt\t4.5\nU2\td\tt\t5.5\n";
        let table = UnitDataReader::parse(text, '\t').unwrap();
        assert_eq!(table.data(), array![[4.5], [5.5]]);
    }

    #[test]
    fn test_ascii_stacks_test_cases() {
        let table = AsciiTestCaseReader::parse(ASCII_CASES, ',').unwrap();
        assert_eq!(table.unit_ids(), &["U1", "U2"]);
        assert_eq!(
            table.labels(),
            &["Order Track 100", "Order Track 200", "Order Track 300", "Peak Peak"]
        );
        assert_eq!(table.data(), array![[1.0, 2.0, 3.0, 7.0], [4.0, 5.0, 6.0, 8.0]]);

        let limits = table.limits().unwrap();
        assert_eq!(limits.len(), 4);
        assert_eq!(limits[0], LimitPair::new(0.0, 5.0));
        assert_eq!(limits[3], LimitPair::new(6.0, 7.5));
        assert_eq!(table.limit_violations(), vec![0, 2]);
    }

    #[test]
    fn test_ascii_header_with_blank_unused_lines() {
        let text = "\
BEGINHEADER
Gearbox
1-GOPEN
Peak
Mic 1
Scalar
1

-
g

BEGINDATA
Serial,Time,Peak
U1,t0,7

U2,t1,8
ENDDATA
";
        let table = AsciiTestCaseReader::parse(text, ',').unwrap();
        assert_eq!(table.unit_ids(), &["U1", "U2"]);
        assert_eq!(table.labels(), &["Peak Peak"]);
        assert_eq!(table.data(), array![[7.0], [8.0]]);
    }

    #[test]
    fn test_ascii_rejects_inconsistent_units() {
        let text = ASCII_CASES.replacen("U2,t1,8", "U3,t1,8", 1);
        let err = AsciiTestCaseReader::parse(&text, ',').unwrap_err();
        assert!(matches!(err, PcaError::Parse { .. }));
    }

    #[test]
    fn test_ascii_data_without_end() {
        let text = "BEGINHEADER\nP\nT\nC\nS\nF\n1\n0\nx\ny\nz\nBEGINDATA\nS,T,1\nU1,t,1\n";
        let err = AsciiTestCaseReader::parse(text, ',').unwrap_err();
        assert!(matches!(err, PcaError::Parse { .. }));
    }

    #[test]
    fn test_ascii_drops_partial_limits() {
        let text = ASCII_CASES.replacen("BEGINLIMITS\nDomain,,Peak\nLower,,6\nUpper,,7.5\nENDLIMITS\n", "", 1);
        let table = AsciiTestCaseReader::parse(&text, ',').unwrap();
        assert!(table.limits().is_none());
    }
}
