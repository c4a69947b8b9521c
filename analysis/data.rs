//! # Cohort Loading and Validation Module
//!
//! This module is the exclusive entry point for user-provided data. It reads a
//! headered delimited table of clinical measurements, validates it against the
//! fixed schema the analysis depends on, and resolves every coded categorical
//! field into a typed enum exactly once.
//!
//! - Strict Schema: `age`, `sex`, `thalach` and `target` must be present. Every
//!   other numeric column is carried along by name as a clinical measurement.
//! - User-Centric Errors: Failures are assumed to be user-input errors. The
//!   `LoadError` enum is designed to provide clear, actionable feedback.
//! - Immutability: a `Dataset` never changes after loading. Derived columns
//!   (the predicted outcome) are attached by building a new `Dataset`.

use crate::types::{FeatureRecord, FeatureValue, PredictorKind, TermSpec, level_label};
use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const AGE: &str = "age";
pub const SEX: &str = "sex";
pub const THALACH: &str = "thalach";
pub const TARGET: &str = "target";
/// Name of the derived column holding thresholded model predictions.
pub const PREDICTED: &str = "predicted";

const REQUIRED_COLUMNS: [&str; 4] = [AGE, SEX, THALACH, TARGET];

/// Biological sex, recoded from the `sex` column (0 = female, 1 = male).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl Sex {
    /// Canonical level order; the first level is the regression reference.
    pub const LEVELS: [Sex; 2] = [Sex::Female, Sex::Male];

    pub fn from_code(code: f64) -> Option<Self> {
        if code == 0.0 {
            Some(Sex::Female)
        } else if code == 1.0 {
            Some(Sex::Male)
        } else {
            None
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Sex::Female => 0,
            Sex::Male => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sex::Female => "Female",
            Sex::Male => "Male",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Heart-disease status, recoded from the binary `target` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    NoDisease,
    Disease,
}

impl Outcome {
    pub fn from_code(code: f64) -> Option<Self> {
        if code == 0.0 {
            Some(Outcome::NoDisease)
        } else if code == 1.0 {
            Some(Outcome::Disease)
        } else {
            None
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Outcome::NoDisease => 0,
            Outcome::Disease => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::NoDisease => "No disease",
            Outcome::Disease => "Disease",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One patient observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Age in years.
    pub age: f64,
    pub sex: Sex,
    /// Maximum heart rate achieved during exercise testing.
    pub thalach: f64,
    pub target: Outcome,
    /// Every other numeric column of the input (resting blood pressure, cholesterol, ...),
    /// keyed by its header name.
    pub clinical: BTreeMap<String, f64>,
    /// Thresholded model prediction, present once a prediction batch has been attached.
    pub predicted: Option<Outcome>,
}

/// A categorical view of a column: observed levels in canonical order plus one code per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub levels: Vec<String>,
    pub codes: Vec<usize>,
}

impl Factor {
    /// Number of rows falling in each level.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.levels.len()];
        for &code in &self.codes {
            counts[code] += 1;
        }
        counts
    }
}

/// Failures when reading the input table.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse the delimited input: {0}")]
    CsvError(#[from] csv::Error),
    #[error(
        "Line {line} has {found} fields, but the header declares {expected}. Every row must have the same number of columns."
    )]
    RaggedRow { line: u64, expected: u64, found: u64 },
    #[error("The input file contains no data rows.")]
    NoRows,
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error(
        "Column '{column}' holds the value {value} at data row {row}, which is outside the coded domain {{0, 1}}."
    )]
    OutOfDomain {
        column: String,
        row: usize,
        value: f64,
    },
    #[error(
        "Record {row} does not share the field set of the first record. All records must have identical columns."
    )]
    InconsistentRecord { row: usize },
}

/// Failures when addressing a column of a loaded `Dataset`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColumnError {
    #[error("Column '{0}' does not exist in the dataset.")]
    NotFound(String),
    #[error("Column '{column}' is {actual} and cannot be read as {requested}.")]
    WrongKind {
        column: String,
        actual: &'static str,
        requested: &'static str,
    },
    #[error("Column '{column}' holds {value} at row {row}; a binary column must be coded 0/1.")]
    NotBinary {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("The dataset carries no 'predicted' column yet; attach a prediction batch first.")]
    NoPredictions,
    #[error("Received {found} predicted labels for a dataset of {expected} records.")]
    LengthMismatch { expected: usize, found: usize },
}

/// Options controlling how the input table is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Field delimiter, `b','` for comma-separated files.
    pub separator: u8,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { separator: b',' }
    }
}

impl Record {
    /// Reads a field as a number. `sex` is categorical and never read numerically.
    pub fn numeric_value(&self, name: &str) -> Result<f64, ColumnError> {
        match name {
            AGE => Ok(self.age),
            THALACH => Ok(self.thalach),
            TARGET => Ok(f64::from(self.target.code())),
            PREDICTED => self
                .predicted
                .map(|outcome| f64::from(outcome.code()))
                .ok_or(ColumnError::NoPredictions),
            SEX => Err(ColumnError::WrongKind {
                column: SEX.to_string(),
                actual: "categorical",
                requested: "a numeric column",
            }),
            other => self
                .clinical
                .get(other)
                .copied()
                .ok_or_else(|| ColumnError::NotFound(other.to_string())),
        }
    }

    /// Reads a field as a categorical level label.
    pub fn level_value(&self, name: &str) -> Result<String, ColumnError> {
        self.level_entry(name).map(|(_, label)| label)
    }

    /// Extracts the value a term needs, in the representation its kind implies.
    pub fn feature(&self, term: &TermSpec) -> Result<FeatureValue, ColumnError> {
        match term.kind {
            PredictorKind::Continuous => self.numeric_value(&term.name).map(FeatureValue::Numeric),
            PredictorKind::Categorical => self.level_value(&term.name).map(FeatureValue::Level),
        }
    }

    // Level label plus the key that fixes its canonical position.
    fn level_entry(&self, name: &str) -> Result<(f64, String), ColumnError> {
        match name {
            SEX => Ok((f64::from(self.sex.code()), self.sex.label().to_string())),
            TARGET => Ok((
                f64::from(self.target.code()),
                self.target.label().to_string(),
            )),
            PREDICTED => self
                .predicted
                .map(|outcome| (f64::from(outcome.code()), outcome.label().to_string()))
                .ok_or(ColumnError::NoPredictions),
            other => self
                .numeric_value(other)
                .map(|value| (value, level_label(value))),
        }
    }

    fn has_same_fields(&self, other: &Record) -> bool {
        self.predicted.is_some() == other.predicted.is_some()
            && self.clinical.len() == other.clinical.len()
            && self.clinical.keys().zip(other.clinical.keys()).all(|(a, b)| a == b)
    }
}

/// An ordered, immutable collection of records sharing one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    /// Builds a dataset, enforcing that every record carries the same field set.
    pub fn from_records(records: Vec<Record>) -> Result<Self, LoadError> {
        if let Some(first) = records.first() {
            if let Some(row) = records.iter().position(|r| !first.has_same_fields(r)) {
                return Err(LoadError::InconsistentRecord { row: row + 1 });
            }
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_predictions(&self) -> bool {
        self.records.first().is_some_and(|r| r.predicted.is_some())
    }

    /// All addressable column names, required columns first.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = REQUIRED_COLUMNS.iter().map(|s| s.to_string()).collect();
        if let Some(first) = self.records.first() {
            names.extend(first.clinical.keys().cloned());
        }
        if self.has_predictions() {
            names.push(PREDICTED.to_string());
        }
        names
    }

    pub fn numeric_column(&self, name: &str) -> Result<Array1<f64>, ColumnError> {
        self.records
            .iter()
            .map(|r| r.numeric_value(name))
            .collect::<Result<Vec<_>, _>>()
            .map(Array1::from_vec)
    }

    /// A 0/1 column, e.g. `target` or `predicted`.
    pub fn binary_column(&self, name: &str) -> Result<Vec<u8>, ColumnError> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let value = r.numeric_value(name)?;
                if value == 0.0 {
                    Ok(0)
                } else if value == 1.0 {
                    Ok(1)
                } else {
                    Err(ColumnError::NotBinary {
                        column: name.to_string(),
                        row: i + 1,
                        value,
                    })
                }
            })
            .collect()
    }

    /// A categorical view of a column. Only observed levels are listed, in canonical order
    /// (the fixed enum order for `sex` and outcomes, numeric order otherwise).
    pub fn factor_column(&self, name: &str) -> Result<Factor, ColumnError> {
        let entries = self
            .records
            .iter()
            .map(|r| r.level_entry(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by(|&a, &b| entries[a].0.total_cmp(&entries[b].0));

        // Walking rows in level order assigns each row the index of its own level.
        let mut levels: Vec<String> = Vec::new();
        let mut codes = vec![0; entries.len()];
        for row in order {
            let label = &entries[row].1;
            if levels.last() != Some(label) {
                levels.push(label.clone());
            }
            codes[row] = levels.len() - 1;
        }
        Ok(Factor { levels, codes })
    }

    /// Projects every record onto the given terms, for bulk prediction.
    pub fn feature_records(&self, terms: &[TermSpec]) -> Result<Vec<FeatureRecord>, ColumnError> {
        self.records
            .iter()
            .map(|record| {
                let mut features = FeatureRecord::new();
                for term in terms {
                    features.insert(term.name.clone(), record.feature(term)?);
                }
                Ok(features)
            })
            .collect()
    }

    /// Returns a new dataset with the `predicted` column set on every record.
    pub fn with_predictions(&self, labels: &[u8]) -> Result<Dataset, ColumnError> {
        if labels.len() != self.records.len() {
            return Err(ColumnError::LengthMismatch {
                expected: self.records.len(),
                found: labels.len(),
            });
        }
        let outcomes = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                Outcome::from_code(f64::from(label)).ok_or(ColumnError::NotBinary {
                    column: PREDICTED.to_string(),
                    row: i + 1,
                    value: f64::from(label),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let records = self
            .records
            .iter()
            .zip(outcomes)
            .map(|(record, outcome)| Record {
                predicted: Some(outcome),
                ..record.clone()
            })
            .collect();
        Ok(Dataset { records })
    }
}

/// Loads and validates a cohort table.
pub fn load_dataset(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Dataset, LoadError> {
    let path = path.as_ref();
    log::info!("Loading data from '{}'", path.display());

    internal::check_row_lengths(path, options.separator)?;
    let df = internal::read_frame(path, options.separator)?;
    if df.height() == 0 {
        return Err(LoadError::NoRows);
    }

    let columns_set: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for col_name in REQUIRED_COLUMNS {
        if !columns_set.contains(col_name) {
            return Err(LoadError::ColumnNotFound(col_name.to_string()));
        }
    }

    let age = internal::extract_numeric_column(&df, AGE)?;
    let sex = internal::recode(&internal::extract_numeric_column(&df, SEX)?, SEX, Sex::from_code)?;
    let thalach = internal::extract_numeric_column(&df, THALACH)?;
    let target = internal::recode(
        &internal::extract_numeric_column(&df, TARGET)?,
        TARGET,
        Outcome::from_code,
    )?;

    let clinical_columns = internal::extract_clinical_columns(&df)?;

    let records = (0..df.height())
        .map(|i| Record {
            age: age[i],
            sex: sex[i],
            thalach: thalach[i],
            target: target[i],
            clinical: clinical_columns
                .iter()
                .map(|(name, values)| (name.clone(), values[i]))
                .collect(),
            predicted: None,
        })
        .collect();

    log::info!(
        "Loaded {} records with {} additional clinical columns",
        df.height(),
        clinical_columns.len()
    );
    Dataset::from_records(records)
}

/// Internal module for shared data loading logic.
mod internal {
    use super::*;

    /// Structural pass: every row must have as many fields as the header.
    pub(super) fn check_row_lengths(path: &Path, separator: u8) -> Result<(), LoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(true)
            .flexible(false)
            .from_reader(File::open(path)?);
        for record in reader.records() {
            record.map_err(into_load_error)?;
        }
        Ok(())
    }

    fn into_load_error(err: csv::Error) -> LoadError {
        if let csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } = err.kind()
        {
            return LoadError::RaggedRow {
                line: pos.as_ref().map(|p| p.line()).unwrap_or_default(),
                expected: *expected_len,
                found: *len,
            };
        }
        LoadError::CsvError(err)
    }

    pub(super) fn read_frame(path: &Path, separator: u8) -> Result<DataFrame, LoadError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None)
                    .with_parse_options(CsvParseOptions::default().with_separator(separator)),
            )
            .finish()?;
        Ok(df)
    }

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<f64>, LoadError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(LoadError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(LoadError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        if casted.null_count() > 0 {
            return Err(LoadError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(LoadError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    /// Maps a 0/1 coded column through a fixed lookup.
    pub(super) fn recode<T>(
        values: &[f64],
        column: &str,
        lookup: impl Fn(f64) -> Option<T>,
    ) -> Result<Vec<T>, LoadError> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                lookup(value).ok_or_else(|| LoadError::OutOfDomain {
                    column: column.to_string(),
                    row: i + 1,
                    value,
                })
            })
            .collect()
    }

    /// Every non-required column that is complete and numeric.
    pub(super) fn extract_clinical_columns(
        df: &DataFrame,
    ) -> Result<Vec<(String, Vec<f64>)>, LoadError> {
        let mut columns = Vec::new();
        for name in df.get_column_names() {
            let name = name.to_string();
            if REQUIRED_COLUMNS.contains(&name.as_str()) || name == PREDICTED {
                continue;
            }
            match extract_numeric_column(df, &name) {
                Ok(values) => columns.push((name, values)),
                Err(LoadError::PolarsError(e)) => return Err(LoadError::PolarsError(e)),
                Err(reason) => log::warn!("Ignoring column '{name}': {reason}"),
            }
        }
        Ok(columns)
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    /// A robust helper to create a temporary CSV file for testing.
    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    const HEADER: &str = "age,sex,cp,trestbps,chol,thalach,target";

    fn load(content: &str) -> Result<Dataset, LoadError> {
        let file = create_test_csv(content).unwrap();
        load_dataset(file.path(), &LoadOptions::default())
    }

    #[test]
    fn test_load_dataset_success() {
        let content = format!(
            "{HEADER}\n63,1,3,145,233,150,1\n37,1,2,130,250,187,1\n41,0,1,130,204,172,0"
        );
        let data = load(&content).unwrap();

        assert_eq!(data.len(), 3);
        let first = &data.records()[0];
        assert_abs_diff_eq!(first.age, 63.0, epsilon = 1e-12);
        assert_eq!(first.sex, Sex::Male);
        assert_abs_diff_eq!(first.thalach, 150.0, epsilon = 1e-12);
        assert_eq!(first.target, Outcome::Disease);
        assert_eq!(first.clinical.get("chol"), Some(&233.0));
        assert_eq!(first.predicted, None);

        let third = &data.records()[2];
        assert_eq!(third.sex, Sex::Female);
        assert_eq!(third.sex.label(), "Female");
        assert_eq!(third.target.label(), "No disease");

        assert_eq!(
            data.column_names(),
            vec!["age", "sex", "thalach", "target", "chol", "cp", "trestbps"]
        );
    }

    #[test]
    fn test_tab_separator() {
        let content = "age\tsex\tthalach\ttarget\n50\t0\t160\t0\n60\t1\t120\t1";
        let file = create_test_csv(content).unwrap();
        let data = load_dataset(file.path(), &LoadOptions { separator: b'\t' }).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.records()[1].sex, Sex::Male);
    }

    #[test]
    fn test_error_missing_file() {
        let err = load_dataset("/definitely/not/here.csv", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::IoError(_)), "got {err:?}");
    }

    #[test]
    fn test_error_ragged_row() {
        let content = format!("{HEADER}\n63,1,3,145,233,150,1\n37,1,2,130,250,187");
        match load(&content).unwrap_err() {
            LoadError::RaggedRow {
                line,
                expected,
                found,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 7);
                assert_eq!(found, 6);
            }
            other => panic!("Expected RaggedRow, got {other:?}"),
        }
    }

    #[test]
    fn test_error_column_not_found() {
        let content = "age,sex,target\n63,1,1\n37,0,0";
        match load(content).unwrap_err() {
            LoadError::ColumnNotFound(col) => assert_eq!(col, "thalach"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_error_sex_outside_domain() {
        let content = format!("{HEADER}\n63,1,3,145,233,150,1\n37,2,2,130,250,187,1");
        match load(&content).unwrap_err() {
            LoadError::OutOfDomain { column, row, value } => {
                assert_eq!(column, "sex");
                assert_eq!(row, 2);
                assert_abs_diff_eq!(value, 2.0);
            }
            other => panic!("Expected OutOfDomain, got {other:?}"),
        }
    }

    #[test]
    fn test_error_target_outside_domain() {
        let content = format!("{HEADER}\n63,1,3,145,233,150,3");
        assert!(matches!(
            load(&content).unwrap_err(),
            LoadError::OutOfDomain { ref column, .. } if column == "target"
        ));
    }

    #[test]
    fn test_error_missing_values() {
        let content = format!("{HEADER}\n63,1,3,145,233,,1\n37,1,2,130,250,187,1");
        match load(&content).unwrap_err() {
            LoadError::MissingValuesFound(col) => assert_eq!(col, "thalach"),
            other => panic!("Expected MissingValuesFound, got {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_extra_column_is_ignored() {
        let content = "age,sex,thalach,target,site\n63,1,150,1,north\n37,0,187,0,south";
        let data = load(content).unwrap();
        assert!(data.records()[0].clinical.is_empty());
    }

    #[test]
    fn test_types_are_inferred_from_every_row() {
        let mut content = String::from("age,sex,thalach,target,site");
        for i in 0..150 {
            let thalach = if i == 119 {
                "150.5".to_string()
            } else {
                (140 + i % 40).to_string()
            };
            let site = if i < 130 { "1" } else { "north" };
            content.push_str(&format!("\n{},{},{thalach},{},{site}", 40 + i % 30, i % 2, i % 2));
        }
        let data = load(&content).unwrap();

        assert_eq!(data.len(), 150);
        assert_abs_diff_eq!(data.records()[119].thalach, 150.5, epsilon = 1e-12);
        assert_abs_diff_eq!(data.records()[0].thalach, 140.0, epsilon = 1e-12);
        assert!(data.records().iter().all(|r| r.clinical.is_empty()));
    }

    #[test]
    fn test_error_no_rows() {
        assert!(matches!(
            load("age,sex,thalach,target").unwrap_err(),
            LoadError::NoRows
        ));
    }

    fn record(age: f64, sex: Sex, thalach: f64, target: Outcome, cp: f64) -> Record {
        Record {
            age,
            sex,
            thalach,
            target,
            clinical: BTreeMap::from([("cp".to_string(), cp)]),
            predicted: None,
        }
    }

    fn small_dataset() -> Dataset {
        Dataset::from_records(vec![
            record(50.0, Sex::Male, 140.0, Outcome::Disease, 2.0),
            record(40.0, Sex::Female, 170.0, Outcome::NoDisease, 0.0),
            record(60.0, Sex::Male, 120.0, Outcome::Disease, 2.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_factor_column_uses_canonical_order() {
        let data = small_dataset();
        let sex = data.factor_column("sex").unwrap();
        assert_eq!(sex.levels, vec!["Female", "Male"]);
        assert_eq!(sex.codes, vec![1, 0, 1]);
        assert_eq!(sex.counts(), vec![1, 2]);

        let cp = data.factor_column("cp").unwrap();
        assert_eq!(cp.levels, vec!["0", "2"]);
        assert_eq!(cp.codes, vec![1, 0, 1]);
        assert_eq!(cp.counts(), vec![1, 2]);
    }

    #[test]
    fn test_sex_is_never_numeric() {
        let data = small_dataset();
        assert!(matches!(
            data.numeric_column("sex").unwrap_err(),
            ColumnError::WrongKind { .. }
        ));
        assert_eq!(data.binary_column("target").unwrap(), vec![1, 0, 1]);
        assert!(matches!(
            data.binary_column("cp").unwrap_err(),
            ColumnError::NotBinary { row: 1, .. }
        ));
        assert!(matches!(
            data.numeric_column("chol").unwrap_err(),
            ColumnError::NotFound(_)
        ));
    }

    #[test]
    fn test_with_predictions_is_atomic_and_pure() {
        let data = small_dataset();
        assert!(matches!(
            data.binary_column(PREDICTED).unwrap_err(),
            ColumnError::NoPredictions
        ));
        assert!(matches!(
            data.with_predictions(&[1, 0]).unwrap_err(),
            ColumnError::LengthMismatch {
                expected: 3,
                found: 2
            }
        ));
        assert!(data.with_predictions(&[1, 0, 2]).is_err());

        let predicted = data.with_predictions(&[1, 0, 0]).unwrap();
        assert!(!data.has_predictions());
        assert!(predicted.has_predictions());
        assert_eq!(predicted.binary_column(PREDICTED).unwrap(), vec![1, 0, 0]);
        assert_eq!(
            predicted.records()[0].level_value(PREDICTED).unwrap(),
            "Disease"
        );
    }

    #[test]
    fn test_inconsistent_records_rejected() {
        let mut odd = record(45.0, Sex::Female, 150.0, Outcome::NoDisease, 1.0);
        odd.clinical.clear();
        let err = Dataset::from_records(vec![
            record(50.0, Sex::Male, 140.0, Outcome::Disease, 2.0),
            odd,
        ])
        .unwrap_err();
        assert!(matches!(err, LoadError::InconsistentRecord { row: 2 }));
    }

    #[test]
    fn test_feature_records_follow_term_kinds() {
        let data = small_dataset();
        let terms = vec![TermSpec::continuous("age"), TermSpec::categorical("sex")];
        let features = data.feature_records(&terms).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[1].get("age"), Some(&FeatureValue::Numeric(40.0)));
        assert_eq!(
            features[1].get("sex"),
            Some(&FeatureValue::Level("Female".to_string()))
        );
    }
}
