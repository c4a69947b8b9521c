use crate::types::{FeatureRecord, FeatureValue, PredictorKind, TermSpec, level_label};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a fitted model
// when serialized to a TOML file.

/// Name given to the intercept coefficient.
pub const INTERCEPT: &str = "(Intercept)";

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    /// The logit link, for binary outcomes (logistic regression).
    /// Maps probabilities (0, 1) to the real line (-inf, +inf).
    Logit,
}

impl LinkFunction {
    /// Maps a linear predictor onto the probability scale.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            LinkFunction::Logit => {
                // Clamp eta to prevent numerical overflow in exp()
                let eta = eta.clamp(-700.0, 700.0);
                1.0 / (1.0 + (-eta).exp())
            }
        }
    }
}

/// How one predictor was encoded when the model was fitted.
///
/// Continuous terms contribute one column. Categorical terms contribute one dummy
/// column per level after the first, which serves as the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermSchema {
    pub name: String,
    pub kind: PredictorKind,
    /// Observed levels in canonical order; empty for continuous terms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<String>,
}

impl TermSchema {
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PredictorKind::Continuous,
            levels: Vec::new(),
        }
    }

    pub fn categorical(name: impl Into<String>, levels: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: PredictorKind::Categorical,
            levels,
        }
    }

    /// Number of design-matrix columns this term occupies.
    pub fn width(&self) -> usize {
        match self.kind {
            PredictorKind::Continuous => 1,
            PredictorKind::Categorical => self.levels.len().saturating_sub(1),
        }
    }

    /// Coefficient names in design order, e.g. `age` or `sexMale`.
    pub fn column_names(&self) -> Vec<String> {
        match self.kind {
            PredictorKind::Continuous => vec![self.name.clone()],
            PredictorKind::Categorical => self
                .levels
                .iter()
                .skip(1)
                .map(|level| format!("{}{}", self.name, level))
                .collect(),
        }
    }

    pub fn spec(&self) -> TermSpec {
        TermSpec {
            name: self.name.clone(),
            kind: self.kind,
        }
    }

    /// Appends this term's encoded columns for one value.
    fn encode(&self, value: &FeatureValue, out: &mut Vec<f64>) -> Result<(), FeatureMismatch> {
        match (self.kind, value) {
            (PredictorKind::Continuous, FeatureValue::Numeric(x)) => {
                if !x.is_finite() {
                    return Err(FeatureMismatch::NonFinite(self.name.clone()));
                }
                out.push(*x);
                Ok(())
            }
            (PredictorKind::Continuous, FeatureValue::Level(level)) => {
                Err(FeatureMismatch::WrongKind {
                    name: self.name.clone(),
                    expected: "a number",
                    found: format!("level \"{level}\""),
                })
            }
            (PredictorKind::Categorical, value) => {
                let level = match value {
                    FeatureValue::Level(level) => level.clone(),
                    FeatureValue::Numeric(code) => level_label(*code),
                };
                let position = self.levels.iter().position(|l| *l == level).ok_or_else(|| {
                    FeatureMismatch::UnknownLevel {
                        name: self.name.clone(),
                        level: level.clone(),
                        known: self.levels.join(", "),
                    }
                })?;
                out.extend((1..self.levels.len()).map(|j| if j == position { 1.0 } else { 0.0 }));
                Ok(())
            }
        }
    }
}

/// One estimated coefficient on the log-odds scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_error: Option<f64>,
}

impl Coefficient {
    /// Wald statistic `estimate / std_error`.
    pub fn z_value(&self) -> Option<f64> {
        self.std_error
            .filter(|se| *se > 0.0)
            .map(|se| self.estimate / se)
    }

    /// Two-sided p-value of the Wald test against zero.
    pub fn p_value(&self) -> Option<f64> {
        let z = self.z_value()?;
        let normal = Normal::new(0.0, 1.0).ok()?;
        Some(2.0 * normal.sf(z.abs()))
    }
}

/// Goodness-of-fit figures recorded at the end of fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub observations: usize,
    pub iterations: usize,
    /// Deviance of the intercept-only model.
    pub null_deviance: f64,
    /// Residual deviance, -2 * log-likelihood for 0/1 outcomes.
    pub deviance: f64,
    pub aic: f64,
}

/// The top-level, self-contained, fitted model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub link: LinkFunction,
    pub outcome: String,
    pub statistics: FitStatistics,
    /// Predictor schema, in design order. Prediction inputs must match it exactly.
    pub terms: Vec<TermSchema>,
    /// Intercept first, then each term's columns in `terms` order.
    pub coefficients: Vec<Coefficient>,
}

/// A single prediction input that does not fit the model's schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureMismatch {
    #[error("required feature '{0}' is missing")]
    Missing(String),
    #[error("feature '{0}' was not part of the fitted model")]
    Unexpected(String),
    #[error("feature '{name}' must be {expected}, got {found}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: String,
    },
    #[error("feature '{name}' has level \"{level}\", unseen during fitting (known levels: {known})")]
    UnknownLevel {
        name: String,
        level: String,
        known: String,
    },
    #[error("feature '{0}' is not a finite number")]
    NonFinite(String),
    #[error("encoded row has {found} columns, the model expects {expected}")]
    EncodedWidth { expected: usize, found: usize },
}

/// A fitted model whose contents are internally inconsistent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("The model has {found} coefficients, but its terms require {expected} (intercept included).")]
    CoefficientCount { expected: usize, found: usize },
    #[error("Coefficient {position} is named '{found}', but the term layout implies '{expected}'.")]
    CoefficientName {
        position: usize,
        expected: String,
        found: String,
    },
    #[error("Coefficient '{0}' has no standard error.")]
    MissingStandardError(String),
    #[error("Coefficient '{term}' has an invalid standard error ({value}).")]
    InvalidStandardError { term: String, value: f64 },
    #[error("Coefficient '{0}' has a non-finite estimate.")]
    NonFiniteEstimate(String),
    #[error("Categorical term '{0}' needs at least two levels.")]
    DegenerateTerm(String),
    #[error("Term '{0}' appears more than once.")]
    DuplicateTerm(String),
}

/// Custom error type for model loading and saving.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("The model file is malformed: {0}")]
    Invalid(#[from] ValidationError),
}

impl FittedModel {
    /// Coefficient names implied by the term layout, intercept first.
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once(INTERCEPT.to_string())
            .chain(self.terms.iter().flat_map(TermSchema::column_names))
            .collect()
    }

    pub fn term_specs(&self) -> Vec<TermSpec> {
        self.terms.iter().map(TermSchema::spec).collect()
    }

    pub fn coefficient(&self, term: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.term == term)
    }

    pub fn estimates(&self) -> Array1<f64> {
        self.coefficients.iter().map(|c| c.estimate).collect()
    }

    /// Checks the structural invariants every consumer of the model relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for term in &self.terms {
            if !seen.insert(term.name.as_str()) {
                return Err(ValidationError::DuplicateTerm(term.name.clone()));
            }
            if term.kind == PredictorKind::Categorical && term.levels.len() < 2 {
                return Err(ValidationError::DegenerateTerm(term.name.clone()));
            }
        }

        let expected = self.column_names();
        if expected.len() != self.coefficients.len() {
            return Err(ValidationError::CoefficientCount {
                expected: expected.len(),
                found: self.coefficients.len(),
            });
        }
        for (position, (name, coefficient)) in expected.iter().zip(&self.coefficients).enumerate() {
            if *name != coefficient.term {
                return Err(ValidationError::CoefficientName {
                    position,
                    expected: name.clone(),
                    found: coefficient.term.clone(),
                });
            }
            if !coefficient.estimate.is_finite() {
                return Err(ValidationError::NonFiniteEstimate(coefficient.term.clone()));
            }
            if let Some(se) = coefficient.std_error {
                if !se.is_finite() || se < 0.0 {
                    return Err(ValidationError::InvalidStandardError {
                        term: coefficient.term.clone(),
                        value: se,
                    });
                }
            }
        }
        Ok(())
    }

    /// Saves the model to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a model from a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: FittedModel = toml::from_str(&toml_string)?;
        model.validate()?;
        Ok(model)
    }
}

/// Encodes records against a term schema, producing a design matrix with a leading
/// intercept column. On failure, reports the zero-based row that did not fit.
pub fn design_matrix(
    terms: &[TermSchema],
    records: &[FeatureRecord],
) -> Result<Array2<f64>, (usize, FeatureMismatch)> {
    let width = 1 + terms.iter().map(TermSchema::width).sum::<usize>();
    let mut x = Array2::zeros((records.len(), width));
    let mut buffer = Vec::with_capacity(width);

    for (row, record) in records.iter().enumerate() {
        if let Some(extra) = record
            .names()
            .find(|name| !terms.iter().any(|t| t.name == *name))
        {
            return Err((row, FeatureMismatch::Unexpected(extra.to_string())));
        }
        buffer.clear();
        buffer.push(1.0);
        for term in terms {
            let value = record
                .get(&term.name)
                .ok_or_else(|| (row, FeatureMismatch::Missing(term.name.clone())))?;
            term.encode(value, &mut buffer).map_err(|e| (row, e))?;
        }
        if buffer.len() != width {
            return Err((
                row,
                FeatureMismatch::EncodedWidth {
                    expected: width,
                    found: buffer.len(),
                },
            ));
        }
        x.row_mut(row).assign(&ArrayView1::from(buffer.as_slice()));
    }

    Ok(x)
}
