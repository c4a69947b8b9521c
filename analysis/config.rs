//! Run configuration, read from TOML. Every field has a default reproducing the
//! standard heart-disease analysis, so an empty file is a valid configuration.

use crate::association::TestOptions;
use crate::data::{AGE, LoadOptions, SEX, THALACH};
use crate::estimate::RegressionSpec;
use crate::predict::DEFAULT_THRESHOLD;
use crate::types::{FeatureRecord, TermSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Separator {0:?} must be a single ASCII character.")]
    InvalidSeparator(char),
    #[error("Significance level must lie strictly between 0 and 1, got {0}.")]
    InvalidAlpha(f64),
    #[error("Classification threshold must lie in [0, 1], got {0}.")]
    InvalidThreshold(f64),
    #[error("The [{0}] section lists no predictors.")]
    NoPredictors(&'static str),
    #[error("The regression needs an iteration budget of at least 1.")]
    ZeroIterations,
    #[error("Convergence tolerance must be a positive number, got {0}.")]
    InvalidTolerance(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub separator: char,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { separator: ',' }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    pub predictors: Vec<TermSpec>,
    pub alpha: f64,
    pub continuity_correction: bool,
    pub equal_variance: bool,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        let options = TestOptions::default();
        Self {
            predictors: vec![
                TermSpec::categorical(SEX),
                TermSpec::continuous(AGE),
                TermSpec::continuous(THALACH),
            ],
            alpha: 0.05,
            continuity_correction: options.continuity_correction,
            equal_variance: options.equal_variance,
        }
    }
}

impl AssociationConfig {
    pub fn test_options(&self) -> TestOptions {
        TestOptions {
            continuity_correction: self.continuity_correction,
            equal_variance: self.equal_variance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    pub threshold: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Top-level configuration of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub data: DataConfig,
    pub association: AssociationConfig,
    pub model: RegressionSpec,
    pub prediction: PredictionConfig,
    /// Single cases scored after fitting, e.g. `{ age = 45, sex = "Female", thalach = 150 }`.
    pub what_if: Vec<FeatureRecord>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            association: AssociationConfig::default(),
            model: RegressionSpec::default(),
            prediction: PredictionConfig::default(),
            what_if: vec![
                FeatureRecord::new()
                    .numeric(AGE, 45.0)
                    .level(SEX, "Female")
                    .numeric(THALACH, 150.0),
            ],
        }
    }
}

impl AnalysisConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: AnalysisConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.load_options()?;
        let alpha = self.association.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ConfigError::InvalidAlpha(alpha));
        }
        if self.association.predictors.is_empty() {
            return Err(ConfigError::NoPredictors("association"));
        }
        if self.model.predictors.is_empty() {
            return Err(ConfigError::NoPredictors("model"));
        }
        if self.model.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !(self.model.tolerance > 0.0 && self.model.tolerance.is_finite()) {
            return Err(ConfigError::InvalidTolerance(self.model.tolerance));
        }
        let threshold = self.prediction.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        Ok(())
    }

    pub fn load_options(&self) -> Result<LoadOptions, ConfigError> {
        let separator = self.data.separator;
        if !separator.is_ascii() {
            return Err(ConfigError::InvalidSeparator(separator));
        }
        Ok(LoadOptions {
            separator: separator as u8,
        })
    }
}
