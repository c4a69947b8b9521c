//! Applying a fitted model to the training cohort or to ad-hoc cases.

use crate::data::{ColumnError, Dataset};
use crate::model::{FeatureMismatch, FittedModel, ValidationError, design_matrix};
use crate::types::FeatureRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probability at or above which a case is labelled as disease.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("The model cannot be used for prediction: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Column(#[from] ColumnError),

    #[error("Prediction input {row} does not match the fitted model: {source}")]
    SchemaMismatch {
        row: usize,
        #[source]
        source: FeatureMismatch,
    },

    #[error("Classification threshold must lie in [0, 1], got {0}.")]
    InvalidThreshold(f64),
}

/// Predicted probabilities and thresholded labels, one entry per input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBatch {
    pub probabilities: Vec<f64>,
    pub labels: Vec<u8>,
    pub threshold: f64,
}

impl PredictionBatch {
    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Re-labels the same probabilities at a different cutoff.
    pub fn relabel(&self, threshold: f64) -> Result<PredictionBatch, PredictionError> {
        check_threshold(threshold)?;
        Ok(PredictionBatch {
            probabilities: self.probabilities.clone(),
            labels: label_all(&self.probabilities, threshold),
            threshold,
        })
    }
}

/// Scores each record: `p = logistic(intercept + sum(coefficient * feature))`.
///
/// Every record must carry exactly the fitted predictors, with categorical values
/// drawn from the levels seen at fit time. Rows in errors are reported one-based.
pub fn predict_records(
    model: &FittedModel,
    records: &[FeatureRecord],
    threshold: f64,
) -> Result<PredictionBatch, PredictionError> {
    check_threshold(threshold)?;
    model.validate()?;

    let x = design_matrix(&model.terms, records).map_err(|(row, source)| {
        PredictionError::SchemaMismatch {
            row: row + 1,
            source,
        }
    })?;
    let eta = x.dot(&model.estimates());
    let probabilities: Vec<f64> = eta.iter().map(|&e| model.link.inverse(e)).collect();
    let labels = label_all(&probabilities, threshold);

    log::debug!(
        "Scored {} records, {} at or above threshold {threshold}",
        probabilities.len(),
        labels.iter().filter(|&&l| l == 1).count()
    );
    Ok(PredictionBatch {
        probabilities,
        labels,
        threshold,
    })
}

/// Scores every record of a dataset on the model's predictors.
pub fn predict_dataset(
    model: &FittedModel,
    dataset: &Dataset,
    threshold: f64,
) -> Result<PredictionBatch, PredictionError> {
    let records = dataset.feature_records(&model.term_specs())?;
    predict_records(model, &records, threshold)
}

/// Probability for a single ad-hoc case, e.g. `{age=45, sex="Female", thalach=150}`.
pub fn predict_one(model: &FittedModel, record: &FeatureRecord) -> Result<f64, PredictionError> {
    let batch = predict_records(model, std::slice::from_ref(record), DEFAULT_THRESHOLD)?;
    Ok(batch.probabilities[0])
}

fn check_threshold(threshold: f64) -> Result<(), PredictionError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(PredictionError::InvalidThreshold(threshold))
    }
}

fn label_all(probabilities: &[f64], threshold: f64) -> Vec<u8> {
    probabilities
        .iter()
        .map(|&p| u8::from(p >= threshold))
        .collect()
}
