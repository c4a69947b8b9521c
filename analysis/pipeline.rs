//! The analysis run: association tests, model fit, effect sizes, predictions and
//! evaluation, in that order.
//!
//! Each stage is a pure function of the dataset and the outputs of earlier stages.
//! The run stops at the first failing stage, but everything computed before it is
//! handed back alongside the error.

use crate::association::{AssociationError, TestResult, test_associations};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data::{ColumnError, Dataset, LoadError, PREDICTED};
use crate::effects::{EffectTable, odds_ratios};
use crate::estimate::{EstimationError, fit_logistic};
use crate::evaluate::{EvaluationError, EvaluationSummary, evaluate_columns};
use crate::model::{FittedModel, ModelError, ValidationError};
use crate::predict::{PredictionBatch, PredictionError, predict_dataset, predict_one};
use crate::report::ReportError;
use crate::types::FeatureRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configuration,
    Association,
    Estimation,
    Effects,
    Prediction,
    WhatIf,
    Evaluation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configuration => "configuration",
            Stage::Association => "association testing",
            Stage::Estimation => "model fitting",
            Stage::Effects => "odds-ratio transformation",
            Stage::Prediction => "prediction",
            Stage::WhatIf => "what-if prediction",
            Stage::Evaluation => "evaluation",
        };
        f.write_str(name)
    }
}

/// Any error a stage of the analysis can raise.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Association(#[from] AssociationError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Probability for one configured single-case query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhatIfPrediction {
    pub features: FeatureRecord,
    pub probability: f64,
    pub label: u8,
}

/// Results of the stages that completed before a failure.
#[derive(Debug, Default)]
pub struct PartialReport {
    pub associations: Option<Vec<TestResult>>,
    pub model: Option<FittedModel>,
    pub effects: Option<EffectTable>,
    pub predictions: Option<PredictionBatch>,
    pub what_if: Option<Vec<WhatIfPrediction>>,
}

#[derive(Error, Debug)]
#[error("Analysis stopped during {stage}: {error}")]
pub struct AnalysisFailure {
    pub stage: Stage,
    #[source]
    pub error: AnalysisError,
    pub partial: PartialReport,
}

#[derive(Debug)]
pub struct AnalysisReport {
    pub associations: Vec<TestResult>,
    pub model: FittedModel,
    pub effects: EffectTable,
    pub predictions: PredictionBatch,
    /// The input dataset with the `predicted` column attached.
    pub scored: Dataset,
    pub evaluation: EvaluationSummary,
    pub what_if: Vec<WhatIfPrediction>,
}

/// Runs every stage on `dataset` as configured.
pub fn run_analysis(
    dataset: &Dataset,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, Box<AnalysisFailure>> {
    let mut partial = PartialReport::default();

    checked(Stage::Configuration, &mut partial, config.validate())?;

    let associations = checked(
        Stage::Association,
        &mut partial,
        test_associations(
            dataset,
            &config.model.outcome,
            &config.association.predictors,
            &config.association.test_options(),
        ),
    )?;
    for term in &config.model.predictors {
        if let Some(result) = associations.iter().find(|r| r.predictor == term.name) {
            if !result.is_significant(config.association.alpha) {
                log::warn!(
                    "Predictor '{}' is not associated with '{}' at alpha = {} (p = {:.4}) but is included in the model.",
                    term.name,
                    config.model.outcome,
                    config.association.alpha,
                    result.p_value
                );
            }
        }
    }
    partial.associations = Some(associations.clone());

    let model = checked(
        Stage::Estimation,
        &mut partial,
        fit_logistic(dataset, &config.model),
    )?;
    partial.model = Some(model.clone());

    let effects = checked(Stage::Effects, &mut partial, odds_ratios(&model))?;
    partial.effects = Some(effects.clone());

    let threshold = config.prediction.threshold;
    let predictions = checked(
        Stage::Prediction,
        &mut partial,
        predict_dataset(&model, dataset, threshold),
    )?;
    let scored = checked(
        Stage::Prediction,
        &mut partial,
        dataset.with_predictions(&predictions.labels),
    )?;
    partial.predictions = Some(predictions.clone());

    let what_if = checked(
        Stage::WhatIf,
        &mut partial,
        config
            .what_if
            .iter()
            .map(|features| -> Result<WhatIfPrediction, PredictionError> {
                let probability = predict_one(&model, features)?;
                log::info!("What-if {features}: probability {probability:.4}");
                Ok(WhatIfPrediction {
                    features: features.clone(),
                    probability,
                    label: u8::from(probability >= threshold),
                })
            })
            .collect::<Result<Vec<_>, _>>(),
    )?;
    partial.what_if = Some(what_if.clone());

    let evaluation = checked(
        Stage::Evaluation,
        &mut partial,
        evaluate_columns(
            &scored,
            &config.model.outcome,
            PREDICTED,
            &predictions.probabilities,
        ),
    )?;

    Ok(AnalysisReport {
        associations,
        model,
        effects,
        predictions,
        scored,
        evaluation,
        what_if,
    })
}

/// Converts a stage result, packaging the partial report on failure.
fn checked<T, E: Into<AnalysisError>>(
    stage: Stage,
    partial: &mut PartialReport,
    result: Result<T, E>,
) -> Result<T, Box<AnalysisFailure>> {
    result.map_err(|error| {
        let error: AnalysisError = error.into();
        log::error!("Stage '{stage}' failed: {error}");
        Box::new(AnalysisFailure {
            stage,
            error,
            partial: std::mem::take(partial),
        })
    })
}
