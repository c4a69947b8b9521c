//! Logistic regression of a binary outcome on a set of predictors.
//!
//! `fit_logistic` validates the requested terms against the dataset, builds the
//! design matrix through the same encoder used at prediction time, screens each
//! column for univariate separation, and hands the problem to the IRLS solver.

use crate::data::{ColumnError, Dataset};
use crate::irls::{self, IrlsOptions, calculate_deviance};
use crate::model::{
    Coefficient, FitStatistics, FittedModel, LinkFunction, TermSchema, design_matrix,
};
use crate::types::{PredictorKind, TermSpec};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Which regression to fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionSpec {
    pub outcome: String,
    pub predictors: Vec<TermSpec>,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for RegressionSpec {
    fn default() -> Self {
        let irls = IrlsOptions::default();
        Self {
            outcome: crate::data::TARGET.to_string(),
            predictors: vec![
                TermSpec::continuous(crate::data::AGE),
                TermSpec::categorical(crate::data::SEX),
                TermSpec::continuous(crate::data::THALACH),
            ],
            max_iterations: irls.max_iterations,
            tolerance: irls.tolerance,
        }
    }
}

impl RegressionSpec {
    pub fn irls_options(&self) -> IrlsOptions {
        IrlsOptions {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }
}

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error(transparent)]
    Column(#[from] ColumnError),

    #[error(
        "A linear system solve failed. The information matrix X'WX may be singular (collinear predictors). Error: {0}"
    )]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error(
        "The IRLS loop did not converge within {max_iterations} iterations. Last relative deviance change was {last_change:.6e}."
    )]
    NonConvergence {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Perfect separation: {detail}. The maximum-likelihood coefficients do not exist.")]
    PerfectSeparation { detail: String },

    #[error("Predictor '{0}' is constant and cannot be estimated alongside the intercept.")]
    ConstantPredictor(String),

    #[error(
        "Categorical predictor '{name}' has the single observed level \"{level}\"; at least two are required."
    )]
    SingleLevelFactor { name: String, level: String },

    #[error("Predictor '{0}' is listed more than once.")]
    DuplicatePredictor(String),

    #[error("The model has {parameters} coefficients but only {observations} observations.")]
    TooFewObservations {
        parameters: usize,
        observations: usize,
    },

    #[error("An internal error occurred during model layout or coefficient mapping: {0}")]
    LayoutError(String),
}

/// Fits `outcome ~ predictors` with a logit link by maximum likelihood.
///
/// The dataset is not modified. Categorical predictors are dummy-encoded with
/// their first observed level as the reference.
pub fn fit_logistic(
    dataset: &Dataset,
    spec: &RegressionSpec,
) -> Result<FittedModel, EstimationError> {
    log::info!(
        "Fitting logistic regression of '{}' on [{}] over {} records",
        spec.outcome,
        spec.predictors
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        dataset.len()
    );

    let y: Array1<f64> = dataset
        .binary_column(&spec.outcome)?
        .into_iter()
        .map(f64::from)
        .collect();

    let terms = build_term_schema(dataset, &spec.predictors)?;
    let records = dataset.feature_records(&spec.predictors)?;
    let x = design_matrix(&terms, &records).map_err(|(row, mismatch)| {
        EstimationError::LayoutError(format!("record {}: {mismatch}", row + 1))
    })?;

    if x.ncols() >= x.nrows() {
        return Err(EstimationError::TooFewObservations {
            parameters: x.ncols(),
            observations: x.nrows(),
        });
    }

    let column_names: Vec<String> = std::iter::once(crate::model::INTERCEPT.to_string())
        .chain(terms.iter().flat_map(TermSchema::column_names))
        .collect();
    for (j, name) in column_names.iter().enumerate().skip(1) {
        if separates_outcome(x.column(j), y.view()) {
            return Err(EstimationError::PerfectSeparation {
                detail: format!("'{name}' alone separates the outcome"),
            });
        }
    }

    let link = LinkFunction::Logit;
    let fit = irls::fit_glm(x.view(), y.view(), link, &spec.irls_options())?;

    let coefficients: Vec<Coefficient> = column_names
        .into_iter()
        .zip(fit.beta.iter())
        .zip(fit.covariance.diag().iter())
        .map(|((term, &estimate), &variance)| Coefficient {
            term,
            estimate,
            std_error: Some(variance.max(0.0).sqrt()),
        })
        .collect();

    let n = y.len();
    let y_mean = y.sum() / n as f64;
    let null_deviance = calculate_deviance(y.view(), &Array1::from_elem(n, y_mean));
    let statistics = FitStatistics {
        observations: n,
        iterations: fit.iterations,
        null_deviance,
        deviance: fit.deviance,
        aic: fit.deviance + 2.0 * coefficients.len() as f64,
    };

    let model = FittedModel {
        link,
        outcome: spec.outcome.clone(),
        statistics,
        terms,
        coefficients,
    };
    model
        .validate()
        .map_err(|e| EstimationError::LayoutError(e.to_string()))?;

    log::info!(
        "Model fitted: deviance {:.3} on {} df (null {:.3}), AIC {:.3}",
        model.statistics.deviance,
        n - model.coefficients.len(),
        model.statistics.null_deviance,
        model.statistics.aic
    );
    Ok(model)
}

/// Resolves each requested predictor into its fit-time encoding.
fn build_term_schema(
    dataset: &Dataset,
    predictors: &[TermSpec],
) -> Result<Vec<TermSchema>, EstimationError> {
    let mut seen = HashSet::new();
    predictors
        .iter()
        .map(|term| {
            if !seen.insert(term.name.as_str()) {
                return Err(EstimationError::DuplicatePredictor(term.name.clone()));
            }
            match term.kind {
                PredictorKind::Continuous => {
                    let values = dataset.numeric_column(&term.name)?;
                    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    if !(max > min) {
                        return Err(EstimationError::ConstantPredictor(term.name.clone()));
                    }
                    Ok(TermSchema::continuous(&term.name))
                }
                PredictorKind::Categorical => {
                    let factor = dataset.factor_column(&term.name)?;
                    if factor.levels.len() < 2 {
                        return Err(EstimationError::SingleLevelFactor {
                            name: term.name.clone(),
                            level: factor.levels.first().cloned().unwrap_or_default(),
                        });
                    }
                    Ok(TermSchema::categorical(&term.name, factor.levels))
                }
            }
        })
        .collect()
}

/// True when one column on its own orders the outcome groups without overlap
/// (ties at the boundary included), so its coefficient has no finite estimate.
fn separates_outcome(column: ArrayView1<f64>, y: ArrayView1<f64>) -> bool {
    let mut negatives = (f64::INFINITY, f64::NEG_INFINITY);
    let mut positives = (f64::INFINITY, f64::NEG_INFINITY);
    for (&value, &outcome) in column.iter().zip(y.iter()) {
        let group = if outcome > 0.5 {
            &mut positives
        } else {
            &mut negatives
        };
        group.0 = group.0.min(value);
        group.1 = group.1.max(value);
    }
    negatives.1 <= positives.0 || positives.1 <= negatives.0
}
