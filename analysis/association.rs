//! Univariate association tests between candidate predictors and a binary outcome.
//!
//! Categorical predictors are cross-tabulated against the outcome and tested with
//! Pearson's chi-squared test of independence (Yates-corrected on 2x2 tables when
//! configured). Continuous predictors are compared across the two outcome groups
//! with a two-sample t-test, Welch's by default.

use crate::data::{ColumnError, Dataset};
use crate::types::{PredictorKind, TermSpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, StudentsT};
use thiserror::Error;

/// The test that produced a `TestResult`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TestKind {
    /// Pearson chi-squared test of independence on an outcome x level table.
    ChiSquared { continuity_correction: bool },
    /// Two-sample t-test with the Welch-Satterthwaite degrees of freedom.
    WelchT,
    /// Two-sample t-test with a pooled variance estimate.
    PooledT,
}

impl TestKind {
    pub fn name(&self) -> &'static str {
        match self {
            TestKind::ChiSquared {
                continuity_correction: true,
            } => "Pearson chi-squared (Yates)",
            TestKind::ChiSquared {
                continuity_correction: false,
            } => "Pearson chi-squared",
            TestKind::WelchT => "Welch two-sample t",
            TestKind::PooledT => "Two-sample t (pooled)",
        }
    }
}

/// Output of one association test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub predictor: String,
    pub kind: TestKind,
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// Observations in the outcome = 0 and outcome = 1 groups.
    pub group_sizes: (usize, usize),
}

impl TestResult {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

/// Settings shared by every test in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestOptions {
    /// Apply Yates' continuity correction to 2x2 contingency tables.
    pub continuity_correction: bool,
    /// Use the pooled-variance t-test instead of Welch's.
    pub equal_variance: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            continuity_correction: true,
            equal_variance: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssociationError {
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error("The test for predictor '{predictor}' is undefined: {reason}")]
    UndefinedTest { predictor: String, reason: String },
    #[error("Failed to evaluate the reference distribution for '{predictor}': {reason}")]
    Distribution { predictor: String, reason: String },
}

/// Runs the appropriate test for every predictor against `outcome`.
///
/// Tests are independent and run in parallel; results come back in input order.
pub fn test_associations(
    dataset: &Dataset,
    outcome: &str,
    predictors: &[TermSpec],
    options: &TestOptions,
) -> Result<Vec<TestResult>, AssociationError> {
    let labels = dataset.binary_column(outcome)?;
    log::info!(
        "Testing {} predictors against '{}' over {} records",
        predictors.len(),
        outcome,
        labels.len()
    );

    predictors
        .par_iter()
        .map(|term| -> Result<TestResult, AssociationError> {
            let result = match term.kind {
                PredictorKind::Categorical => {
                    let factor = dataset.factor_column(&term.name)?;
                    chi_squared_test(&term.name, &factor.codes, factor.levels.len(), &labels, options)
                }
                PredictorKind::Continuous => {
                    let values = dataset.numeric_column(&term.name)?.to_vec();
                    two_sample_t_test(&term.name, &values, &labels, options)
                }
            }?;
            log::debug!(
                "{}: {} statistic {:.4}, p = {:.4e}",
                result.predictor,
                result.kind.name(),
                result.statistic,
                result.p_value
            );
            Ok(result)
        })
        .collect()
}

fn undefined(predictor: &str, reason: impl Into<String>) -> AssociationError {
    AssociationError::UndefinedTest {
        predictor: predictor.to_string(),
        reason: reason.into(),
    }
}

fn group_sizes(labels: &[u8]) -> (usize, usize) {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    (labels.len() - positives, positives)
}

/// Chi-squared test of independence on the 2 x `num_levels` table of outcome by level.
pub fn chi_squared_test(
    predictor: &str,
    codes: &[usize],
    num_levels: usize,
    labels: &[u8],
    options: &TestOptions,
) -> Result<TestResult, AssociationError> {
    if codes.len() != labels.len() {
        return Err(undefined(predictor, "predictor and outcome lengths differ"));
    }
    if num_levels < 2 {
        return Err(undefined(
            predictor,
            format!("only {num_levels} observed level(s); a contingency table needs at least 2"),
        ));
    }
    let sizes = group_sizes(labels);
    if sizes.0 == 0 || sizes.1 == 0 {
        return Err(undefined(predictor, "the outcome takes a single value"));
    }

    let mut table = vec![[0.0_f64; 2]; num_levels];
    for (&code, &label) in codes.iter().zip(labels) {
        table[code][usize::from(label)] += 1.0;
    }

    let n = labels.len() as f64;
    let outcome_totals = [sizes.0 as f64, sizes.1 as f64];
    let yates = options.continuity_correction && num_levels == 2;

    let mut statistic = 0.0;
    for row in &table {
        let level_total = row[0] + row[1];
        if level_total == 0.0 {
            return Err(undefined(predictor, "a level has no observations"));
        }
        for (observed, outcome_total) in row.iter().zip(outcome_totals) {
            let expected = level_total * outcome_total / n;
            let deviation = (observed - expected).abs();
            let deviation = if yates {
                (deviation - 0.5).max(0.0)
            } else {
                deviation
            };
            statistic += deviation * deviation / expected;
        }
    }

    let df = (num_levels - 1) as f64;
    let distribution = ChiSquared::new(df).map_err(|e| AssociationError::Distribution {
        predictor: predictor.to_string(),
        reason: e.to_string(),
    })?;

    Ok(TestResult {
        predictor: predictor.to_string(),
        kind: TestKind::ChiSquared {
            continuity_correction: yates,
        },
        statistic,
        degrees_of_freedom: df,
        p_value: distribution.sf(statistic),
        group_sizes: sizes,
    })
}

/// Two-sample t-test of the predictor mean in the outcome = 1 group against outcome = 0.
pub fn two_sample_t_test(
    predictor: &str,
    values: &[f64],
    labels: &[u8],
    options: &TestOptions,
) -> Result<TestResult, AssociationError> {
    if values.len() != labels.len() {
        return Err(undefined(predictor, "predictor and outcome lengths differ"));
    }
    let (negatives, positives): (Vec<f64>, Vec<f64>) = {
        let mut negatives = Vec::new();
        let mut positives = Vec::new();
        for (&value, &label) in values.iter().zip(labels) {
            if label == 1 {
                positives.push(value);
            } else {
                negatives.push(value);
            }
        }
        (negatives, positives)
    };
    if negatives.len() < 2 || positives.len() < 2 {
        return Err(undefined(
            predictor,
            "each outcome group needs at least two observations",
        ));
    }

    let (mean0, var0) = mean_and_variance(&negatives);
    let (mean1, var1) = mean_and_variance(&positives);
    let n0 = negatives.len() as f64;
    let n1 = positives.len() as f64;

    let (standard_error, df, kind) = if options.equal_variance {
        let pooled = ((n0 - 1.0) * var0 + (n1 - 1.0) * var1) / (n0 + n1 - 2.0);
        (
            (pooled * (1.0 / n0 + 1.0 / n1)).sqrt(),
            n0 + n1 - 2.0,
            TestKind::PooledT,
        )
    } else {
        let a = var0 / n0;
        let b = var1 / n1;
        let df = (a + b).powi(2) / (a * a / (n0 - 1.0) + b * b / (n1 - 1.0));
        ((a + b).sqrt(), df, TestKind::WelchT)
    };

    if !(standard_error > 0.0) || !df.is_finite() {
        return Err(undefined(predictor, "the predictor has zero variance"));
    }

    let statistic = (mean1 - mean0) / standard_error;
    let distribution =
        StudentsT::new(0.0, 1.0, df).map_err(|e| AssociationError::Distribution {
            predictor: predictor.to_string(),
            reason: e.to_string(),
        })?;

    Ok(TestResult {
        predictor: predictor.to_string(),
        kind,
        statistic,
        degrees_of_freedom: df,
        p_value: (2.0 * distribution.sf(statistic.abs())).min(1.0),
        group_sizes: (negatives.len(), positives.len()),
    })
}

/// Sample mean and unbiased variance.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}
