//! Classification performance of predicted labels and scores against the truth.

use crate::data::{ColumnError, Dataset};
use crate::predict::PredictionBatch;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Truth has {truth} entries but the predictions have {predicted}.")]
    InputLengthMismatch { truth: usize, predicted: usize },

    #[error("AUC is undefined: every true label is {class}, so there is nothing to rank against.")]
    UndefinedAuc { class: u8 },

    #[error(
        "Cannot cross-tabulate '{0}' against itself; compare predictions with the true outcome column."
    )]
    SelfComparison(String),

    #[error("Nothing to evaluate: the inputs are empty.")]
    EmptyInput,

    #[error("Label {value} at position {position} is not 0 or 1.")]
    LabelOutOfDomain { position: usize, value: u8 },

    #[error("Score at position {0} is not a finite number.")]
    NonFiniteScore(usize),

    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Counts keyed by (true label, predicted label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negatives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_positives: usize,
}

impl ConfusionMatrix {
    /// Cross-tabulates true labels (rows) against predicted labels (columns).
    pub fn from_labels(truth: &[u8], predicted: &[u8]) -> Result<Self, EvaluationError> {
        check_pairing(truth, predicted)?;
        let mut matrix = ConfusionMatrix::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t, p) {
                (0, 0) => matrix.true_negatives += 1,
                (0, _) => matrix.false_positives += 1,
                (_, 0) => matrix.false_negatives += 1,
                _ => matrix.true_positives += 1,
            }
        }
        Ok(matrix)
    }

    /// The count in cell `[truth][predicted]`.
    pub fn count(&self, truth: u8, predicted: u8) -> usize {
        match (truth, predicted) {
            (0, 0) => self.true_negatives,
            (0, _) => self.false_positives,
            (_, 0) => self.false_negatives,
            _ => self.true_positives,
        }
    }

    pub fn total(&self) -> usize {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negatives + self.true_positives, self.total())
    }

    /// True-positive rate; NaN when there are no positives.
    pub fn sensitivity(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// True-negative rate; NaN when there are no negatives.
    pub fn specificity(&self) -> f64 {
        ratio(self.true_negatives, self.true_negatives + self.false_positives)
    }

    /// Positive predictive value; NaN when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub n: usize,
    pub auc: f64,
    pub accuracy: f64,
    pub classification_error: f64,
    pub confusion: ConfusionMatrix,
}

/// Fraction of positions where the predicted label equals the true label.
pub fn accuracy(truth: &[u8], predicted: &[u8]) -> Result<f64, EvaluationError> {
    Ok(ConfusionMatrix::from_labels(truth, predicted)?.accuracy())
}

/// Rank-based (Mann-Whitney) area under the ROC curve. Tied scores share their
/// average rank, so each positive/negative tie contributes one half.
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> Result<f64, EvaluationError> {
    if truth.len() != scores.len() {
        return Err(EvaluationError::InputLengthMismatch {
            truth: truth.len(),
            predicted: scores.len(),
        });
    }
    if truth.is_empty() {
        return Err(EvaluationError::EmptyInput);
    }
    check_domain(truth)?;
    if let Some(position) = scores.iter().position(|s| !s.is_finite()) {
        return Err(EvaluationError::NonFiniteScore(position));
    }

    let positives = truth.iter().filter(|&&t| t == 1).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EvaluationError::UndefinedAuc {
            class: u8::from(positives > 0),
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks start..end (zero-based) share the average one-based rank.
        let average_rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| truth[i] == 1).count();
        positive_rank_sum += average_rank * tied_positives as f64;
        start = end;
    }

    let n1 = positives as f64;
    let u = positive_rank_sum - n1 * (n1 + 1.0) / 2.0;
    Ok(u / (n1 * negatives as f64))
}

/// Evaluates a prediction batch against the true labels.
pub fn evaluate(truth: &[u8], batch: &PredictionBatch) -> Result<EvaluationSummary, EvaluationError> {
    summarize(truth, &batch.labels, &batch.probabilities)
}

fn summarize(
    truth: &[u8],
    predicted: &[u8],
    scores: &[f64],
) -> Result<EvaluationSummary, EvaluationError> {
    let confusion = ConfusionMatrix::from_labels(truth, predicted)?;
    let auc = roc_auc(truth, scores)?;
    let accuracy = confusion.accuracy();
    let summary = EvaluationSummary {
        n: confusion.total(),
        auc,
        accuracy,
        classification_error: 1.0 - accuracy,
        confusion,
    };
    log::info!(
        "Evaluation over {} records: AUC {:.4}, accuracy {:.4}",
        summary.n,
        summary.auc,
        summary.accuracy
    );
    Ok(summary)
}

/// Evaluates two binary columns of a dataset, `truth` against `predicted`, using
/// `scores` for the AUC. Naming the same column twice is rejected.
pub fn evaluate_columns(
    dataset: &Dataset,
    truth: &str,
    predicted: &str,
    scores: &[f64],
) -> Result<EvaluationSummary, EvaluationError> {
    if truth == predicted {
        return Err(EvaluationError::SelfComparison(truth.to_string()));
    }
    let truth_labels = dataset.binary_column(truth)?;
    let predicted_labels = dataset.binary_column(predicted)?;
    summarize(&truth_labels, &predicted_labels, scores)
}

fn check_pairing(truth: &[u8], predicted: &[u8]) -> Result<(), EvaluationError> {
    if truth.len() != predicted.len() {
        return Err(EvaluationError::InputLengthMismatch {
            truth: truth.len(),
            predicted: predicted.len(),
        });
    }
    if truth.is_empty() {
        return Err(EvaluationError::EmptyInput);
    }
    if std::ptr::eq(truth, predicted) {
        return Err(EvaluationError::SelfComparison("the prediction labels".to_string()));
    }
    check_domain(truth)?;
    check_domain(predicted)
}

fn check_domain(labels: &[u8]) -> Result<(), EvaluationError> {
    match labels.iter().position(|&l| l > 1) {
        Some(position) => Err(EvaluationError::LabelOutOfDomain {
            position,
            value: labels[position],
        }),
        None => Ok(()),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        f64::NAN
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Outcome, Record, Sex};
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeMap;

    #[test]
    fn four_case_example() {
        let truth = [1, 0, 1, 0];
        let predicted = [1, 0, 0, 0];
        let matrix = ConfusionMatrix::from_labels(&truth, &predicted).unwrap();
        assert_eq!(matrix.true_negatives, 2);
        assert_eq!(matrix.true_positives, 1);
        assert_eq!(matrix.false_negatives, 1);
        assert_eq!(matrix.false_positives, 0);
        assert_eq!(matrix.count(1, 0), 1);
        assert_eq!(matrix.total(), 4);

        let batch = PredictionBatch {
            probabilities: vec![0.9, 0.2, 0.4, 0.1],
            labels: predicted.to_vec(),
            threshold: 0.5,
        };
        let summary = evaluate(&truth, &batch).unwrap();
        assert_eq!(summary.accuracy, 0.75);
        assert_eq!(summary.classification_error, 0.25);
        assert_eq!(summary.auc, 1.0);
        assert_eq!(matrix.sensitivity(), 0.5);
        assert_eq!(matrix.specificity(), 1.0);
        assert_eq!(matrix.precision(), 1.0);
    }

    #[test]
    fn accuracy_and_error_sum_to_one() {
        let truth: Vec<u8> = (0..97).map(|i| ((i * 31) % 7 < 3) as u8).collect();
        for shift in 0..13 {
            let predicted: Vec<u8> = (0..97).map(|i| (((i + shift) * 17) % 5 < 2) as u8).collect();
            let scores: Vec<f64> = predicted.iter().map(|&p| f64::from(p)).collect();
            let batch = PredictionBatch {
                probabilities: scores,
                labels: predicted,
                threshold: 0.5,
            };
            let summary = evaluate(&truth, &batch).unwrap();
            assert_eq!(summary.accuracy + summary.classification_error, 1.0);
            assert_eq!(summary.confusion.total(), truth.len());
        }
    }

    #[test]
    fn auc_reference_points() {
        let truth = [0, 0, 1, 1];
        assert_eq!(roc_auc(&truth, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&truth, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
        // Constant scores carry no ranking information.
        assert_eq!(roc_auc(&truth, &[0.5; 4]).unwrap(), 0.5);
        // One positive above both negatives, one below both.
        assert_eq!(roc_auc(&truth, &[0.3, 0.4, 0.9, 0.1]).unwrap(), 0.5);
        assert_abs_diff_eq!(
            roc_auc(&[0, 1, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8, 0.35]).unwrap(),
            (2.0 + 2.0 + 1.5) / 6.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn auc_is_undefined_for_a_single_class() {
        assert_eq!(
            roc_auc(&[1, 1, 1], &[0.2, 0.5, 0.9]).unwrap_err(),
            EvaluationError::UndefinedAuc { class: 1 }
        );
        assert_eq!(
            roc_auc(&[0, 0], &[0.2, 0.5]).unwrap_err(),
            EvaluationError::UndefinedAuc { class: 0 }
        );
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert_eq!(
            accuracy(&[1, 0, 1], &[1, 0]).unwrap_err(),
            EvaluationError::InputLengthMismatch {
                truth: 3,
                predicted: 2
            }
        );
        assert_eq!(accuracy(&[], &[]).unwrap_err(), EvaluationError::EmptyInput);
        assert_eq!(
            accuracy(&[1, 2], &[1, 0]).unwrap_err(),
            EvaluationError::LabelOutOfDomain {
                position: 1,
                value: 2
            }
        );
        assert_eq!(
            roc_auc(&[0, 1], &[0.1, f64::NAN]).unwrap_err(),
            EvaluationError::NonFiniteScore(1)
        );
    }

    #[test]
    fn self_comparison_is_a_usage_error() {
        let labels = vec![1, 0, 1, 1];
        assert!(matches!(
            ConfusionMatrix::from_labels(&labels, &labels).unwrap_err(),
            EvaluationError::SelfComparison(_)
        ));
        // An equal but distinct vector is a legitimate (perfect) comparison.
        let copy = labels.clone();
        assert_eq!(accuracy(&labels, &copy).unwrap(), 1.0);
    }

    #[test]
    fn dataset_columns_are_compared_truth_against_prediction() {
        let records: Vec<Record> = [1.0, 0.0, 1.0, 0.0]
            .iter()
            .map(|&target| Record {
                age: 50.0,
                sex: Sex::Female,
                thalach: 150.0,
                target: Outcome::from_code(target).unwrap(),
                clinical: BTreeMap::new(),
                predicted: None,
            })
            .collect();
        let dataset = Dataset::from_records(records)
            .unwrap()
            .with_predictions(&[1, 0, 0, 0])
            .unwrap();
        let scores = [0.9, 0.2, 0.4, 0.1];

        let summary = evaluate_columns(&dataset, "target", "predicted", &scores).unwrap();
        assert_eq!(summary.accuracy, 0.75);
        assert_eq!(summary.confusion.false_negatives, 1);

        assert_eq!(
            evaluate_columns(&dataset, "predicted", "predicted", &scores).unwrap_err(),
            EvaluationError::SelfComparison("predicted".to_string())
        );

        assert!(matches!(
            evaluate_columns(&dataset, "target", "thalach", &scores).unwrap_err(),
            EvaluationError::Column(ColumnError::NotBinary { .. })
        ));
    }
}
