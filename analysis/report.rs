//! Human-readable tables for each stage, and the predictions export.

use crate::association::TestResult;
use crate::effects::EffectTable;
use crate::evaluate::EvaluationSummary;
use crate::model::FittedModel;
use crate::predict::PredictionBatch;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write predictions file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to encode predictions as TSV: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Got {truth} true labels for {predictions} predictions.")]
    LengthMismatch { truth: usize, predictions: usize },
}

/// Association test results with a significance marker at `alpha`.
pub struct AssociationTable<'a> {
    pub results: &'a [TestResult],
    pub alpha: f64,
}

impl fmt::Display for AssociationTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:<28} {:>10} {:>8} {:>11} {:>11}",
            "predictor", "test", "statistic", "df", "p-value", "n (0 / 1)"
        )?;
        for result in self.results {
            let marker = if result.is_significant(self.alpha) { " *" } else { "" };
            writeln!(
                f,
                "{:<12} {:<28} {:>10.4} {:>8.2} {:>11.4e} {:>5} / {:<5}{}",
                result.predictor,
                result.kind.name(),
                result.statistic,
                result.degrees_of_freedom,
                result.p_value,
                result.group_sizes.0,
                result.group_sizes.1,
                marker
            )?;
        }
        write!(f, "(* significant at alpha = {})", self.alpha)
    }
}

impl fmt::Display for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formula = self
            .terms
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(" + ");
        writeln!(f, "Logistic regression: {} ~ {}", self.outcome, formula)?;
        writeln!(
            f,
            "{:<14} {:>11} {:>11} {:>9} {:>11}",
            "coefficient", "estimate", "std.error", "z", "Pr(>|z|)"
        )?;
        for c in &self.coefficients {
            let fmt_opt = |v: Option<f64>, precision: usize| {
                v.map_or_else(|| "NA".to_string(), |x| format!("{x:.precision$}"))
            };
            writeln!(
                f,
                "{:<14} {:>11.5} {:>11} {:>9} {:>11}",
                c.term,
                c.estimate,
                fmt_opt(c.std_error, 5),
                fmt_opt(c.z_value(), 3),
                c.p_value()
                    .map_or_else(|| "NA".to_string(), |p| format!("{p:.3e}"))
            )?;
        }
        let s = &self.statistics;
        writeln!(
            f,
            "Null deviance: {:.3} on {} df",
            s.null_deviance,
            s.observations.saturating_sub(1)
        )?;
        writeln!(
            f,
            "Residual deviance: {:.3} on {} df",
            s.deviance,
            s.observations.saturating_sub(self.coefficients.len())
        )?;
        write!(f, "AIC: {:.3}    IRLS iterations: {}", s.aic, s.iterations)
    }
}

impl fmt::Display for EffectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>11} {:>11} {:>11} {:>11} {:>11}",
            "coefficient", "estimate", "std.error", "odds ratio", "2.5 %", "97.5 %"
        )?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{:<14} {:>11.5} {:>11.5} {:>11.5} {:>11.5} {:>11.5}",
                row.term, row.estimate, row.std_error, row.odds_ratio, row.ci_lower, row.ci_upper
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for EvaluationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.confusion;
        writeln!(f, "Records:              {}", self.n)?;
        writeln!(f, "AUC:                  {:.4}", self.auc)?;
        writeln!(f, "Accuracy:             {:.4}", self.accuracy)?;
        writeln!(f, "Classification error: {:.4}", self.classification_error)?;
        writeln!(f, "Sensitivity:          {:.4}", c.sensitivity())?;
        writeln!(f, "Specificity:          {:.4}", c.specificity())?;
        writeln!(f, "Precision:            {:.4}", c.precision())?;
        writeln!(f, "Confusion matrix (rows = truth, columns = predicted):")?;
        writeln!(f, "{:>10} {:>8} {:>8}", "", "pred 0", "pred 1")?;
        writeln!(
            f,
            "{:>10} {:>8} {:>8}",
            "truth 0",
            c.count(0, 0),
            c.count(0, 1)
        )?;
        write!(
            f,
            "{:>10} {:>8} {:>8}",
            "truth 1",
            c.count(1, 0),
            c.count(1, 1)
        )
    }
}

/// Writes one row per prediction: `row`, `probability`, `predicted`, and `target`
/// when the true labels are supplied.
pub fn write_predictions_tsv(
    path: impl AsRef<Path>,
    batch: &PredictionBatch,
    truth: Option<&[u8]>,
) -> Result<(), ReportError> {
    if let Some(truth) = truth {
        if truth.len() != batch.len() {
            return Err(ReportError::LengthMismatch {
                truth: truth.len(),
                predictions: batch.len(),
            });
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path.as_ref())?;
    let mut header = vec!["row", "probability", "predicted"];
    if truth.is_some() {
        header.push(crate::data::TARGET);
    }
    writer.write_record(&header)?;

    for (i, (p, label)) in batch.probabilities.iter().zip(&batch.labels).enumerate() {
        let mut fields = vec![(i + 1).to_string(), p.to_string(), label.to_string()];
        if let Some(truth) = truth {
            fields.push(truth[i].to_string());
        }
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    log::info!(
        "Wrote {} predictions to {}",
        batch.len(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::TestKind;
    use crate::effects::odds_ratios;
    use crate::evaluate::evaluate;
    use crate::test_fixtures::example_model;
    use tempfile::tempdir;

    #[test]
    fn association_table_marks_significant_rows() {
        let results = vec![
            TestResult {
                predictor: "sex".into(),
                kind: TestKind::ChiSquared {
                    continuity_correction: true,
                },
                statistic: 22.7,
                degrees_of_freedom: 1.0,
                p_value: 1.9e-6,
                group_sizes: (138, 165),
            },
            TestResult {
                predictor: "chol".into(),
                kind: TestKind::WelchT,
                statistic: 1.2,
                degrees_of_freedom: 290.4,
                p_value: 0.23,
                group_sizes: (138, 165),
            },
        ];
        let text = AssociationTable {
            results: &results,
            alpha: 0.05,
        }
        .to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("sex") && lines[1].ends_with('*'));
        assert!(lines[2].starts_with("chol") && !lines[2].ends_with('*'));
    }

    #[test]
    fn model_and_effect_tables_list_every_coefficient() {
        let model = example_model();
        let summary = model.to_string();
        assert!(summary.starts_with("Logistic regression: target ~ age + sex + thalach"));
        for name in model.column_names() {
            assert!(summary.contains(&name));
        }
        assert!(summary.contains("AIC: 348.100"));

        let effects = odds_ratios(&model).unwrap().to_string();
        assert_eq!(effects.lines().count(), 1 + model.coefficients.len());
        assert!(effects.contains("4.48169"));
    }

    #[test]
    fn evaluation_summary_shows_confusion_cells() {
        let batch = PredictionBatch {
            probabilities: vec![0.9, 0.2, 0.4, 0.1],
            labels: vec![1, 0, 0, 0],
            threshold: 0.5,
        };
        let text = evaluate(&[1, 0, 1, 0], &batch).unwrap().to_string();
        assert!(text.contains("Accuracy:             0.7500"));
        assert!(text.ends_with(&format!("{:>10} {:>8} {:>8}", "truth 1", 1, 1)));
    }

    #[test]
    fn predictions_are_written_as_tsv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions.tsv");
        let batch = PredictionBatch {
            probabilities: vec![0.25, 0.75],
            labels: vec![0, 1],
            threshold: 0.5,
        };
        write_predictions_tsv(&path, &batch, Some(&[0, 0])).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "row\tprobability\tpredicted\ttarget\n1\t0.25\t0\t0\n2\t0.75\t1\t0\n"
        );

        assert!(matches!(
            write_predictions_tsv(&path, &batch, Some(&[1])).unwrap_err(),
            ReportError::LengthMismatch { .. }
        ));
    }
}
