//! Odds ratios and Wald confidence intervals from a fitted logistic model.

use crate::model::{FittedModel, ValidationError};
use serde::{Deserialize, Serialize};

/// Two-sided 95% normal quantile.
pub const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRow {
    pub term: String,
    pub estimate: f64,
    pub std_error: f64,
    pub odds_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// One row per coefficient, in model order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectTable {
    pub rows: Vec<EffectRow>,
}

impl EffectTable {
    pub fn row(&self, term: &str) -> Option<&EffectRow> {
        self.rows.iter().find(|r| r.term == term)
    }
}

/// `exp(estimate)` with the interval `exp(estimate -/+ 1.96 * se)`.
pub fn odds_ratios(model: &FittedModel) -> Result<EffectTable, ValidationError> {
    model.validate()?;
    let rows = model
        .coefficients
        .iter()
        .map(|c| {
            let std_error = c
                .std_error
                .ok_or_else(|| ValidationError::MissingStandardError(c.term.clone()))?;
            let half_width = Z_95 * std_error;
            Ok(EffectRow {
                term: c.term.clone(),
                estimate: c.estimate,
                std_error,
                odds_ratio: c.estimate.exp(),
                ci_lower: (c.estimate - half_width).exp(),
                ci_upper: (c.estimate + half_width).exp(),
            })
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;
    Ok(EffectTable { rows })
}
