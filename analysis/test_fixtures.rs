//! Shared builders for unit tests.

use crate::data::{Dataset, Outcome, Record, Sex};
use crate::model::{Coefficient, FitStatistics, FittedModel, LinkFunction, TermSchema};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;

/// Intercept, age, sexMale, thalach used to generate `synthetic_cohort` outcomes.
pub const REFERENCE_COEFFICIENTS: [f64; 4] = [3.113, 0.03, 1.5, -0.04];

/// A fitted `target ~ age + sex + thalach` model with plausible values.
pub fn example_model() -> FittedModel {
    let coefficient = |term: &str, estimate: f64, se: f64| Coefficient {
        term: term.to_string(),
        estimate,
        std_error: Some(se),
    };
    FittedModel {
        link: LinkFunction::Logit,
        outcome: "target".to_string(),
        statistics: FitStatistics {
            observations: 303,
            iterations: 4,
            null_deviance: 417.6,
            deviance: 340.1,
            aic: 348.1,
        },
        terms: vec![
            TermSchema::continuous("age"),
            TermSchema::categorical("sex", vec!["Female".to_string(), "Male".to_string()]),
            TermSchema::continuous("thalach"),
        ],
        coefficients: vec![
            coefficient("(Intercept)", 3.0, 1.2),
            coefficient("age", 0.03, 0.015),
            coefficient("sexMale", 1.5, 0.3),
            coefficient("thalach", -0.04, 0.007),
        ],
    }
}

/// A seeded cohort whose outcome follows a logistic model with `REFERENCE_COEFFICIENTS`.
pub fn synthetic_cohort(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let age_dist = Normal::<f64>::new(54.0, 9.0).expect("valid normal parameters");
    let thalach_dist = Normal::<f64>::new(150.0, 23.0).expect("valid normal parameters");
    let [b0, b_age, b_male, b_thalach] = REFERENCE_COEFFICIENTS;

    let records = (0..n)
        .map(|_| {
            let age: f64 = age_dist.sample(&mut rng).round().clamp(29.0, 77.0);
            let thalach: f64 = thalach_dist.sample(&mut rng).round().clamp(71.0, 202.0);
            let sex = if rng.gen_bool(0.68) { Sex::Male } else { Sex::Female };
            let eta = b0 + b_age * age + b_male * f64::from(sex.code()) + b_thalach * thalach;
            let p = 1.0 / (1.0 + (-eta).exp());
            let target = if rng.gen_bool(p) {
                Outcome::Disease
            } else {
                Outcome::NoDisease
            };
            Record {
                age,
                sex,
                thalach,
                target,
                clinical: BTreeMap::new(),
                predicted: None,
            }
        })
        .collect();
    Dataset::from_records(records).expect("synthetic records share one schema")
}
