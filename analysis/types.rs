use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How a predictor enters an association test or a design matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictorKind {
    /// Discrete levels; dummy-encoded against the first level in a regression.
    Categorical,
    /// A real-valued measurement entered as-is.
    Continuous,
}

impl fmt::Display for PredictorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictorKind::Categorical => write!(f, "categorical"),
            PredictorKind::Continuous => write!(f, "continuous"),
        }
    }
}

/// A named predictor together with the way it should be treated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermSpec {
    pub name: String,
    pub kind: PredictorKind,
}

impl TermSpec {
    pub fn continuous(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PredictorKind::Continuous,
        }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PredictorKind::Categorical,
        }
    }
}

/// A single feature value supplied to the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Numeric(f64),
    Level(String),
}

impl FeatureValue {
    /// Parses a command-line value: anything that reads as a number is numeric.
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(value) => FeatureValue::Numeric(value),
            Err(_) => FeatureValue::Level(text.trim().to_string()),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Numeric(value) => write!(f, "{value}"),
            FeatureValue::Level(level) => write!(f, "\"{level}\""),
        }
    }
}

/// An ad-hoc case for prediction, keyed by predictor name.
///
/// ```ignore
/// let case = FeatureRecord::new()
///     .numeric("age", 45.0)
///     .level("sex", "Female")
///     .numeric("thalach", 150.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord {
    fields: BTreeMap<String, FeatureValue>,
}

impl FeatureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn numeric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, FeatureValue::Numeric(value));
        self
    }

    pub fn level(mut self, name: impl Into<String>, level: impl Into<String>) -> Self {
        self.insert(name, FeatureValue::Level(level.into()));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FeatureValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds a record from `name=value` assignments such as `age=45`.
    pub fn from_assignments<'a>(
        assignments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, String> {
        let mut record = Self::new();
        for assignment in assignments {
            let (name, value) = assignment
                .split_once('=')
                .ok_or_else(|| format!("expected name=value, got '{assignment}'"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("missing feature name in '{assignment}'"));
            }
            record.insert(name, FeatureValue::parse(value));
        }
        Ok(record)
    }
}

impl fmt::Display for FeatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, "}}")
    }
}

/// Canonical label for a numerically coded categorical value (`2.0` becomes `"2"`).
pub fn level_label(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
