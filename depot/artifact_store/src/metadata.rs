//! The metadata record written next to every model binary, and its validation.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::VersionId;

/// Metrics considered primary for comparing versions; at least one must be present.
pub const PRIMARY_METRICS: [&str; 2] = ["accuracy", "f1_score"];

/// Metric name to value, in the order the pipeline produced them.
pub type Metrics = IndexMap<String, f64>;

/// Hyperparameter name to scalar, exactly as handed to the fit step.
pub type Parameters = IndexMap<String, ParamValue>;

/// Scalar hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Free-form string (e.g. `"sqrt"`).
    Text(String),
}

impl ParamValue {
    /// Integer view; floats with no fractional part are accepted.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }

    /// Float view of numeric values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Boolean view.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Structured description of one published model version.
///
/// Field names on the wire are the contract read by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Version id, `v_YYYYMMDD_HHMMSS[_N]`.
    #[serde(rename = "version")]
    pub version_id: String,
    /// Moment evaluation completed.
    pub training_date: DateTime<Utc>,
    /// Algorithm family label; opaque to the store.
    #[serde(rename = "model_type")]
    pub model_kind: String,
    /// Evaluation metrics; `roc_auc` may be absent.
    pub metrics: Metrics,
    /// Hyperparameters passed to the fit step.
    pub parameters: Parameters,
    /// Feature columns in the order the model expects them.
    pub features: Vec<String>,
    /// Label column.
    pub target: String,
}

impl MetadataRecord {
    /// Parsed version id, if well formed.
    pub fn version(&self) -> Result<VersionId, InvalidMetadata> {
        VersionId::parse(&self.version_id)
            .map_err(|_| InvalidMetadata::MalformedVersion(self.version_id.clone()))
    }

    /// Looks up a metric by name.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Everything a publish needs except the version id, which the store assigns.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDraft {
    /// Moment evaluation completed.
    pub training_date: DateTime<Utc>,
    /// Algorithm family label.
    pub model_kind: String,
    /// Evaluation metrics.
    pub metrics: Metrics,
    /// Hyperparameters passed to the fit step.
    pub parameters: Parameters,
    /// Ordered feature names.
    pub features: Vec<String>,
    /// Label column.
    pub target: String,
}

impl MetadataDraft {
    /// Binds the draft to a version id.
    #[must_use]
    pub fn into_record(self, version: &VersionId) -> MetadataRecord {
        MetadataRecord {
            version_id: version.to_string(),
            training_date: self.training_date,
            model_kind: self.model_kind,
            metrics: self.metrics,
            parameters: self.parameters,
            features: self.features,
            target: self.target,
        }
    }
}

/// Reasons a metadata record is refused.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvalidMetadata {
    /// The label column is listed as an input feature.
    #[error("target `{0}` also appears in features")]
    TargetInFeatures(String),
    /// No metrics were recorded.
    #[error("metrics are empty")]
    EmptyMetrics,
    /// A metric is NaN or infinite.
    #[error("metric `{name}` is not finite ({value})")]
    NonFiniteMetric {
        /// Metric name.
        name: String,
        /// Offending value.
        value: f64,
    },
    /// A floating-point hyperparameter is NaN or infinite; JSON cannot carry it back.
    #[error("parameter `{name}` is not finite ({value})")]
    NonFiniteParameter {
        /// Parameter name.
        name: String,
        /// Offending value.
        value: f64,
    },
    /// None of the primary comparison metrics is present.
    #[error("metrics lack a primary metric (one of {})", PRIMARY_METRICS.join(", "))]
    MissingPrimaryMetric,
    /// The feature list is empty.
    #[error("features are empty")]
    EmptyFeatures,
    /// The version id does not match `v_YYYYMMDD_HHMMSS[_N]`.
    #[error("malformed version id `{0}`")]
    MalformedVersion(String),
}

/// Checks a record before it is written, stopping at the first failure.
///
/// Order: target not in features, metrics non-empty/finite, parameters
/// finite, primary metric present, features non-empty, version id format.
pub fn validate(record: &MetadataRecord) -> Result<(), InvalidMetadata> {
    if record.features.iter().any(|feature| feature == &record.target) {
        return Err(InvalidMetadata::TargetInFeatures(record.target.clone()));
    }
    if record.metrics.is_empty() {
        return Err(InvalidMetadata::EmptyMetrics);
    }
    if let Some((name, value)) = record.metrics.iter().find(|(_, value)| !value.is_finite()) {
        return Err(InvalidMetadata::NonFiniteMetric {
            name: name.clone(),
            value: *value,
        });
    }
    if let Some((name, value)) = record.parameters.iter().find_map(|(name, value)| match value {
        ParamValue::Float(value) if !value.is_finite() => Some((name, *value)),
        _ => None,
    }) {
        return Err(InvalidMetadata::NonFiniteParameter {
            name: name.clone(),
            value,
        });
    }
    if !PRIMARY_METRICS
        .iter()
        .any(|primary| record.metrics.contains_key(*primary))
    {
        return Err(InvalidMetadata::MissingPrimaryMetric);
    }
    if record.features.is_empty() {
        return Err(InvalidMetadata::EmptyFeatures);
    }
    record.version()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetadataRecord {
        let mut metrics = Metrics::new();
        metrics.insert("accuracy".into(), 0.85);
        metrics.insert("f1_score".into(), 0.845);
        let mut parameters = Parameters::new();
        parameters.insert("n_estimators".into(), ParamValue::Int(100));
        parameters.insert("max_features".into(), ParamValue::Text("sqrt".into()));
        MetadataRecord {
            version_id: "v_20260101_120000".into(),
            training_date: Utc::now(),
            model_kind: "RandomForestClassifier".into(),
            metrics,
            parameters,
            features: vec!["age".into(), "income".into()],
            target: "default".into(),
        }
    }

    #[test]
    fn accepts_well_formed_record() {
        assert_eq!(validate(&record()), Ok(()));
    }

    #[test]
    fn rejects_target_in_features_first() {
        let mut rec = record();
        rec.features.push("default".into());
        rec.metrics.clear();
        assert_eq!(
            validate(&rec),
            Err(InvalidMetadata::TargetInFeatures("default".into()))
        );
    }

    #[test]
    fn rejects_non_finite_metrics() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut rec = record();
            rec.metrics.insert("recall".into(), bad);
            assert!(matches!(
                validate(&rec),
                Err(InvalidMetadata::NonFiniteMetric { ref name, .. }) if name == "recall"
            ));
        }
    }

    #[test]
    fn rejects_non_finite_float_parameters() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut rec = record();
            rec.parameters.insert("alpha".into(), ParamValue::Float(bad));
            assert!(matches!(
                validate(&rec),
                Err(InvalidMetadata::NonFiniteParameter { ref name, .. }) if name == "alpha"
            ));
        }
        let mut rec = record();
        rec.parameters.insert("alpha".into(), ParamValue::Float(0.5));
        assert_eq!(validate(&rec), Ok(()));
    }

    #[test]
    fn rejects_missing_primary_metric() {
        let mut rec = record();
        rec.metrics = Metrics::from([("recall".to_string(), 0.5)]);
        assert_eq!(validate(&rec), Err(InvalidMetadata::MissingPrimaryMetric));
    }

    #[test]
    fn rejects_empty_features_before_bad_version() {
        let mut rec = record();
        rec.features.clear();
        rec.version_id = "latest".into();
        assert_eq!(validate(&rec), Err(InvalidMetadata::EmptyFeatures));
    }

    #[test]
    fn rejects_malformed_version() {
        let mut rec = record();
        rec.version_id = "v_2026_01_01".into();
        assert_eq!(
            validate(&rec),
            Err(InvalidMetadata::MalformedVersion("v_2026_01_01".into()))
        );
    }

    #[test]
    fn wire_names_match_dashboard_contract() {
        let json = serde_json::to_value(record()).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        for key in ["version", "training_date", "model_type", "metrics", "parameters", "features", "target"] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(json["parameters"]["n_estimators"], 100);
        assert_eq!(json["parameters"]["max_features"], "sqrt");
    }

    #[test]
    fn param_values_keep_their_scalar_kind() {
        let parsed: Parameters =
            serde_json::from_str(r#"{"a": 1, "b": 1.0, "c": true, "d": "log2"}"#).unwrap();
        assert_eq!(parsed["a"], ParamValue::Int(1));
        assert_eq!(parsed["b"], ParamValue::Float(1.0));
        assert_eq!(parsed["c"], ParamValue::Bool(true));
        assert_eq!(parsed["d"].as_str(), Some("log2"));
        assert_eq!(parsed["b"].as_i64(), Some(1));
    }
}
