use std::{fmt, fs, path::Path};

use anyhow::{bail, Context, Result};
use depot_artifact_store::{ParamValue, Parameters};
use serde::Deserialize;

use crate::contract::FeatureContract;

/// Split seed used when `model_params.random_state` is absent.
pub const DEFAULT_SEED: u64 = 42;

/// Algorithm family selected by `model_type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Bagged CART trees with class probabilities.
    #[default]
    RandomForest,
    /// Per-class mean vectors; no scores.
    NearestCentroid,
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RandomForest => "random_forest",
            Self::NearestCentroid => "nearest_centroid",
        })
    }
}

/// Training configuration, read from `config/model_config.toml`.
///
/// Keys other than the ones below are ignored so older binaries keep reading newer files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrainingConfig {
    /// Label column.
    pub target: String,
    /// Ordered feature columns; empty means "every column but the target".
    #[serde(default)]
    pub features: Vec<String>,
    /// Algorithm family.
    #[serde(default)]
    pub model_type: ModelType,
    /// Share of rows held out for evaluation.
    #[serde(default = "default_test_size")]
    pub test_size: f64,
    /// Hyperparameters handed to the fit step unchanged.
    #[serde(default)]
    pub model_params: Parameters,
}

const fn default_test_size() -> f64 {
    0.2
}

impl TrainingConfig {
    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading training config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.target.trim().is_empty() {
            bail!("target must not be empty");
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            bail!("test_size must lie in (0, 1), got {}", self.test_size);
        }
        if self.features.iter().any(|feature| feature == &self.target) {
            bail!("target `{}` is listed in features", self.target);
        }
        if let Some(value) = self.model_params.get("random_state") {
            if value.as_i64().map_or(true, i64::is_negative) {
                bail!("model_params.random_state must be a non-negative integer, got {value}");
            }
        }
        Ok(())
    }

    /// Seed for the train/evaluation split.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.model_params
            .get("random_state")
            .and_then(ParamValue::as_i64)
            .and_then(|seed| u64::try_from(seed).ok())
            .unwrap_or(DEFAULT_SEED)
    }

    /// Fills an empty feature list from a CSV header, keeping file order.
    pub fn resolve_features(&mut self, header: &[String]) {
        if self.features.is_empty() {
            self.features = header
                .iter()
                .filter(|column| **column != self.target)
                .cloned()
                .collect();
        }
    }

    /// Columns the pipeline will insist on.
    #[must_use]
    pub fn contract(&self) -> FeatureContract {
        FeatureContract {
            features: self.features.clone(),
            target: self.target.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        target = "target"
        features = ["feature1", "feature2", "feature3"]
        owner = "risk-team"

        [model_params]
        n_estimators = 100
        max_depth = 10
        max_features = "sqrt"
        random_state = 42
    "#;

    #[test]
    fn parses_sample_and_ignores_unknown_keys() {
        let config = TrainingConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.model_type, ModelType::RandomForest);
        assert!((config.test_size - 0.2).abs() < f64::EPSILON);
        let keys: Vec<&str> = config.model_params.keys().map(String::as_str).collect();
        assert_eq!(keys, ["n_estimators", "max_depth", "max_features", "random_state"]);
        assert_eq!(config.model_params["max_features"], ParamValue::Text("sqrt".into()));
        assert_eq!(config.seed(), 42);
    }

    #[test]
    fn missing_random_state_uses_default_seed_without_recording_it() {
        let config = TrainingConfig::from_toml_str("target = \"y\"\nmodel_type = \"nearest_centroid\"").unwrap();
        assert_eq!(config.seed(), DEFAULT_SEED);
        assert!(config.model_params.is_empty());
        assert_eq!(config.model_type, ModelType::NearestCentroid);
    }

    #[test]
    fn rejects_out_of_range_test_size() {
        for bad in ["0.0", "1.0", "1.5"] {
            let raw = format!("target = \"y\"\ntest_size = {bad}");
            assert!(TrainingConfig::from_toml_str(&raw).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn rejects_negative_seed() {
        let raw = "target = \"y\"\n[model_params]\nrandom_state = -3";
        assert!(TrainingConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn resolves_features_from_header() {
        let mut config = TrainingConfig::from_toml_str("target = \"default\"").unwrap();
        let header: Vec<String> = ["age", "default", "income"].iter().map(|s| (*s).to_string()).collect();
        config.resolve_features(&header);
        assert_eq!(config.features, ["age", "income"]);
    }
}
