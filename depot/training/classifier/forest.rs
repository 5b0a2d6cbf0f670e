use depot_artifact_store::{ParamValue, Parameters};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{
    argmax, check_fit_input, check_width, encode_labels, params,
    tree::{DecisionTree, TreeSettings},
    Classifier,
};
use crate::{config::DEFAULT_SEED, error::TrainingError};

const KIND: &str = "RandomForestClassifier";

/// How many features each split may examine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxFeatures {
    /// `floor(sqrt(n))`.
    Sqrt,
    /// `floor(log2(n))`.
    Log2,
    /// Every feature.
    All,
    /// Fixed count; may not exceed the number of features.
    Count(usize),
}

impl MaxFeatures {
    fn parse(value: &ParamValue) -> Result<Self, TrainingError> {
        match value {
            ParamValue::Text(raw) => match raw.to_ascii_lowercase().as_str() {
                "sqrt" | "auto" => Ok(Self::Sqrt),
                "log2" => Ok(Self::Log2),
                "all" => Ok(Self::All),
                _ => Err(TrainingError::fit(format!(
                    "{KIND}: max_features must be sqrt, log2, all or an integer, got `{raw}`"
                ))),
            },
            other => Ok(Self::Count(params::count(KIND, "max_features", other, 1)?)),
        }
    }

    /// Concrete count for `n_features` columns, at least one.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let wanted = match self {
            Self::Sqrt => n.sqrt() as usize,
            Self::Log2 => n.log2() as usize,
            Self::All => n_features,
            Self::Count(count) => count,
        };
        wanted.clamp(1, n_features.max(1))
    }
}

/// Forest hyperparameters after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Depth limit; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Rows a node needs before it may split.
    pub min_samples_split: usize,
    /// Rows each child must keep.
    pub min_samples_leaf: usize,
    /// Features examined per split.
    pub max_features: MaxFeatures,
    /// Draw each tree's rows with replacement.
    pub bootstrap: bool,
    /// Base seed; tree `i` uses `random_state + i`.
    pub random_state: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: DEFAULT_SEED,
        }
    }
}

impl ForestParams {
    /// Reads `params`, rejecting unknown names and ill-typed values.
    pub fn from_parameters(params: &Parameters, fallback_seed: u64) -> Result<Self, TrainingError> {
        let mut parsed = Self {
            random_state: fallback_seed,
            ..Self::default()
        };
        for (name, value) in params {
            match name.as_str() {
                "n_estimators" => parsed.n_estimators = params::count(KIND, name, value, 1)?,
                "max_depth" => parsed.max_depth = Some(params::count(KIND, name, value, 1)?),
                "min_samples_split" => {
                    parsed.min_samples_split = params::count(KIND, name, value, 2)?;
                }
                "min_samples_leaf" => {
                    parsed.min_samples_leaf = params::count(KIND, name, value, 1)?;
                }
                "max_features" => parsed.max_features = MaxFeatures::parse(value)?,
                "bootstrap" => parsed.bootstrap = params::flag(KIND, name, value)?,
                "random_state" => parsed.random_state = params::seed(KIND, name, value)?,
                other => return Err(params::unknown(KIND, other)),
            }
        }
        Ok(parsed)
    }
}

/// Bagged CART trees; scores are the mean leaf class distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestClassifier {
    params: ForestParams,
    classes: Vec<String>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    /// Unfitted forest.
    #[must_use]
    pub const fn new(params: ForestParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            n_features: 0,
            trees: Vec::new(),
        }
    }

    /// Parameters the forest was built with.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    #[allow(clippy::cast_precision_loss)]
    fn probabilities(&self, x: &Array2<f64>) -> Result<Array2<f64>, TrainingError> {
        check_width(self.n_features, x)?;
        let mut probabilities = Array2::<f64>::zeros((x.nrows(), self.classes.len()));
        let n_trees = self.trees.len().max(1) as f64;
        for (mut out, sample) in probabilities.rows_mut().into_iter().zip(x.rows()) {
            for tree in &self.trees {
                for (slot, share) in out.iter_mut().zip(tree.distribution(sample)) {
                    *slot += share;
                }
            }
            out.mapv_inplace(|total| total / n_trees);
        }
        Ok(probabilities)
    }
}

impl Classifier for RandomForestClassifier {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), TrainingError> {
        check_fit_input(x, y)?;
        if let MaxFeatures::Count(count) = self.params.max_features {
            if count > x.ncols() {
                return Err(TrainingError::fit(format!(
                    "{KIND}: max_features {count} exceeds {} features",
                    x.ncols()
                )));
            }
        }
        let (classes, encoded) = encode_labels(y);
        let rows = x.nrows();
        let settings = TreeSettings {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features.resolve(x.ncols()),
        };
        self.trees = (0..self.params.n_estimators)
            .map(|idx| {
                let mut rng =
                    ChaCha8Rng::seed_from_u64(self.params.random_state.wrapping_add(idx as u64));
                let sample: Vec<usize> = if self.params.bootstrap {
                    (0..rows).map(|_| rng.gen_range(0..rows)).collect()
                } else {
                    (0..rows).collect()
                };
                DecisionTree::grow(x, &encoded, classes.len(), &sample, settings, &mut rng)
            })
            .collect();
        self.classes = classes;
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<String>, TrainingError> {
        let probabilities = self.probabilities(x)?;
        Ok(probabilities
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(row.iter().copied())].clone())
            .collect())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>, TrainingError> {
        self.probabilities(x).map(Some)
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|label| (*label).to_string()).collect()
    }

    fn params(pairs: &[(&str, ParamValue)]) -> Parameters {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn defaults_follow_common_forest_settings() {
        let parsed = ForestParams::from_parameters(&Parameters::new(), 42).unwrap();
        assert_eq!(parsed, ForestParams::default());
        assert_eq!(MaxFeatures::Sqrt.resolve(3), 1);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
    }

    #[test]
    fn parses_config_values() {
        let parsed = ForestParams::from_parameters(
            &params(&[
                ("n_estimators", ParamValue::Int(10)),
                ("max_depth", ParamValue::Int(10)),
                ("max_features", ParamValue::Text("log2".into())),
                ("bootstrap", ParamValue::Bool(false)),
                ("random_state", ParamValue::Int(7)),
            ]),
            42,
        )
        .unwrap();
        assert_eq!(parsed.n_estimators, 10);
        assert_eq!(parsed.max_depth, Some(10));
        assert_eq!(parsed.max_features, MaxFeatures::Log2);
        assert!(!parsed.bootstrap);
        assert_eq!(parsed.random_state, 7);
    }

    #[test]
    fn rejects_unknown_and_ill_typed_parameters() {
        for bad in [
            params(&[("learning_rate", ParamValue::Float(0.1))]),
            params(&[("n_estimators", ParamValue::Text("many".into()))]),
            params(&[("min_samples_split", ParamValue::Int(1))]),
            params(&[("max_features", ParamValue::Text("half".into()))]),
            params(&[("bootstrap", ParamValue::Int(1))]),
        ] {
            assert!(matches!(
                ForestParams::from_parameters(&bad, 42),
                Err(TrainingError::FitFailure(_))
            ));
        }
    }

    #[test]
    fn same_seed_same_forest() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 0.0]];
        let y = labels(&["0", "0", "0", "1", "1", "1"]);
        let fit = |seed| {
            let mut forest = RandomForestClassifier::new(
                ForestParams::from_parameters(&params(&[("n_estimators", ParamValue::Int(8))]), seed)
                    .unwrap(),
            );
            forest.fit(&x, &y).unwrap();
            forest
        };
        assert_eq!(fit(3), fit(3));
        assert_eq!(fit(3).trees().len(), 8);
    }

    #[test]
    fn scores_are_probabilities_over_sorted_classes() {
        let x = array![[0.0], [0.5], [1.0], [9.0], [9.5], [10.0]];
        let y = labels(&["neg", "neg", "neg", "pos", "pos", "pos"]);
        let mut forest = RandomForestClassifier::new(ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        });
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.classes(), ["neg", "pos"]);
        let scores = forest.predict_scores(&x).unwrap().unwrap();
        assert_eq!(scores.dim(), (6, 2));
        for row in scores.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(matches!(
            forest.predict(&array![[1.0, 2.0]]),
            Err(TrainingError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn oversized_max_features_fails_fit() {
        let mut forest = RandomForestClassifier::new(ForestParams {
            max_features: MaxFeatures::Count(3),
            ..ForestParams::default()
        });
        let err = forest
            .fit(&array![[0.0], [1.0]], &labels(&["a", "b"]))
            .unwrap_err();
        assert!(matches!(err, TrainingError::FitFailure(_)));
    }
}
