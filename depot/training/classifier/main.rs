//! Classification algorithms behind one narrow interface.

/// Per-class mean vectors.
pub mod centroid;
/// Bagged CART ensemble.
pub mod forest;
mod params;
/// Single CART tree with Gini impurity.
pub mod tree;

use depot_artifact_store::Parameters;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::{config::ModelType, error::TrainingError};

pub use centroid::NearestCentroidClassifier;
pub use forest::{ForestParams, MaxFeatures, RandomForestClassifier};

/// What the pipeline needs from an algorithm.
pub trait Classifier {
    /// Algorithm family label recorded as `model_type`.
    fn kind(&self) -> &'static str;

    /// Fits on rows of `x` labelled by `y`.
    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), TrainingError>;

    /// Predicted label per row.
    fn predict(&self, x: &Array2<f64>) -> Result<Vec<String>, TrainingError>;

    /// Per-class scores (columns follow [`Classifier::classes`]), or `None`
    /// when the algorithm has no notion of confidence.
    fn predict_scores(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>, TrainingError>;

    /// Sorted class labels seen during fit.
    fn classes(&self) -> &[String];
}

/// A trained model of any supported family; this is what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedModel {
    /// Random forest.
    RandomForest(RandomForestClassifier),
    /// Nearest centroid.
    NearestCentroid(NearestCentroidClassifier),
}

impl FittedModel {
    /// Builds the configured algorithm from `params` and fits it.
    ///
    /// `fallback_seed` seeds randomized algorithms when `params` has no
    /// `random_state`; it is not written back into `params`.
    pub fn train(
        model_type: ModelType,
        params: &Parameters,
        fallback_seed: u64,
        x: &Array2<f64>,
        y: &[String],
    ) -> Result<Self, TrainingError> {
        let mut model = match model_type {
            ModelType::RandomForest => Self::RandomForest(RandomForestClassifier::new(
                ForestParams::from_parameters(params, fallback_seed)?,
            )),
            ModelType::NearestCentroid => {
                Self::NearestCentroid(NearestCentroidClassifier::from_parameters(params)?)
            }
        };
        model.fit(x, y)?;
        Ok(model)
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::RandomForest(model) => model,
            Self::NearestCentroid(model) => model,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Self::RandomForest(model) => model,
            Self::NearestCentroid(model) => model,
        }
    }
}

impl Classifier for FittedModel {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), TrainingError> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<String>, TrainingError> {
        self.inner().predict(x)
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>, TrainingError> {
        self.inner().predict_scores(x)
    }

    fn classes(&self) -> &[String] {
        self.inner().classes()
    }
}

/// Sorted distinct labels and each row's index into them.
pub(crate) fn encode_labels(y: &[String]) -> (Vec<String>, Vec<usize>) {
    let mut classes: Vec<String> = y.to_vec();
    classes.sort();
    classes.dedup();
    let encoded = y
        .iter()
        .map(|label| classes.binary_search(label).unwrap_or_default())
        .collect();
    (classes, encoded)
}

/// Shared input checks for `fit`.
pub(crate) fn check_fit_input(x: &Array2<f64>, y: &[String]) -> Result<(), TrainingError> {
    if x.nrows() != y.len() {
        return Err(TrainingError::SchemaMismatch(format!(
            "{} labels for {} rows",
            y.len(),
            x.nrows()
        )));
    }
    if x.nrows() == 0 {
        return Err(TrainingError::InsufficientData("no rows to fit".into()));
    }
    if x.iter().any(|value| !value.is_finite()) {
        return Err(TrainingError::fit("feature values must be finite"));
    }
    Ok(())
}

/// Shared input checks for `predict`.
pub(crate) fn check_width(expected: usize, x: &Array2<f64>) -> Result<(), TrainingError> {
    if expected == 0 {
        return Err(TrainingError::fit("model is not fitted"));
    }
    if x.ncols() != expected {
        return Err(TrainingError::SchemaMismatch(format!(
            "model expects {expected} features, got {}",
            x.ncols()
        )));
    }
    Ok(())
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn argmax(values: impl IntoIterator<Item = f64>) -> usize {
    let mut best = (0, f64::NEG_INFINITY);
    for (idx, value) in values.into_iter().enumerate() {
        if value > best.1 {
            best = (idx, value);
        }
    }
    best.0
}
