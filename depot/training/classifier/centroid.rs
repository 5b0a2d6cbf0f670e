use depot_artifact_store::Parameters;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{argmax, check_fit_input, check_width, encode_labels, params, Classifier};
use crate::error::TrainingError;

const KIND: &str = "NearestCentroidClassifier";

/// Assigns each row to the class with the closest mean (Euclidean).
///
/// Has no calibrated confidence, so it never reports scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroidClassifier {
    classes: Vec<String>,
    centroids: Array2<f64>,
}

impl Default for NearestCentroidClassifier {
    fn default() -> Self {
        Self {
            classes: Vec::new(),
            centroids: Array2::zeros((0, 0)),
        }
    }
}

impl NearestCentroidClassifier {
    /// Accepts only `random_state`, which the algorithm does not use.
    pub fn from_parameters(params: &Parameters) -> Result<Self, TrainingError> {
        for (name, value) in params {
            match name.as_str() {
                "random_state" => {
                    params::seed(KIND, name, value)?;
                }
                other => return Err(params::unknown(KIND, other)),
            }
        }
        Ok(Self::default())
    }

    /// One row per class, in [`Classifier::classes`] order.
    #[must_use]
    pub const fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }
}

impl Classifier for NearestCentroidClassifier {
    fn kind(&self) -> &'static str {
        KIND
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, x: &Array2<f64>, y: &[String]) -> Result<(), TrainingError> {
        check_fit_input(x, y)?;
        let (classes, encoded) = encode_labels(y);
        let mut sums = Array2::<f64>::zeros((classes.len(), x.ncols()));
        let mut counts = vec![0_usize; classes.len()];
        for (sample, &class) in x.axis_iter(Axis(0)).zip(&encoded) {
            let mut row = sums.row_mut(class);
            row += &sample;
            counts[class] += 1;
        }
        for (mut row, count) in sums.rows_mut().into_iter().zip(counts) {
            let count = count as f64;
            row.mapv_inplace(|total| total / count);
        }
        self.classes = classes;
        self.centroids = sums;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<String>, TrainingError> {
        check_width(self.centroids.ncols(), x)?;
        Ok(x.rows()
            .into_iter()
            .map(|sample| {
                let closeness = self.centroids.rows().into_iter().map(|centroid| {
                    -(&centroid - &sample).mapv(|diff| diff * diff).sum()
                });
                self.classes[argmax(closeness)].clone()
            })
            .collect())
    }

    fn predict_scores(&self, x: &Array2<f64>) -> Result<Option<Array2<f64>>, TrainingError> {
        check_width(self.centroids.ncols(), x)?;
        Ok(None)
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_artifact_store::ParamValue;
    use ndarray::array;

    #[test]
    fn assigns_rows_to_nearest_mean() {
        let x = array![[0.0, 0.0], [2.0, 0.0], [10.0, 10.0], [12.0, 10.0]];
        let y: Vec<String> = ["low", "low", "high", "high"].iter().map(|s| (*s).to_string()).collect();
        let mut model = NearestCentroidClassifier::default();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.centroids(), &array![[11.0, 10.0], [1.0, 0.0]]);
        assert_eq!(
            model.predict(&array![[1.0, 1.0], [9.0, 9.0]]).unwrap(),
            ["low", "high"]
        );
        assert_eq!(model.predict_scores(&x).unwrap(), None);
    }

    #[test]
    fn only_random_state_is_accepted() {
        let mut params = Parameters::new();
        params.insert("random_state".into(), ParamValue::Int(42));
        assert!(NearestCentroidClassifier::from_parameters(&params).is_ok());
        params.insert("n_estimators".into(), ParamValue::Int(100));
        assert!(matches!(
            NearestCentroidClassifier::from_parameters(&params),
            Err(TrainingError::FitFailure(_))
        ));
    }

    #[test]
    fn unfitted_model_refuses_to_predict() {
        let model = NearestCentroidClassifier::default();
        assert!(model.predict(&array![[1.0]]).is_err());
    }
}
