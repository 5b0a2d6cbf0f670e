//! Split, fit, evaluate. Publishing is left to the caller so metrics can be
//! inspected before anything reaches the store.

use std::{collections::BTreeSet, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use depot_artifact_store::{
    Clock, DepotTelemetry, MetadataDraft, Metrics, Parameters, StoreEventKind, SystemClock,
};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    classifier::{Classifier, FittedModel},
    config::TrainingConfig,
    contract::FeatureMatrix,
    error::TrainingError,
    metrics::evaluate,
    split::train_test_split,
};

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Fitted model, ready to persist.
    pub model: FittedModel,
    /// Metrics on the evaluation partition.
    pub metrics: Metrics,
    /// Hyperparameters exactly as passed to the fit step.
    pub parameters: Parameters,
    /// Feature columns in model order.
    pub features: Vec<String>,
    /// Label column.
    pub target: String,
    /// When evaluation finished.
    pub evaluated_at: DateTime<Utc>,
    /// Rows used to fit.
    pub train_rows: usize,
    /// Rows used to score.
    pub test_rows: usize,
}

impl TrainingOutcome {
    /// Algorithm family label.
    #[must_use]
    pub fn model_kind(&self) -> &'static str {
        self.model.kind()
    }

    /// Metadata for publishing this outcome; the store assigns the version.
    #[must_use]
    pub fn draft(&self) -> MetadataDraft {
        MetadataDraft {
            training_date: self.evaluated_at,
            model_kind: self.model_kind().to_string(),
            metrics: self.metrics.clone(),
            parameters: self.parameters.clone(),
            features: self.features.clone(),
            target: self.target.clone(),
        }
    }
}

/// Deterministic training run over an in-memory matrix.
pub struct TrainingPipeline {
    config: TrainingConfig,
    clock: Arc<dyn Clock>,
    telemetry: Option<DepotTelemetry>,
}

impl fmt::Debug for TrainingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainingPipeline")
            .field("config", &self.config)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl TrainingPipeline {
    /// Pipeline for `config`, stamping outcomes with the system clock.
    #[must_use]
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            telemetry: None,
        }
    }

    /// Replaces the clock used for `training_date`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: DepotTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Splits with the configured seed, fits on the train rows and scores the held-out rows.
    pub fn run(
        &self,
        matrix: &FeatureMatrix,
        labels: &[String],
    ) -> Result<TrainingOutcome, TrainingError> {
        let outcome = self.run_inner(matrix, labels);
        if let Err(err) = &outcome {
            self.log(
                LogLevel::Error,
                "training.failed",
                json!({ "error": err.to_string() }),
            );
        }
        outcome
    }

    fn run_inner(
        &self,
        matrix: &FeatureMatrix,
        labels: &[String],
    ) -> Result<TrainingOutcome, TrainingError> {
        self.config.contract().check(matrix, labels)?;

        let seed = self.config.seed();
        let split = train_test_split(matrix.nrows(), self.config.test_size, seed);
        if split.test.is_empty() {
            return Err(TrainingError::InsufficientData(format!(
                "evaluation partition is empty ({} rows, test_size {})",
                matrix.nrows(),
                self.config.test_size
            )));
        }
        if split.train.is_empty() {
            return Err(TrainingError::InsufficientData(
                "train partition is empty".into(),
            ));
        }
        let pick = |rows: &[usize]| -> Vec<String> {
            rows.iter().map(|&row| labels[row].clone()).collect()
        };
        let y_train = pick(&split.train);
        let y_test = pick(&split.test);
        let seen: BTreeSet<&String> = y_train.iter().collect();
        if let Some(missing) = labels.iter().find(|label| !seen.contains(label)) {
            return Err(TrainingError::InsufficientData(format!(
                "class `{missing}` is absent from the train partition"
            )));
        }
        self.log(
            LogLevel::Info,
            "training.split",
            json!({
                "seed": seed,
                "train_rows": split.train.len(),
                "test_rows": split.test.len(),
                "classes": seen.len(),
            }),
        );

        let x_train = matrix.select_rows(&split.train);
        let x_test = matrix.select_rows(&split.test);
        let model = FittedModel::train(
            self.config.model_type,
            &self.config.model_params,
            seed,
            &x_train,
            &y_train,
        )?;
        self.log(
            LogLevel::Debug,
            "training.fit",
            json!({ "model_type": model.kind(), "parameters": self.config.model_params }),
        );

        let predictions = model.predict(&x_test)?;
        let scores = model.predict_scores(&x_test)?;
        let metrics = evaluate(&y_test, &predictions, model.classes(), scores.as_ref());
        let evaluated_at = self.clock.now();
        self.log(
            LogLevel::Info,
            "training.evaluated",
            json!({ "model_type": model.kind(), "metrics": metrics }),
        );
        self.event(json!({ "model_type": model.kind(), "metrics": metrics }));

        Ok(TrainingOutcome {
            model,
            metrics,
            parameters: self.config.model_params.clone(),
            features: self.config.features.clone(),
            target: self.config.target.clone(),
            evaluated_at,
            train_rows: split.train.len(),
            test_rows: split.test.len(),
        })
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn event(&self, payload: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.event(StoreEventKind::TrainingCompleted, None, payload);
        }
    }
}

/// One-shot form of [`TrainingPipeline::run`].
pub fn run(
    matrix: &FeatureMatrix,
    labels: &[String],
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    TrainingPipeline::new(config.clone()).run(matrix, labels)
}
