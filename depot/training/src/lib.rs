#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Depot training: load a labeled table, split it deterministically, fit a
//! classifier and evaluate it, producing everything a publish needs.

/// Classifier families and the persisted model enum.
#[path = "../classifier/main.rs"]
pub mod classifier;
/// TOML training configuration.
#[path = "../config.rs"]
pub mod config;
/// Feature matrix and the column contract it must satisfy.
#[path = "../contract.rs"]
pub mod contract;
/// CSV loading and synthetic sample data.
#[path = "../dataset.rs"]
pub mod dataset;
/// Training error taxonomy.
#[path = "../error.rs"]
pub mod error;
/// Accuracy, weighted precision/recall/F1 and ROC AUC.
#[path = "../metrics.rs"]
pub mod metrics;
/// Split, fit, evaluate.
#[path = "../pipeline.rs"]
pub mod pipeline;
/// Seeded train/evaluation split.
#[path = "../split.rs"]
pub mod split;

pub use classifier::{
    centroid::NearestCentroidClassifier,
    forest::{ForestParams, MaxFeatures, RandomForestClassifier},
    Classifier, FittedModel,
};
pub use config::{ModelType, TrainingConfig, DEFAULT_SEED};
pub use contract::{FeatureContract, FeatureMatrix};
pub use dataset::{load_csv, load_features, read_header, synthetic, write_csv, DatasetError, LabeledData};
pub use error::TrainingError;
pub use metrics::evaluate;
pub use pipeline::{run, TrainingOutcome, TrainingPipeline};
pub use split::{train_test_split, Split};
