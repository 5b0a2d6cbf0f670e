use std::sync::Arc;

use chrono::{TimeZone, Utc};
use depot_artifact_store::{ArtifactStore, DashboardFeed, FixedClock, ParamValue, Parameters};
use depot_training::{
    load_csv, load_features, read_header, synthetic, write_csv, Classifier, FittedModel,
    ModelType, TrainingConfig, TrainingError, TrainingPipeline,
};
use tempfile::tempdir;

const CONFIG: &str = r#"
target = "target"
features = ["feature1", "feature2", "feature3"]
model_type = "random_forest"
test_size = 0.2

[model_params]
n_estimators = 20
max_depth = 8
random_state = 42
"#;

#[test]
fn identical_inputs_give_identical_metrics() {
    let config = TrainingConfig::from_toml_str(CONFIG).unwrap();
    let data = synthetic(300, 3, 42).unwrap();
    let first = depot_training::run(&data.matrix, &data.labels, &config).unwrap();
    let second = depot_training::run(&data.matrix, &data.labels, &config).unwrap();
    assert_eq!(first.metrics, second.metrics);
    assert_eq!(first.model, second.model);
}

#[test]
fn csv_to_published_model_and_back() {
    let dir = tempdir().unwrap();
    let csv_path = dir.path().join("data/sample.csv");
    write_csv(&csv_path, &synthetic(250, 3, 7).unwrap(), "target").unwrap();

    let mut config = TrainingConfig::from_toml_str(
        "target = \"target\"\n[model_params]\nn_estimators = 15\nrandom_state = 3\n",
    )
    .unwrap();
    config.resolve_features(&read_header(&csv_path).unwrap());
    assert_eq!(config.features, ["feature1", "feature2", "feature3"]);
    let data = load_csv(&csv_path, &config.target, &config.features).unwrap();

    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
    ));
    let outcome = TrainingPipeline::new(config.clone())
        .with_clock(clock.clone())
        .run(&data.matrix, &data.labels)
        .unwrap();

    let store = ArtifactStore::open(dir.path().join("models"))
        .unwrap()
        .with_clock(clock);
    let version = store.publish(&outcome.model, outcome.draft()).unwrap();
    assert_eq!(version.to_string(), "v_20260301_100000");

    let loaded = store.read_latest::<FittedModel>().unwrap();
    assert_eq!(loaded.model, outcome.model);
    assert_eq!(loaded.metadata.model_kind, "RandomForestClassifier");
    assert_eq!(loaded.metadata.features, config.features);
    assert_eq!(loaded.metadata.metrics, outcome.metrics);
    assert_eq!(
        loaded.metadata.parameters.get("n_estimators"),
        Some(&ParamValue::Int(15))
    );

    let features = load_features(&csv_path, &loaded.metadata.features).unwrap();
    let predictions = loaded.model.predict(features.values()).unwrap();
    assert_eq!(predictions.len(), 250);
    assert!(predictions.iter().all(|label| label == "0" || label == "1"));

    let summary = DashboardFeed::new(&store).summary().unwrap().unwrap();
    assert_eq!(summary.version, "v_20260301_100000");
    assert!(summary.roc_auc.is_some());
}

#[test]
fn nearest_centroid_publishes_without_roc_auc() {
    let dir = tempdir().unwrap();
    let config = TrainingConfig {
        target: "target".into(),
        features: vec!["feature1".into(), "feature2".into()],
        model_type: ModelType::NearestCentroid,
        test_size: 0.25,
        model_params: Parameters::new(),
    };
    let data = synthetic(80, 2, 11).unwrap();
    let outcome = TrainingPipeline::new(config).run(&data.matrix, &data.labels).unwrap();
    assert!(outcome.metrics.get("roc_auc").is_none());

    let store = ArtifactStore::open(dir.path()).unwrap();
    store.publish(&outcome.model, outcome.draft()).unwrap();
    let metadata = store.latest_metadata().unwrap();
    assert_eq!(metadata.model_kind, "NearestCentroidClassifier");
    assert!(metadata.metric("roc_auc").is_none());
    assert!(metadata.metric("accuracy").is_some());
}

#[test]
fn failures_are_classified() {
    let data = synthetic(50, 3, 2).unwrap();

    let mut config = TrainingConfig::from_toml_str(CONFIG).unwrap();
    config.features = vec!["feature1".into(), "feature9".into(), "feature3".into()];
    assert!(matches!(
        depot_training::run(&data.matrix, &data.labels, &config),
        Err(TrainingError::SchemaMismatch(_))
    ));

    let mut config = TrainingConfig::from_toml_str(CONFIG).unwrap();
    config
        .model_params
        .insert("criterion".into(), ParamValue::Text("entropy".into()));
    assert!(matches!(
        depot_training::run(&data.matrix, &data.labels, &config),
        Err(TrainingError::FitFailure(_))
    ));

    let config = TrainingConfig::from_toml_str(CONFIG).unwrap();
    let single = vec!["1".to_string(); data.labels.len()];
    // One class trains, but evaluation still runs; metrics carry no roc_auc.
    let outcome = depot_training::run(&data.matrix, &single, &config).unwrap();
    assert!(outcome.metrics.get("roc_auc").is_none());
    assert!((outcome.metrics["accuracy"] - 1.0).abs() < f64::EPSILON);
}

#[test]
fn invalid_configs_are_rejected_before_training() {
    assert!(TrainingConfig::from_toml_str("target = \"\"").is_err());
    assert!(TrainingConfig::from_toml_str("target = \"t\"\ntest_size = 1.0").is_err());
    assert!(TrainingConfig::from_toml_str("target = \"t\"\nmodel_type = \"svm\"").is_err());
}
