use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{Datelike, Local, Utc};
use clap::{Args, Parser, Subcommand};
use depot_artifact_store::{
    ArtifactStore, DashboardFeed, DepotTelemetry, FileEventPublisher, Metrics, StoreError,
    VersionId,
};
use depot_training::{
    load_csv, load_features, read_header, synthetic, write_csv, Classifier, FittedModel,
    TrainingConfig, TrainingPipeline,
};
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "trn", version, about = "Train, publish and inspect depot models")]
struct Cli {
    #[command(flatten)]
    telemetry: TelemetryArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct TelemetryArgs {
    /// Directory for JSON-lines run logs; logging is off when omitted.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Minimum level written to the run log.
    #[arg(long, global = true, env = "DEPOT_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,
    /// Append store events to this JSON-lines file.
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Writes a reproducible demo dataset.
    Sample {
        #[arg(long, default_value = "data/sample.csv")]
        out: PathBuf,
        #[arg(long, default_value_t = 1000)]
        rows: usize,
        #[arg(long, default_value_t = 3)]
        features: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Trains on a CSV file and publishes the result.
    Train {
        #[arg(long, default_value = "config/model_config.toml")]
        config: PathBuf,
        #[arg(long, default_value = "data/sample.csv")]
        data: PathBuf,
        #[arg(long, default_value = "models")]
        store: PathBuf,
        /// Print metrics without publishing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Lists published versions, newest first.
    List {
        #[arg(long, default_value = "models")]
        store: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Shows metadata of the latest or a given version.
    Show {
        #[arg(long, default_value = "models")]
        store: PathBuf,
        #[arg(long)]
        version: Option<String>,
    },
    /// Points `latest` at an existing version.
    Repoint {
        #[arg(long, default_value = "models")]
        store: PathBuf,
        #[arg(long)]
        version: String,
    },
    /// Predicts labels for every row of a CSV file.
    Predict {
        #[arg(long, default_value = "models")]
        store: PathBuf,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        version: Option<String>,
        /// Write predictions here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct TrainReport {
    run_id: String,
    version: Option<String>,
    model_type: String,
    train_rows: usize,
    test_rows: usize,
    metrics: Metrics,
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let telemetry = build_telemetry(&cli.telemetry)?;
    match cli.command {
        Commands::Sample {
            out,
            rows,
            features,
            seed,
        } => {
            let data = synthetic(rows, features, seed)?;
            write_csv(&out, &data, "target")
                .with_context(|| format!("writing sample data to {}", out.display()))?;
            let _ = telemetry.log(
                LogLevel::Info,
                "sample.written",
                json!({ "path": out, "rows": rows, "features": features, "seed": seed }),
            );
            println!("wrote {rows} rows to {}", out.display());
            Ok(())
        }
        Commands::Train {
            config,
            data,
            store,
            dry_run,
        } => handle_train(&telemetry, &config, &data, &store, dry_run),
        Commands::List { store, limit } => {
            let store = open_store(&store, &telemetry)?;
            let feed = DashboardFeed::new(&store);
            let latest = feed.latest_metadata()?.map(|record| record.version_id);
            let history = feed.history(limit)?;
            if history.is_empty() {
                println!("no trained model yet");
            }
            for summary in history {
                let marker = if latest.as_deref() == Some(summary.version.as_str()) {
                    '*'
                } else {
                    ' '
                };
                println!("{marker} {summary}");
            }
            Ok(())
        }
        Commands::Show { store, version } => {
            let store = open_store(&store, &telemetry)?;
            let requested = version.as_deref().map(parse_version).transpose()?;
            let record = match &requested {
                Some(version) => store.read_metadata(version),
                None => store.latest_metadata(),
            };
            match record {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(err) if err.is_not_found() => {
                    println!("{}", not_found_message(requested.as_ref()));
                }
                Err(err) => return Err(err.into()),
            }
            Ok(())
        }
        Commands::Repoint { store, version } => {
            let store = open_store(&store, &telemetry)?;
            let version = parse_version(&version)?;
            store.repoint(&version)?;
            println!("latest -> {version}");
            Ok(())
        }
        Commands::Predict {
            store,
            input,
            version,
            out,
        } => handle_predict(&telemetry, &store, &input, version.as_deref(), out.as_deref()),
    }
}

fn handle_train(
    telemetry: &DepotTelemetry,
    config_path: &Path,
    data_path: &Path,
    store_path: &Path,
    dry_run: bool,
) -> Result<()> {
    let run_id = format!("run-{}", Uuid::new_v4());
    let mut config = TrainingConfig::load(config_path)?;
    let header = read_header(data_path)
        .with_context(|| format!("reading header of {}", data_path.display()))?;
    config.resolve_features(&header);
    let data = load_csv(data_path, &config.target, &config.features)
        .with_context(|| format!("loading {}", data_path.display()))?;
    let _ = telemetry.log(
        LogLevel::Info,
        "train.started",
        json!({
            "run_id": run_id,
            "config": config_path,
            "data": data_path,
            "rows": data.labels.len(),
            "model_type": config.model_type.to_string(),
        }),
    );

    let outcome = TrainingPipeline::new(config)
        .with_telemetry(telemetry.for_module("training"))
        .run(&data.matrix, &data.labels)?;

    let version = if dry_run {
        None
    } else {
        let store = open_store(store_path, telemetry)?;
        Some(store.publish(&outcome.model, outcome.draft())?)
    };
    let report = TrainReport {
        run_id,
        version: version.as_ref().map(ToString::to_string),
        model_type: outcome.model_kind().to_string(),
        train_rows: outcome.train_rows,
        test_rows: outcome.test_rows,
        metrics: outcome.metrics,
        dry_run,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    let _ = telemetry.log(LogLevel::Info, "train.finished", json!(report));
    Ok(())
}

fn handle_predict(
    telemetry: &DepotTelemetry,
    store_path: &Path,
    input: &Path,
    version: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let store = open_store(store_path, telemetry)?;
    let loaded = match version {
        Some(raw) => store.read::<FittedModel>(&parse_version(raw)?),
        None => store.read_latest::<FittedModel>(),
    }
    .context("loading model")?;
    let matrix = load_features(input, &loaded.metadata.features)
        .with_context(|| format!("loading {}", input.display()))?;
    let predictions = loaded.model.predict(matrix.values())?;
    let confidence = loaded
        .model
        .predict_scores(matrix.values())?
        .map(|scores| {
            scores
                .rows()
                .into_iter()
                .map(|row| row.fold(0.0_f64, |best, value| best.max(*value)))
                .collect::<Vec<_>>()
        });

    let sink: Box<dyn Write> = match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            Box::new(
                fs::File::create(path)
                    .with_context(|| format!("creating {}", path.display()))?,
            )
        }
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(["row", "prediction", "confidence"])?;
    for (row, label) in predictions.iter().enumerate() {
        let score = confidence
            .as_ref()
            .map(|scores| format!("{:.4}", scores[row]))
            .unwrap_or_default();
        writer.write_record([row.to_string(), label.clone(), score])?;
    }
    writer.flush()?;
    let _ = telemetry.log(
        LogLevel::Info,
        "predict.finished",
        json!({
            "version": loaded.metadata.version_id,
            "input": input,
            "rows": predictions.len(),
        }),
    );
    Ok(())
}

fn build_telemetry(args: &TelemetryArgs) -> Result<DepotTelemetry> {
    let mut builder = DepotTelemetry::builder("trn").min_level(args.log_level);
    if let Some(dir) = &args.log_dir {
        builder = builder.log_path(compute_log_path(dir)?);
    }
    if let Some(path) = &args.event_log {
        builder = builder.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    builder.build()
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir).with_context(|| format!("creating log dir {}", dir.display()))?;
    Ok(dir.join(format!(
        "trn-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn open_store(path: &Path, telemetry: &DepotTelemetry) -> Result<ArtifactStore, StoreError> {
    Ok(ArtifactStore::open(path)?.with_telemetry(telemetry.for_module("artifact_store")))
}

/// Empty-store wording is reserved for the alias; an explicit id names itself.
fn not_found_message(requested: Option<&VersionId>) -> String {
    requested.map_or_else(
        || "no trained model yet".to_string(),
        |version| format!("version `{version}` not found"),
    )
}

fn parse_version(raw: &str) -> Result<VersionId> {
    VersionId::parse(raw).with_context(|| format!("`{raw}` is not a version id"))
}
