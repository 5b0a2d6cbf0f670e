//! CSV loading and reproducible demo data.

use std::{f64::consts::TAU, path::Path};

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::{contract::FeatureMatrix, error::TrainingError};

/// Problems reading or writing tabular data.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed CSV.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// A requested column is not in the header.
    #[error("column `{0}` not found in header")]
    MissingColumn(String),
    /// A feature cell does not parse as a number.
    #[error("row {row}, column `{column}`: `{value}` is not numeric")]
    NonNumeric {
        /// 1-based data row.
        row: usize,
        /// Column name.
        column: String,
        /// Raw cell text.
        value: String,
    },
    /// The loaded columns do not form a matrix.
    #[error(transparent)]
    Shape(#[from] TrainingError),
}

/// Feature matrix plus aligned labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledData {
    /// Features, one row per sample.
    pub matrix: FeatureMatrix,
    /// Labels, kept as text.
    pub labels: Vec<String>,
}

/// Column names of a CSV file.
pub fn read_header(path: impl AsRef<Path>) -> Result<Vec<String>, DatasetError> {
    let mut reader = reader(path.as_ref())?;
    Ok(reader.headers()?.iter().map(ToOwned::to_owned).collect())
}

/// Loads `features` (in that order) and the `target` column.
pub fn load_csv(
    path: impl AsRef<Path>,
    target: &str,
    features: &[String],
) -> Result<LabeledData, DatasetError> {
    let (matrix, labels) = load(path.as_ref(), features, Some(target))?;
    Ok(LabeledData { matrix, labels })
}

/// Loads only feature columns, for batch prediction.
pub fn load_features(
    path: impl AsRef<Path>,
    features: &[String],
) -> Result<FeatureMatrix, DatasetError> {
    Ok(load(path.as_ref(), features, None)?.0)
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, DatasetError> {
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn load(
    path: &Path,
    features: &[String],
    target: Option<&str>,
) -> Result<(FeatureMatrix, Vec<String>), DatasetError> {
    let mut reader = reader(path)?;
    let header = reader.headers()?.clone();
    let position = |name: &str| {
        header
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    };
    let feature_idx = features
        .iter()
        .map(|name| position(name))
        .collect::<Result<Vec<_>, _>>()?;
    let target_idx = target.map(&position).transpose()?;

    let mut values = Vec::new();
    let mut labels = Vec::new();
    let mut rows = 0;
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (name, &idx) in features.iter().zip(&feature_idx) {
            let cell = record.get(idx).unwrap_or_default();
            let value = cell.parse::<f64>().map_err(|_| DatasetError::NonNumeric {
                row: row + 1,
                column: name.clone(),
                value: cell.to_string(),
            })?;
            values.push(value);
        }
        if let Some(idx) = target_idx {
            labels.push(record.get(idx).unwrap_or_default().to_string());
        }
        rows += 1;
    }
    let values = Array2::from_shape_vec((rows, features.len()), values)
        .map_err(|err| TrainingError::SchemaMismatch(err.to_string()))?;
    Ok((FeatureMatrix::new(features.to_vec(), values)?, labels))
}

/// Writes features followed by the target column.
pub fn write_csv(
    path: impl AsRef<Path>,
    data: &LabeledData,
    target: &str,
) -> Result<(), DatasetError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<&str> = data.matrix.columns().iter().map(String::as_str).collect();
    header.push(target);
    writer.write_record(&header)?;
    for (row, label) in data.matrix.values().rows().into_iter().zip(&data.labels) {
        let mut record: Vec<String> = row.iter().map(ToString::to_string).collect();
        record.push(label.clone());
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reproducible demo data: `feature1..featureN` drawn from a standard normal,
/// binary target `"0"`/`"1"` driven by the first two features plus noise.
pub fn synthetic(rows: usize, features: usize, seed: u64) -> Result<LabeledData, DatasetError> {
    let features = features.max(1);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut values = Vec::with_capacity(rows * features);
    let mut labels = Vec::with_capacity(rows);
    for _ in 0..rows {
        let sample: Vec<f64> = (0..features).map(|_| standard_normal(&mut rng)).collect();
        let signal = sample[0] + 0.5 * sample.get(1).copied().unwrap_or_default();
        let noisy = signal + 0.5 * standard_normal(&mut rng);
        labels.push(if noisy > 0.0 { "1" } else { "0" }.to_string());
        values.extend(sample);
    }
    let columns = (1..=features).map(|idx| format!("feature{idx}")).collect();
    let values = Array2::from_shape_vec((rows, features), values)
        .map_err(|err| TrainingError::SchemaMismatch(err.to_string()))?;
    Ok(LabeledData {
        matrix: FeatureMatrix::new(columns, values)?,
        labels,
    })
}

/// Box-Muller transform.
fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}
