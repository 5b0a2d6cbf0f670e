//! Read-only view of the store for the dashboard.
//!
//! An empty store is a normal state ("no trained model yet"), so lookups of
//! the alias return `Ok(None)` instead of `ArtifactNotFound`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::{
    error::StoreError,
    metadata::MetadataRecord,
    store::{ArtifactStore, LoadedVersion},
    version::VersionId,
};

/// Dashboard read contract over an [`ArtifactStore`].
#[derive(Debug)]
pub struct DashboardFeed<'a> {
    store: &'a ArtifactStore,
}

impl<'a> DashboardFeed<'a> {
    /// Wraps a store; the feed never writes.
    #[must_use]
    pub const fn new(store: &'a ArtifactStore) -> Self {
        Self { store }
    }

    /// Model and metadata behind the alias, or `None` when nothing is published.
    pub fn latest<M: DeserializeOwned>(&self) -> Result<Option<LoadedVersion<M>>, StoreError> {
        absent_as_none(self.store.read_latest())
    }

    /// Metadata behind the alias, or `None` when nothing is published.
    pub fn latest_metadata(&self) -> Result<Option<MetadataRecord>, StoreError> {
        absent_as_none(self.store.latest_metadata())
    }

    /// Summary of the version the alias points at.
    pub fn summary(&self) -> Result<Option<ModelSummary>, StoreError> {
        Ok(self.latest_metadata()?.map(|record| ModelSummary::from(&record)))
    }

    /// Summaries of up to `limit` versions, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<ModelSummary>, StoreError> {
        let mut summaries = Vec::new();
        for version in self.store.list_versions()?.into_iter().take(limit) {
            summaries.push(ModelSummary::from(&self.store.read_metadata(&version)?));
        }
        Ok(summaries)
    }
}

fn absent_as_none<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// The fields a dashboard card shows for one version.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    /// Version id as recorded.
    pub version: String,
    /// Parsed id, when the record carries a well-formed one.
    pub version_id: Option<VersionId>,
    /// When evaluation completed.
    pub training_date: DateTime<Utc>,
    /// Algorithm family label.
    pub model_kind: String,
    /// Accuracy on the evaluation partition.
    pub accuracy: Option<f64>,
    /// Weighted precision.
    pub precision: Option<f64>,
    /// Weighted recall.
    pub recall: Option<f64>,
    /// Weighted F1.
    pub f1_score: Option<f64>,
    /// Ranking metric; absent for models without scores.
    pub roc_auc: Option<f64>,
    /// Number of input features.
    pub feature_count: usize,
    /// Label column.
    pub target: String,
}

impl From<&MetadataRecord> for ModelSummary {
    fn from(record: &MetadataRecord) -> Self {
        Self {
            version: record.version_id.clone(),
            version_id: record.version().ok(),
            training_date: record.training_date,
            model_kind: record.model_kind.clone(),
            accuracy: record.metric("accuracy"),
            precision: record.metric("precision"),
            recall: record.metric("recall"),
            f1_score: record.metric("f1_score"),
            roc_auc: record.metric("roc_auc"),
            feature_count: record.features.len(),
            target: record.target.clone(),
        }
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {}  {}  target={} features={}",
            self.version,
            self.training_date.format("%Y-%m-%d %H:%M:%S"),
            self.model_kind,
            self.target,
            self.feature_count
        )?;
        for (name, value) in [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1", self.f1_score),
            ("roc_auc", self.roc_auc),
        ] {
            match value {
                Some(value) => write!(f, "  {name}={value:.4}")?,
                None if name == "roc_auc" => write!(f, "  {name}=n/a")?,
                None => {}
            }
        }
        Ok(())
    }
}
