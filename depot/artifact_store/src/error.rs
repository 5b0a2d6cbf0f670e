use thiserror::Error;

use crate::metadata::InvalidMetadata;

/// Errors surfaced by the artifact store. None of them is recovered silently.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Metadata failed validation; nothing was written.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] InvalidMetadata),
    /// The requested version (or the latest alias) does not resolve to a stored pair.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    /// A model/metadata pair exists but cannot be read back as a pair.
    #[error("corrupt artifact {version}: {reason}")]
    CorruptArtifact {
        /// Version (or alias) being read.
        version: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The versioned pair is durable but the latest alias still points at the previous version.
    #[error("version {version} published but latest alias not updated: {source}")]
    AliasUpdate {
        /// Version that was published.
        version: String,
        /// Underlying filesystem failure.
        #[source]
        source: std::io::Error,
    },
    /// Filesystem failure before anything became visible.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Model could not be encoded.
    #[error("model encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    /// Metadata could not be encoded.
    #[error("metadata encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn corrupt(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            version: version.into(),
            reason: reason.into(),
        }
    }

    /// True for `ArtifactNotFound`, which consumers read as "nothing trained yet".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ArtifactNotFound(_))
    }
}
