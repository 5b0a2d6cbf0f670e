//! Filesystem artifact store: immutable versioned model/metadata pairs plus a
//! mutable `latest` alias pair.
//!
//! Layout of the store root:
//!
//! ```text
//! model_<version>.bin        metadata_<version>.json     immutable once written
//! model_latest.bin           metadata_latest.json        rewritten on every successful publish
//! ```
//!
//! Every file becomes visible through a rename of a fully written temp file
//! staged in the same directory, so readers never see partial content.

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tempfile::{Builder, NamedTempFile};

use crate::{
    error::StoreError,
    events::StoreEventKind,
    metadata::{validate, MetadataDraft, MetadataRecord},
    telemetry::DepotTelemetry,
    version::{Clock, SystemClock, VersionId},
};

/// File extension of model binaries.
pub const MODEL_EXTENSION: &str = "bin";
/// Name used in place of a version id for the alias pair.
pub const LATEST_ALIAS: &str = "latest";

const MODEL_PREFIX: &str = "model_";
const METADATA_PREFIX: &str = "metadata_";
const METADATA_EXTENSION: &str = "json";
const STAGING_PREFIX: &str = ".staging-";
const ENVELOPE_FORMAT: u32 = 1;
const LATEST_READ_ATTEMPTS: u32 = 3;
const LATEST_RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// On-disk wrapper around the serialized model. The embedded version lets a
/// reader check that the two alias files belong to the same publish.
#[derive(Debug, Serialize, Deserialize)]
struct ModelEnvelope {
    format: u32,
    version: String,
    payload: Vec<u8>,
}

/// Serialized model as persisted; the store never interprets `binary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Version the binary belongs to.
    pub version_id: VersionId,
    /// Model serialized with `bincode`.
    pub binary: Vec<u8>,
}

impl ModelArtifact {
    /// Decodes the binary into a concrete model type.
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, StoreError> {
        bincode::deserialize(&self.binary).map_err(|err| {
            StoreError::corrupt(self.version_id.to_string(), format!("model payload: {err}"))
        })
    }
}

/// A model loaded together with its metadata.
#[derive(Debug, Clone)]
pub struct LoadedVersion<M> {
    /// Decoded model.
    pub model: M,
    /// Metadata written with it.
    pub metadata: MetadataRecord,
}

/// Raw bytes of one pair, read before anything is decoded.
struct PairBytes {
    model: Vec<u8>,
    metadata: Vec<u8>,
}

/// Single-writer, lock-free-reader model store rooted at one directory.
pub struct ArtifactStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    telemetry: Option<DepotTelemetry>,
}

impl fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.root)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            clock: Arc::new(SystemClock),
            telemetry: None,
        })
    }

    /// Replaces the clock used to derive version ids.
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

    /// Store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the immutable model file for `version`.
    #[must_use]
    pub fn model_path(&self, version: &VersionId) -> PathBuf {
        self.root
            .join(format!("{MODEL_PREFIX}{version}.{MODEL_EXTENSION}"))
    }

    /// Path of the immutable metadata file for `version`.
    #[must_use]
    pub fn metadata_path(&self, version: &VersionId) -> PathBuf {
        self.root
            .join(format!("{METADATA_PREFIX}{version}.{METADATA_EXTENSION}"))
    }

    /// Path of the model alias.
    #[must_use]
    pub fn latest_model_path(&self) -> PathBuf {
        self.root
            .join(format!("{MODEL_PREFIX}{LATEST_ALIAS}.{MODEL_EXTENSION}"))
    }

    /// Path of the metadata alias.
    #[must_use]
    pub fn latest_metadata_path(&self) -> PathBuf {
        self.root
            .join(format!("{METADATA_PREFIX}{LATEST_ALIAS}.{METADATA_EXTENSION}"))
    }

    /// Publishes a model and its metadata under a fresh version id, then
    /// re-points the `latest` alias at it.
    ///
    /// Validation runs before anything touches the filesystem. If writing the
    /// versioned pair fails, no versioned file and no temp file remain and the
    /// alias is untouched. If only the alias rewrite fails, the version is
    /// durable and listed, and `StoreError::AliasUpdate` is returned.
    pub fn publish<M>(&self, model: &M, draft: MetadataDraft) -> Result<VersionId, StoreError>
    where
        M: Serialize + ?Sized,
    {
        let version = self.next_version()?;
        let record = draft.into_record(&version);
        if let Err(reason) = validate(&record) {
            self.log(
                LogLevel::Warn,
                "publish.rejected",
                json!({ "version": version.to_string(), "reason": reason.to_string() }),
            );
            self.event(
                StoreEventKind::PublishRejected,
                None,
                json!({ "reason": reason.to_string() }),
            );
            return Err(reason.into());
        }

        let model_bytes = encode_model(&version, model)?;
        let metadata_bytes = serde_json::to_vec_pretty(&record)?;

        // Temp files delete themselves on drop unless persisted.
        let model_staged = self.stage(&model_bytes)?;
        let metadata_staged = self.stage(&metadata_bytes)?;
        let model_path = self.model_path(&version);
        let metadata_path = self.metadata_path(&version);

        model_staged
            .persist_noclobber(&model_path)
            .map_err(|err| StoreError::Io(err.error))?;
        if let Err(err) = metadata_staged.persist_noclobber(&metadata_path) {
            if let Err(cleanup) = fs::remove_file(&model_path) {
                self.log(
                    LogLevel::Error,
                    "publish.rollback_failed",
                    json!({ "path": model_path, "error": cleanup.to_string() }),
                );
            }
            self.log(
                LogLevel::Error,
                "publish.failed",
                json!({ "version": version.to_string(), "error": err.error.to_string() }),
            );
            return Err(StoreError::Io(err.error));
        }
        sync_dir(&self.root);

        if let Err(source) = self.write_alias(&model_bytes, &metadata_bytes) {
            self.log(
                LogLevel::Error,
                "alias.update_failed",
                json!({ "version": version.to_string(), "error": source.to_string() }),
            );
            self.event(
                StoreEventKind::AliasUpdateFailed,
                Some(&version.to_string()),
                json!({ "error": source.to_string() }),
            );
            return Err(StoreError::AliasUpdate {
                version: version.to_string(),
                source,
            });
        }

        self.log(
            LogLevel::Info,
            "publish.completed",
            json!({
                "version": version.to_string(),
                "model_type": record.model_kind,
                "metrics": record.metrics,
            }),
        );
        self.event(
            StoreEventKind::VersionPublished,
            Some(&version.to_string()),
            json!({ "model_type": record.model_kind, "metrics": record.metrics }),
        );
        Ok(version)
    }

    /// Loads the pair the `latest` alias points at.
    pub fn read_latest<M: DeserializeOwned>(&self) -> Result<LoadedVersion<M>, StoreError> {
        let (artifact, metadata) = self.read_latest_artifact()?;
        Ok(LoadedVersion {
            model: artifact.decode()?,
            metadata,
        })
    }

    /// Loads a specific version.
    pub fn read<M: DeserializeOwned>(&self, version: &VersionId) -> Result<LoadedVersion<M>, StoreError> {
        let (artifact, metadata) = self.read_artifact(version)?;
        Ok(LoadedVersion {
            model: artifact.decode()?,
            metadata,
        })
    }

    /// Loads a specific version without decoding the model.
    pub fn read_artifact(
        &self,
        version: &VersionId,
    ) -> Result<(ModelArtifact, MetadataRecord), StoreError> {
        let label = version.to_string();
        let bytes = self.read_pair_bytes(version)?;
        let envelope = decode_envelope(&bytes.model, &label)?;
        let metadata = decode_metadata(&bytes.metadata, &label)?;
        if envelope.version != label || metadata.version_id != label {
            return Err(StoreError::corrupt(
                label,
                format!(
                    "embedded versions disagree (model {}, metadata {})",
                    envelope.version, metadata.version_id
                ),
            ));
        }
        Ok((
            ModelArtifact {
                version_id: *version,
                binary: envelope.payload,
            },
            metadata,
        ))
    }

    /// Reads only the metadata of a specific version.
    pub fn read_metadata(&self, version: &VersionId) -> Result<MetadataRecord, StoreError> {
        let label = version.to_string();
        let (_, metadata_path) = self.pair_paths(version)?;
        let metadata = decode_metadata(&read_file(&metadata_path, &label)?, &label)?;
        if metadata.version_id != label {
            return Err(StoreError::corrupt(
                label,
                format!("metadata names version {}", metadata.version_id),
            ));
        }
        Ok(metadata)
    }

    /// Loads the alias pair, checking that both alias files name the same version.
    ///
    /// A reader racing the two alias renames retries; if the aliases still
    /// disagree (an interrupted alias rewrite), the versioned pair named by the
    /// metadata alias is returned, since that alias is always written last.
    pub fn read_latest_artifact(&self) -> Result<(ModelArtifact, MetadataRecord), StoreError> {
        for attempt in 1..=LATEST_READ_ATTEMPTS {
            let metadata = self.latest_metadata()?;
            let version = alias_version(&metadata)?;
            let model_alias = self.latest_model_path();
            if !model_alias.is_file() {
                break;
            }
            let envelope = decode_envelope(&read_file(&model_alias, LATEST_ALIAS)?, LATEST_ALIAS)?;
            if envelope.version == metadata.version_id {
                return Ok((
                    ModelArtifact {
                        version_id: version,
                        binary: envelope.payload,
                    },
                    metadata,
                ));
            }
            self.log(
                LogLevel::Warn,
                "latest.alias_mismatch",
                json!({
                    "attempt": attempt,
                    "model_alias": envelope.version,
                    "metadata_alias": metadata.version_id,
                }),
            );
            thread::sleep(LATEST_RETRY_BACKOFF);
        }
        let metadata = self.latest_metadata()?;
        let version = alias_version(&metadata)?;
        self.read_artifact(&version)
    }

    /// Reads the metadata alias, failing with `ArtifactNotFound` when it is
    /// absent or names a version whose pair is gone.
    pub fn latest_metadata(&self) -> Result<MetadataRecord, StoreError> {
        let path = self.latest_metadata_path();
        if !path.is_file() {
            return Err(StoreError::ArtifactNotFound(LATEST_ALIAS.into()));
        }
        let metadata = decode_metadata(&read_file(&path, LATEST_ALIAS)?, LATEST_ALIAS)?;
        let version = alias_version(&metadata)?;
        if !(self.model_path(&version).is_file() && self.metadata_path(&version).is_file()) {
            return Err(StoreError::ArtifactNotFound(format!(
                "{LATEST_ALIAS} -> {version}"
            )));
        }
        Ok(metadata)
    }

    /// Every complete version in the store, newest first by embedded timestamp.
    pub fn list_versions(&self) -> Result<Vec<VersionId>, StoreError> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(raw) = name
                .strip_prefix(METADATA_PREFIX)
                .and_then(|rest| rest.strip_suffix(METADATA_EXTENSION))
                .and_then(|rest| rest.strip_suffix('.'))
            else {
                continue;
            };
            let Ok(version) = VersionId::parse(raw) else {
                continue;
            };
            if self.model_path(&version).is_file() {
                versions.push(version);
            }
        }
        versions.sort_by(VersionId::newest_first);
        Ok(versions)
    }

    /// Points the `latest` alias at an existing version.
    pub fn repoint(&self, version: &VersionId) -> Result<(), StoreError> {
        let label = version.to_string();
        let bytes = self.read_pair_bytes(version)?;
        let envelope = decode_envelope(&bytes.model, &label)?;
        let metadata = decode_metadata(&bytes.metadata, &label)?;
        if envelope.version != label || metadata.version_id != label {
            return Err(StoreError::corrupt(label, "embedded versions disagree"));
        }
        self.write_alias(&bytes.model, &bytes.metadata)
            .map_err(|source| StoreError::AliasUpdate {
                version: label.clone(),
                source,
            })?;
        self.log(
            LogLevel::Info,
            "alias.repointed",
            json!({ "version": label }),
        );
        self.event(StoreEventKind::AliasRepointed, Some(&label), json!({}));
        Ok(())
    }

    fn next_version(&self) -> Result<VersionId, StoreError> {
        let newest = self.list_versions()?.into_iter().next();
        let mut version = VersionId::next(self.clock.now(), newest.as_ref());
        // Orphaned halves (external interference) still reserve their id.
        while self.model_path(&version).is_file() || self.metadata_path(&version).is_file() {
            version = version.successor();
        }
        Ok(version)
    }

    fn pair_paths(&self, version: &VersionId) -> Result<(PathBuf, PathBuf), StoreError> {
        let model_path = self.model_path(version);
        let metadata_path = self.metadata_path(version);
        match (model_path.is_file(), metadata_path.is_file()) {
            (true, true) => Ok((model_path, metadata_path)),
            (false, false) => Err(StoreError::ArtifactNotFound(version.to_string())),
            (true, false) => Err(StoreError::corrupt(version.to_string(), "metadata file missing")),
            (false, true) => Err(StoreError::corrupt(version.to_string(), "model file missing")),
        }
    }

    fn read_pair_bytes(&self, version: &VersionId) -> Result<PairBytes, StoreError> {
        let label = version.to_string();
        let (model_path, metadata_path) = self.pair_paths(version)?;
        Ok(PairBytes {
            model: read_file(&model_path, &label)?,
            metadata: read_file(&metadata_path, &label)?,
        })
    }

    fn stage(&self, bytes: &[u8]) -> io::Result<NamedTempFile> {
        let mut staged = Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&self.root)?;
        staged.write_all(bytes)?;
        staged.as_file().sync_all()?;
        Ok(staged)
    }

    /// Model alias first, metadata alias last.
    fn write_alias(&self, model_bytes: &[u8], metadata_bytes: &[u8]) -> io::Result<()> {
        let model_staged = self.stage(model_bytes)?;
        let metadata_staged = self.stage(metadata_bytes)?;
        model_staged
            .persist(self.latest_model_path())
            .map_err(|err| err.error)?;
        metadata_staged
            .persist(self.latest_metadata_path())
            .map_err(|err| err.error)?;
        sync_dir(&self.root);
        Ok(())
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn event(&self, kind: StoreEventKind, version: Option<&str>, payload: Value) {
        if let Some(telemetry) = self.telemetry.as_ref() {
            if let Err(err) = telemetry.event(kind, version, payload) {
                let _ = telemetry.log(
                    LogLevel::Warn,
                    "event.publish_failed",
                    json!({ "error": err.to_string() }),
                );
            }
        }
    }
}

fn encode_model<M: Serialize + ?Sized>(version: &VersionId, model: &M) -> Result<Vec<u8>, StoreError> {
    let envelope = ModelEnvelope {
        format: ENVELOPE_FORMAT,
        version: version.to_string(),
        payload: bincode::serialize(model)?,
    };
    Ok(bincode::serialize(&envelope)?)
}

fn decode_envelope(bytes: &[u8], label: &str) -> Result<ModelEnvelope, StoreError> {
    let envelope: ModelEnvelope = bincode::deserialize(bytes)
        .map_err(|err| StoreError::corrupt(label, format!("model file: {err}")))?;
    if envelope.format != ENVELOPE_FORMAT {
        return Err(StoreError::corrupt(
            label,
            format!("unsupported model envelope format {}", envelope.format),
        ));
    }
    Ok(envelope)
}

fn decode_metadata(bytes: &[u8], label: &str) -> Result<MetadataRecord, StoreError> {
    serde_json::from_slice(bytes)
        .map_err(|err| StoreError::corrupt(label, format!("metadata file: {err}")))
}

fn alias_version(metadata: &MetadataRecord) -> Result<VersionId, StoreError> {
    metadata
        .version()
        .map_err(|err| StoreError::corrupt(LATEST_ALIAS, err.to_string()))
}

/// A file vanishing between the existence check and the read is reported as not found.
fn read_file(path: &Path, label: &str) -> Result<Vec<u8>, StoreError> {
    fs::read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => StoreError::ArtifactNotFound(label.to_string()),
        _ => StoreError::Io(err),
    })
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Metrics, Parameters};
    use chrono::Utc;
    use serde::ser::{Error as _, Serializer};
    use tempfile::tempdir;

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("model refuses to serialize"))
        }
    }

    fn draft() -> MetadataDraft {
        MetadataDraft {
            training_date: Utc::now(),
            model_kind: "Stub".into(),
            metrics: Metrics::from([("accuracy".to_string(), 0.5)]),
            parameters: Parameters::new(),
            features: vec!["x".into()],
            target: "y".into(),
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn encode_failure_leaves_no_files() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let err = store.publish(&Unencodable, draft()).unwrap_err();
        assert!(matches!(err, StoreError::Encode(_)));
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn successful_publish_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let version = store.publish(&vec![1_u8, 2, 3], draft()).unwrap();
        assert_eq!(
            entries(dir.path()),
            [
                format!("metadata_{version}.json"),
                "metadata_latest.json".to_string(),
                format!("model_{version}.bin"),
                "model_latest.bin".to_string(),
            ]
        );
    }

    #[test]
    fn envelope_embeds_version() {
        let version = VersionId::parse("v_20260101_000000").unwrap();
        let bytes = encode_model(&version, &42_u32).unwrap();
        let envelope = decode_envelope(&bytes, "t").unwrap();
        assert_eq!(envelope.version, "v_20260101_000000");
        assert_eq!(bincode::deserialize::<u32>(&envelope.payload).unwrap(), 42);
    }

    #[test]
    fn garbage_model_file_is_corrupt() {
        assert!(matches!(
            decode_envelope(b"\x01", "v_20260101_000000"),
            Err(StoreError::CorruptArtifact { .. })
        ));
    }
}
