//! Store lifecycle events consumed by dashboards and the CI trigger.

use std::{
    collections::VecDeque,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// What happened in the store or pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StoreEventKind {
    /// A versioned pair and both aliases were written.
    VersionPublished,
    /// Validation refused a publish before any write.
    PublishRejected,
    /// The versioned pair is durable but the alias rewrite failed.
    AliasUpdateFailed,
    /// The alias was moved to an existing version by an operator.
    AliasRepointed,
    /// A training run finished evaluation.
    TrainingCompleted,
}

/// Event record encoded as one JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEvent {
    /// Unique identifier.
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Event kind.
    pub kind: StoreEventKind,
    /// Version the event refers to, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Extra structured fields.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl StoreEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        kind: StoreEventKind,
        version: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            kind,
            version,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: StoreEvent) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver for events published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<StoreEvent>>;
}

/// In-memory broadcast bus with a bounded backlog, for tests and in-process dashboards.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<StoreEvent>,
    backlog: Arc<Mutex<VecDeque<StoreEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a new bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoreEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events of one kind, oldest first.
    #[must_use]
    pub fn of_kind(&self, kind: StoreEventKind) -> Vec<StoreEvent> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: StoreEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<StoreEvent>> {
        Ok(self.sender.subscribe())
    }
}

/// Appends events as JSON lines; the deployment pipeline tails this file.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher appending to `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating event log dir {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Path of the event log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: StoreEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Reads every event recorded in a JSON-lines event log.
pub fn read_event_log(path: impl AsRef<Path>) -> Result<Vec<StoreEvent>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file =
        fs::File::open(path).with_context(|| format!("opening event log {}", path.display()))?;
    let mut events = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line).context("decoding store event")?);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    fn published(version: &str) -> StoreEvent {
        StoreEvent::new(
            "artifact_store",
            StoreEventKind::VersionPublished,
            Some(version.into()),
            json!({ "accuracy": 0.85 }),
        )
    }

    #[test]
    fn memory_bus_broadcasts_and_bounds_backlog() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(2);
            let mut rx = bus.subscribe().await.unwrap();
            bus.publish(published("v_20260101_000000")).await.unwrap();
            let first = rx.recv().await.unwrap();
            assert_eq!(first.version.as_deref(), Some("v_20260101_000000"));
            for version in ["v_20260101_000001", "v_20260101_000002"] {
                bus.publish(published(version)).await.unwrap();
            }
            let backlog = bus.snapshot();
            assert_eq!(backlog.len(), 2);
            assert_eq!(backlog[0].version.as_deref(), Some("v_20260101_000001"));
            assert_eq!(bus.of_kind(StoreEventKind::VersionPublished).len(), 2);
        });
    }

    #[test]
    fn file_publisher_round_trips_through_reader() {
        let rt = Runtime::new().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("events/store.jsonl");
        let publisher = FileEventPublisher::new(&path).unwrap();
        rt.block_on(async {
            publisher.publish(published("v_20260101_000000")).await.unwrap();
            publisher
                .publish(StoreEvent::new(
                    "artifact_store",
                    StoreEventKind::PublishRejected,
                    None,
                    json!({ "reason": "metrics are empty" }),
                ))
                .await
                .unwrap();
        });
        let events = read_event_log(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, StoreEventKind::PublishRejected);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\":\"version_published\""));
        assert!(!raw.lines().nth(1).unwrap().contains("\"version\""));
    }

    #[test]
    fn missing_event_log_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_event_log(dir.path().join("none.jsonl")).unwrap().is_empty());
    }
}
