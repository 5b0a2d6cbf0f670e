//! Structured logging and event emission shared by the store and the training pipeline.

use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

use crate::events::{EventPublisher, StoreEvent, StoreEventKind};

/// Builder for depot telemetry sinks.
pub struct DepotTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl DepotTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<DepotTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?.with_min_level(self.min_level)),
            None => None,
        };
        let event = match self.event_publisher {
            Some(publisher) => Some(EventHandle::new(publisher)?),
            None => None,
        };
        Ok(DepotTelemetry {
            module: Arc::from(self.module),
            sinks: Arc::new(Sinks { logger, event }),
        })
    }
}

/// Cheaply cloneable telemetry handle.
#[derive(Clone)]
pub struct DepotTelemetry {
    module: Arc<str>,
    sinks: Arc<Sinks>,
}

impl fmt::Debug for DepotTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepotTelemetry")
            .field("module", &self.module)
            .field("logs", &self.sinks.logger.is_some())
            .field("events", &self.sinks.event.is_some())
            .finish()
    }
}

struct Sinks {
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    /// Only `None` while dropping.
    runtime: Option<Runtime>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Some(
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?,
            ),
            publisher,
        })
    }

    fn publish(&self, event: StoreEvent) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(event).await {
                    eprintln!("store event publish failed: {err:?}");
                }
            });
            Ok(())
        } else if let Some(runtime) = &self.runtime {
            runtime.block_on(self.publisher.publish(event))
        } else {
            Ok(())
        }
    }
}

impl Drop for EventHandle {
    fn drop(&mut self) {
        // The last handle may be released from inside an async task, where a
        // blocking runtime shutdown panics.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl DepotTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> DepotTelemetryBuilder {
        DepotTelemetryBuilder::new(module)
    }

    /// Same sinks, different component name.
    #[must_use]
    pub fn for_module(&self, module: impl Into<String>) -> Self {
        let module: String = module.into();
        Self {
            module: Arc::from(module),
            sinks: Arc::clone(&self.sinks),
        }
    }

    /// Component name stamped on records.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.sinks.logger {
            let record = LogRecord::new(&*self.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event.
    pub fn event(&self, kind: StoreEventKind, version: Option<&str>, payload: Value) -> Result<()> {
        if let Some(handle) = &self.sinks.event {
            handle.publish(StoreEvent::new(
                &*self.module,
                kind,
                version.map(ToOwned::to_owned),
                payload,
            ))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventBus;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = DepotTelemetry::builder("artifact_store")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "publish.completed", json!({ "version": "v_20260101_000000" }))
            .unwrap();
        telemetry
            .event(
                StoreEventKind::VersionPublished,
                Some("v_20260101_000000"),
                json!({}),
            )
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("publish.completed"));
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "artifact_store");
    }

    #[tokio::test]
    async fn dropping_inside_async_runtime_is_clean() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let telemetry = DepotTelemetry::builder("artifact_store")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .event(StoreEventKind::VersionPublished, Some("v_20260101_000000"), json!({}))
            .unwrap();
        drop(telemetry);
        tokio::task::yield_now().await;
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[test]
    fn min_level_applies_to_log_sink() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("store.log");
        let telemetry = DepotTelemetry::builder("artifact_store")
            .log_path(&path)
            .min_level(LogLevel::Warn)
            .build()
            .unwrap();
        telemetry.log(LogLevel::Info, "list.read", json!({})).unwrap();
        telemetry.log(LogLevel::Warn, "alias.mismatch", json!({})).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
