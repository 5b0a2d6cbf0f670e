#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Depot artifact store: sortable version ids, validated metadata records,
//! atomic publish of model/metadata pairs, and the `latest` alias readers rely on.

/// Structured error types.
pub mod error;
/// Store lifecycle events and publishers.
pub mod events;
/// Dashboard read contract.
pub mod feed;
/// Metadata record, hyperparameter values, and validation.
pub mod metadata;
/// Filesystem store and atomic publish.
pub mod store;
/// Telemetry helpers for logging/event emission.
pub mod telemetry;
/// Version identifiers and clocks.
pub mod version;

pub use error::StoreError;
pub use events::{
    read_event_log, EventPublisher, EventSubscriber, FileEventPublisher, MemoryEventBus,
    StoreEvent, StoreEventKind,
};
pub use feed::{DashboardFeed, ModelSummary};
pub use metadata::{
    validate, InvalidMetadata, MetadataDraft, MetadataRecord, Metrics, ParamValue, Parameters,
    PRIMARY_METRICS,
};
pub use store::{ArtifactStore, LoadedVersion, ModelArtifact, LATEST_ALIAS, MODEL_EXTENSION};
pub use telemetry::{DepotTelemetry, DepotTelemetryBuilder};
pub use version::{Clock, FixedClock, SystemClock, VersionId, VersionParseError};
