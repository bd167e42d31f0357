//! Reliable delivery of tracked events to a remote collector.
//!
//! This crate provides:
//! - Emitter: coordinator owning the store, driver loop, pause/resume/flush
//! - DeliveryWorker: one delivery cycle (query, batch, send, classify, remove)
//! - BatchBuilder: byte- and count-limited batching per encoding
//! - RetryPolicy: HTTP outcome classification and exponential backoff
//! - HttpTransport: reqwest-based GET/POST transport
//!
//! ```ignore
//! let store = Arc::new(SqliteEventStore::open(&path)?);
//! let transport = Arc::new(HttpTransport::new(&config)?);
//! let emitter = Emitter::new(config, store, transport)?;
//! emitter.start()?;
//!
//! emitter.add(payload)?;
//! emitter.shutdown(Duration::from_secs(5)).await?;
//! ```

mod batch;
mod config;
mod emitter;
mod error;
mod report;
mod retry;
mod transport;
mod worker;

pub use batch::{Batch, BatchBuilder, BatchLimits, EnvelopeOverhead};
pub use config::{BufferOption, EmitterConfig, RateLimitAction};
pub use emitter::{Emitter, EmitterState};
pub use error::{EmitterError, EmitterResult};
pub use report::{DeliveryReport, FailureKind, ResultCallback};
pub use retry::{Classification, RetryPolicy, SendOutcome};
pub use transport::{HttpTransport, Transport, PAYLOAD_DATA_SCHEMA};
pub use worker::{CycleResult, CycleStop, DeliveryWorker};

pub use tracker_event_store::{
    DropPolicy, Encoding, EventId, EventPayload, EventStore, InsertOutcome, MemoryEventStore,
    SqliteEventStore, StoreCapacity, StoredEvent,
};
