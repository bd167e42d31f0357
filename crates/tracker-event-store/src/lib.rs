//! Durable event queue for the tracker emitter.
//!
//! This crate provides:
//! - `EventStore`: ordered, append-only queue contract shared by all backends
//! - `SqliteEventStore`: SQLite-backed store that survives process restarts
//! - `MemoryEventStore`: non-durable store for ephemeral emitters and tests
//! - `EventPayload` / `StoredEvent`: the event model and its precomputed wire sizes
//!
//! # Ordering
//!
//! Every backend assigns ids from a monotonically increasing counter and
//! returns events oldest first. Ids are never reused, including across
//! restarts of the SQLite backend.
//!
//! ```ignore
//! let store = SqliteEventStore::open(&paths.events_database())?;
//! let outcome = store.insert(payload)?;
//! let pending = store.query(150)?;
//! store.remove(&pending.iter().map(|e| e.id).collect::<Vec<_>>())?;
//! ```

mod error;
mod memory;
mod migrations;
mod payload;
mod sqlite;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryEventStore;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use payload::{Encoding, EventId, EventPayload, StoredEvent};
pub use sqlite::SqliteEventStore;
pub use store::{DropPolicy, EventStore, InsertOutcome, StoreCapacity};
