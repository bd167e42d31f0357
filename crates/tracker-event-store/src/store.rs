//! The event store contract.

use crate::{EventId, EventPayload, StoreResult, StoredEvent};
use serde::{Deserialize, Serialize};

/// What to do with an insert when the store is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Reject the incoming event; the oldest events are kept.
    #[default]
    DropNewest,
    /// Evict the oldest pending event to make room; the newest are kept.
    DropOldest,
}

/// Optional cap on the number of pending events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCapacity {
    pub max_events: usize,
    #[serde(default)]
    pub drop_policy: DropPolicy,
}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Event persisted under this id.
    Stored(EventId),
    /// Store was full and the drop policy rejected the event.
    Dropped,
}

impl InsertOutcome {
    pub fn id(&self) -> Option<EventId> {
        match self {
            Self::Stored(id) => Some(*id),
            Self::Dropped => None,
        }
    }
}

/// Durable, ordered, append-only queue of pending events.
///
/// Implementations must:
/// - assign strictly increasing ids that are never reused
/// - persist before `insert` returns
/// - return events from `query` in ascending id order without mutating
///   state, except that a durable store may delete rows it can no longer
///   decode (counting them in `dropped_count`)
/// - treat `remove` of unknown or already-removed ids as a no-op
pub trait EventStore: Send + Sync {
    /// Append an event and return its id (or `Dropped` when capped).
    fn insert(&self, payload: EventPayload) -> StoreResult<InsertOutcome>;

    /// Up to `limit` oldest pending events, ascending by id.
    ///
    /// Undecodable rows are discarded rather than returned.
    fn query(&self, limit: usize) -> StoreResult<Vec<StoredEvent>>;

    /// Delete the given events. Returns how many rows were actually removed.
    fn remove(&self, ids: &[EventId]) -> StoreResult<usize>;

    /// Number of pending events.
    fn count(&self) -> StoreResult<usize>;

    /// Events rejected or evicted by the capacity policy since open.
    fn dropped_count(&self) -> u64;

    /// Configured capacity, if any.
    fn capacity(&self) -> Option<StoreCapacity>;
}
