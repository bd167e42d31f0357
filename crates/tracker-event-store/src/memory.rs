//! In-memory event store.

use crate::{
    DropPolicy, EventId, EventPayload, EventStore, InsertOutcome, StoreCapacity, StoreResult,
    StoredEvent,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Default)]
struct Inner {
    events: BTreeMap<EventId, StoredEvent>,
    next_id: EventId,
}

/// Non-durable event store. Same ordering and idempotence guarantees as
/// [`SqliteEventStore`](crate::SqliteEventStore), lost on process exit.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
    capacity: Option<StoreCapacity>,
    dropped: AtomicU64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of pending events.
    pub fn with_capacity(mut self, capacity: StoreCapacity) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

impl EventStore for MemoryEventStore {
    fn insert(&self, payload: EventPayload) -> StoreResult<InsertOutcome> {
        let mut inner = self.inner.lock();

        if let Some(capacity) = self.capacity {
            if inner.events.len() >= capacity.max_events {
                if capacity.max_events == 0 || capacity.drop_policy == DropPolicy::DropNewest {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(max_events = capacity.max_events, "Event store full, dropping new event");
                    return Ok(InsertOutcome::Dropped);
                }
                while inner.events.len() >= capacity.max_events {
                    if inner.events.pop_first().is_none() {
                        break;
                    }
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .events
            .insert(id, StoredEvent::new(id, payload, Utc::now()));
        Ok(InsertOutcome::Stored(id))
    }

    fn query(&self, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let inner = self.inner.lock();
        Ok(inner.events.values().take(limit).cloned().collect())
    }

    fn remove(&self, ids: &[EventId]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        Ok(ids
            .iter()
            .filter(|id| inner.events.remove(*id).is_some())
            .count())
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.inner.lock().events.len())
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> Option<StoreCapacity> {
        self.capacity
    }
}
