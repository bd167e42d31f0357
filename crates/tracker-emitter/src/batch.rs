//! Groups stored events into network-sized batches.

use tracker_event_store::{Encoding, EventId, StoredEvent};

/// Bytes a transport adds around the events it sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvelopeOverhead {
    /// Added once per request (e.g. the POST schema wrapper).
    pub fixed: usize,
    /// Added per event (separators, send timestamp).
    pub per_event: usize,
}

impl EnvelopeOverhead {
    pub const NONE: Self = Self {
        fixed: 0,
        per_event: 0,
    };
}

/// Size and count ceilings for a single batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub byte_limit: usize,
    pub count_limit: usize,
}

/// A group of events sent in one network exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Non-empty, ascending by id.
    pub events: Vec<StoredEvent>,
    pub encoding: Encoding,
    /// Event sizes plus envelope overhead.
    pub total_bytes: usize,
    /// A lone event that exceeds the byte limit by itself.
    pub oversized: bool,
}

impl Batch {
    /// Get the event IDs in this batch.
    pub fn event_ids(&self) -> Vec<EventId> {
        self.events.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Deterministic, order-preserving greedy batcher for one encoding.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    encoding: Encoding,
    limits: BatchLimits,
    overhead: EnvelopeOverhead,
}

impl BatchBuilder {
    pub fn new(encoding: Encoding, limits: BatchLimits, overhead: EnvelopeOverhead) -> Self {
        Self {
            encoding,
            limits,
            overhead,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Partition `events` into batches.
    ///
    /// Events are appended to the open batch while its byte total stays
    /// within `byte_limit` and it holds fewer than `count_limit` events;
    /// otherwise the batch is closed and the event starts a new one. An
    /// event too large to fit even alone is sent in its own batch marked
    /// `oversized`. GET batches always hold a single event, whatever
    /// `count_limit` says, since each one is its own request.
    pub fn build(&self, events: Vec<StoredEvent>) -> Vec<Batch> {
        let count_limit = match self.encoding {
            Encoding::Get => 1,
            Encoding::Post => self.limits.count_limit.max(1),
        };
        let mut batches = Vec::new();
        let mut current: Vec<StoredEvent> = Vec::new();
        let mut current_bytes = self.overhead.fixed;

        for event in events {
            let cost = event.encoding_size(self.encoding) + self.overhead.per_event;

            if self.overhead.fixed + cost > self.limits.byte_limit {
                if !current.is_empty() {
                    batches.push(self.close(std::mem::take(&mut current), current_bytes));
                    current_bytes = self.overhead.fixed;
                }
                batches.push(Batch {
                    events: vec![event],
                    encoding: self.encoding,
                    total_bytes: self.overhead.fixed + cost,
                    oversized: true,
                });
                continue;
            }

            let over_bytes = current_bytes + cost > self.limits.byte_limit;
            if !current.is_empty() && (over_bytes || current.len() >= count_limit) {
                batches.push(self.close(std::mem::take(&mut current), current_bytes));
                current_bytes = self.overhead.fixed;
            }

            current_bytes += cost;
            current.push(event);
        }

        if !current.is_empty() {
            batches.push(self.close(current, current_bytes));
        }
        batches
    }

    fn close(&self, events: Vec<StoredEvent>, total_bytes: usize) -> Batch {
        Batch {
            events,
            encoding: self.encoding,
            total_bytes,
            oversized: false,
        }
    }
}
