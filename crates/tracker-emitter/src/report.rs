//! Per-batch delivery reports and the queued result callback.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use tracker_event_store::{Encoding, EventId};

/// Why a batch did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No response from the collector. Events retained.
    Transport,
    /// Non-retryable status. Events dropped.
    CollectorRejected,
    /// Collector backpressure (429). Events retained.
    RateLimited,
    /// Server error or allow-listed status. Events retained.
    Retryable,
    /// A lone event over the byte limit failed retryably. Event dropped.
    Oversized,
}

/// Outcome of one batch, delivered to the result callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub encoding: Encoding,
    pub event_ids: Vec<EventId>,
    pub successful_events: usize,
    pub failed_events: usize,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    pub failure: Option<FailureKind>,
    /// Failed events are still in the store awaiting retry.
    pub retained: bool,
}

impl DeliveryReport {
    /// Failed events that were removed from the store.
    pub fn dropped_events(&self) -> usize {
        if self.retained {
            0
        } else {
            self.failed_events
        }
    }
}

/// Observability hook invoked once per batch, off the delivery path.
pub type ResultCallback = Arc<dyn Fn(&DeliveryReport) + Send + Sync>;

/// Queues reports to a dedicated task so a slow callback never stalls delivery.
#[derive(Clone, Default)]
pub(crate) struct Reporter {
    sender: Option<mpsc::UnboundedSender<DeliveryReport>>,
}

impl Reporter {
    /// Spawn the callback task. Must be called inside a tokio runtime.
    pub(crate) fn spawn(callback: ResultCallback) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<DeliveryReport>();
        tokio::spawn(async move {
            while let Some(report) = receiver.recv().await {
                callback(&report);
            }
            debug!("Delivery report task stopped (channel closed)");
        });
        Self {
            sender: Some(sender),
        }
    }

    pub(crate) fn report(&self, report: DeliveryReport) {
        if let Some(sender) = &self.sender {
            if sender.send(report).is_err() {
                debug!("Delivery report dropped (callback task gone)");
            }
        }
    }
}
