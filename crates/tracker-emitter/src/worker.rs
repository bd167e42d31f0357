//! A single delivery cycle: drain the store batch by batch.

use crate::report::Reporter;
use crate::{
    Batch, BatchBuilder, Classification, DeliveryReport, FailureKind, ResultCallback,
    RetryPolicy, SendOutcome, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracker_event_store::EventStore;

/// Why a delivery cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleStop {
    /// The store reported no pending events.
    #[default]
    Drained,
    /// The emitter was paused; the current batch finished first.
    Paused,
    /// A batch failed retryably; its events and all younger ones stay queued.
    RetryableFailure {
        /// The failure was a 429.
        rate_limited: bool,
    },
    /// The store could not be read or updated.
    StoreUnavailable,
}

/// Summary of one delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleResult {
    /// Events acknowledged by the collector.
    pub sent_count: usize,
    /// Events removed without delivery (rejected or oversized).
    pub dropped_count: usize,
    /// Pending events remain and another cycle should be scheduled after backoff.
    pub should_continue: bool,
    pub stop: CycleStop,
    /// At least one batch succeeded.
    pub had_success: bool,
}

/// Pulls batches from the store and sends them sequentially.
pub struct DeliveryWorker {
    store: Arc<dyn EventStore>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    emit_range: usize,
    paused: Arc<AtomicBool>,
    reporter: Reporter,
}

impl DeliveryWorker {
    /// Create a worker.
    ///
    /// `paused` is checked before every batch; setting it stops the cycle
    /// once the in-flight batch resolves.
    pub fn new(
        store: Arc<dyn EventStore>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        emit_range: usize,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            emit_range: emit_range.max(1),
            paused,
            reporter: Reporter::default(),
        }
    }

    /// Register a per-batch result callback. Must be called inside a tokio runtime.
    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.reporter = Reporter::spawn(callback);
        self
    }

    pub(crate) fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one delivery cycle.
    ///
    /// Loops `query -> build -> send each batch -> classify -> remove/retain`
    /// until the store is empty, a batch fails retryably, the store errors,
    /// or the emitter is paused.
    pub async fn run_cycle(&self, builder: &BatchBuilder) -> CycleResult {
        let mut result = CycleResult::default();

        loop {
            if self.is_paused() {
                return self.finish(result, CycleStop::Paused);
            }

            let events = match self.store.query(self.emit_range) {
                Ok(events) => events,
                Err(e) => {
                    error!(error = %e, "Failed to read pending events");
                    return self.finish(result, CycleStop::StoreUnavailable);
                }
            };
            if events.is_empty() {
                return self.finish(result, CycleStop::Drained);
            }

            for batch in builder.build(events) {
                if self.is_paused() {
                    return self.finish(result, CycleStop::Paused);
                }
                if let Some(stop) = self.deliver(&batch, &mut result).await {
                    return self.finish(result, stop);
                }
            }
        }
    }

    /// Send one batch and apply its outcome. Returns a stop reason if the
    /// cycle must end here.
    async fn deliver(&self, batch: &Batch, result: &mut CycleResult) -> Option<CycleStop> {
        let outcome = self.transport.send(batch).await;
        let classification = self.policy.classify(&outcome);
        let status = match &outcome {
            SendOutcome::Status(status) => Some(*status),
            SendOutcome::NetworkError(_) => None,
        };
        let ids = batch.event_ids();

        let failure = match classification {
            Classification::Success => None,
            Classification::NonRetryable => Some(FailureKind::CollectorRejected),
            _ if batch.oversized => Some(FailureKind::Oversized),
            Classification::RateLimited => Some(FailureKind::RateLimited),
            Classification::Retryable if status.is_none() => Some(FailureKind::Transport),
            Classification::Retryable => Some(FailureKind::Retryable),
        };
        let retained = !classification.removes_events() && !batch.oversized;

        if !retained {
            if let Err(e) = self.store.remove(&ids) {
                error!(error = %e, events = ids.len(), "Failed to remove delivered events");
                return Some(CycleStop::StoreUnavailable);
            }
        }

        match failure {
            None => {
                result.sent_count += batch.len();
                result.had_success = true;
                debug!(events = batch.len(), status, "Batch delivered");
            }
            Some(kind) if !retained => {
                result.dropped_count += batch.len();
                warn!(events = batch.len(), status, kind = ?kind, "Batch dropped");
            }
            Some(kind) => {
                warn!(events = batch.len(), status, kind = ?kind, "Batch failed, keeping for retry");
            }
        }

        self.reporter.report(DeliveryReport {
            encoding: batch.encoding,
            successful_events: if failure.is_none() { batch.len() } else { 0 },
            failed_events: if failure.is_some() { batch.len() } else { 0 },
            event_ids: ids,
            status,
            failure,
            retained,
        });

        retained.then_some(CycleStop::RetryableFailure {
            rate_limited: classification == Classification::RateLimited,
        })
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn finish(&self, mut result: CycleResult, stop: CycleStop) -> CycleResult {
        result.stop = stop;
        result.should_continue = matches!(
            stop,
            CycleStop::RetryableFailure { .. } | CycleStop::StoreUnavailable
        );
        if result.sent_count > 0 || result.dropped_count > 0 {
            info!(
                sent = result.sent_count,
                dropped = result.dropped_count,
                stop = ?stop,
                "Delivery cycle finished"
            );
        }
        result
    }
}
