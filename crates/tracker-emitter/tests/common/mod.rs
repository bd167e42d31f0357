#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracker_emitter::{
    Batch, DeliveryReport, EmitterConfig, EventId, EventPayload, ResultCallback, SendOutcome,
    Transport,
};

/// One recorded send.
#[derive(Debug, Clone)]
pub struct Sent {
    pub ids: Vec<EventId>,
    pub at: Instant,
}

/// Transport that replays scripted outcomes (200 once the script is empty).
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<Sent>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// When set, the first send signals `entered` and waits for `release`.
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    /// Sends never complete.
    hang: bool,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<SendOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        }
    }

    pub fn statuses(statuses: &[u16]) -> Self {
        Self::new(statuses.iter().map(|s| SendOutcome::Status(*s)).collect())
    }

    /// Returns the transport plus (entered, release) handles for the first send.
    pub fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = Self {
            gate: Some((entered.clone(), release.clone())),
            ..Default::default()
        };
        (transport, entered, release)
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn sent_ids(&self) -> Vec<Vec<EventId>> {
        self.sent.lock().iter().map(|s| s.ids.clone()).collect()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, batch: &Batch) -> SendOutcome {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let first = {
            let mut sent = self.sent.lock();
            sent.push(Sent {
                ids: batch.event_ids(),
                at: Instant::now(),
            });
            sent.len() == 1
        };

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let (true, Some((entered, release))) = (first, &self.gate) {
            entered.notify_one();
            release.notified().await;
        }
        // Give other tasks a chance to overlap if single-flight were broken.
        tokio::task::yield_now().await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(SendOutcome::Status(200))
    }
}

/// Config with deterministic backoff and a timer that never fires in tests.
pub fn test_config() -> EmitterConfig {
    EmitterConfig {
        endpoint: "http://collector.test".to_string(),
        flush_interval: Duration::from_secs(3600),
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(60),
        backoff_jitter: 0.0,
        ..Default::default()
    }
}

pub fn event(n: usize) -> EventPayload {
    EventPayload::new()
        .with("e", "se")
        .with("se_ca", "test")
        .with("se_ac", format!("action-{}", n))
}

/// Callback that records every report.
pub fn collecting_callback() -> (ResultCallback, Arc<Mutex<Vec<DeliveryReport>>>) {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let callback: ResultCallback = Arc::new(move |report: &DeliveryReport| {
        sink.lock().push(report.clone());
    });
    (callback, reports)
}

/// Let spawned tasks run without advancing far on a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
