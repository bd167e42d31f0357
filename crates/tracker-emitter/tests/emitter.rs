mod common;

use common::{collecting_callback, event, settle, test_config, ScriptedTransport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracker_emitter::{
    BufferOption, CycleStop, DropPolicy, Emitter, EmitterConfig, EmitterError, Encoding,
    EventPayload, EventStore, FailureKind, InsertOutcome, MemoryEventStore, RateLimitAction,
    SendOutcome, StoreCapacity, StoredEvent,
};
use tracker_event_store::{StoreError, StoreResult};

fn emitter_with(
    config: EmitterConfig,
    transport: Arc<ScriptedTransport>,
) -> (Emitter, Arc<MemoryEventStore>) {
    let store = Arc::new(MemoryEventStore::new());
    let emitter = Emitter::new(config, store.clone(), transport).expect("valid config");
    (emitter, store)
}

fn pending_ids(store: &MemoryEventStore) -> Vec<i64> {
    store.query(100).unwrap().iter().map(|e| e.id).collect()
}

#[tokio::test(start_paused = true)]
async fn server_error_keeps_events_and_backs_off() {
    let transport = Arc::new(ScriptedTransport::statuses(&[500]));
    let (emitter, store) = emitter_with(test_config(), transport.clone());
    emitter.start().unwrap();
    settle().await;

    for n in 0..3 {
        emitter.add(event(n)).unwrap();
    }
    let result = emitter.flush().await.unwrap();

    assert_eq!(result.stop, CycleStop::RetryableFailure { rate_limited: false });
    assert_eq!(result.sent_count, 0);
    assert_eq!(pending_ids(&store), vec![1, 2, 3]);
    assert_eq!(emitter.state().retry_backoff_level, 1);

    // Level 1 waits base * 2.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].at - sent[0].at, Duration::from_secs(2));
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(emitter.state().retry_backoff_level, 0);
}

#[tokio::test(start_paused = true)]
async fn not_found_drops_events_and_reports_them() {
    let transport = Arc::new(ScriptedTransport::statuses(&[404]));
    let (callback, reports) = collecting_callback();
    let (emitter, store) = emitter_with(test_config(), transport.clone());
    let emitter = emitter.with_result_callback(callback);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    emitter.add(event(2)).unwrap();
    let result = emitter.flush().await.unwrap();
    settle().await;

    assert_eq!(result.stop, CycleStop::Drained);
    assert_eq!(result.dropped_count, 2);
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(emitter.state().retry_backoff_level, 0);
    assert_eq!(emitter.dropped_count(), 2);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, Some(404));
    assert_eq!(reports[0].failure, Some(FailureKind::CollectorRejected));
    assert_eq!(reports[0].dropped_events(), 2);
}

#[tokio::test(start_paused = true)]
async fn pause_mid_cycle_stops_after_current_batch() {
    let (transport, entered, release) = ScriptedTransport::gated();
    let transport = Arc::new(transport);
    let config = EmitterConfig {
        method: Encoding::Get,
        ..test_config()
    };
    let (emitter, store) = emitter_with(config, transport.clone());
    let emitter = Arc::new(emitter);
    emitter.start().unwrap();
    settle().await;

    for n in 0..3 {
        emitter.add(event(n)).unwrap();
    }
    let flushing = tokio::spawn({
        let emitter = emitter.clone();
        async move { emitter.flush().await }
    });

    entered.notified().await;
    emitter.pause();
    assert!(emitter.state().in_flight);
    release.notify_one();

    let result = flushing.await.unwrap().unwrap();
    assert_eq!(result.stop, CycleStop::Paused);
    assert_eq!(result.sent_count, 1);
    assert_eq!(transport.sent_ids(), vec![vec![1]]);
    assert_eq!(pending_ids(&store), vec![2, 3]);

    emitter.resume();
    settle().await;
    assert_eq!(transport.sent_ids(), vec![vec![1], vec![2], vec![3]]);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn success_resets_backoff_level() {
    let transport = Arc::new(ScriptedTransport::statuses(&[503, 503]));
    let (emitter, _store) = emitter_with(test_config(), transport);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    emitter.flush().await.unwrap();
    assert_eq!(emitter.state().retry_backoff_level, 1);
    emitter.flush().await.unwrap();
    assert_eq!(emitter.state().retry_backoff_level, 2);

    let result = emitter.flush().await.unwrap();
    assert_eq!(result.stop, CycleStop::Drained);
    assert_eq!(result.sent_count, 1);
    assert_eq!(emitter.state().retry_backoff_level, 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_extends_backoff() {
    let transport = Arc::new(ScriptedTransport::statuses(&[429]));
    let (emitter, store) = emitter_with(test_config(), transport);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    let result = emitter.flush().await.unwrap();

    assert_eq!(result.stop, CycleStop::RetryableFailure { rate_limited: true });
    assert_eq!(emitter.state().retry_backoff_level, 2);
    assert!(!emitter.is_paused());
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_can_pause_until_resumed() {
    let transport = Arc::new(ScriptedTransport::statuses(&[429]));
    let config = EmitterConfig {
        rate_limit_action: RateLimitAction::Pause,
        ..test_config()
    };
    let (emitter, store) = emitter_with(config, transport.clone());
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    emitter.flush().await.unwrap();
    assert!(emitter.is_paused());

    // No automatic retry while paused.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.sent().len(), 1);

    emitter.resume();
    settle().await;
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn paused_emitter_persists_but_does_not_send() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = EmitterConfig {
        initially_paused: true,
        buffer_option: BufferOption::Single,
        ..test_config()
    };
    let (emitter, _store) = emitter_with(config, transport.clone());
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    let result = emitter.flush().await.unwrap();

    assert_eq!(result.stop, CycleStop::Paused);
    assert!(transport.sent().is_empty());
    assert_eq!(emitter.pending_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn buffer_threshold_triggers_delivery() {
    let transport = Arc::new(ScriptedTransport::default());
    let (emitter, store) = emitter_with(test_config(), transport.clone());
    emitter.start().unwrap();
    settle().await;

    for n in 0..9 {
        emitter.add(event(n)).unwrap();
    }
    settle().await;
    assert!(transport.sent().is_empty());

    emitter.add(event(9)).unwrap();
    settle().await;
    assert_eq!(transport.sent_ids(), vec![(1..=10).collect::<Vec<_>>()]);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn timer_delivers_below_threshold() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = EmitterConfig {
        flush_interval: Duration::from_secs(5),
        ..test_config()
    };
    let (emitter, store) = emitter_with(config, transport.clone());
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    settle().await;
    assert!(transport.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(transport.sent_ids(), vec![vec![1]]);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_triggers_never_overlap() {
    let transport = Arc::new(ScriptedTransport::default());
    let config = EmitterConfig {
        buffer_option: BufferOption::Single,
        method: Encoding::Get,
        ..test_config()
    };
    let (emitter, store) = emitter_with(config, transport.clone());
    let emitter = Arc::new(emitter);
    emitter.start().unwrap();
    settle().await;

    let mut handles = Vec::new();
    for n in 0..20 {
        let emitter = emitter.clone();
        handles.push(tokio::spawn(async move {
            emitter.add(event(n)).unwrap();
            emitter.flush().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(transport.max_concurrent(), 1);
    assert_eq!(store.count().unwrap(), 0);
    let mut ids: Vec<i64> = transport.sent_ids().into_iter().flatten().collect();
    assert_eq!(ids.len(), 20);
    ids.dedup();
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
}

/// Memory store that runs a hook once, the first time `query` comes back empty.
#[derive(Default)]
struct HookedStore {
    inner: MemoryEventStore,
    on_empty: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl EventStore for HookedStore {
    fn insert(&self, payload: EventPayload) -> StoreResult<InsertOutcome> {
        self.inner.insert(payload)
    }
    fn query(&self, limit: usize) -> StoreResult<Vec<StoredEvent>> {
        let events = self.inner.query(limit)?;
        if events.is_empty() {
            let hook = self.on_empty.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        Ok(events)
    }
    fn remove(&self, ids: &[i64]) -> StoreResult<usize> {
        self.inner.remove(ids)
    }
    fn count(&self) -> StoreResult<usize> {
        self.inner.count()
    }
    fn dropped_count(&self) -> u64 {
        self.inner.dropped_count()
    }
    fn capacity(&self) -> Option<StoreCapacity> {
        self.inner.capacity()
    }
}

#[tokio::test(start_paused = true)]
async fn add_during_final_query_is_delivered_without_timer() {
    let transport = Arc::new(ScriptedTransport::default());
    let store = Arc::new(HookedStore::default());
    let config = EmitterConfig {
        buffer_option: BufferOption::Single,
        ..test_config()
    };
    let emitter = Arc::new(Emitter::new(config, store.clone(), transport.clone()).unwrap());
    emitter.start().unwrap();
    settle().await;

    let handle = Arc::downgrade(&emitter);
    *store.on_empty.lock() = Some(Box::new(move || {
        if let Some(emitter) = handle.upgrade() {
            assert!(emitter.state().in_flight);
            emitter.add(event(99)).unwrap();
        }
    }));
    emitter.add(event(1)).unwrap();

    // Well short of the one hour flush interval.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.sent_ids(), vec![vec![1], vec![2]]);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_pending_events() {
    let transport = Arc::new(ScriptedTransport::default());
    let (emitter, store) = emitter_with(test_config(), transport);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    let result = emitter.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(result.sent_count, 1);
    assert_eq!(store.count().unwrap(), 0);
    assert!(matches!(emitter.flush().await, Err(EmitterError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_timeout_leaves_events_queued() {
    let transport = Arc::new(ScriptedTransport::hanging());
    let (emitter, store) = emitter_with(test_config(), transport);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    let result = emitter.shutdown(Duration::from_secs(2)).await;

    assert!(matches!(result, Err(EmitterError::Timeout(_))));
    assert_eq!(store.count().unwrap(), 1);
    assert!(!emitter.state().in_flight);
}

#[tokio::test(start_paused = true)]
async fn network_errors_are_retried() {
    let transport = Arc::new(ScriptedTransport::new(vec![SendOutcome::NetworkError(
        "connection refused".to_string(),
    )]));
    let (callback, reports) = collecting_callback();
    let (emitter, store) = emitter_with(test_config(), transport.clone());
    let emitter = emitter.with_result_callback(callback);
    emitter.start().unwrap();
    settle().await;

    emitter.add(event(1)).unwrap();
    emitter.flush().await.unwrap();
    assert_eq!(store.count().unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(store.count().unwrap(), 0);

    let reports = reports.lock();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].failure, Some(FailureKind::Transport));
    assert!(reports[0].retained);
    assert_eq!(reports[1].successful_events, 1);
}

#[tokio::test(start_paused = true)]
async fn capacity_drops_are_counted() {
    let transport = Arc::new(ScriptedTransport::default());
    let store = Arc::new(MemoryEventStore::new().with_capacity(StoreCapacity {
        max_events: 2,
        drop_policy: DropPolicy::DropNewest,
    }));
    let emitter = Emitter::new(test_config(), store, transport).unwrap();

    emitter.add(event(1)).unwrap();
    emitter.add(event(2)).unwrap();
    let outcome = emitter.add(event(3)).unwrap();

    assert_eq!(outcome, InsertOutcome::Dropped);
    assert_eq!(emitter.dropped_count(), 1);
    assert_eq!(emitter.pending_count().unwrap(), 2);
}

struct BrokenStore;

impl EventStore for BrokenStore {
    fn insert(&self, _payload: EventPayload) -> StoreResult<InsertOutcome> {
        Err(StoreError::InvalidPayload("disk full".to_string()))
    }
    fn query(&self, _limit: usize) -> StoreResult<Vec<StoredEvent>> {
        Ok(Vec::new())
    }
    fn remove(&self, _ids: &[i64]) -> StoreResult<usize> {
        Ok(0)
    }
    fn count(&self) -> StoreResult<usize> {
        Ok(0)
    }
    fn dropped_count(&self) -> u64 {
        0
    }
    fn capacity(&self) -> Option<StoreCapacity> {
        None
    }
}

#[test]
fn persistence_failure_is_counted_as_lost() {
    let emitter = Emitter::new(
        test_config(),
        Arc::new(BrokenStore),
        Arc::new(ScriptedTransport::default()),
    )
    .unwrap();

    let result = emitter.add(event(1));

    assert!(matches!(result, Err(EmitterError::Persistence(_))));
    assert_eq!(emitter.lost_count(), 1);
}
