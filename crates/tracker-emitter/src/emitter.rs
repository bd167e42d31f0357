//! # Emitter
//!
//! Public coordinator for event delivery. Producers call [`Emitter::add`],
//! which only appends to the store. A single driver task owns every delivery
//! cycle and is woken by:
//!
//! - the flush timer (`flush_interval`)
//! - the buffer threshold being reached on `add`
//! - an explicit [`Emitter::flush`]
//! - the backoff deadline after a retryable failure
//!
//! ```text
//! add() ──▶ EventStore ◀── query/remove ── DeliveryWorker ──▶ Transport
//!   │                                           ▲
//!   └── Wake ──▶ command channel ──▶ driver ────┘
//!                 ticker / backoff ──┘
//! ```
//!
//! Because only the driver runs cycles, concurrent triggers queue behind the
//! running cycle instead of starting a second one.

use crate::report::Reporter;
use crate::{
    BatchBuilder, BatchLimits, CycleResult, CycleStop, DeliveryWorker, EmitterConfig,
    EmitterError, EmitterResult, HttpTransport, RateLimitAction, ResultCallback, RetryPolicy,
    Transport,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracker_event_store::{Encoding, EventPayload, EventStore, InsertOutcome};

/// Capacity of the driver command channel.
const COMMAND_CAPACITY: usize = 64;

/// How long `shutdown` waits for the driver to exit after a completed flush.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Snapshot of emitter state for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterState {
    pub paused: bool,
    /// A delivery cycle is currently running.
    pub in_flight: bool,
    pub retry_backoff_level: u32,
}

enum Command {
    Wake,
    Flush(oneshot::Sender<CycleResult>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
struct ByteLimits {
    get: usize,
    post: usize,
}

/// State shared between the emitter handle and its driver task.
struct Shared {
    paused: Arc<AtomicBool>,
    in_flight: AtomicBool,
    backoff_level: AtomicU32,
    /// Events whose `add` failed to persist.
    lost: AtomicU64,
    /// Events removed by delivery without being acknowledged.
    delivery_dropped: AtomicU64,
    limits: RwLock<ByteLimits>,
}

/// Event delivery coordinator.
///
/// # Lifecycle
///
/// 1. Create with [`Emitter::new()`] (or [`Emitter::with_http()`])
/// 2. Optionally register a callback with [`Emitter::with_result_callback()`]
/// 3. Call [`Emitter::start()`] inside a tokio runtime to spawn the driver
/// 4. Call [`Emitter::shutdown()`] before exit; undelivered events stay in
///    the store for the next start
///
/// # Thread Safety
///
/// `add`, `pause`, `resume` and the counters take `&self` and may be called
/// from any thread. `add` never awaits network I/O.
pub struct Emitter {
    config: EmitterConfig,
    store: Arc<dyn EventStore>,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    callback: Option<ResultCallback>,
    sender: mpsc::Sender<Command>,
    /// Channel receiver (taken by the driver on start).
    receiver: Mutex<Option<mpsc::Receiver<Command>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Emitter {
    /// Create an emitter over an existing store and transport.
    pub fn new(
        config: EmitterConfig,
        store: Arc<dyn EventStore>,
        transport: Arc<dyn Transport>,
    ) -> EmitterResult<Self> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let shared = Arc::new(Shared {
            paused: Arc::new(AtomicBool::new(config.initially_paused)),
            in_flight: AtomicBool::new(false),
            backoff_level: AtomicU32::new(0),
            lost: AtomicU64::new(0),
            delivery_dropped: AtomicU64::new(0),
            limits: RwLock::new(ByteLimits {
                get: config.byte_limit_get,
                post: config.byte_limit_post,
            }),
        });

        Ok(Self {
            config,
            store,
            transport,
            shared,
            callback: None,
            sender,
            receiver: Mutex::new(Some(receiver)),
            task: Mutex::new(None),
        })
    }

    /// Create an emitter that delivers over HTTP to `config.endpoint`.
    pub fn with_http(config: EmitterConfig, store: Arc<dyn EventStore>) -> EmitterResult<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(config, store, transport)
    }

    /// Register a callback invoked once per delivered or failed batch.
    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Spawn the driver task. Must be called inside a tokio runtime.
    pub fn start(&self) -> EmitterResult<()> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or(EmitterError::AlreadyStarted)?;

        let reporter = self
            .callback
            .clone()
            .map(Reporter::spawn)
            .unwrap_or_default();
        let worker = DeliveryWorker::new(
            self.store.clone(),
            self.transport.clone(),
            RetryPolicy::from_config(&self.config),
            self.config.emit_range,
            self.shared.paused.clone(),
        )
        .with_reporter(reporter);

        let driver = Driver {
            worker,
            transport: self.transport.clone(),
            shared: self.shared.clone(),
            encoding: self.config.method,
            emit_range: self.config.emit_range,
            flush_interval: self.config.flush_interval,
        };
        *self.task.lock() = Some(tokio::spawn(driver.run(receiver)));

        info!(
            endpoint = %self.config.endpoint,
            method = %self.config.method,
            paused = self.is_paused(),
            "Emitter started"
        );
        // Deliver anything left over from a previous run.
        self.wake();
        Ok(())
    }

    /// Persist an event and trigger delivery once the buffer threshold is reached.
    ///
    /// A persistence failure is counted in [`lost_count`](Self::lost_count)
    /// and returned; the event is not retained anywhere else.
    pub fn add(&self, payload: EventPayload) -> EmitterResult<InsertOutcome> {
        let outcome = match self.store.insert(payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                let lost = self.shared.lost.fetch_add(1, Ordering::SeqCst) + 1;
                error!(error = %e, lost, "Failed to persist event, event lost");
                return Err(e.into());
            }
        };

        if let InsertOutcome::Dropped = outcome {
            warn!("Event store at capacity, event dropped");
        }

        // Wake even while a cycle runs: its last query may already have come
        // back empty. The driver coalesces wakes into the next cycle.
        if !self.is_paused() {
            match self.store.count() {
                Ok(pending) if pending >= self.config.buffer_option.threshold() => self.wake(),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to count pending events"),
            }
        }
        Ok(outcome)
    }

    /// Run a delivery cycle to completion, ignoring any pending backoff.
    ///
    /// Returns once the store is drained, a batch fails retryably, or the
    /// emitter is paused. A paused emitter returns immediately.
    pub async fn flush(&self) -> EmitterResult<CycleResult> {
        if self.task.lock().is_none() {
            return Err(EmitterError::NotRunning);
        }
        let (reply, result) = oneshot::channel();
        self.sender
            .send(Command::Flush(reply))
            .await
            .map_err(|_| EmitterError::NotRunning)?;
        result.await.map_err(|_| EmitterError::NotRunning)
    }

    /// Stop starting new batches. An in-flight batch still completes.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Allow delivery again and wake the driver.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    /// Set the paused flag. Repeated calls with the same value are no-ops.
    pub fn set_paused(&self, paused: bool) {
        let was = self.shared.paused.swap(paused, Ordering::SeqCst);
        if was == paused {
            return;
        }
        info!(paused, "Emitter pause state changed");
        if !paused {
            self.wake();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Update byte limits. Takes effect from the next batch build.
    pub fn set_limits(&self, byte_limit_get: usize, byte_limit_post: usize) -> EmitterResult<()> {
        if byte_limit_get == 0 || byte_limit_post == 0 {
            return Err(EmitterError::Config("byte limits must be positive".to_string()));
        }
        *self.shared.limits.write() = ByteLimits {
            get: byte_limit_get,
            post: byte_limit_post,
        };
        debug!(byte_limit_get, byte_limit_post, "Emitter byte limits updated");
        Ok(())
    }

    /// Events persisted and not yet removed.
    pub fn pending_count(&self) -> EmitterResult<usize> {
        Ok(self.store.count()?)
    }

    /// Events removed without delivery: store overflow plus rejected or
    /// oversized batches.
    pub fn dropped_count(&self) -> u64 {
        self.store.dropped_count() + self.shared.delivery_dropped.load(Ordering::SeqCst)
    }

    /// Events whose `add` failed to persist.
    pub fn lost_count(&self) -> u64 {
        self.shared.lost.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EmitterState {
        EmitterState {
            paused: self.is_paused(),
            in_flight: self.shared.in_flight.load(Ordering::SeqCst),
            retry_backoff_level: self.shared.backoff_level.load(Ordering::SeqCst),
        }
    }

    /// Flush with a bounded wait, then stop the driver.
    ///
    /// On timeout the driver is aborted mid-cycle. Unacknowledged events are
    /// still in the store and will be delivered after the next start.
    pub async fn shutdown(&self, timeout: Duration) -> EmitterResult<CycleResult> {
        let flushed = tokio::time::timeout(timeout, self.flush()).await;
        let task = self.task.lock().take();

        match flushed {
            Ok(result) => {
                let _ = self.sender.send(Command::Shutdown).await;
                if let Some(mut task) = task {
                    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                        task.abort();
                    }
                }
                info!("Emitter stopped");
                result
            }
            Err(_) => {
                if let Some(task) = task {
                    task.abort();
                }
                self.shared.in_flight.store(false, Ordering::SeqCst);
                let pending = self.store.count().unwrap_or_default();
                warn!(pending, "Emitter flush timed out on shutdown");
                Err(EmitterError::Timeout(timeout))
            }
        }
    }

    fn wake(&self) {
        // A full channel already holds a pending wake or flush.
        let _ = self.sender.try_send(Command::Wake);
    }
}

/// Owns the delivery worker and runs every cycle.
struct Driver {
    worker: DeliveryWorker,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    encoding: Encoding,
    emit_range: usize,
    flush_interval: Duration,
}

impl Driver {
    async fn run(self, mut receiver: mpsc::Receiver<Command>) {
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        let mut retry_at: Option<Instant> = None;

        loop {
            let backoff = async move {
                match retry_at {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = receiver.recv() => match command {
                    Some(Command::Wake) => {
                        if retry_at.is_none() {
                            retry_at = self.cycle().await.1;
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        let (result, next) = self.cycle().await;
                        retry_at = next;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = ticker.tick() => {
                    if retry_at.is_none() {
                        retry_at = self.cycle().await.1;
                    }
                }
                _ = backoff => {
                    retry_at = self.cycle().await.1;
                }
            }
        }
        debug!("Emitter driver stopped");
    }

    /// Run one cycle and return its result with the next retry deadline.
    async fn cycle(&self) -> (CycleResult, Option<Instant>) {
        if self.shared.paused.load(Ordering::SeqCst) {
            let result = CycleResult {
                stop: CycleStop::Paused,
                ..Default::default()
            };
            return (result, None);
        }

        self.shared.in_flight.store(true, Ordering::SeqCst);
        let result = self.worker.run_cycle(&self.builder()).await;
        self.shared.in_flight.store(false, Ordering::SeqCst);

        self.shared
            .delivery_dropped
            .fetch_add(result.dropped_count as u64, Ordering::SeqCst);
        let retry_at = self.apply_backoff(&result);
        (result, retry_at)
    }

    fn builder(&self) -> BatchBuilder {
        let limits = *self.shared.limits.read();
        let (byte_limit, count_limit) = match self.encoding {
            // One event per GET request.
            Encoding::Get => (limits.get, 1),
            Encoding::Post => (limits.post, self.emit_range),
        };
        BatchBuilder::new(
            self.encoding,
            BatchLimits {
                byte_limit,
                count_limit,
            },
            self.transport.envelope_overhead(self.encoding),
        )
    }

    /// Update the backoff level from a finished cycle and return when to retry.
    fn apply_backoff(&self, result: &CycleResult) -> Option<Instant> {
        let policy = self.worker.policy();
        let mut level = self.shared.backoff_level.load(Ordering::SeqCst);
        if result.had_success {
            level = 0;
        }

        let retry_at = match result.stop {
            CycleStop::RetryableFailure { rate_limited } => {
                if !result.had_success {
                    level = policy.next_level(level, rate_limited);
                }
                if rate_limited && policy.rate_limit_action() == RateLimitAction::Pause {
                    self.shared.paused.store(true, Ordering::SeqCst);
                    warn!(level, "Collector rate limited delivery, pausing until resumed");
                    None
                } else {
                    Some(self.schedule(policy, level))
                }
            }
            CycleStop::StoreUnavailable => {
                level = policy.next_level(level, false);
                Some(self.schedule(policy, level))
            }
            CycleStop::Drained | CycleStop::Paused => None,
        };

        self.shared.backoff_level.store(level, Ordering::SeqCst);
        retry_at
    }

    fn schedule(&self, policy: &RetryPolicy, level: u32) -> Instant {
        let delay = policy.backoff_delay(level);
        info!(
            level,
            delay_ms = delay.as_millis() as u64,
            "Delivery backing off"
        );
        Instant::now() + delay
    }
}
