//! The logger worker pool: background senders that pull batches from the
//! [`EventBatcher`](crate::events::batcher::EventBatcher) and POST them, pacing themselves with
//! an adaptive interval.
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::events::batcher::{BatchedEvents, EventBatcher};
use crate::Result;

/// Worker count used when `max_logging_workers` is not configured.
pub const DEFAULT_WORKER_COUNT: usize = 2;
/// A batch that fails this many times is dropped.
pub const MAX_BATCH_RETRIES: u32 = 10;

const MIN_LOGGING_INTERVAL: Duration = Duration::from_secs(1);
const MAX_LOGGING_INTERVAL: Duration = Duration::from_secs(120);
/// Workers must wake within a bounded time to observe shutdown.
const MAX_WAIT: Duration = Duration::from_secs(10);

/// Ships one batch to the collector. Implemented by the HTTP client; tests install mocks.
pub trait LogEventSink: Send + Sync {
    fn send_events(&self, batch: &BatchedEvents) -> Result<()>;
}

/// The pacing interval for senders: halved on success, doubled on failure, within
/// [1 s, 120 s]. An `event_logging_interval_seconds` sdk_config override pins it.
pub(crate) struct AdaptiveInterval {
    current: Duration,
    pinned: Option<Duration>,
}

impl AdaptiveInterval {
    pub(crate) fn new() -> AdaptiveInterval {
        AdaptiveInterval {
            current: MIN_LOGGING_INTERVAL,
            pinned: None,
        }
    }

    pub(crate) fn current(&self) -> Duration {
        self.pinned.unwrap_or(self.current)
    }

    pub(crate) fn on_success(&mut self) {
        self.current = (self.current / 2).max(MIN_LOGGING_INTERVAL);
    }

    pub(crate) fn on_failure(&mut self) {
        self.current = (self.current * 2).min(MAX_LOGGING_INTERVAL);
    }

    pub(crate) fn pin(&mut self, interval: Duration) {
        self.pinned = Some(interval);
    }
}

struct LoggerShared {
    batcher: Arc<EventBatcher>,
    sink: Arc<dyn LogEventSink>,
    interval: Mutex<AdaptiveInterval>,
    shutdown: Mutex<bool>,
    wake: Condvar,
    /// Invoked with the event count after every batch delivered successfully.
    flushed_callback: Mutex<Option<Arc<dyn Fn(u64) + Send + Sync>>>,
}

impl LoggerShared {
    /// Send one batch, adapting the pacing interval. Retryable failures requeue the batch until
    /// it exhausts its retries; non-retryable failures drop it immediately.
    fn send_batch(&self, batch: BatchedEvents) {
        match self.sink.send_events(&batch) {
            Ok(()) => {
                self.interval
                    .lock()
                    .expect("thread holding interval lock should not panic")
                    .on_success();
                let callback = self
                    .flushed_callback
                    .lock()
                    .expect("thread holding callback lock should not panic")
                    .clone();
                if let Some(callback) = callback {
                    callback(batch.event_count);
                }
            }
            Err(err) if err.is_retryable() => {
                self.interval
                    .lock()
                    .expect("thread holding interval lock should not panic")
                    .on_failure();
                if batch.retries + 1 >= MAX_BATCH_RETRIES {
                    log::warn!(
                        target: "statsig",
                        "dropping batch of {} events after {} retries: {}",
                        batch.event_count,
                        MAX_BATCH_RETRIES,
                        err
                    );
                    self.batcher.record_dropped(batch.event_count);
                } else {
                    self.batcher.requeue(batch);
                }
            }
            Err(err) => {
                log::warn!(
                    target: "statsig",
                    "dropping batch of {} events on non-retryable failure: {}",
                    batch.event_count,
                    err
                );
                self.batcher.record_dropped(batch.event_count);
            }
        }
    }

    fn is_shut_down(&self) -> bool {
        *self
            .shutdown
            .lock()
            .expect("thread holding shutdown lock should not panic")
    }
}

/// Owns the sender worker threads.
pub struct EventLogger {
    shared: Arc<LoggerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventLogger {
    pub fn new(batcher: Arc<EventBatcher>, sink: Arc<dyn LogEventSink>) -> EventLogger {
        EventLogger {
            shared: Arc::new(LoggerShared {
                batcher,
                sink,
                interval: Mutex::new(AdaptiveInterval::new()),
                shutdown: Mutex::new(false),
                wake: Condvar::new(),
                flushed_callback: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the sender workers. The configured count is honored as-is, with a floor of one.
    pub fn start(&self, worker_count: usize) {
        let worker_count = worker_count.max(1);
        let mut workers = self
            .workers
            .lock()
            .expect("thread holding worker lock should not panic");
        for n in workers.len()..worker_count {
            let shared = self.shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("statsig-event-logger-{n}"))
                .spawn(move || worker_loop(shared))
                .expect("failed to spawn event logger thread");
            workers.push(handle);
        }
    }

    /// Install a callback invoked with the event count after each successful send.
    pub fn set_flushed_callback(&self, callback: Arc<dyn Fn(u64) + Send + Sync>) {
        *self
            .shared
            .flushed_callback
            .lock()
            .expect("thread holding callback lock should not panic") = Some(callback);
    }

    /// Pin the pacing interval (sdk_config `event_logging_interval_seconds`).
    pub fn pin_interval(&self, interval: Duration) {
        self.shared
            .interval
            .lock()
            .expect("thread holding interval lock should not panic")
            .pin(interval);
    }

    /// Wake sleeping workers, e.g. after a batch was cut.
    pub fn notify(&self) {
        self.shared.wake.notify_all();
    }

    /// Synchronously send everything pending on the caller's thread.
    pub fn flush(&self) {
        self.shared.batcher.cut_batch();
        while let Some(batch) = self.shared.batcher.pop_batch() {
            self.shared.send_batch(batch);
        }
    }

    /// Stop the workers and drain all pending batches best-effort.
    pub fn shutdown(&self) {
        {
            let mut shutdown = self
                .shared
                .shutdown
                .lock()
                .expect("thread holding shutdown lock should not panic");
            *shutdown = true;
        }
        self.shared.wake.notify_all();

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .expect("thread holding worker lock should not panic"),
        );
        for handle in workers {
            if handle.join().is_err() {
                log::error!(target: "statsig", "event logger thread panicked");
            }
        }

        for batch in self.shared.batcher.drain_all() {
            if let Err(err) = self.shared.sink.send_events(&batch) {
                log::warn!(target: "statsig", "failed to flush batch at shutdown: {err}");
            }
        }
    }
}

fn worker_loop(shared: Arc<LoggerShared>) {
    loop {
        if let Some(batch) = shared.batcher.pop_batch() {
            shared.send_batch(batch);
        }
        if shared.is_shut_down() {
            return;
        }

        let interval = shared
            .interval
            .lock()
            .expect("thread holding interval lock should not panic")
            .current()
            .min(MAX_WAIT);
        let guard = shared
            .shutdown
            .lock()
            .expect("thread holding shutdown lock should not panic");
        if *guard {
            return;
        }
        let (guard, _) = shared
            .wake
            .wait_timeout(guard, interval)
            .expect("thread holding shutdown lock should not panic");
        if *guard {
            return;
        }
    }
}
