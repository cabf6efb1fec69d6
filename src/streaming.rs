//! Streaming ruleset delivery: a transport-agnostic reader that applies pushed updates, with
//! exponential reconnect backoff and a backup pull worker after repeated failures.
//!
//! The transport itself (gRPC, websocket) is behind [`StreamingTransport`]; this module owns
//! only the reconnect state machine.
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::spec_updater::SpecUpdater;
use crate::{Error, Result};

/// One pushed ruleset update. `last_updated` is the document's new lcut.
#[derive(Debug, Clone)]
pub struct SpecsUpdate {
    pub spec_json: String,
    pub last_updated: u64,
}

/// An open stream of ruleset updates.
pub trait StreamingConnection: Send {
    /// Block for the next update. An error ends the connection.
    fn next_update(&mut self) -> Result<SpecsUpdate>;
}

/// Opens streaming connections. `since_time` resumes the stream from the store's current lcut.
pub trait StreamingTransport: Send + Sync {
    fn connect(&self, since_time: u64) -> Result<Box<dyn StreamingConnection>>;
}

/// Starts and cancels the backup pull worker used while the stream is down.
pub trait BackupController: Send + Sync {
    fn start_backup(&self);
    fn stop_backup(&self);
}

pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 5;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 10;
pub const DEFAULT_FALLBACK_THRESHOLD: u32 = 4;

/// Reconnect pacing: `base * multiplier^attempt`, capped at `max_attempts` tries. After
/// `fallback_threshold` failures the backup pull worker should run.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    base: Duration,
    multiplier: u32,
    max_attempts: u32,
    fallback_threshold: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(
        base: Duration,
        multiplier: u32,
        max_attempts: u32,
        fallback_threshold: u32,
    ) -> ReconnectPolicy {
        ReconnectPolicy {
            base,
            multiplier,
            max_attempts,
            fallback_threshold,
            attempt: 0,
        }
    }

    /// The wait before the next reconnect attempt, or `None` when attempts are exhausted.
    pub(crate) fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor))
    }

    pub(crate) fn needs_backup(&self) -> bool {
        self.attempt >= self.fallback_threshold
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> ReconnectPolicy {
        ReconnectPolicy::new(
            DEFAULT_RETRY_BASE,
            DEFAULT_RETRY_MULTIPLIER,
            DEFAULT_MAX_RETRY_ATTEMPTS,
            DEFAULT_FALLBACK_THRESHOLD,
        )
    }
}

/// The background stream reader thread.
pub struct StreamingUpdater {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl StreamingUpdater {
    pub fn start(
        transport: Arc<dyn StreamingTransport>,
        updater: Arc<SpecUpdater>,
        backup: Arc<dyn BackupController>,
        policy_base: Option<Duration>,
    ) -> std::io::Result<StreamingUpdater> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);
        let mut policy = ReconnectPolicy::default();
        if let Some(base) = policy_base {
            policy.base = base;
        }

        let join_handle = std::thread::Builder::new()
            .name("statsig-stream-reader".to_owned())
            .spawn(move || {
                run_stream_loop(&*transport, &updater, &*backup, &mut policy, &stop_receiver);
            })?;

        Ok(StreamingUpdater {
            join_handle,
            stop_sender,
        })
    }

    pub fn stop(&self) {
        let _ = self.stop_sender.try_send(());
    }

    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle.join().map_err(|_| Error::WorkerPanicked)?;
        Ok(())
    }
}

fn run_stream_loop(
    transport: &dyn StreamingTransport,
    updater: &SpecUpdater,
    backup: &dyn BackupController,
    policy: &mut ReconnectPolicy,
    stop_receiver: &std::sync::mpsc::Receiver<()>,
) {
    let mut backup_running = false;
    loop {
        let since_time = updater.current_lcut();
        match transport.connect(since_time) {
            Ok(mut connection) => {
                log::debug!(target: "statsig", "ruleset stream connected at lcut={since_time}");
                policy.reset();
                if backup_running {
                    backup.stop_backup();
                    backup_running = false;
                }

                loop {
                    match connection.next_update() {
                        Ok(update) => {
                            match updater.apply_streamed_update(&update.spec_json) {
                                Ok(true) => {}
                                Ok(false) => {}
                                // Stale pushes are dropped; the stream stays up.
                                Err(err) => {
                                    log::warn!(
                                        target: "statsig",
                                        "rejected streamed update (lastUpdated={}): {err}",
                                        update.last_updated
                                    );
                                }
                            }
                        }
                        Err(err) => {
                            log::warn!(target: "statsig", "ruleset stream broke: {err}");
                            break;
                        }
                    }
                    if stop_requested(stop_receiver, Duration::ZERO) {
                        return;
                    }
                }
            }
            Err(err) => {
                log::warn!(target: "statsig", "failed to connect ruleset stream: {err}");
            }
        }

        let Some(backoff) = policy.next_backoff() else {
            log::error!(
                target: "statsig",
                "ruleset stream reconnects exhausted; staying on backup pull"
            );
            if !backup_running {
                backup.start_backup();
            }
            return;
        };
        if policy.needs_backup() && !backup_running {
            log::warn!(target: "statsig", "starting backup pull worker while stream is down");
            backup.start_backup();
            backup_running = true;
        }
        if stop_requested(stop_receiver, backoff) {
            return;
        }
    }
}

fn stop_requested(receiver: &std::sync::mpsc::Receiver<()>, timeout: Duration) -> bool {
    match receiver.recv_timeout(timeout) {
        Ok(()) => true,
        Err(RecvTimeoutError::Disconnected) => true,
        Err(RecvTimeoutError::Timeout) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkConfig, StatsigHttpClient};
    use crate::spec_store::SpecStore;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn updater() -> Arc<SpecUpdater> {
        let store = Arc::new(SpecStore::new("secret-key"));
        let mut config = NetworkConfig::new("secret-key");
        config.local_mode = true;
        let network = Arc::new(StatsigHttpClient::new(config).unwrap());
        Arc::new(SpecUpdater::new(store, network, None, None, false, None))
    }

    fn document(time: u64) -> String {
        format!(r#"{{"has_updates": true, "time": {time}}}"#)
    }

    /// Yields scripted connections; each connection yields scripted updates then breaks.
    struct ScriptedTransport {
        connections: Mutex<VecDeque<Vec<SpecsUpdate>>>,
        connect_attempts: AtomicUsize,
    }

    struct ScriptedConnection {
        updates: VecDeque<SpecsUpdate>,
    }

    impl StreamingConnection for ScriptedConnection {
        fn next_update(&mut self) -> Result<SpecsUpdate> {
            self.updates
                .pop_front()
                .ok_or(Error::RequestFailed(503))
        }
    }

    impl StreamingTransport for ScriptedTransport {
        fn connect(&self, _since_time: u64) -> Result<Box<dyn StreamingConnection>> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let mut connections = self.connections.lock().unwrap();
            match connections.pop_front() {
                Some(updates) => Ok(Box::new(ScriptedConnection {
                    updates: updates.into(),
                })),
                None => Err(Error::RequestFailed(503)),
            }
        }
    }

    #[derive(Default)]
    struct CountingBackup {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl BackupController for CountingBackup {
        fn start_backup(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn stop_backup(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn update(time: u64) -> SpecsUpdate {
        SpecsUpdate {
            spec_json: document(time),
            last_updated: time,
        }
    }

    #[test]
    fn backoff_grows_geometrically_and_exhausts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), 5, 3, 2);
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(10)));
        assert!(!policy.needs_backup());
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(50)));
        assert!(policy.needs_backup());
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(250)));
        assert_eq!(policy.next_backoff(), None);

        policy.reset();
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(10)));
        assert!(!policy.needs_backup());
    }

    #[test]
    fn streamed_updates_apply_in_lcut_order() {
        let updater = updater();
        let transport = ScriptedTransport {
            connections: Mutex::new(VecDeque::from([vec![
                update(100),
                update(50),
                update(200),
            ]])),
            connect_attempts: AtomicUsize::new(0),
        };
        let backup = CountingBackup::default();
        let (_sender, receiver) = std::sync::mpsc::sync_channel::<()>(1);
        let mut policy = ReconnectPolicy::new(Duration::ZERO, 1, 1, 1);

        run_stream_loop(&transport, &updater, &backup, &mut policy, &receiver);

        // The stale push (50) was rejected; the store ends at 200.
        assert_eq!(updater.current_lcut(), 200);
    }

    #[test]
    fn backup_starts_after_threshold_and_stops_on_reconnect() {
        let updater = updater();
        // Two failed connects, then a working one, then exhaustion.
        let transport = ScriptedTransport {
            connections: Mutex::new(VecDeque::from([vec![update(100)]])),
            connect_attempts: AtomicUsize::new(0),
        };
        let backup = CountingBackup::default();
        let (_sender, receiver) = std::sync::mpsc::sync_channel::<()>(1);

        // fallback_threshold 1: the backup starts on the first failed connect. The scripted
        // transport fails every connect after the first, so the loop runs: connect ok (apply
        // 100, stop backup isn't running yet), break, reconnect failures start the backup.
        let mut policy = ReconnectPolicy::new(Duration::ZERO, 1, 2, 1);
        run_stream_loop(&transport, &updater, &backup, &mut policy, &receiver);

        assert_eq!(updater.current_lcut(), 100);
        assert!(backup.starts.load(Ordering::SeqCst) >= 1);
    }
}
