//! A background ticker thread that periodically runs a task (ruleset sync, ID-list sync, event
//! batching, dedupe reset) until told to stop.
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Workers must observe a stop command within a bounded time even with long intervals.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(10);

/// A periodic background worker.
///
/// The thread runs `tick` once per interval (with subtractive jitter) until [`PollerThread::stop`]
/// is called or the handle is dropped.
pub(crate) struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    // Using `sync_channel` as it makes the sender `Sync` (shareable between threads). Buffer size
    // of 1 is enough: we `try_send()` and ignore if the buffer is full (another thread has sent a
    // stop command already).
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl PollerThread {
    pub(crate) fn start(
        name: &str,
        interval: Duration,
        jitter: Duration,
        mut tick: impl FnMut() + Send + 'static,
    ) -> std::io::Result<PollerThread> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let thread_name = name.to_owned();
        let join_handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                    let timeout = with_jitter(interval, jitter);
                    if wait_for_stop(&stop_receiver, timeout) {
                        log::debug!(target: "statsig", "{thread_name} received stop command");
                        return;
                    }
                    tick();
                }));
                if result.is_err() {
                    log::error!(target: "statsig", "background worker thread panicked");
                }
            })?;

        Ok(PollerThread {
            join_handle,
            stop_sender,
        })
    }

    /// Ask the thread to stop without waiting for it.
    pub(crate) fn stop(&self) {
        // Error means the receiver was dropped (thread exited) or the buffer is full (stop was
        // already sent). Both can be ignored.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the thread and block waiting for it to exit.
    pub(crate) fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::WorkerPanicked)?;
        Ok(())
    }
}

/// Wait up to `timeout` for a stop command, waking at least every [`MAX_WAIT_SLICE`].
/// Returns `true` if the worker should exit.
fn wait_for_stop(receiver: &std::sync::mpsc::Receiver<()>, timeout: Duration) -> bool {
    let mut remaining = timeout;
    loop {
        let slice = remaining.min(MAX_WAIT_SLICE);
        match receiver.recv_timeout(slice) {
            Ok(()) => return true,
            // A disconnected channel means the handle was dropped; stop the thread.
            Err(RecvTimeoutError::Disconnected) => return true,
            Err(RecvTimeoutError::Timeout) => {
                remaining = remaining.saturating_sub(slice);
                if remaining.is_zero() {
                    return false;
                }
            }
        }
    }
}

/// Apply randomized subtractive `jitter` to `interval`. Jitter avoids multiple server instances
/// synchronizing and producing spiky network load.
fn with_jitter(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
