//! Exposure deduplication: a TTL-scoped set of dedup keys, cleared wholesale when the window
//! elapses. Manual exposures bypass this entirely (the caller never consults the deduper).
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(60);

struct DeduperState {
    seen: HashSet<String>,
    window_started: Instant,
}

pub struct ExposureDeduper {
    state: Mutex<DeduperState>,
    window: Duration,
}

impl ExposureDeduper {
    pub fn new(window: Duration) -> ExposureDeduper {
        ExposureDeduper {
            state: Mutex::new(DeduperState {
                seen: HashSet::new(),
                window_started: Instant::now(),
            }),
            window,
        }
    }

    /// Returns `true` if the key has not been seen in the current window (and records it).
    pub fn should_log(&self, key: &str) -> bool {
        let mut state = self
            .state
            .lock()
            .expect("thread holding dedupe lock should not panic");
        if state.window_started.elapsed() >= self.window {
            state.seen.clear();
            state.window_started = Instant::now();
        }
        state.seen.insert(key.to_owned())
    }

    /// Wholesale reset, driven by the periodic reset ticker.
    pub fn reset(&self) {
        let mut state = self
            .state
            .lock()
            .expect("thread holding dedupe lock should not panic");
        state.seen.clear();
        state.window_started = Instant::now();
    }
}

impl Default for ExposureDeduper {
    fn default() -> ExposureDeduper {
        ExposureDeduper::new(DEFAULT_DEDUPE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_occurrence_is_suppressed() {
        let deduper = ExposureDeduper::default();
        assert!(deduper.should_log("gate:g:r:true:u"));
        assert!(!deduper.should_log("gate:g:r:true:u"));
        assert!(deduper.should_log("gate:g:r:false:u"));
    }

    #[test]
    fn expired_window_clears_wholesale() {
        let deduper = ExposureDeduper::new(Duration::from_millis(10));
        assert!(deduper.should_log("key_a"));
        assert!(deduper.should_log("key_b"));
        std::thread::sleep(Duration::from_millis(15));
        assert!(deduper.should_log("key_a"));
        assert!(deduper.should_log("key_b"));
    }

    #[test]
    fn reset_clears_immediately() {
        let deduper = ExposureDeduper::default();
        assert!(deduper.should_log("key"));
        deduper.reset();
        assert!(deduper.should_log("key"));
    }
}
