//! The event pipeline: exposure construction, deduplication, batching, and background
//! delivery to the collector.
pub mod batcher;
pub mod dedupe;
pub mod event;
pub mod logger;

pub use batcher::{BatchedEvents, EventBatcher};
pub use dedupe::ExposureDeduper;
pub use event::StatsigEventInternal;
pub use logger::{EventLogger, LogEventSink};
