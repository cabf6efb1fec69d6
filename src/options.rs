//! Caller-facing configuration for the [`Statsig`](crate::client::Statsig) handle.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::data_store::DataStore;
use crate::evaluation::evaluation_types::Evaluation;
use crate::spec_updater::SpecSourceKind;
use crate::streaming::StreamingTransport;

/// Receives the raw ruleset document and its lcut after every accepted update.
pub type RulesUpdatedCallback = Arc<dyn Fn(&str, u64) + Send + Sync>;
/// Receives the event count after every successfully delivered batch.
pub type EventsFlushedCallback = Arc<dyn Fn(u64) + Send + Sync>;
/// Observes every evaluation: the entity name and its result.
pub type EvaluationCallback = Arc<dyn Fn(&str, &Evaluation) + Send + Sync>;
/// Receives `(tag, info)` for every error the SDK catches internally.
pub type SdkErrorCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Wire protocol spoken by a proxy in [`ProxyConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Http,
    Grpc,
    GrpcWebsocket,
}

/// A per-endpoint proxy override. HTTP proxies replace the endpoint's base URL; the gRPC
/// protocols require a caller-provided [`StreamingTransport`] that speaks to the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub address: String,
    pub protocol: ProxyProtocol,
}

/// Options controlling endpoints, source ordering, sync cadence, the event pipeline, and
/// network behavior. Construct with [`StatsigOptions::new`] and chain `with_*` setters.
#[derive(Clone, Default)]
pub struct StatsigOptions {
    /// Base URL for `get_id_lists`, `log_event` and `sdk_exception`.
    pub api_url: Option<String>,
    /// Endpoint overrides, each taking precedence over `api_url` for its call.
    pub api_for_download_config_specs: Option<String>,
    pub api_for_get_id_lists: Option<String>,
    pub api_for_log_event: Option<String>,
    /// Per-endpoint proxy overrides, keyed by endpoint name (`download_config_specs`,
    /// `get_id_lists`, `log_event`).
    pub proxy_configs: HashMap<String, ProxyConfig>,

    /// A ruleset document to populate the store from when no data store is configured.
    pub bootstrap_values: Option<String>,
    pub data_store: Option<Arc<dyn DataStore>>,

    /// Ordered source list for initialize, replacing the default
    /// DataStore/Bootstrap/Network order.
    pub initialize_sources: Option<Vec<SpecSourceKind>>,
    /// Ordered source list for background sync.
    pub config_sync_sources: Option<Vec<SpecSourceKind>>,
    /// A push transport for ruleset updates. When set, the stream replaces the pull sync
    /// poller, which becomes the backup while the stream is down.
    pub streaming_transport: Option<Arc<dyn StreamingTransport>>,

    /// Environment tier (e.g. "production", "staging") stamped onto every user.
    pub tier: Option<String>,

    pub rulesets_sync_interval: Option<Duration>,
    pub id_lists_sync_interval: Option<Duration>,
    pub id_list_threadpool_size: Option<usize>,
    /// Disables the ID-list subsystem entirely.
    pub disable_id_lists: bool,

    pub event_queue_size: Option<usize>,
    pub retry_queue_size: Option<usize>,
    pub batching_interval: Option<Duration>,
    pub max_logging_workers: Option<usize>,

    /// Deadline for initialize-time network calls. Regular traffic uses `timeout`.
    pub init_timeout: Option<Duration>,
    pub timeout: Option<Duration>,

    /// Retry failed syncs against the default Statsig API even when a custom endpoint is set.
    pub fallback_to_statsig_api: bool,
    /// When the store's lcut lags wall clock by more than this, the next sync tries the
    /// Statsig fallback even if the primary succeeded.
    pub out_of_sync_threshold: Option<Duration>,

    /// Suppresses all network I/O; evaluation and overrides still work in-process.
    pub local_mode: bool,
    pub disable_diagnostics: bool,

    pub rules_updated_callback: Option<RulesUpdatedCallback>,
    pub events_flushed_callback: Option<EventsFlushedCallback>,
    pub evaluation_callback: Option<EvaluationCallback>,
    pub sdk_error_callback: Option<SdkErrorCallback>,
}

impl StatsigOptions {
    pub const DEFAULT_RULESETS_SYNC_INTERVAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_ID_LISTS_SYNC_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_BATCHING_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_ID_LIST_THREADPOOL_SIZE: usize = 3;

    pub fn new() -> StatsigOptions {
        StatsigOptions::default()
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> StatsigOptions {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_proxy_config(
        mut self,
        endpoint: impl Into<String>,
        proxy: ProxyConfig,
    ) -> StatsigOptions {
        self.proxy_configs.insert(endpoint.into(), proxy);
        self
    }

    pub fn with_bootstrap_values(mut self, json: impl Into<String>) -> StatsigOptions {
        self.bootstrap_values = Some(json.into());
        self
    }

    pub fn with_data_store(mut self, data_store: Arc<dyn DataStore>) -> StatsigOptions {
        self.data_store = Some(data_store);
        self
    }

    pub fn with_initialize_sources(mut self, sources: Vec<SpecSourceKind>) -> StatsigOptions {
        self.initialize_sources = Some(sources);
        self
    }

    pub fn with_config_sync_sources(mut self, sources: Vec<SpecSourceKind>) -> StatsigOptions {
        self.config_sync_sources = Some(sources);
        self
    }

    pub fn with_streaming_transport(
        mut self,
        transport: Arc<dyn StreamingTransport>,
    ) -> StatsigOptions {
        self.streaming_transport = Some(transport);
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> StatsigOptions {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_rulesets_sync_interval(mut self, interval: Duration) -> StatsigOptions {
        self.rulesets_sync_interval = Some(interval);
        self
    }

    pub fn with_event_queue_size(mut self, size: usize) -> StatsigOptions {
        self.event_queue_size = Some(size);
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> StatsigOptions {
        self.init_timeout = Some(timeout);
        self
    }

    pub fn with_fallback_to_statsig_api(mut self, enabled: bool) -> StatsigOptions {
        self.fallback_to_statsig_api = enabled;
        self
    }

    pub fn with_local_mode(mut self, enabled: bool) -> StatsigOptions {
        self.local_mode = enabled;
        self
    }

    pub fn with_rules_updated_callback(mut self, callback: RulesUpdatedCallback) -> StatsigOptions {
        self.rules_updated_callback = Some(callback);
        self
    }

    pub fn with_events_flushed_callback(
        mut self,
        callback: EventsFlushedCallback,
    ) -> StatsigOptions {
        self.events_flushed_callback = Some(callback);
        self
    }

    pub fn with_evaluation_callback(mut self, callback: EvaluationCallback) -> StatsigOptions {
        self.evaluation_callback = Some(callback);
        self
    }

    pub fn with_sdk_error_callback(mut self, callback: SdkErrorCallback) -> StatsigOptions {
        self.sdk_error_callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for StatsigOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsigOptions")
            .field("api_url", &self.api_url)
            .field("tier", &self.tier)
            .field("has_bootstrap_values", &self.bootstrap_values.is_some())
            .field("has_data_store", &self.data_store.is_some())
            .field("has_streaming_transport", &self.streaming_transport.is_some())
            .field("initialize_sources", &self.initialize_sources)
            .field("config_sync_sources", &self.config_sync_sources)
            .field("local_mode", &self.local_mode)
            .finish_non_exhaustive()
    }
}
