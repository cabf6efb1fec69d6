//! The `Statsig` facade: owns the store, the evaluator, the background workers and the event
//! pipeline, and exposes the public check/get/log surface.
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::{json, Value};

use crate::evaluation::evaluation_types::{
    DynamicConfig, Evaluation, FeatureGate, Layer, SpecsSource,
};
use crate::evaluation::Evaluator;
use crate::events::batcher::{EventBatcher, DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_RETRY_QUEUE_SIZE};
use crate::events::dedupe::{ExposureDeduper, DEFAULT_DEDUPE_WINDOW};
use crate::events::event::{exposure_dedupe_key, StatsigEventInternal};
use crate::events::logger::{EventLogger, DEFAULT_WORKER_COUNT};
use crate::hashing::sha256_prefix_u64;
use crate::id_lists::IdListManager;
use crate::network::{NetworkConfig, StatsigHttpClient, DEFAULT_TIMEOUT, STOP_GZIP_FLAG};
use crate::options::{ProxyProtocol, SdkErrorCallback, StatsigOptions};
use crate::overrides::OverrideAdapter;
use crate::poller::PollerThread;
use crate::spec_store::SpecStore;
use crate::spec_updater::SpecUpdater;
use crate::streaming::{BackupController, StreamingUpdater};
use crate::user::StatsigUser;
use crate::{Error, Result};

/// The outcome of [`Statsig::initialize`].
#[derive(Debug, Clone)]
pub struct InitDetails {
    pub duration: Duration,
    /// The source that populated the store, or `Uninitialized` when none did.
    pub source: SpecsSource,
    pub success: bool,
    pub store_populated: bool,
    pub error: Option<Error>,
    pub timed_out: bool,
}

/// Catches panics in public operations, reports them once per call site, and substitutes a safe
/// default. Caller programming errors bypass this and surface synchronously.
struct ErrorBoundary {
    network: Arc<StatsigHttpClient>,
    seen: Mutex<HashSet<String>>,
    disabled: bool,
    /// Caller-installed observer; sees every captured error, not just the first per tag.
    error_callback: Option<SdkErrorCallback>,
}

impl ErrorBoundary {
    fn capture<T>(&self, tag: &str, fallback: impl FnOnce() -> T, op: impl FnOnce() -> T) -> T {
        match catch_unwind(AssertUnwindSafe(op)) {
            Ok(value) => value,
            Err(panic) => {
                let info = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                log::error!(target: "statsig", "caught panic in {tag}: {info}");
                if let Some(callback) = &self.error_callback {
                    callback(tag, &info);
                }
                self.report(tag, &info);
                fallback()
            }
        }
    }

    /// Ship one exception per tag per process, fire-and-forget.
    fn report(&self, tag: &str, info: &str) {
        if self.disabled {
            return;
        }
        {
            let mut seen = self
                .seen
                .lock()
                .expect("thread holding error boundary lock should not panic");
            if !seen.insert(tag.to_owned()) {
                return;
            }
        }
        let network = self.network.clone();
        let tag = tag.to_owned();
        let info = info.to_owned();
        let spawned = std::thread::Builder::new()
            .name("statsig-exception-report".to_owned())
            .spawn(move || network.post_sdk_exception(&tag, &info));
        if spawned.is_err() {
            log::debug!(target: "statsig", "failed to spawn exception report thread");
        }
    }
}

struct StatsigInner {
    options: StatsigOptions,
    store: Arc<SpecStore>,
    overrides: Arc<OverrideAdapter>,
    evaluator: Evaluator,
    network: Arc<StatsigHttpClient>,
    updater: Arc<SpecUpdater>,
    id_list_manager: IdListManager,
    batcher: Arc<EventBatcher>,
    deduper: Arc<ExposureDeduper>,
    logger: Arc<EventLogger>,
    boundary: ErrorBoundary,
}

impl StatsigInner {
    /// Clone the user, stamping the configured environment tier unless the caller set one.
    fn normalized(&self, user: &StatsigUser) -> StatsigUser {
        let mut user = user.clone();
        if user.statsig_environment.is_none() {
            if let Some(tier) = &self.options.tier {
                user.statsig_environment =
                    Some(HashMap::from([("tier".to_owned(), tier.clone())]));
            }
        }
        user
    }

    fn enqueue(&self, event: StatsigEventInternal) {
        self.batcher.enqueue(event);
        if self.batcher.pending_batches() > 0 {
            self.logger.notify();
        }
    }

    fn log_gate_exposure(
        &self,
        user: &StatsigUser,
        gate_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) {
        let value = evaluation.bool_value.to_string();
        if self.should_log_exposure("gate", gate_name, &value, user, evaluation, is_manual) {
            self.enqueue(StatsigEventInternal::gate_exposure(
                user, gate_name, evaluation, is_manual,
            ));
        }
    }

    fn log_config_exposure(
        &self,
        user: &StatsigUser,
        config_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) {
        if self.should_log_exposure(
            "config",
            config_name,
            &evaluation.rule_id,
            user,
            evaluation,
            is_manual,
        ) {
            self.enqueue(StatsigEventInternal::config_exposure(
                user,
                config_name,
                evaluation,
                is_manual,
            ));
        }
    }

    fn log_layer_exposure(
        &self,
        user: &StatsigUser,
        layer_name: &str,
        parameter_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) {
        let value = format!("{}:{parameter_name}", evaluation.rule_id);
        if self.should_log_exposure("layer", layer_name, &value, user, evaluation, is_manual) {
            self.enqueue(StatsigEventInternal::layer_exposure(
                user,
                layer_name,
                parameter_name,
                evaluation,
                is_manual,
            ));
        }
    }

    /// Manual exposures always log; automatic ones pass through dedup and sampling.
    fn should_log_exposure(
        &self,
        kind: &str,
        entity_name: &str,
        value: &str,
        user: &StatsigUser,
        evaluation: &Evaluation,
        is_manual: bool,
    ) -> bool {
        if is_manual {
            return true;
        }
        let key = exposure_dedupe_key(kind, entity_name, &evaluation.rule_id, value, user);
        if !self.deduper.should_log(&key) {
            return false;
        }
        self.passes_sampling(&key, evaluation)
    }

    fn passes_sampling(&self, dedupe_key: &str, evaluation: &Evaluation) -> bool {
        if evaluation.forward_all_exposures {
            return true;
        }
        let Some(rate) = evaluation.sample_rate.filter(|rate| *rate > 1) else {
            return true;
        };
        // Sampling only applies to production-like tiers.
        let production_like = self
            .options
            .tier
            .as_deref()
            .map_or(true, |tier| tier.eq_ignore_ascii_case("production"));
        if !production_like {
            return true;
        }
        sha256_prefix_u64(dedupe_key) % rate == 0
    }

    fn drain_dropped_event_count(&self) {
        let dropped = self.batcher.take_dropped_count();
        if dropped == 0 {
            return;
        }
        log::warn!(target: "statsig", "dropped {dropped} events since last report");
        if !self.options.disable_diagnostics {
            self.network.post_sdk_exception(
                "statsig::log_event_dropped_event_count",
                &dropped.to_string(),
            );
        }
    }

    fn sync_id_lists(&self) {
        match self.network.get_id_lists() {
            Ok(directory) => self.id_list_manager.sync(&directory),
            Err(Error::LocalMode) => {}
            Err(err) => {
                log::warn!(target: "statsig", "failed to fetch id list directory: {err}");
            }
        }
    }

    /// Apply server-pushed tuning from the current snapshot: the `log_event` gzip kill switch
    /// and the pinned event-logging interval. Runs at initialize and after every sync tick.
    fn apply_sdk_tuning(&self) {
        let data = self.store.get_current();
        self.network.set_gzip_disabled(data.sdk_flag(STOP_GZIP_FLAG));
        if let Some(seconds) = data.sdk_config_number("event_logging_interval_seconds") {
            self.logger.pin_interval(Duration::from_secs(seconds));
        }
    }

    /// One sync tick: pull, re-apply sdk tuning, and emit a `config_sync` diagnostics event
    /// when the snapshot advanced.
    fn sync_tick(&self) {
        let before = self.store.get_current().lcut;
        self.updater.sync_once();
        self.apply_sdk_tuning();
        let data = self.store.get_current();
        if data.lcut != before {
            self.emit_diagnostics(
                "config_sync",
                json!({
                    "sinceTime": before,
                    "newLcut": data.lcut,
                    "source": data.source.as_str(),
                }),
            );
        }
    }

    /// Enqueue a diagnostics event for `context`, honoring the ruleset's per-context sampling
    /// rates (per ten thousand). Contexts without a configured rate always log, except
    /// `api_call`, which is opt-in.
    fn emit_diagnostics(&self, context: &str, markers: Value) {
        if self.options.disable_diagnostics {
            return;
        }
        let data = self.store.get_current();
        match data.diagnostics_sampling.get(context) {
            Some(rate) => {
                if !sampled(*rate) {
                    return;
                }
            }
            None if context == "api_call" => return,
            None => {}
        }
        self.enqueue(StatsigEventInternal::diagnostics(context, markers));
    }

    /// Post-evaluation hooks: the caller's evaluation callback plus sampled `api_call`
    /// diagnostic markers.
    fn observe_evaluation(&self, api: &str, name: &str, evaluation: &Evaluation) {
        if let Some(callback) = &self.options.evaluation_callback {
            callback(name, evaluation);
        }
        self.emit_diagnostics(
            "api_call",
            json!({
                "key": api,
                "configName": name,
                "ruleID": evaluation.rule_id,
            }),
        );
    }
}

fn sampled(rate_per_ten_thousand: u64) -> bool {
    rate_per_ten_thousand >= 10_000
        || rand::thread_rng().gen_range(0..10_000) < rate_per_ten_thousand
}

/// Runs the pull sync poller while the ruleset stream is down.
struct PullBackup {
    inner: Arc<StatsigInner>,
    interval: Duration,
    poller: Mutex<Option<PollerThread>>,
}

impl BackupController for PullBackup {
    fn start_backup(&self) {
        let mut slot = self
            .poller
            .lock()
            .expect("thread holding backup lock should not panic");
        if slot.is_some() {
            return;
        }
        let inner = self.inner.clone();
        match PollerThread::start(
            "statsig-backup-sync",
            self.interval,
            Duration::from_secs(1),
            move || inner.sync_tick(),
        ) {
            Ok(poller) => *slot = Some(poller),
            Err(err) => {
                log::error!(target: "statsig", "failed to start backup pull worker: {err}");
            }
        }
    }

    fn stop_backup(&self) {
        let poller = self
            .poller
            .lock()
            .expect("thread holding backup lock should not panic")
            .take();
        if let Some(poller) = poller {
            poller.stop();
        }
    }
}

/// A server-side Statsig client.
///
/// Create with [`Statsig::new`], then call [`Statsig::initialize`] to populate the ruleset and
/// start background sync. All checks are CPU-bound against the in-memory snapshot.
pub struct Statsig {
    inner: Arc<StatsigInner>,
    pollers: Mutex<Vec<PollerThread>>,
    streaming: Mutex<Option<StreamingUpdater>>,
    backup: Mutex<Option<Arc<PullBackup>>>,
}

impl Statsig {
    pub fn new(sdk_key: impl Into<String>, options: StatsigOptions) -> Result<Statsig> {
        let sdk_key = sdk_key.into();

        let mut network_config = NetworkConfig::new(sdk_key.clone());
        if let Some(api_url) = &options.api_url {
            network_config.api_url = api_url.clone();
        }
        if let Some(url) = &options.api_for_download_config_specs {
            network_config.config_specs_url = url.clone();
        }
        network_config.log_event_url = options.api_for_log_event.clone();
        network_config.id_lists_url = options.api_for_get_id_lists.clone();
        network_config.timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        network_config.local_mode = options.local_mode;
        for (endpoint, proxy) in &options.proxy_configs {
            if proxy.protocol != ProxyProtocol::Http {
                log::warn!(
                    target: "statsig",
                    "proxy for {endpoint} uses a non-HTTP protocol; provide a streaming transport to use it"
                );
                continue;
            }
            match endpoint.as_str() {
                "download_config_specs" => {
                    network_config.config_specs_url = proxy.address.clone();
                }
                "get_id_lists" => network_config.id_lists_url = Some(proxy.address.clone()),
                "log_event" => network_config.log_event_url = Some(proxy.address.clone()),
                other => {
                    log::warn!(target: "statsig", "unknown proxy endpoint: {other}");
                }
            }
        }
        let network = Arc::new(StatsigHttpClient::new(network_config)?);

        let store = Arc::new(SpecStore::new(&sdk_key));
        if let Some(callback) = options.rules_updated_callback.clone() {
            store.set_rules_updated_callback(Box::new(move |json: &str, lcut: u64| {
                callback(json, lcut)
            }));
        }
        let overrides = Arc::new(OverrideAdapter::new());
        let evaluator = Evaluator::new(store.clone(), overrides.clone());

        let mut updater = SpecUpdater::new(
            store.clone(),
            network.clone(),
            options.data_store.clone(),
            options.bootstrap_values.clone(),
            options.fallback_to_statsig_api,
            options.out_of_sync_threshold,
        );
        if let Some(sources) = &options.initialize_sources {
            updater.set_initialize_sources(sources.clone());
        }
        if let Some(sources) = &options.config_sync_sources {
            updater.set_sync_sources(sources.clone());
        }
        let updater = Arc::new(updater);

        let id_list_manager = IdListManager::new(
            store.clone(),
            network.clone(),
            options
                .id_list_threadpool_size
                .unwrap_or(StatsigOptions::DEFAULT_ID_LIST_THREADPOOL_SIZE),
        );

        let batcher = Arc::new(EventBatcher::new(
            options.event_queue_size.unwrap_or(DEFAULT_EVENT_QUEUE_SIZE),
            options.retry_queue_size.unwrap_or(DEFAULT_RETRY_QUEUE_SIZE),
        ));
        let deduper = Arc::new(ExposureDeduper::default());
        let logger = Arc::new(EventLogger::new(batcher.clone(), network.clone()));
        if let Some(callback) = options.events_flushed_callback.clone() {
            logger.set_flushed_callback(callback);
        }

        let boundary = ErrorBoundary {
            network: network.clone(),
            seen: Mutex::new(HashSet::new()),
            disabled: options.disable_diagnostics || options.local_mode,
            error_callback: options.sdk_error_callback.clone(),
        };

        Ok(Statsig {
            inner: Arc::new(StatsigInner {
                options,
                store,
                overrides,
                evaluator,
                network,
                updater,
                id_list_manager,
                batcher,
                deduper,
                logger,
                boundary,
            }),
            pollers: Mutex::new(Vec::new()),
            streaming: Mutex::new(None),
            backup: Mutex::new(None),
        })
    }

    /// Populate the store from the configured sources and start the background workers.
    pub fn initialize(&self) -> InitDetails {
        let started = Instant::now();
        let init_timeout = self.inner.options.init_timeout;

        let result = self.inner.updater.initialize(init_timeout);
        let duration = started.elapsed();
        let store_populated = self.inner.store.get_current().is_populated();

        let details = match result {
            Ok(source) => InitDetails {
                duration,
                source,
                success: true,
                store_populated,
                error: None,
                timed_out: false,
            },
            Err(err) => {
                let timed_out =
                    init_timeout.is_some_and(|timeout| duration >= timeout);
                InitDetails {
                    duration,
                    source: SpecsSource::Uninitialized,
                    success: false,
                    store_populated,
                    error: Some(err),
                    timed_out,
                }
            }
        };

        if !self.inner.options.local_mode && !self.inner.options.disable_id_lists {
            self.inner.sync_id_lists();
        }
        self.inner.apply_sdk_tuning();
        self.start_background_workers();

        self.inner.emit_diagnostics(
            "initialize",
            json!({
                "durationMs": details.duration.as_millis() as u64,
                "source": details.source.as_str(),
                "success": details.success,
            }),
        );

        details
    }

    fn start_background_workers(&self) {
        let mut pollers = self
            .pollers
            .lock()
            .expect("thread holding poller lock should not panic");
        if !pollers.is_empty() {
            return;
        }

        let options = &self.inner.options;
        let sync_interval = options
            .rulesets_sync_interval
            .unwrap_or(StatsigOptions::DEFAULT_RULESETS_SYNC_INTERVAL);

        // A caller-provided stream replaces the pull poller; the pull loop becomes the backup
        // started by the reconnect policy.
        if let Some(transport) = &options.streaming_transport {
            let backup = Arc::new(PullBackup {
                inner: self.inner.clone(),
                interval: sync_interval,
                poller: Mutex::new(None),
            });
            match StreamingUpdater::start(
                transport.clone(),
                self.inner.updater.clone(),
                backup.clone(),
                None,
            ) {
                Ok(stream) => {
                    *self
                        .streaming
                        .lock()
                        .expect("thread holding streaming lock should not panic") = Some(stream);
                    *self
                        .backup
                        .lock()
                        .expect("thread holding backup lock should not panic") = Some(backup);
                }
                Err(err) => {
                    log::error!(target: "statsig", "failed to start ruleset stream: {err}");
                }
            }
        } else if !options.local_mode {
            let inner = self.inner.clone();
            if let Ok(poller) = PollerThread::start(
                "statsig-ruleset-sync",
                sync_interval,
                Duration::from_secs(1),
                move || inner.sync_tick(),
            ) {
                pollers.push(poller);
            }
        }

        if !options.local_mode {
            if !options.disable_id_lists {
                let inner = self.inner.clone();
                if let Ok(poller) = PollerThread::start(
                    "statsig-id-list-sync",
                    options
                        .id_lists_sync_interval
                        .unwrap_or(StatsigOptions::DEFAULT_ID_LISTS_SYNC_INTERVAL),
                    Duration::from_secs(1),
                    move || {
                        if !inner.updater.is_paused() {
                            inner.sync_id_lists();
                        }
                    },
                ) {
                    pollers.push(poller);
                }
            }

            self.inner
                .logger
                .start(options.max_logging_workers.unwrap_or(DEFAULT_WORKER_COUNT));

            let inner = self.inner.clone();
            if let Ok(poller) = PollerThread::start(
                "statsig-dropped-events",
                Duration::from_secs(60),
                Duration::ZERO,
                move || inner.drain_dropped_event_count(),
            ) {
                pollers.push(poller);
            }
        }

        let inner = self.inner.clone();
        if let Ok(poller) = PollerThread::start(
            "statsig-event-batcher",
            options
                .batching_interval
                .unwrap_or(StatsigOptions::DEFAULT_BATCHING_INTERVAL),
            Duration::ZERO,
            move || {
                inner.batcher.cut_batch();
                inner.logger.notify();
            },
        ) {
            pollers.push(poller);
        }

        let deduper = self.inner.deduper.clone();
        if let Ok(poller) = PollerThread::start(
            "statsig-exposure-dedupe-reset",
            DEFAULT_DEDUPE_WINDOW,
            Duration::ZERO,
            move || deduper.reset(),
        ) {
            pollers.push(poller);
        }
    }

    fn validated(&self, user: &StatsigUser) -> Result<StatsigUser> {
        if !user.has_identifier() {
            return Err(Error::MissingUserIdentifier);
        }
        Ok(self.inner.normalized(user))
    }

    // --- gates ---

    pub fn check_gate(&self, user: &StatsigUser, gate_name: &str) -> Result<bool> {
        let user = self.validated(user)?;
        Ok(self.inner.boundary.capture(
            "check_gate",
            || false,
            || {
                let evaluation = self.inner.evaluator.check_gate(&user, gate_name);
                self.inner
                    .observe_evaluation("check_gate", gate_name, &evaluation);
                self.inner
                    .log_gate_exposure(&user, gate_name, &evaluation, false);
                evaluation.bool_value
            },
        ))
    }

    pub fn check_gate_no_exposure(&self, user: &StatsigUser, gate_name: &str) -> Result<bool> {
        let user = self.validated(user)?;
        Ok(self.inner.boundary.capture(
            "check_gate_no_exposure",
            || false,
            || {
                let evaluation = self.inner.evaluator.check_gate(&user, gate_name);
                self.inner
                    .observe_evaluation("check_gate", gate_name, &evaluation);
                evaluation.bool_value
            },
        ))
    }

    pub fn get_feature_gate(&self, user: &StatsigUser, gate_name: &str) -> Result<FeatureGate> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.check_gate(&user, gate_name);
        self.inner
            .observe_evaluation("get_feature_gate", gate_name, &evaluation);
        self.inner
            .log_gate_exposure(&user, gate_name, &evaluation, false);
        Ok(FeatureGate {
            name: gate_name.to_owned(),
            value: evaluation.bool_value,
            rule_id: evaluation.rule_id,
            id_type: evaluation.id_type,
            details: evaluation.details,
        })
    }

    pub fn manually_log_gate_exposure(&self, user: &StatsigUser, gate_name: &str) -> Result<()> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.check_gate(&user, gate_name);
        self.inner
            .log_gate_exposure(&user, gate_name, &evaluation, true);
        Ok(())
    }

    // --- dynamic configs and experiments ---

    pub fn get_dynamic_config(
        &self,
        user: &StatsigUser,
        config_name: &str,
    ) -> Result<DynamicConfig> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_config(&user, config_name);
        self.inner
            .observe_evaluation("get_dynamic_config", config_name, &evaluation);
        self.inner
            .log_config_exposure(&user, config_name, &evaluation, false);
        Ok(into_dynamic_config(config_name, evaluation))
    }

    pub fn get_dynamic_config_no_exposure(
        &self,
        user: &StatsigUser,
        config_name: &str,
    ) -> Result<DynamicConfig> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_config(&user, config_name);
        Ok(into_dynamic_config(config_name, evaluation))
    }

    /// Experiments are dynamic configs with group assignment semantics.
    pub fn get_experiment(
        &self,
        user: &StatsigUser,
        experiment_name: &str,
    ) -> Result<DynamicConfig> {
        self.get_dynamic_config(user, experiment_name)
    }

    pub fn get_experiment_no_exposure(
        &self,
        user: &StatsigUser,
        experiment_name: &str,
    ) -> Result<DynamicConfig> {
        self.get_dynamic_config_no_exposure(user, experiment_name)
    }

    pub fn manually_log_config_exposure(
        &self,
        user: &StatsigUser,
        config_name: &str,
    ) -> Result<()> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_config(&user, config_name);
        self.inner
            .log_config_exposure(&user, config_name, &evaluation, true);
        Ok(())
    }

    // --- layers ---

    pub fn get_layer(&self, user: &StatsigUser, layer_name: &str) -> Result<Layer> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_layer(&user, layer_name);
        self.inner
            .observe_evaluation("get_layer", layer_name, &evaluation);

        let sink = {
            let inner = self.inner.clone();
            let user = user.clone();
            let layer_name = layer_name.to_owned();
            let evaluation = evaluation.clone();
            Arc::new(move |parameter: &str| {
                inner.log_layer_exposure(&user, &layer_name, parameter, &evaluation, false);
            })
        };

        Ok(into_layer(layer_name, evaluation, Some(sink)))
    }

    pub fn get_layer_no_exposure(&self, user: &StatsigUser, layer_name: &str) -> Result<Layer> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_layer(&user, layer_name);
        Ok(into_layer(layer_name, evaluation, None))
    }

    pub fn manually_log_layer_parameter_exposure(
        &self,
        user: &StatsigUser,
        layer_name: &str,
        parameter_name: &str,
    ) -> Result<()> {
        let user = self.validated(user)?;
        let evaluation = self.inner.evaluator.get_layer(&user, layer_name);
        self.inner
            .log_layer_exposure(&user, layer_name, parameter_name, &evaluation, true);
        Ok(())
    }

    // --- overrides ---

    pub fn override_gate(&self, gate_name: &str, value: bool, id: Option<&str>) {
        self.inner.overrides.override_gate(gate_name, value, id);
    }

    pub fn remove_gate_override(&self, gate_name: &str) {
        self.inner.overrides.remove_gate_override(gate_name);
    }

    pub fn override_dynamic_config(&self, config_name: &str, value: Value, id: Option<&str>) {
        self.inner.overrides.override_config(config_name, value, id);
    }

    pub fn remove_dynamic_config_override(&self, config_name: &str) {
        self.inner.overrides.remove_config_override(config_name);
    }

    pub fn override_experiment(&self, experiment_name: &str, value: Value, id: Option<&str>) {
        self.inner
            .overrides
            .override_experiment(experiment_name, value, id);
    }

    pub fn remove_experiment_override(&self, experiment_name: &str) {
        self.inner
            .overrides
            .remove_experiment_override(experiment_name);
    }

    pub fn override_layer(&self, layer_name: &str, value: Value, id: Option<&str>) {
        self.inner.overrides.override_layer(layer_name, value, id);
    }

    pub fn remove_layer_override(&self, layer_name: &str) {
        self.inner.overrides.remove_layer_override(layer_name);
    }

    // --- events and lifecycle ---

    /// Record a custom event.
    pub fn log_event(
        &self,
        user: &StatsigUser,
        event_name: &str,
        value: Option<Value>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<()> {
        if event_name.is_empty() {
            return Err(Error::InvalidEvent("event name must not be empty".to_owned()));
        }
        let user = self.validated(user)?;
        self.inner
            .enqueue(StatsigEventInternal::custom(&user, event_name, value, metadata));
        Ok(())
    }

    /// Synchronously send all pending events.
    pub fn flush(&self) {
        self.inner.logger.flush();
    }

    pub fn pause_polling(&self) {
        self.inner.updater.pause_polling();
    }

    pub fn resume_polling(&self) {
        self.inner.updater.resume_polling();
    }

    /// Stop all background workers and drain pending events.
    pub fn shutdown(&self) {
        let pollers = std::mem::take(
            &mut *self
                .pollers
                .lock()
                .expect("thread holding poller lock should not panic"),
        );
        // Signal everything first so the joins below don't wait serially.
        for poller in &pollers {
            poller.stop();
        }
        for poller in pollers {
            if let Err(err) = poller.shutdown() {
                log::error!(target: "statsig", "failed to join background worker: {err}");
            }
        }

        let streaming = self
            .streaming
            .lock()
            .expect("thread holding streaming lock should not panic")
            .take();
        if let Some(streaming) = streaming {
            if let Err(err) = streaming.shutdown() {
                log::error!(target: "statsig", "failed to join ruleset stream reader: {err}");
            }
        }
        let backup = self
            .backup
            .lock()
            .expect("thread holding backup lock should not panic")
            .take();
        if let Some(backup) = backup {
            backup.stop_backup();
        }

        self.inner.logger.shutdown();
        self.inner.drain_dropped_event_count();

        if let Some(data_store) = &self.inner.options.data_store {
            if let Err(err) = data_store.shutdown() {
                log::warn!(target: "statsig", "data store shutdown failed: {err}");
            }
        }
    }
}

fn into_dynamic_config(config_name: &str, evaluation: Evaluation) -> DynamicConfig {
    DynamicConfig {
        name: config_name.to_owned(),
        value: evaluation.object_value(),
        rule_id: evaluation.rule_id,
        group_name: evaluation.group_name,
        is_experiment_active: evaluation.is_experiment_active,
        is_user_in_experiment: evaluation.is_experiment_group,
        details: evaluation.details,
    }
}

fn into_layer(
    layer_name: &str,
    evaluation: Evaluation,
    exposure_sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
) -> Layer {
    let value = evaluation.object_value();
    Layer {
        name: layer_name.to_owned(),
        rule_id: evaluation.rule_id,
        group_name: evaluation.group_name,
        allocated_experiment_name: evaluation.allocated_experiment_name,
        details: evaluation.details,
        value,
        explicit_parameters: evaluation.explicit_parameters.unwrap_or_default(),
        exposure_sink,
    }
}
