//! Drives ruleset refresh: the ordered-source cold start at initialize and the periodic pull
//! sync afterwards, with DataStore write-back and the Statsig-API fallback.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::data_store::{DataStore, STORAGE_KEY};
use crate::evaluation::evaluation_types::SpecsSource;
use crate::network::StatsigHttpClient;
use crate::spec_store::SpecStore;
use crate::{Error, Result};

/// One entry in the ordered source lists for initialize and background sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecSourceKind {
    DataStore,
    Bootstrap,
    Network,
    StatsigNetwork,
    /// Updates arrive through a streaming transport; the pull loop skips this entry.
    Streaming,
}

fn default_initialize_sources(has_data_store: bool, fallback: bool) -> Vec<SpecSourceKind> {
    // Bootstrap is ignored when a DataStore is configured.
    let mut sources = if has_data_store {
        vec![SpecSourceKind::DataStore]
    } else {
        vec![SpecSourceKind::Bootstrap]
    };
    sources.push(SpecSourceKind::Network);
    if fallback {
        sources.push(SpecSourceKind::StatsigNetwork);
    }
    sources
}

fn default_sync_sources(fallback: bool) -> Vec<SpecSourceKind> {
    let mut sources = vec![SpecSourceKind::DataStore, SpecSourceKind::Network];
    if fallback {
        sources.push(SpecSourceKind::StatsigNetwork);
    }
    sources
}

pub struct SpecUpdater {
    store: Arc<SpecStore>,
    network: Arc<StatsigHttpClient>,
    data_store: Option<Arc<dyn DataStore>>,
    bootstrap_values: Option<String>,
    initialize_sources: Vec<SpecSourceKind>,
    sync_sources: Vec<SpecSourceKind>,
    out_of_sync_threshold: Option<Duration>,
    paused: AtomicBool,
}

impl SpecUpdater {
    pub fn new(
        store: Arc<SpecStore>,
        network: Arc<StatsigHttpClient>,
        data_store: Option<Arc<dyn DataStore>>,
        bootstrap_values: Option<String>,
        fallback_to_statsig_api: bool,
        out_of_sync_threshold: Option<Duration>,
    ) -> SpecUpdater {
        let initialize_sources =
            default_initialize_sources(data_store.is_some(), fallback_to_statsig_api);
        let sync_sources = default_sync_sources(fallback_to_statsig_api);
        SpecUpdater {
            store,
            network,
            data_store,
            bootstrap_values,
            initialize_sources,
            sync_sources,
            out_of_sync_threshold,
            paused: AtomicBool::new(false),
        }
    }

    /// Replace the ordered initialize source list. Call before sharing the updater.
    pub fn set_initialize_sources(&mut self, sources: Vec<SpecSourceKind>) {
        self.initialize_sources = sources;
    }

    /// Replace the ordered background-sync source list. Call before sharing the updater.
    pub fn set_sync_sources(&mut self, sources: Vec<SpecSourceKind>) {
        self.sync_sources = sources;
    }

    /// Populate the store from the first initialize source that succeeds. The default order is
    /// DataStore (when configured), Bootstrap (ignored when a DataStore is configured),
    /// Network, and the Statsig-API fallback when enabled.
    pub fn initialize(&self, init_timeout: Option<Duration>) -> Result<SpecsSource> {
        let mut last_error = None;
        for kind in &self.initialize_sources {
            match self.try_initialize_source(*kind, init_timeout) {
                Ok(Some(source)) => return Ok(source),
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "statsig", "{kind:?} source failed at initialize: {err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(Error::NoSourceAvailable))
    }

    /// Try one initialize source. `Ok(None)` means the source is not configured or had no
    /// update to offer.
    fn try_initialize_source(
        &self,
        kind: SpecSourceKind,
        init_timeout: Option<Duration>,
    ) -> Result<Option<SpecsSource>> {
        match kind {
            SpecSourceKind::DataStore => match &self.data_store {
                Some(data_store) => Ok(self
                    .populate_from_data_store(data_store)?
                    .then_some(SpecsSource::DataStore)),
                None => Ok(None),
            },
            SpecSourceKind::Bootstrap => match &self.bootstrap_values {
                Some(bootstrap) => Ok(self
                    .store
                    .process_specs(bootstrap, SpecsSource::Bootstrap)?
                    .then_some(SpecsSource::Bootstrap)),
                None => Ok(None),
            },
            SpecSourceKind::Network => Ok(self
                .fetch_and_process(false, init_timeout)?
                .then_some(SpecsSource::Network)),
            SpecSourceKind::StatsigNetwork => Ok(self
                .fetch_and_process(true, init_timeout)?
                .then_some(SpecsSource::StatsigNetwork)),
            // The stream reader populates the store once it connects.
            SpecSourceKind::Streaming => Ok(None),
        }
    }

    /// One background sync tick over the ordered sync sources. Skipped entirely while polling
    /// is paused. A DataStore entry only serves the tick when the store opts into polling; a
    /// Network entry falls through to a later StatsigNetwork entry on failure or when the
    /// snapshot is out of sync.
    pub fn sync_once(&self) {
        if self.is_paused() {
            return;
        }

        for kind in &self.sync_sources {
            match kind {
                SpecSourceKind::DataStore => {
                    let Some(data_store) = &self.data_store else {
                        continue;
                    };
                    if !data_store.should_be_used_for_querying_updates(STORAGE_KEY) {
                        continue;
                    }
                    if let Err(err) = self.populate_from_data_store(data_store) {
                        log::warn!(target: "statsig", "data store sync failed: {err}");
                    }
                    return;
                }
                SpecSourceKind::Network => {
                    let primary = self.fetch_and_process(false, None);
                    if let Err(err) = &primary {
                        log::warn!(target: "statsig", "ruleset sync failed: {err}");
                    }
                    if primary.is_ok() && !self.is_out_of_sync() {
                        return;
                    }
                }
                SpecSourceKind::StatsigNetwork => {
                    if let Err(err) = self.fetch_and_process(true, None) {
                        log::warn!(target: "statsig", "statsig fallback sync failed: {err}");
                    }
                    return;
                }
                SpecSourceKind::Bootstrap | SpecSourceKind::Streaming => {}
            }
        }
    }

    /// Ingest an update pushed by a streaming transport.
    pub fn apply_streamed_update(&self, spec_json: &str) -> Result<bool> {
        let updated = self
            .store
            .process_specs(spec_json, SpecsSource::Network)?;
        if updated {
            self.write_back(spec_json);
        }
        Ok(updated)
    }

    /// The store's current lcut, used by streaming transports to resume.
    pub fn current_lcut(&self) -> u64 {
        self.store.get_current().lcut
    }

    pub fn pause_polling(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume_polling(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn fetch_and_process(
        &self,
        use_statsig_fallback: bool,
        timeout_override: Option<Duration>,
    ) -> Result<bool> {
        let since_time = self.store.get_current().lcut;
        let json =
            self.network
                .fetch_config_specs(since_time, timeout_override, use_statsig_fallback)?;
        let source = if use_statsig_fallback {
            SpecsSource::StatsigNetwork
        } else {
            SpecsSource::Network
        };
        let updated = self.store.process_specs(&json, source)?;
        if updated {
            self.write_back(&json);
        }
        Ok(updated)
    }

    fn populate_from_data_store(&self, data_store: &Arc<dyn DataStore>) -> Result<bool> {
        let Some(json) = data_store.get(STORAGE_KEY)? else {
            return Ok(false);
        };
        // Stale payloads are rejected by the store's lcut monotonicity check.
        self.store.process_specs(&json, SpecsSource::DataStore)
    }

    /// Persist the raw ruleset after a successful non-DataStore update.
    fn write_back(&self, json: &str) {
        if let Some(data_store) = &self.data_store {
            if let Err(err) = data_store.set(STORAGE_KEY, json) {
                log::warn!(target: "statsig", "failed to persist ruleset to data store: {err}");
            }
        }
    }

    fn is_out_of_sync(&self) -> bool {
        let Some(threshold) = self.out_of_sync_threshold else {
            return false;
        };
        let lcut = self.store.get_current().lcut;
        if lcut == 0 {
            return false;
        }
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        now_ms.saturating_sub(lcut) > threshold.as_millis() as u64
    }
}
