//! A thread-safe in-memory storage for the currently active ruleset. [`SpecStore`] provides
//! concurrent access for readers (evaluation) and a single writer (the spec updater).
//!
//! The indexed ruleset ([`SpecStoreData`]) is immutable and can only be replaced completely, so
//! readers never observe a half-built state. Ingest serializes through the store's write lock;
//! readers clone an `Arc` snapshot and take no lock for the rest of the operation.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::evaluation::evaluation_types::SpecsSource;
use crate::hashing::djb2;
use crate::id_lists::IdList;
use crate::spec_types::{Spec, SpecsResponse};
use crate::{Error, Result};

/// Callback invoked with the raw ruleset JSON after every accepted update. Used for pluggable
/// persistence (DataStore write-back).
pub type RulesUpdatedCallback = Box<dyn Fn(&str, u64) + Send + Sync>;

/// One immutable, fully-indexed ruleset snapshot.
#[derive(Debug)]
pub struct SpecStoreData {
    pub gates: HashMap<String, Arc<Spec>>,
    pub configs: HashMap<String, Arc<Spec>>,
    pub layers: HashMap<String, Arc<Spec>>,
    /// Experiment name to the layer it is allocated in.
    pub experiment_to_layer: HashMap<String, String>,
    /// Names of specs that use a condition type or operator this engine cannot evaluate.
    pub unsupported_specs: HashSet<String>,
    /// Last-config-update-time of this snapshot (ms). Monotonically non-decreasing.
    pub lcut: u64,
    /// The lcut of the first successful populate.
    pub initial_lcut: u64,
    pub source: SpecsSource,
    pub sdk_keys_to_app_ids: HashMap<String, String>,
    pub hashed_sdk_keys_to_app_ids: HashMap<String, String>,
    pub sdk_flags: HashMap<String, bool>,
    pub sdk_configs: HashMap<String, Value>,
    pub diagnostics_sampling: HashMap<String, u64>,
}

impl SpecStoreData {
    fn empty() -> SpecStoreData {
        SpecStoreData {
            gates: HashMap::new(),
            configs: HashMap::new(),
            layers: HashMap::new(),
            experiment_to_layer: HashMap::new(),
            unsupported_specs: HashSet::new(),
            lcut: 0,
            initial_lcut: 0,
            source: SpecsSource::Uninitialized,
            sdk_keys_to_app_ids: HashMap::new(),
            hashed_sdk_keys_to_app_ids: HashMap::new(),
            sdk_flags: HashMap::new(),
            sdk_configs: HashMap::new(),
            diagnostics_sampling: HashMap::new(),
        }
    }

    pub fn is_populated(&self) -> bool {
        self.source != SpecsSource::Uninitialized
    }

    pub fn get_gate(&self, name: &str) -> Option<&Arc<Spec>> {
        self.gates.get(name)
    }

    pub fn get_config(&self, name: &str) -> Option<&Arc<Spec>> {
        self.configs.get(name)
    }

    pub fn get_layer(&self, name: &str) -> Option<&Arc<Spec>> {
        self.layers.get(name)
    }

    pub fn get_layer_name_for_experiment(&self, experiment_name: &str) -> Option<&str> {
        self.experiment_to_layer
            .get(experiment_name)
            .map(String::as_str)
    }

    /// Whether an sdk_flag is enabled in this snapshot.
    pub fn sdk_flag(&self, flag: &str) -> bool {
        self.sdk_flags.get(flag).copied().unwrap_or(false)
    }

    /// An sdk_config numeric override, if present and positive.
    pub fn sdk_config_number(&self, key: &str) -> Option<u64> {
        self.sdk_configs.get(key)?.as_u64().filter(|n| *n > 0)
    }
}

/// In-memory authority on the currently active ruleset plus the ID-list store.
pub struct SpecStore {
    data: RwLock<Arc<SpecStoreData>>,
    id_lists: RwLock<HashMap<String, IdList>>,
    sdk_key_fingerprint: String,
    rules_updated_callback: RwLock<Option<RulesUpdatedCallback>>,
}

impl SpecStore {
    /// Create a new empty spec store scoped to `sdk_key`.
    pub fn new(sdk_key: &str) -> SpecStore {
        SpecStore {
            data: RwLock::new(Arc::new(SpecStoreData::empty())),
            id_lists: RwLock::new(HashMap::new()),
            sdk_key_fingerprint: djb2(sdk_key),
            rules_updated_callback: RwLock::new(None),
        }
    }

    /// Get the currently-active snapshot. The snapshot is immutable; hold it for the duration of
    /// one evaluation so the response is consistent.
    pub fn get_current(&self) -> Arc<SpecStoreData> {
        // A read() Err is possible only if the lock is poisoned (writer panicked while holding
        // the lock), which should never happen.
        self.data
            .read()
            .expect("thread holding spec store lock should not panic")
            .clone()
    }

    pub fn set_rules_updated_callback(&self, callback: RulesUpdatedCallback) {
        *self
            .rules_updated_callback
            .write()
            .expect("thread holding callback lock should not panic") = Some(callback);
    }

    /// Ingest a ruleset document.
    ///
    /// Returns `Ok(true)` when a new snapshot was swapped in, `Ok(false)` for a no-op document
    /// (`has_updates == false`). Parse failures and rejections (stale `time`, SDK-key fingerprint
    /// mismatch) return an error and preserve the previous snapshot: the store never transitions
    /// back from populated to empty because of a bad update.
    pub fn process_specs(&self, json: &str, source: SpecsSource) -> Result<bool> {
        let response: SpecsResponse = serde_json::from_str(json)?;

        if !response.has_updates {
            return Ok(false);
        }
        if response.time == 0 {
            return Err(Error::SpecsRejected("document is missing `time`"));
        }
        if let Some(hashed_key) = &response.hashed_sdk_key_used {
            if *hashed_key != self.sdk_key_fingerprint {
                return Err(Error::SpecsRejected("sdk key fingerprint mismatch"));
            }
        }

        // Writers serialize through this lock so concurrent sources cannot interleave.
        let mut slot = self
            .data
            .write()
            .expect("thread holding spec store lock should not panic");

        if response.time < slot.lcut {
            return Err(Error::SpecsRejected("older than current lcut"));
        }

        let mut unsupported_specs = HashSet::new();
        let gates = index_specs(response.feature_gates, &mut unsupported_specs);
        let configs = index_specs(response.dynamic_configs, &mut unsupported_specs);
        let layers = index_specs(response.layer_configs, &mut unsupported_specs);

        let mut experiment_to_layer = HashMap::new();
        for (layer_name, experiments) in &response.layers {
            for experiment in experiments {
                experiment_to_layer.insert(experiment.clone(), layer_name.clone());
            }
        }

        let initial_lcut = if slot.initial_lcut == 0 {
            response.time
        } else {
            slot.initial_lcut
        };

        let data = Arc::new(SpecStoreData {
            gates,
            configs,
            layers,
            experiment_to_layer,
            unsupported_specs,
            lcut: response.time,
            initial_lcut,
            source,
            sdk_keys_to_app_ids: response.sdk_keys_to_app_ids,
            hashed_sdk_keys_to_app_ids: response.hashed_sdk_keys_to_app_ids,
            sdk_flags: response.sdk_flags,
            sdk_configs: response.sdk_configs,
            diagnostics_sampling: response.diagnostics,
        });

        log::debug!(
            target: "statsig",
            "accepted ruleset update: lcut={}, source={:?}, {} gates / {} configs / {} layers",
            data.lcut,
            source,
            data.gates.len(),
            data.configs.len(),
            data.layers.len(),
        );

        *slot = data;
        drop(slot);

        if let Some(callback) = &*self
            .rules_updated_callback
            .read()
            .expect("thread holding callback lock should not panic")
        {
            callback(json, response.time);
        }

        Ok(true)
    }

    /// The target app ID scoped to the given SDK key, if the ruleset is multi-tenant.
    pub fn get_target_app_for_sdk_key(&self, sdk_key: &str) -> Option<String> {
        let data = self.get_current();
        data.sdk_keys_to_app_ids
            .get(sdk_key)
            .or_else(|| data.hashed_sdk_keys_to_app_ids.get(&djb2(sdk_key)))
            .cloned()
    }

    /// Set-membership check against an ID list. A missing list answers `false`.
    pub fn id_list_contains(&self, list_name: &str, id: &str) -> bool {
        self.id_lists
            .read()
            .expect("thread holding id list lock should not panic")
            .get(list_name)
            .is_some_and(|list| list.ids.contains(id))
    }

    pub fn get_id_list(&self, list_name: &str) -> Option<IdList> {
        self.id_lists
            .read()
            .expect("thread holding id list lock should not panic")
            .get(list_name)
            .cloned()
    }

    /// Mutable access for the ID-list manager. Readers see eventually-consistent membership,
    /// which is acceptable because ID lists change slowly.
    pub(crate) fn with_id_lists_mut<R>(&self, f: impl FnOnce(&mut HashMap<String, IdList>) -> R) -> R {
        let mut lists = self
            .id_lists
            .write()
            .expect("thread holding id list lock should not panic");
        f(&mut lists)
    }
}

fn index_specs(
    specs: Vec<crate::spec_types::TryParse<Spec>>,
    unsupported: &mut HashSet<String>,
) -> HashMap<String, Arc<Spec>> {
    let mut index = HashMap::with_capacity(specs.len());
    for spec in specs {
        let Some(mut spec): Option<Spec> = spec.into() else {
            // A malformed spec is dropped; the rest of the document is still served.
            continue;
        };
        let mut supported = true;
        for rule in &mut spec.rules {
            for condition in &mut rule.conditions {
                supported &= condition.compile();
            }
        }
        if !supported {
            unsupported.insert(spec.name.clone());
        }
        index.insert(spec.name.clone(), Arc::new(spec));
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(time: u64, gate_name: &str) -> String {
        format!(
            r#"{{
              "has_updates": true,
              "time": {time},
              "feature_gates": [
                {{"name": "{gate_name}", "type": "feature_gate", "entity": "feature_gate",
                 "enabled": true, "salt": "s", "defaultValue": false, "idType": "userID",
                 "rules": []}}
              ],
              "dynamic_configs": [],
              "layer_configs": [],
              "layers": {{"a_layer": ["an_experiment"]}}
            }}"#
        )
    }

    #[test]
    fn ingest_swaps_snapshot() {
        let store = SpecStore::new("secret-key");
        assert!(!store.get_current().is_populated());

        assert!(store
            .process_specs(&document(100, "gate_a"), SpecsSource::Network)
            .unwrap());

        let data = store.get_current();
        assert!(data.is_populated());
        assert_eq!(data.lcut, 100);
        assert_eq!(data.initial_lcut, 100);
        assert!(data.get_gate("gate_a").is_some());
        assert_eq!(
            data.get_layer_name_for_experiment("an_experiment"),
            Some("a_layer")
        );
    }

    #[test]
    fn stale_update_is_rejected() {
        let store = SpecStore::new("secret-key");
        store
            .process_specs(&document(100, "gate_a"), SpecsSource::Network)
            .unwrap();

        let result = store.process_specs(&document(50, "gate_b"), SpecsSource::Network);
        assert!(matches!(result, Err(Error::SpecsRejected(_))));

        // The previous snapshot is preserved.
        let data = store.get_current();
        assert_eq!(data.lcut, 100);
        assert!(data.get_gate("gate_a").is_some());
        assert!(data.get_gate("gate_b").is_none());
    }

    #[test]
    fn initial_lcut_is_sticky() {
        let store = SpecStore::new("secret-key");
        store
            .process_specs(&document(100, "gate_a"), SpecsSource::Network)
            .unwrap();
        store
            .process_specs(&document(200, "gate_b"), SpecsSource::Network)
            .unwrap();

        let data = store.get_current();
        assert_eq!(data.lcut, 200);
        assert_eq!(data.initial_lcut, 100);
    }

    #[test]
    fn no_op_document_is_accepted_without_update() {
        let store = SpecStore::new("secret-key");
        let updated = store
            .process_specs(r#"{"has_updates": false}"#, SpecsSource::Network)
            .unwrap();
        assert!(!updated);
        assert!(!store.get_current().is_populated());
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let store = SpecStore::new("secret-key");
        let json = format!(
            r#"{{"has_updates": true, "time": 10, "hashed_sdk_key_used": "{}"}}"#,
            crate::hashing::djb2("some-other-key"),
        );
        assert!(matches!(
            store.process_specs(&json, SpecsSource::Network),
            Err(Error::SpecsRejected(_))
        ));
    }

    #[test]
    fn fingerprint_match_is_accepted() {
        let store = SpecStore::new("secret-key");
        let json = format!(
            r#"{{"has_updates": true, "time": 10, "hashed_sdk_key_used": "{}"}}"#,
            crate::hashing::djb2("secret-key"),
        );
        assert!(store.process_specs(&json, SpecsSource::Bootstrap).unwrap());
        assert_eq!(store.get_current().source, SpecsSource::Bootstrap);
    }

    #[test]
    fn unsupported_condition_latches_spec_name() {
        let store = SpecStore::new("secret-key");
        let json = r#"{
          "has_updates": true,
          "time": 10,
          "feature_gates": [
            {"name": "weird_gate", "type": "feature_gate", "entity": "feature_gate",
             "enabled": true, "salt": "s", "defaultValue": false, "idType": "userID",
             "rules": [{
               "name": "r", "id": "r", "passPercentage": 100, "returnValue": true,
               "idType": "userID",
               "conditions": [{"type": "hologram_field", "targetValue": null}]
             }]}
          ]
        }"#;
        store.process_specs(json, SpecsSource::Network).unwrap();

        let data = store.get_current();
        assert!(data.unsupported_specs.contains("weird_gate"));
        // The spec is still indexed; evaluation consults the latch first.
        assert!(data.get_gate("weird_gate").is_some());
    }

    #[test]
    fn rules_updated_callback_receives_raw_json() {
        use std::sync::Mutex;

        let store = SpecStore::new("secret-key");
        let received: Arc<Mutex<Option<(String, u64)>>> = Arc::new(Mutex::new(None));
        let sink = received.clone();
        store.set_rules_updated_callback(Box::new(move |json, lcut| {
            *sink.lock().unwrap() = Some((json.to_owned(), lcut));
        }));

        let json = document(123, "gate_a");
        store.process_specs(&json, SpecsSource::Network).unwrap();

        let received = received.lock().unwrap().clone();
        let (callback_json, lcut) = received.unwrap();
        assert_eq!(callback_json, json);
        assert_eq!(lcut, 123);
    }

    #[test]
    fn can_swap_snapshot_from_another_thread() {
        let store = Arc::new(SpecStore::new("secret-key"));

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store
                    .process_specs(&document(5, "gate_a"), SpecsSource::Network)
                    .unwrap();
            })
            .join();
        }

        assert!(store.get_current().is_populated());
    }
}
