//! Local overrides. Overrides short-circuit rule evaluation and answer with
//! `LocalOverride` provenance; precedence is per-user, then per-custom-id, then global.
use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::user::StatsigUser;

#[derive(Debug, Default)]
struct OverrideSlot<T> {
    /// Keyed by user ID or custom ID value.
    by_id: HashMap<String, T>,
    global: Option<T>,
}

impl<T: Clone> OverrideSlot<T> {
    fn set(&mut self, id: Option<&str>, value: T) {
        match id {
            Some(id) => {
                self.by_id.insert(id.to_owned(), value);
            }
            None => self.global = Some(value),
        }
    }

    fn lookup(&self, user: &StatsigUser) -> Option<T> {
        if let Some(user_id) = &user.user_id {
            if let Some(value) = self.by_id.get(user_id) {
                return Some(value.clone());
            }
        }
        for custom_id in user.custom_ids.values() {
            if let Some(value) = self.by_id.get(custom_id) {
                return Some(value.clone());
            }
        }
        self.global.clone()
    }
}

/// Holds caller-installed overrides for all four entity kinds.
#[derive(Default)]
pub struct OverrideAdapter {
    gates: RwLock<HashMap<String, OverrideSlot<bool>>>,
    configs: RwLock<HashMap<String, OverrideSlot<Value>>>,
    experiments: RwLock<HashMap<String, OverrideSlot<Value>>>,
    layers: RwLock<HashMap<String, OverrideSlot<Value>>>,
}

macro_rules! override_accessors {
    ($set:ident, $remove:ident, $get:ident, $field:ident, $ty:ty) => {
        pub fn $set(&self, name: &str, value: $ty, id: Option<&str>) {
            self.$field
                .write()
                .expect("thread holding override lock should not panic")
                .entry(name.to_owned())
                .or_default()
                .set(id, value);
        }

        pub fn $remove(&self, name: &str) {
            self.$field
                .write()
                .expect("thread holding override lock should not panic")
                .remove(name);
        }

        pub fn $get(&self, user: &StatsigUser, name: &str) -> Option<$ty> {
            self.$field
                .read()
                .expect("thread holding override lock should not panic")
                .get(name)?
                .lookup(user)
        }
    };
}

impl OverrideAdapter {
    pub fn new() -> OverrideAdapter {
        OverrideAdapter::default()
    }

    override_accessors!(override_gate, remove_gate_override, get_gate_override, gates, bool);
    override_accessors!(
        override_config,
        remove_config_override,
        get_config_override,
        configs,
        Value
    );
    override_accessors!(
        override_experiment,
        remove_experiment_override,
        get_experiment_override,
        experiments,
        Value
    );
    override_accessors!(
        override_layer,
        remove_layer_override,
        get_layer_override,
        layers,
        Value
    );
}
