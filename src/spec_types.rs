//! Wire model of the ruleset document served by `/v1/download_config_specs`.
use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The versioned ruleset document. `time` is the *lcut* (last-config-update-time) in
/// milliseconds; it is the monotonicity token for the whole document.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SpecsResponse {
    pub has_updates: bool,
    pub time: u64,
    /// Each spec is wrapped in [`TryParse`] so a single malformed entry doesn't take down the
    /// whole document.
    pub feature_gates: Vec<TryParse<Spec>>,
    pub dynamic_configs: Vec<TryParse<Spec>>,
    pub layer_configs: Vec<TryParse<Spec>>,
    /// Layer name to the experiments allocated in it.
    pub layers: HashMap<String, Vec<String>>,
    pub id_lists: HashMap<String, bool>,
    pub sdk_keys_to_app_ids: HashMap<String, String>,
    pub hashed_sdk_keys_to_app_ids: HashMap<String, String>,
    pub sdk_flags: HashMap<String, bool>,
    pub sdk_configs: HashMap<String, Value>,
    /// Diagnostics sampling rates by context name.
    pub diagnostics: HashMap<String, u64>,
    /// DJB2 fingerprint of the SDK key this document was produced for, if scoped.
    pub hashed_sdk_key_used: Option<String>,
}

/// `TryParse` allows a subfield to fail parsing without failing the parsing of the whole
/// structure, so one bad spec doesn't poison the rest of the document.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// One feature gate, dynamic config, experiment or layer definition.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Spec {
    pub name: String,
    #[serde(rename = "type")]
    pub spec_type: SpecType,
    pub entity: SpecEntity,
    pub enabled: bool,
    pub salt: String,
    pub default_value: Value,
    pub rules: Vec<Rule>,
    pub id_type: String,
    pub is_active: Option<bool>,
    pub has_shared_params: Option<bool>,
    pub explicit_parameters: Option<Vec<String>>,
    #[serde(rename = "targetAppIDs")]
    pub target_app_ids: Option<Vec<String>>,
    pub version: Option<u32>,
    pub forward_all_exposures: Option<bool>,
}

impl Default for Spec {
    fn default() -> Spec {
        Spec {
            name: String::new(),
            spec_type: SpecType::FeatureGate,
            entity: SpecEntity::FeatureGate,
            enabled: false,
            salt: String::new(),
            default_value: Value::Null,
            rules: Vec::new(),
            id_type: "userID".to_owned(),
            is_active: None,
            has_shared_params: None,
            explicit_parameters: None,
            target_app_ids: None,
            version: None,
            forward_all_exposures: None,
        }
    }
}

impl Spec {
    /// Segments and holdouts are internal building blocks; the facade treats them as
    /// "not a valid gate".
    pub fn is_segment_or_holdout(&self) -> bool {
        matches!(self.entity, SpecEntity::Segment | SpecEntity::Holdout)
    }

    pub fn is_experiment(&self) -> bool {
        matches!(self.entity, SpecEntity::Experiment | SpecEntity::Autotune)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    FeatureGate,
    DynamicConfig,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecEntity {
    FeatureGate,
    Experiment,
    Autotune,
    Segment,
    Holdout,
    DynamicConfig,
    Layer,
    #[serde(other)]
    Unknown,
}

/// An ordered, conditional branch inside a spec producing a candidate return value.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub name: String,
    pub id: String,
    pub group_name: Option<String>,
    pub salt: Option<String>,
    pub pass_percentage: f64,
    pub return_value: Value,
    pub id_type: String,
    pub conditions: Vec<Condition>,
    /// For layer rules: the experiment this rule delegates its value to.
    pub config_delegate: Option<String>,
    pub is_experiment_group: Option<bool>,
    pub sampling_rate: Option<u64>,
}

/// A check of one user dimension against `target_value` under `operator`.
///
/// `fast_target_value`, `user_bucket_salt` and `compiled_regex` are not part of the wire format;
/// they are materialized at ingest by [`Condition::compile`] so evaluation is O(1) in the target
/// size.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub operator: Option<Operator>,
    pub field: Option<String>,
    pub target_value: Value,
    pub additional_values: HashMap<String, Value>,
    /// Identifier dimension for `user_bucket`, `unit_id` and segment-list conditions.
    pub id_type: Option<String>,
    #[serde(skip)]
    pub fast_target_value: Option<HashSet<String>>,
    #[serde(skip)]
    pub user_bucket_salt: Option<String>,
    #[serde(skip)]
    pub compiled_regex: Option<Regex>,
}

impl Condition {
    /// Precompute fast lookup structures for "any/none" style operators, the user_bucket salt,
    /// and the `str_matches` regex. Returns `false` if the condition uses an unknown type or
    /// operator, which latches the owning spec as unsupported.
    pub fn compile(&mut self) -> bool {
        if self.kind == ConditionKind::Unknown {
            return false;
        }
        match self.operator {
            Some(Operator::Unknown) => return false,
            // `ua_based` fields are parsed out of the user agent; without a UA parser the
            // condition cannot be answered, which the wire format expresses as unsupported.
            _ if self.kind == ConditionKind::UaBased => return false,
            _ => {}
        }

        match self.operator {
            Some(
                Operator::Any
                | Operator::None
                | Operator::StrContainsAny
                | Operator::StrContainsNone
                | Operator::StrStartsWithAny
                | Operator::StrEndsWithAny,
            ) => {
                self.fast_target_value = Some(target_value_set(&self.target_value, true));
            }
            Some(Operator::AnyCaseSensitive | Operator::NoneCaseSensitive) => {
                self.fast_target_value = Some(target_value_set(&self.target_value, false));
            }
            Some(Operator::StrMatches) => {
                let Some(pattern) = self.target_value.as_str() else {
                    return false;
                };
                match Regex::new(pattern) {
                    Ok(regex) => self.compiled_regex = Some(regex),
                    Err(_) => return false,
                }
            }
            _ => {}
        }

        if self.kind == ConditionKind::UserBucket {
            self.user_bucket_salt = self
                .additional_values
                .get("salt")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
        }

        true
    }
}

fn target_value_set(target_value: &Value, lowercase: bool) -> HashSet<String> {
    let items: Box<dyn Iterator<Item = String>> = match target_value {
        Value::Array(values) => Box::new(values.iter().filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })),
        Value::String(s) => Box::new(std::iter::once(s.clone())),
        Value::Number(n) => Box::new(std::iter::once(n.to_string())),
        _ => Box::new(std::iter::empty()),
    };
    if lowercase {
        items.map(|s| s.to_lowercase()).collect()
    } else {
        items.collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    #[default]
    Public,
    FailGate,
    PassGate,
    MultiPassGate,
    MultiFailGate,
    IpBased,
    UaBased,
    UserField,
    EnvironmentField,
    CurrentTime,
    UserBucket,
    UnitId,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    VersionGt,
    VersionGte,
    VersionLt,
    VersionLte,
    VersionEq,
    VersionNeq,
    Any,
    None,
    AnyCaseSensitive,
    NoneCaseSensitive,
    StrStartsWithAny,
    StrEndsWithAny,
    StrContainsAny,
    StrContainsNone,
    StrMatches,
    Eq,
    Neq,
    Before,
    After,
    On,
    InSegmentList,
    NotInSegmentList,
    ArrayContainsAny,
    ArrayContainsNone,
    ArrayContainsAll,
    NotArrayContainsAll,
    #[serde(other)]
    Unknown,
}

/// One entry in the `/v1/get_id_lists` directory.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IdListMetadata {
    pub name: String,
    pub size: u64,
    pub url: Option<String>,
    pub creation_time: u64,
    #[serde(rename = "fileID")]
    pub file_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let response: SpecsResponse = serde_json::from_str(
            r#"{
              "has_updates": true,
              "time": 1729873603830,
              "feature_gates": [
                {
                  "name": "always_on_gate",
                  "type": "feature_gate",
                  "entity": "feature_gate",
                  "enabled": true,
                  "salt": "47403b4e",
                  "defaultValue": false,
                  "idType": "userID",
                  "rules": [
                    {
                      "name": "6N6Z8ODekNYZ7F8gFdoLP5",
                      "id": "6N6Z8ODekNYZ7F8gFdoLP5",
                      "salt": "d0a4b1a7",
                      "passPercentage": 100,
                      "returnValue": true,
                      "idType": "userID",
                      "conditions": [{"type": "public", "targetValue": null}]
                    }
                  ]
                }
              ],
              "dynamic_configs": [],
              "layer_configs": [],
              "layers": {},
              "id_lists": {}
            }"#,
        )
        .unwrap();

        assert!(response.has_updates);
        assert_eq!(response.time, 1729873603830);
        assert_eq!(response.feature_gates.len(), 1);
        let gate: Option<Spec> = response.feature_gates[0].clone().into();
        let gate = gate.unwrap();
        assert_eq!(gate.name, "always_on_gate");
        assert_eq!(gate.rules[0].pass_percentage, 100.0);
        assert_eq!(gate.rules[0].conditions[0].kind, ConditionKind::Public);
    }

    #[test]
    fn unknown_entity_and_operator_parse_as_unknown() {
        let spec: Spec = serde_json::from_str(
            r#"{
              "name": "g",
              "type": "feature_gate",
              "entity": "some_future_entity",
              "enabled": true,
              "salt": "s",
              "defaultValue": false,
              "idType": "userID",
              "rules": [{
                "name": "r", "id": "r", "passPercentage": 100, "returnValue": true,
                "idType": "userID",
                "conditions": [{"type": "user_field", "operator": "quantum_match", "field": "email", "targetValue": "x"}]
              }]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.entity, SpecEntity::Unknown);
        assert_eq!(
            spec.rules[0].conditions[0].operator,
            Some(Operator::Unknown)
        );

        let mut condition = spec.rules[0].conditions[0].clone();
        assert!(!condition.compile());
    }

    #[test]
    fn parses_partially_if_one_spec_is_malformed() {
        let response: SpecsResponse = serde_json::from_str(
            r#"{
              "has_updates": true,
              "time": 1,
              "feature_gates": [
                {"name": "ok", "type": "feature_gate", "entity": "feature_gate",
                 "enabled": true, "salt": "s", "defaultValue": false, "idType": "userID", "rules": []},
                {"name": 42}
              ]
            }"#,
        )
        .unwrap();

        assert!(matches!(response.feature_gates[0], TryParse::Parsed(_)));
        assert!(matches!(
            response.feature_gates[1],
            TryParse::ParseFailed(_)
        ));
    }

    #[test]
    fn compile_materializes_fast_target_values() {
        let mut condition: Condition = serde_json::from_str(
            r#"{"type": "user_field", "operator": "any", "field": "email",
                "targetValue": ["A@x.com", "b@x.com"]}"#,
        )
        .unwrap();
        assert!(condition.compile());
        let fast = condition.fast_target_value.unwrap();
        assert!(fast.contains("a@x.com"));
        assert!(fast.contains("b@x.com"));
    }

    #[test]
    fn compile_rejects_bad_regex() {
        let mut condition: Condition = serde_json::from_str(
            r#"{"type": "user_field", "operator": "str_matches", "field": "email",
                "targetValue": "("}"#,
        )
        .unwrap();
        assert!(!condition.compile());
    }

    #[test]
    fn id_list_metadata_wire_names() {
        let metadata: IdListMetadata = serde_json::from_str(
            r#"{"name": "list_1", "size": 3, "url": "https://cdn/list_1",
                "creationTime": 1, "fileID": "f1"}"#,
        )
        .unwrap();
        assert_eq!(metadata.file_id.as_deref(), Some("f1"));
        assert_eq!(metadata.creation_time, 1);
    }
}
