//! Result types produced by the evaluator: per-call evaluations, exposure provenance, and the
//! tagged holder values handed to the facade.
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where the currently-active ruleset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecsSource {
    Uninitialized,
    Network,
    Bootstrap,
    DataStore,
    StatsigNetwork,
    LocalOverride,
}

impl SpecsSource {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SpecsSource::Uninitialized => "Uninitialized",
            SpecsSource::Network => "Network",
            SpecsSource::Bootstrap => "Bootstrap",
            SpecsSource::DataStore => "DataStore",
            SpecsSource::StatsigNetwork => "StatsigNetwork",
            SpecsSource::LocalOverride => "LocalOverride",
        }
    }
}

/// Why an evaluation produced the value it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationReason {
    /// The entity was found and its rules were walked.
    Recognized,
    /// The entity does not exist in the current ruleset.
    Unrecognized,
    /// The entity uses a condition type or operator this engine does not understand.
    Unsupported,
    /// The store has never been populated.
    Uninitialized,
    /// A local override short-circuited evaluation.
    LocalOverride,
}

impl EvaluationReason {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            EvaluationReason::Recognized => "Recognized",
            EvaluationReason::Unrecognized => "Unrecognized",
            EvaluationReason::Unsupported => "Unsupported",
            EvaluationReason::Uninitialized => "Uninitialized",
            EvaluationReason::LocalOverride => "LocalOverride",
        }
    }
}

/// Provenance attached to every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetails {
    pub source: SpecsSource,
    pub reason: EvaluationReason,
    /// The store's lcut at evaluation time.
    pub config_sync_time: u64,
    /// The lcut of the first successful populate.
    pub init_time: u64,
    /// Wall-clock time of the evaluation (ms).
    pub server_time: u64,
}

impl EvaluationDetails {
    /// The combined "Source:Reason" string logged in exposure metadata.
    pub fn detailed_reason(&self) -> String {
        format!("{}:{}", self.source.as_str(), self.reason.as_str())
    }
}

/// A record of a nested gate evaluation that contributed to an outer decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryExposure {
    pub gate: String,
    /// "true" or "false"; string-typed on the wire.
    #[serde(rename = "gateValue")]
    pub gate_value: String,
    #[serde(rename = "ruleID")]
    pub rule_id: String,
}

/// The full output of evaluating one spec for one user.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub bool_value: bool,
    pub json_value: Value,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub id_type: String,
    pub is_experiment_group: bool,
    pub is_experiment_active: bool,
    pub secondary_exposures: Vec<SecondaryExposure>,
    /// For layers: the exposure chain of the layer alone, excluding delegation.
    pub undelegated_secondary_exposures: Option<Vec<SecondaryExposure>>,
    /// For layers: the experiment a matched delegating rule redirected to.
    pub allocated_experiment_name: Option<String>,
    pub explicit_parameters: Option<Vec<String>>,
    pub details: EvaluationDetails,
    pub sample_rate: Option<u64>,
    pub forward_all_exposures: bool,
    pub version: Option<u32>,
}

impl Evaluation {
    pub(crate) fn empty(details: EvaluationDetails) -> Evaluation {
        Evaluation {
            bool_value: false,
            json_value: Value::Null,
            rule_id: String::new(),
            group_name: None,
            id_type: String::new(),
            is_experiment_group: false,
            is_experiment_active: false,
            secondary_exposures: Vec::new(),
            undelegated_secondary_exposures: None,
            allocated_experiment_name: None,
            explicit_parameters: None,
            details,
            sample_rate: None,
            forward_all_exposures: false,
            version: None,
        }
    }

    /// The config value as a JSON object map (empty for non-object values).
    pub fn object_value(&self) -> HashMap<String, Value> {
        match &self.json_value {
            Value::Object(map) => map.clone().into_iter().collect(),
            _ => HashMap::new(),
        }
    }
}

/// A gate check result handed to the facade.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    pub name: String,
    pub value: bool,
    pub rule_id: String,
    pub id_type: String,
    pub details: EvaluationDetails,
}

/// A dynamic config / experiment result handed to the facade.
#[derive(Debug, Clone)]
pub struct DynamicConfig {
    pub name: String,
    pub value: HashMap<String, Value>,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub is_experiment_active: bool,
    pub is_user_in_experiment: bool,
    pub details: EvaluationDetails,
}

impl DynamicConfig {
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.value.get(parameter)
    }
}

/// A layer result handed to the facade. Parameter reads are the exposure point: `get` fires a
/// `statsig::layer_exposure` event (at most once per dedup window) through the sink installed by
/// the client.
#[derive(Clone)]
pub struct Layer {
    pub name: String,
    pub rule_id: String,
    pub group_name: Option<String>,
    pub allocated_experiment_name: Option<String>,
    pub details: EvaluationDetails,
    pub(crate) value: HashMap<String, Value>,
    pub(crate) explicit_parameters: Vec<String>,
    pub(crate) exposure_sink: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl Layer {
    /// Read a parameter, logging a layer exposure for it.
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        let value = self.value.get(parameter)?;
        if let Some(sink) = &self.exposure_sink {
            sink(parameter);
        }
        Some(value)
    }

    /// Read a parameter without logging an exposure.
    pub fn get_no_exposure(&self, parameter: &str) -> Option<&Value> {
        self.value.get(parameter)
    }

    /// Whether the parameter comes from the delegated experiment (as opposed to the layer
    /// defaults).
    pub fn is_explicit_parameter(&self, parameter: &str) -> bool {
        self.explicit_parameters.iter().any(|p| p == parameter)
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name)
            .field("rule_id", &self.rule_id)
            .field("group_name", &self.group_name)
            .field(
                "allocated_experiment_name",
                &self.allocated_experiment_name,
            )
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> EvaluationDetails {
        EvaluationDetails {
            source: SpecsSource::Network,
            reason: EvaluationReason::Recognized,
            config_sync_time: 1,
            init_time: 1,
            server_time: 2,
        }
    }

    #[test]
    fn detailed_reason_format() {
        assert_eq!(details().detailed_reason(), "Network:Recognized");
    }

    #[test]
    fn secondary_exposure_wire_names() {
        let exposure = SecondaryExposure {
            gate: "dependent".to_owned(),
            gate_value: "true".to_owned(),
            rule_id: "rule_1".to_owned(),
        };
        let json = serde_json::to_value(&exposure).unwrap();
        assert_eq!(json["gateValue"], "true");
        assert_eq!(json["ruleID"], "rule_1");
    }

    #[test]
    fn layer_get_fires_sink_only_for_present_parameters() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = count.clone();
        let layer = Layer {
            name: "a_layer".to_owned(),
            rule_id: "r".to_owned(),
            group_name: None,
            allocated_experiment_name: None,
            details: details(),
            value: [("param".to_owned(), serde_json::json!(1))].into(),
            explicit_parameters: vec!["param".to_owned()],
            exposure_sink: Some(Arc::new(move |_| {
                sink_count.fetch_add(1, Ordering::SeqCst);
            })),
        };

        assert!(layer.get("param").is_some());
        assert!(layer.get("missing").is_none());
        assert!(layer.get_no_exposure("param").is_some());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(layer.is_explicit_parameter("param"));
    }
}
