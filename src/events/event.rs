//! Event shapes shipped to `/v1/log_event`, and the constructors that build exposure events
//! from evaluation results.
use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::evaluation::evaluation_types::{Evaluation, SecondaryExposure};
use crate::user::StatsigUser;

pub const GATE_EXPOSURE_EVENT: &str = "statsig::gate_exposure";
pub const CONFIG_EXPOSURE_EVENT: &str = "statsig::config_exposure";
pub const LAYER_EXPOSURE_EVENT: &str = "statsig::layer_exposure";
pub const DIAGNOSTICS_EVENT: &str = "statsig::diagnostics";

/// One event in a `/v1/log_event` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsigEventInternal {
    pub event_name: String,
    /// The user serialized without `privateAttributes`.
    pub user: Value,
    /// Event time (epoch ms).
    pub time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_exposures: Option<Vec<SecondaryExposure>>,
}

fn scrubbed_user(user: &StatsigUser) -> Value {
    // `privateAttributes` carries `#[serde(skip_serializing)]`, so serialization is the scrub.
    serde_json::to_value(user).unwrap_or(Value::Null)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

fn exposure_metadata(evaluation: &Evaluation) -> HashMap<String, String> {
    HashMap::from([
        ("ruleID".to_owned(), evaluation.rule_id.clone()),
        ("reason".to_owned(), evaluation.details.detailed_reason()),
        (
            "configSyncTime".to_owned(),
            evaluation.details.config_sync_time.to_string(),
        ),
        (
            "initTime".to_owned(),
            evaluation.details.init_time.to_string(),
        ),
        (
            "serverTime".to_owned(),
            evaluation.details.server_time.to_string(),
        ),
    ])
}

impl StatsigEventInternal {
    pub fn gate_exposure(
        user: &StatsigUser,
        gate_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) -> StatsigEventInternal {
        let mut metadata = exposure_metadata(evaluation);
        metadata.insert("gate".to_owned(), gate_name.to_owned());
        metadata.insert("gateValue".to_owned(), evaluation.bool_value.to_string());
        if is_manual {
            metadata.insert("isManualExposure".to_owned(), "true".to_owned());
        }
        StatsigEventInternal {
            event_name: GATE_EXPOSURE_EVENT.to_owned(),
            user: scrubbed_user(user),
            time: now_ms(),
            value: None,
            metadata: Some(metadata),
            secondary_exposures: Some(evaluation.secondary_exposures.clone()),
        }
    }

    pub fn config_exposure(
        user: &StatsigUser,
        config_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) -> StatsigEventInternal {
        let mut metadata = exposure_metadata(evaluation);
        metadata.insert("config".to_owned(), config_name.to_owned());
        metadata.insert(
            "rulePassed".to_owned(),
            evaluation.is_experiment_group.to_string(),
        );
        if is_manual {
            metadata.insert("isManualExposure".to_owned(), "true".to_owned());
        }
        StatsigEventInternal {
            event_name: CONFIG_EXPOSURE_EVENT.to_owned(),
            user: scrubbed_user(user),
            time: now_ms(),
            value: None,
            metadata: Some(metadata),
            secondary_exposures: Some(evaluation.secondary_exposures.clone()),
        }
    }

    /// Layer exposures are per-parameter. Reads of an explicit (delegated) parameter carry the
    /// full exposure chain; reads of a layer default carry only the undelegated chain.
    pub fn layer_exposure(
        user: &StatsigUser,
        layer_name: &str,
        parameter_name: &str,
        evaluation: &Evaluation,
        is_manual: bool,
    ) -> StatsigEventInternal {
        let is_explicit = evaluation
            .explicit_parameters
            .as_ref()
            .is_some_and(|params| params.iter().any(|p| p == parameter_name));

        let exposures = if is_explicit {
            evaluation.secondary_exposures.clone()
        } else {
            evaluation
                .undelegated_secondary_exposures
                .clone()
                .unwrap_or_default()
        };

        let mut metadata = exposure_metadata(evaluation);
        metadata.insert("config".to_owned(), layer_name.to_owned());
        metadata.insert("parameterName".to_owned(), parameter_name.to_owned());
        metadata.insert("isExplicitParameter".to_owned(), is_explicit.to_string());
        metadata.insert(
            "allocatedExperiment".to_owned(),
            if is_explicit {
                evaluation
                    .allocated_experiment_name
                    .clone()
                    .unwrap_or_default()
            } else {
                String::new()
            },
        );
        if is_manual {
            metadata.insert("isManualExposure".to_owned(), "true".to_owned());
        }
        StatsigEventInternal {
            event_name: LAYER_EXPOSURE_EVENT.to_owned(),
            user: scrubbed_user(user),
            time: now_ms(),
            value: None,
            metadata: Some(metadata),
            secondary_exposures: Some(exposures),
        }
    }

    pub fn custom(
        user: &StatsigUser,
        event_name: &str,
        value: Option<Value>,
        metadata: Option<HashMap<String, String>>,
    ) -> StatsigEventInternal {
        StatsigEventInternal {
            event_name: event_name.to_owned(),
            user: scrubbed_user(user),
            time: now_ms(),
            value,
            metadata,
            secondary_exposures: None,
        }
    }

    /// One synthetic diagnostics event for one context (`initialize`, `config_sync`, `api_call`).
    pub fn diagnostics(context: &str, markers: Value) -> StatsigEventInternal {
        StatsigEventInternal {
            event_name: DIAGNOSTICS_EVENT.to_owned(),
            user: Value::Null,
            time: now_ms(),
            value: None,
            metadata: Some(HashMap::from([
                ("context".to_owned(), context.to_owned()),
                ("markers".to_owned(), markers.to_string()),
            ])),
            secondary_exposures: None,
        }
    }
}

/// The dedup key for an exposure: one key is logged at most once per dedup window.
pub fn exposure_dedupe_key(
    kind: &str,
    entity_name: &str,
    rule_id: &str,
    value: &str,
    user: &StatsigUser,
) -> String {
    format!(
        "{kind}:{entity_name}:{rule_id}:{value}:{}",
        user.identity_digest()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::evaluation_types::{
        EvaluationDetails, EvaluationReason, SpecsSource,
    };
    use serde_json::json;

    fn evaluation() -> Evaluation {
        let mut evaluation = Evaluation::empty(EvaluationDetails {
            source: SpecsSource::Network,
            reason: EvaluationReason::Recognized,
            config_sync_time: 100,
            init_time: 50,
            server_time: 200,
        });
        evaluation.bool_value = true;
        evaluation.rule_id = "rule_1".to_owned();
        evaluation.secondary_exposures = vec![SecondaryExposure {
            gate: "dep".to_owned(),
            gate_value: "true".to_owned(),
            rule_id: "dep_rule".to_owned(),
        }];
        evaluation
    }

    fn user() -> StatsigUser {
        let mut user = StatsigUser::with_user_id("123");
        user.private_attributes
            .insert("ssn".to_owned(), json!("000-00-0000"));
        user
    }

    #[test]
    fn gate_exposure_metadata() {
        let event = StatsigEventInternal::gate_exposure(&user(), "my_gate", &evaluation(), false);
        assert_eq!(event.event_name, GATE_EXPOSURE_EVENT);

        let metadata = event.metadata.unwrap();
        assert_eq!(metadata["gate"], "my_gate");
        assert_eq!(metadata["gateValue"], "true");
        assert_eq!(metadata["ruleID"], "rule_1");
        assert_eq!(metadata["reason"], "Network:Recognized");
        assert!(!metadata.contains_key("isManualExposure"));
        assert_eq!(event.secondary_exposures.unwrap().len(), 1);
    }

    #[test]
    fn manual_exposure_is_flagged() {
        let event = StatsigEventInternal::gate_exposure(&user(), "my_gate", &evaluation(), true);
        assert_eq!(event.metadata.unwrap()["isManualExposure"], "true");
    }

    #[test]
    fn private_attributes_never_serialize() {
        let event = StatsigEventInternal::gate_exposure(&user(), "my_gate", &evaluation(), false);
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(!serialized.contains("ssn"));
        assert!(!serialized.contains("privateAttributes"));
        assert!(serialized.contains(r#""userID":"123""#));
    }

    #[test]
    fn layer_exposure_explicit_parameter_carries_delegated_chain() {
        let mut evaluation = evaluation();
        evaluation.explicit_parameters = Some(vec!["exp_param".to_owned()]);
        evaluation.allocated_experiment_name = Some("the_experiment".to_owned());
        evaluation.undelegated_secondary_exposures = Some(Vec::new());

        let event = StatsigEventInternal::layer_exposure(
            &user(),
            "a_layer",
            "exp_param",
            &evaluation,
            false,
        );
        let metadata = event.metadata.unwrap();
        assert_eq!(metadata["isExplicitParameter"], "true");
        assert_eq!(metadata["allocatedExperiment"], "the_experiment");
        assert_eq!(metadata["parameterName"], "exp_param");
        assert_eq!(event.secondary_exposures.unwrap().len(), 1);

        let event = StatsigEventInternal::layer_exposure(
            &user(),
            "a_layer",
            "layer_param",
            &evaluation,
            false,
        );
        let metadata = event.metadata.unwrap();
        assert_eq!(metadata["isExplicitParameter"], "false");
        assert_eq!(metadata["allocatedExperiment"], "");
        assert!(event.secondary_exposures.unwrap().is_empty());
    }

    #[test]
    fn dedupe_key_distinguishes_value_and_user() {
        let user_a = StatsigUser::with_user_id("a");
        let user_b = StatsigUser::with_user_id("b");
        let key = |value: &str, user: &StatsigUser| {
            exposure_dedupe_key("gate", "my_gate", "rule_1", value, user)
        };
        assert_eq!(key("true", &user_a), key("true", &user_a));
        assert_ne!(key("true", &user_a), key("false", &user_a));
        assert_ne!(key("true", &user_a), key("true", &user_b));
    }
}
