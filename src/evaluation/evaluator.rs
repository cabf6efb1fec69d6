//! The deterministic spec evaluator: walks specs and conditions, computing gate/config/layer
//! results including hashed bucket assignment, exposure provenance, and secondary-exposure
//! chains.
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::evaluation::comparisons::{as_string, try_eval_operator};
use crate::evaluation::evaluation_types::{
    Evaluation, EvaluationDetails, EvaluationReason, SecondaryExposure, SpecsSource,
};
use crate::hashing::sha256_prefix_u64;
use crate::overrides::OverrideAdapter;
use crate::spec_store::{SpecStore, SpecStoreData};
use crate::spec_types::{Condition, ConditionKind, Operator, Rule, Spec};
use crate::user::StatsigUser;

/// Nested pass_gate/fail_gate chains deeper than this are treated as unsupported; the wire
/// format has no legitimate use for them and a cycle would otherwise recurse forever.
const MAX_NESTED_GATE_DEPTH: usize = 50;

/// Sentinel for "this spec cannot be evaluated by this engine".
struct Unsupported;

type EvalResult<T> = std::result::Result<T, Unsupported>;

/// Evaluates gates, configs, experiments and layers against the current store snapshot.
///
/// Evaluation is CPU-bound and lock-free: one snapshot is taken per call and used throughout so
/// the response is internally consistent.
pub struct Evaluator {
    store: Arc<SpecStore>,
    overrides: Arc<OverrideAdapter>,
}

struct Context<'a> {
    user: &'a StatsigUser,
    data: &'a SpecStoreData,
    store: &'a SpecStore,
    now_ms: u64,
}

impl Evaluator {
    pub fn new(store: Arc<SpecStore>, overrides: Arc<OverrideAdapter>) -> Evaluator {
        Evaluator { store, overrides }
    }

    pub fn check_gate(&self, user: &StatsigUser, gate_name: &str) -> Evaluation {
        let data = self.store.get_current();

        if let Some(value) = self.overrides.get_gate_override(user, gate_name) {
            let mut evaluation =
                Evaluation::empty(override_details(&data, self.now_ms()));
            evaluation.bool_value = value;
            evaluation.json_value = Value::Bool(value);
            evaluation.rule_id = "override".to_owned();
            return evaluation;
        }

        // Segments and holdouts are building blocks for pass_gate/fail_gate conditions, not
        // valid gates in their own right.
        self.evaluate_entity(user, &data, gate_name, |data| {
            data.get_gate(gate_name)
                .filter(|spec| !spec.is_segment_or_holdout())
        })
    }

    pub fn get_config(&self, user: &StatsigUser, config_name: &str) -> Evaluation {
        let data = self.store.get_current();

        if let Some(value) = self
            .overrides
            .get_config_override(user, config_name)
            .or_else(|| self.overrides.get_experiment_override(user, config_name))
        {
            let mut evaluation =
                Evaluation::empty(override_details(&data, self.now_ms()));
            evaluation.json_value = value;
            evaluation.rule_id = "override".to_owned();
            return evaluation;
        }

        let mut evaluation =
            self.evaluate_entity(user, &data, config_name, |data| data.get_config(config_name));

        // Experiments surface activity state and, for shared params, the allocated layer's
        // defaults merged beneath the experiment value.
        if let Some(spec) = data.get_config(config_name) {
            if spec.is_experiment() {
                evaluation.is_experiment_active = spec.is_active.unwrap_or(false);
                if spec.has_shared_params == Some(true) {
                    if let Some(layer_spec) = data
                        .get_layer_name_for_experiment(config_name)
                        .and_then(|layer_name| data.get_layer(layer_name))
                    {
                        evaluation.json_value = merge_values(
                            &layer_spec.default_value,
                            &evaluation.json_value,
                        );
                    }
                }
            }
        }

        evaluation
    }

    pub fn get_layer(&self, user: &StatsigUser, layer_name: &str) -> Evaluation {
        let data = self.store.get_current();

        if let Some(value) = self.overrides.get_layer_override(user, layer_name) {
            let mut evaluation =
                Evaluation::empty(override_details(&data, self.now_ms()));
            evaluation.json_value = value;
            evaluation.rule_id = "override".to_owned();
            return evaluation;
        }

        let mut evaluation =
            self.evaluate_entity(user, &data, layer_name, |data| data.get_layer(layer_name));
        if evaluation.undelegated_secondary_exposures.is_none() {
            evaluation.undelegated_secondary_exposures =
                Some(evaluation.secondary_exposures.clone());
        }
        evaluation
    }

    fn evaluate_entity<'a>(
        &'a self,
        user: &'a StatsigUser,
        data: &'a Arc<SpecStoreData>,
        name: &str,
        get: impl Fn(&'a SpecStoreData) -> Option<&'a Arc<Spec>>,
    ) -> Evaluation {
        let now_ms = self.now_ms();

        if !data.is_populated() {
            return Evaluation::empty(EvaluationDetails {
                source: SpecsSource::Uninitialized,
                reason: EvaluationReason::Uninitialized,
                config_sync_time: data.lcut,
                init_time: data.initial_lcut,
                server_time: now_ms,
            });
        }

        let Some(spec) = get(data) else {
            return Evaluation::empty(details(data, EvaluationReason::Unrecognized, now_ms));
        };

        // Malformed rules are latched at ingest so they are cheap to reject here.
        if data.unsupported_specs.contains(name) {
            return unsupported_evaluation(spec, data, now_ms);
        }

        let context = Context {
            user,
            data,
            store: &self.store,
            now_ms,
        };

        match eval_spec(&context, spec, 0) {
            Ok(mut evaluation) => {
                evaluation.details = details(data, EvaluationReason::Recognized, now_ms);
                evaluation
            }
            Err(Unsupported) => unsupported_evaluation(spec, data, now_ms),
        }
    }

    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

fn details(data: &SpecStoreData, reason: EvaluationReason, now_ms: u64) -> EvaluationDetails {
    EvaluationDetails {
        source: data.source,
        reason,
        config_sync_time: data.lcut,
        init_time: data.initial_lcut,
        server_time: now_ms,
    }
}

fn override_details(data: &SpecStoreData, now_ms: u64) -> EvaluationDetails {
    EvaluationDetails {
        source: SpecsSource::LocalOverride,
        reason: EvaluationReason::LocalOverride,
        config_sync_time: data.lcut,
        init_time: data.initial_lcut,
        server_time: now_ms,
    }
}

fn unsupported_evaluation(
    spec: &Spec,
    data: &SpecStoreData,
    now_ms: u64,
) -> Evaluation {
    let mut evaluation =
        Evaluation::empty(details(data, EvaluationReason::Unsupported, now_ms));
    evaluation.json_value = spec.default_value.clone();
    evaluation.rule_id = "default".to_owned();
    evaluation.id_type = spec.id_type.clone();
    evaluation
}

fn eval_spec(context: &Context, spec: &Spec, depth: usize) -> EvalResult<Evaluation> {
    let base = |rule_id: &str, exposures: Vec<SecondaryExposure>| {
        let mut evaluation = Evaluation::empty(EvaluationDetails {
            source: context.data.source,
            reason: EvaluationReason::Recognized,
            config_sync_time: context.data.lcut,
            init_time: context.data.initial_lcut,
            server_time: context.now_ms,
        });
        evaluation.rule_id = rule_id.to_owned();
        evaluation.id_type = spec.id_type.clone();
        evaluation.explicit_parameters = spec.explicit_parameters.clone();
        evaluation.forward_all_exposures = spec.forward_all_exposures.unwrap_or(false);
        evaluation.version = spec.version;
        evaluation.secondary_exposures = exposures;
        evaluation
    };

    if !spec.enabled {
        let mut evaluation = base("disabled", Vec::new());
        evaluation.json_value = spec.default_value.clone();
        return Ok(evaluation);
    }

    let mut exposures: Vec<SecondaryExposure> = Vec::new();

    for rule in &spec.rules {
        let (matched, rule_exposures) = eval_rule(context, rule, depth)?;
        exposures.extend(rule_exposures);
        if !matched {
            continue;
        }

        // A matched layer rule may delegate its value to an experiment.
        if let Some(delegate_name) = &rule.config_delegate {
            if let Some(delegate_spec) = context.data.get_config(delegate_name) {
                let undelegated = exposures.clone();
                let mut delegated = eval_spec(context, delegate_spec, depth + 1)?;

                let mut combined = exposures;
                combined.extend(delegated.secondary_exposures);
                delegated.secondary_exposures = combined;
                delegated.undelegated_secondary_exposures = Some(undelegated);
                delegated.allocated_experiment_name = Some(delegate_name.clone());
                delegated.explicit_parameters = delegate_spec.explicit_parameters.clone();
                delegated.is_experiment_active = delegate_spec.is_active.unwrap_or(false);
                return Ok(delegated);
            }
        }

        if eval_pass_percentage(context.user, rule, &spec.salt) {
            let mut evaluation = base(&rule.id, exposures);
            evaluation.bool_value = rule.return_value.as_bool().unwrap_or(false);
            evaluation.json_value = merge_values(&spec.default_value, &rule.return_value);
            evaluation.group_name = rule.group_name.clone();
            evaluation.is_experiment_group = rule.is_experiment_group.unwrap_or(true);
            evaluation.sample_rate = rule.sampling_rate;
            return Ok(evaluation);
        } else {
            // The user matched the rule but lost the bucket roll: default value, still
            // attributed to the rule.
            let mut evaluation = base(&rule.id, exposures);
            evaluation.json_value = spec.default_value.clone();
            evaluation.group_name = rule.group_name.clone();
            evaluation.sample_rate = rule.sampling_rate;
            return Ok(evaluation);
        }
    }

    let mut evaluation = base("default", exposures);
    evaluation.json_value = spec.default_value.clone();
    Ok(evaluation)
}

/// All conditions of a rule must pass. Secondary exposures of every evaluated condition are
/// concatenated in order, including the condition that failed.
fn eval_rule(
    context: &Context,
    rule: &Rule,
    depth: usize,
) -> EvalResult<(bool, Vec<SecondaryExposure>)> {
    let mut exposures = Vec::new();
    for condition in &rule.conditions {
        let (passed, condition_exposures) = eval_condition(context, condition, depth)?;
        exposures.extend(condition_exposures);
        if !passed {
            return Ok((false, exposures));
        }
    }
    Ok((true, exposures))
}

fn eval_condition(
    context: &Context,
    condition: &Condition,
    depth: usize,
) -> EvalResult<(bool, Vec<SecondaryExposure>)> {
    match condition.kind {
        ConditionKind::Public => return Ok((true, Vec::new())),

        ConditionKind::PassGate | ConditionKind::FailGate => {
            let Some(target) = condition.target_value.as_str() else {
                return Err(Unsupported);
            };
            let (value, rule_id, mut exposures) = eval_nested_gate(context, target, depth)?;
            exposures.push(SecondaryExposure {
                gate: target.to_owned(),
                gate_value: value.to_string(),
                rule_id,
            });
            let passed = if condition.kind == ConditionKind::PassGate {
                value
            } else {
                !value
            };
            return Ok((passed, exposures));
        }

        ConditionKind::MultiPassGate | ConditionKind::MultiFailGate => {
            let Some(targets) = condition.target_value.as_array() else {
                return Err(Unsupported);
            };
            let want_pass = condition.kind == ConditionKind::MultiPassGate;
            let mut exposures = Vec::new();
            for target in targets {
                let Some(target) = target.as_str() else {
                    return Err(Unsupported);
                };
                let (value, rule_id, gate_exposures) =
                    eval_nested_gate(context, target, depth)?;
                exposures.extend(gate_exposures);
                exposures.push(SecondaryExposure {
                    gate: target.to_owned(),
                    gate_value: value.to_string(),
                    rule_id,
                });
                // Short-circuit on the first gate satisfying the condition.
                if value == want_pass {
                    return Ok((true, exposures));
                }
            }
            return Ok((false, exposures));
        }

        ConditionKind::UaBased | ConditionKind::Unknown => return Err(Unsupported),

        _ => {}
    }

    let value = extract_condition_value(context, condition);

    let Some(operator) = condition.operator else {
        return Err(Unsupported);
    };

    let passed = match operator {
        Operator::InSegmentList | Operator::NotInSegmentList => {
            let Some(list_name) = condition.target_value.as_str() else {
                return Err(Unsupported);
            };
            let member = value
                .as_ref()
                .and_then(as_string)
                .is_some_and(|id| context.store.id_list_contains(list_name, &id));
            if operator == Operator::InSegmentList {
                member
            } else {
                !member
            }
        }
        Operator::Unknown => return Err(Unsupported),
        _ => try_eval_operator(condition, operator, value.as_ref()).unwrap_or(false),
    };

    Ok((passed, Vec::new()))
}

fn extract_condition_value(context: &Context, condition: &Condition) -> Option<Value> {
    let field = condition.field.as_deref().unwrap_or("");
    match condition.kind {
        ConditionKind::UserField => context.user.get_user_value(field),
        // IP-to-country inference requires an external database; the country attribute, when
        // present, answers the same question.
        ConditionKind::IpBased => context
            .user
            .get_user_value(field)
            .or_else(|| context.user.get_user_value("country")),
        ConditionKind::EnvironmentField => context.user.get_environment_value(field),
        ConditionKind::CurrentTime => Some(json!(context.now_ms)),
        ConditionKind::UserBucket => {
            let salt = condition.user_bucket_salt.as_deref().unwrap_or("");
            let unit_id = context
                .user
                .get_unit_id(condition.id_type.as_deref().unwrap_or("userID"))
                .unwrap_or("");
            let bucket = sha256_prefix_u64(format!("{salt}.{unit_id}")) % 1000;
            Some(json!(bucket))
        }
        ConditionKind::UnitId => context
            .user
            .get_unit_id(condition.id_type.as_deref().unwrap_or("userID"))
            .map(|id| Value::String(id.to_owned())),
        _ => None,
    }
}

/// Recursively evaluate the gate a `pass_gate`/`fail_gate` condition points at.
fn eval_nested_gate(
    context: &Context,
    gate_name: &str,
    depth: usize,
) -> EvalResult<(bool, String, Vec<SecondaryExposure>)> {
    if depth >= MAX_NESTED_GATE_DEPTH {
        log::warn!(
            target: "statsig",
            "nested gate depth exceeded at {gate_name}; treating as unsupported"
        );
        return Err(Unsupported);
    }
    if context.data.unsupported_specs.contains(gate_name) {
        return Err(Unsupported);
    }
    let Some(spec) = context.data.get_gate(gate_name) else {
        return Ok((false, String::new(), Vec::new()));
    };
    let evaluation = eval_spec(context, spec, depth + 1)?;
    Ok((
        evaluation.bool_value,
        evaluation.rule_id,
        evaluation.secondary_exposures,
    ))
}

/// Pass-percentage bucketing: `SHA256_64(spec_salt.rule_salt.unit_id) mod 10000` against
/// `pass_percentage * 100`.
fn eval_pass_percentage(user: &StatsigUser, rule: &Rule, spec_salt: &str) -> bool {
    if rule.pass_percentage >= 100.0 {
        return true;
    }
    if rule.pass_percentage <= 0.0 {
        return false;
    }
    let rule_salt = rule.salt.as_deref().unwrap_or(&rule.id);
    let unit_id = user.get_unit_id(&rule.id_type).unwrap_or("");
    let hash = sha256_prefix_u64(format!("{spec_salt}.{rule_salt}.{unit_id}")) % 10_000;
    (hash as f64) < rule.pass_percentage * 100.0
}

/// Overlay `overlay` on `base` when both are objects; otherwise the overlay wins.
fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec_store::SpecStore;

    const TEST_RULESET: &str = r#"{
      "has_updates": true,
      "time": 1000,
      "feature_gates": [
        {
          "name": "always_on_gate",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_a", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "public_rule", "id": "rule_on", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{"type": "public", "targetValue": null}]
          }]
        },
        {
          "name": "on_for_statsig_email",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_b", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "email_rule", "id": "rule_email", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{
              "type": "user_field", "operator": "str_contains_any",
              "field": "email", "targetValue": ["@statsig.com"]
            }]
          }]
        },
        {
          "name": "dependent_gate",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_c", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "dep_rule", "id": "rule_dep", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{"type": "pass_gate", "targetValue": "always_on_gate"}]
          }]
        },
        {
          "name": "zero_percent_gate",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_d", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "zero_rule", "id": "rule_zero", "salt": "rs",
            "passPercentage": 0, "returnValue": true, "idType": "userID",
            "conditions": [{"type": "public", "targetValue": null}]
          }]
        },
        {
          "name": "disabled_gate",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": false, "salt": "salt_e", "defaultValue": false, "idType": "userID",
          "rules": []
        },
        {
          "name": "segment_gate",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_f", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "seg_rule", "id": "rule_seg", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{
              "type": "unit_id", "operator": "in_segment_list",
              "targetValue": "employee_list", "idType": "userID"
            }]
          }]
        },
        {
          "name": "segment:employees",
          "type": "feature_gate", "entity": "segment",
          "enabled": true, "salt": "salt_g", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "public_rule", "id": "segment_rule", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{"type": "public", "targetValue": null}]
          }]
        },
        {
          "name": "gate_behind_segment",
          "type": "feature_gate", "entity": "feature_gate",
          "enabled": true, "salt": "salt_h", "defaultValue": false, "idType": "userID",
          "rules": [{
            "name": "seg_dep_rule", "id": "rule_seg_dep", "salt": "rs",
            "passPercentage": 100, "returnValue": true, "idType": "userID",
            "conditions": [{"type": "pass_gate", "targetValue": "segment:employees"}]
          }]
        }
      ],
      "dynamic_configs": [
        {
          "name": "sample_experiment",
          "type": "dynamic_config", "entity": "experiment",
          "enabled": true, "salt": "salt_x", "defaultValue": {"experiment_param": "control"},
          "idType": "userID", "isActive": true, "hasSharedParams": true,
          "rules": [{
            "name": "test_group", "id": "exp_rule_test", "salt": "rs",
            "groupName": "Test", "passPercentage": 100,
            "returnValue": {"experiment_param": "test"}, "idType": "userID",
            "conditions": [{"type": "public", "targetValue": null}]
          }]
        },
        {
          "name": "delegated_experiment",
          "type": "dynamic_config", "entity": "experiment",
          "enabled": true, "salt": "salt_y",
          "defaultValue": {"experiment_param": "control"},
          "idType": "userID", "isActive": true,
          "explicitParameters": ["experiment_param"],
          "rules": [{
            "name": "exp_group", "id": "delegated_rule", "salt": "rs",
            "groupName": "Control", "passPercentage": 100,
            "returnValue": {"experiment_param": "delegated"},
            "idType": "userID",
            "conditions": [{"type": "public", "targetValue": null}]
          }]
        }
      ],
      "layer_configs": [
        {
          "name": "a_layer",
          "type": "dynamic_config", "entity": "layer",
          "enabled": true, "salt": "salt_l",
          "defaultValue": {"experiment_param": "layer_default", "layer_param": true},
          "idType": "userID",
          "rules": [{
            "name": "layer_rule", "id": "layer_delegating_rule", "salt": "rs",
            "passPercentage": 100, "returnValue": {},
            "idType": "userID", "configDelegate": "delegated_experiment",
            "conditions": [{"type": "pass_gate", "targetValue": "always_on_gate"}]
          }]
        }
      ],
      "layers": {"a_layer": ["sample_experiment", "delegated_experiment"]}
    }"#;

    fn evaluator() -> (Evaluator, Arc<SpecStore>) {
        let store = Arc::new(SpecStore::new("secret-key"));
        store
            .process_specs(TEST_RULESET, SpecsSource::Network)
            .unwrap();
        (
            Evaluator::new(store.clone(), Arc::new(OverrideAdapter::new())),
            store,
        )
    }

    fn user() -> StatsigUser {
        let mut user = StatsigUser::with_user_id("123");
        user.email = Some("testuser@statsig.com".to_owned());
        user
    }

    #[test]
    fn segment_entities_are_not_valid_gates() {
        let (evaluator, _) = evaluator();

        let result = evaluator.check_gate(&user(), "segment:employees");
        assert!(!result.bool_value);
        assert_eq!(result.details.reason, EvaluationReason::Unrecognized);

        // Still reachable as a pass_gate dependency.
        let result = evaluator.check_gate(&user(), "gate_behind_segment");
        assert!(result.bool_value);
        assert_eq!(result.secondary_exposures.len(), 1);
        assert_eq!(result.secondary_exposures[0].gate, "segment:employees");
    }

    #[test]
    fn public_rule_passes_for_everyone() {
        let (evaluator, _) = evaluator();
        let result = evaluator.check_gate(&user(), "always_on_gate");
        assert!(result.bool_value);
        assert_eq!(result.rule_id, "rule_on");
        assert_eq!(result.details.reason, EvaluationReason::Recognized);
        assert_eq!(result.details.source, SpecsSource::Network);
        assert_eq!(result.details.config_sync_time, 1000);
    }

    #[test]
    fn email_condition_matches_and_falls_through() {
        let (evaluator, _) = evaluator();

        let result = evaluator.check_gate(&user(), "on_for_statsig_email");
        assert!(result.bool_value);
        assert_eq!(result.rule_id, "rule_email");

        let result = evaluator.check_gate(&StatsigUser::with_user_id("random"), "on_for_statsig_email");
        assert!(!result.bool_value);
        assert_eq!(result.rule_id, "default");
    }

    #[test]
    fn nested_gate_produces_secondary_exposure() {
        let (evaluator, _) = evaluator();
        let result = evaluator.check_gate(&user(), "dependent_gate");
        assert!(result.bool_value);
        assert_eq!(
            result.secondary_exposures,
            vec![SecondaryExposure {
                gate: "always_on_gate".to_owned(),
                gate_value: "true".to_owned(),
                rule_id: "rule_on".to_owned(),
            }]
        );
    }

    #[test]
    fn zero_pass_percentage_matches_but_fails_bucket() {
        let (evaluator, _) = evaluator();
        let result = evaluator.check_gate(&user(), "zero_percent_gate");
        assert!(!result.bool_value);
        // Attribution stays with the matched rule.
        assert_eq!(result.rule_id, "rule_zero");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let (evaluator, _) = evaluator();
        let first = evaluator.check_gate(&user(), "always_on_gate");
        for _ in 0..10 {
            let again = evaluator.check_gate(&user(), "always_on_gate");
            assert_eq!(first.bool_value, again.bool_value);
            assert_eq!(first.rule_id, again.rule_id);
        }
    }

    #[test]
    fn disabled_gate_returns_default() {
        let (evaluator, _) = evaluator();
        let result = evaluator.check_gate(&user(), "disabled_gate");
        assert!(!result.bool_value);
        assert_eq!(result.rule_id, "disabled");
    }

    #[test]
    fn unknown_gate_is_unrecognized() {
        let (evaluator, _) = evaluator();
        let result = evaluator.check_gate(&user(), "no_such_gate");
        assert!(!result.bool_value);
        assert_eq!(result.details.reason, EvaluationReason::Unrecognized);
    }

    #[test]
    fn uninitialized_store_reports_provenance() {
        let store = Arc::new(SpecStore::new("secret-key"));
        let evaluator = Evaluator::new(store, Arc::new(OverrideAdapter::new()));
        let result = evaluator.check_gate(&user(), "always_on_gate");
        assert!(!result.bool_value);
        assert_eq!(result.details.reason, EvaluationReason::Uninitialized);
        assert_eq!(result.details.source, SpecsSource::Uninitialized);
    }

    #[test]
    fn experiment_merges_shared_layer_defaults() {
        let (evaluator, _) = evaluator();
        let result = evaluator.get_config(&user(), "sample_experiment");
        assert_eq!(result.rule_id, "exp_rule_test");
        assert_eq!(result.group_name.as_deref(), Some("Test"));
        assert!(result.is_experiment_group);
        assert!(result.is_experiment_active);

        let value = result.object_value();
        // Experiment value wins; layer defaults fill the rest.
        assert_eq!(value["experiment_param"], json!("test"));
        assert_eq!(value["layer_param"], json!(true));
    }

    #[test]
    fn layer_delegation_attaches_experiment() {
        let (evaluator, _) = evaluator();
        let result = evaluator.get_layer(&user(), "a_layer");

        assert_eq!(
            result.allocated_experiment_name.as_deref(),
            Some("delegated_experiment")
        );
        assert_eq!(result.rule_id, "delegated_rule");
        assert_eq!(result.group_name.as_deref(), Some("Control"));
        assert!(result.is_experiment_active);
        assert_eq!(
            result.explicit_parameters.as_deref(),
            Some(&["experiment_param".to_owned()][..])
        );
        assert_eq!(
            result.object_value()["experiment_param"],
            json!("delegated")
        );

        // The undelegated chain stops at the layer's own pass_gate exposure; the full chain is
        // identical here because the delegated experiment has no gate conditions.
        let undelegated = result.undelegated_secondary_exposures.as_ref().unwrap();
        assert_eq!(undelegated.len(), 1);
        assert_eq!(undelegated[0].gate, "always_on_gate");
        assert_eq!(result.secondary_exposures.len(), 1);
    }

    #[test]
    fn segment_list_membership() {
        let (evaluator, store) = evaluator();

        let result = evaluator.check_gate(&user(), "segment_gate");
        assert!(!result.bool_value);

        store.with_id_lists_mut(|lists| {
            lists.insert(
                "employee_list".to_owned(),
                crate::id_lists::IdList {
                    name: "employee_list".to_owned(),
                    ids: ["123".to_owned()].into(),
                    read_bytes: 4,
                    url: None,
                    file_id: None,
                    creation_time: 0,
                },
            );
        });

        let result = evaluator.check_gate(&user(), "segment_gate");
        assert!(result.bool_value);
        assert_eq!(result.rule_id, "rule_seg");
    }

    #[test]
    fn override_wins_over_rules() {
        let store = Arc::new(SpecStore::new("secret-key"));
        store
            .process_specs(TEST_RULESET, SpecsSource::Network)
            .unwrap();
        let overrides = Arc::new(OverrideAdapter::new());
        let evaluator = Evaluator::new(store, overrides.clone());

        overrides.override_gate("always_on_gate", false, Some("123"));
        let result = evaluator.check_gate(&user(), "always_on_gate");
        assert!(!result.bool_value);
        assert_eq!(result.rule_id, "override");
        assert_eq!(result.details.reason, EvaluationReason::LocalOverride);

        // Other users are unaffected.
        let result = evaluator.check_gate(&StatsigUser::with_user_id("456"), "always_on_gate");
        assert!(result.bool_value);
    }

    #[test]
    fn unsupported_spec_returns_default_with_reason() {
        let store = Arc::new(SpecStore::new("secret-key"));
        let json = r#"{
          "has_updates": true, "time": 1,
          "feature_gates": [
            {"name": "future_gate", "type": "feature_gate", "entity": "feature_gate",
             "enabled": true, "salt": "s", "defaultValue": false, "idType": "userID",
             "rules": [{
               "name": "r", "id": "r", "passPercentage": 100, "returnValue": true,
               "idType": "userID",
               "conditions": [{"type": "user_field", "operator": "brand_new_op",
                               "field": "email", "targetValue": "x"}]
             }]}
          ]
        }"#;
        store.process_specs(json, SpecsSource::Network).unwrap();
        let evaluator = Evaluator::new(store, Arc::new(OverrideAdapter::new()));

        let result = evaluator.check_gate(&user(), "future_gate");
        assert!(!result.bool_value);
        assert_eq!(result.details.reason, EvaluationReason::Unsupported);
    }

    #[test]
    fn pass_percentage_partitions_users() {
        // With a 50% rule, some users pass and some fail, and each user is stable.
        let (evaluator, store) = evaluator();
        let json = r#"{
          "has_updates": true, "time": 2000,
          "feature_gates": [
            {"name": "half_gate", "type": "feature_gate", "entity": "feature_gate",
             "enabled": true, "salt": "half_salt", "defaultValue": false, "idType": "userID",
             "rules": [{
               "name": "half", "id": "rule_half", "salt": "half_rule_salt",
               "passPercentage": 50, "returnValue": true, "idType": "userID",
               "conditions": [{"type": "public", "targetValue": null}]
             }]}
          ]
        }"#;
        store.process_specs(json, SpecsSource::Network).unwrap();

        let mut passed = 0;
        for i in 0..200 {
            let user = StatsigUser::with_user_id(format!("user-{i}"));
            let first = evaluator.check_gate(&user, "half_gate");
            let second = evaluator.check_gate(&user, "half_gate");
            assert_eq!(first.bool_value, second.bool_value);
            if first.bool_value {
                passed += 1;
            }
        }
        assert!(passed > 50 && passed < 150, "expected ~100, got {passed}");
    }
}
