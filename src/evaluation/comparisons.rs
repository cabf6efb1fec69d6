//! Value coercions and the condition operator table.
//!
//! Operators return `None` when they cannot be applied (type mismatch, unparsable number, …),
//! which the caller treats as a non-match. This mirrors how the server evaluates the same
//! ruleset: a misconfigured comparison fails closed.
use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;

use crate::spec_types::{Condition, Operator};

/// Coerce a JSON value to its string form. Null coerces to `None`.
pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce to epoch milliseconds. Bare numbers with fewer than 11 digits are treated as epoch
/// seconds; longer ones as milliseconds. Strings may be a bare number or RFC 3339.
pub(crate) fn as_epoch_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().map(seconds_or_millis),
        Value::String(s) => {
            if let Ok(n) = s.trim().parse::<i64>() {
                return Some(seconds_or_millis(n));
            }
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}

fn seconds_or_millis(n: i64) -> i64 {
    if n.abs() >= 10_000_000_000 {
        n
    } else {
        n * 1000
    }
}

/// Compare two dotted version strings component-wise as integers. A `-suffix` is stripped first
/// and missing components are treated as 0. This is deliberately not semver: two-component
/// versions like "1.2" are valid on the wire.
pub(crate) fn compare_versions(left: &str, right: &str) -> Option<Ordering> {
    let parse = |s: &str| -> Option<Vec<u64>> {
        let s = s.split('-').next().unwrap_or(s);
        s.split('.').map(|part| part.trim().parse().ok()).collect()
    };
    let left = parse(left)?;
    let right = parse(right)?;

    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or(0);
        let r = right.get(i).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(Ordering::Equal)
}

/// Apply `operator` to the extracted user `value` against the condition's target.
///
/// Segment-list operators are resolved by the evaluator (they need the ID-list store) and never
/// reach this function.
pub(crate) fn try_eval_operator(
    condition: &Condition,
    operator: Operator,
    value: Option<&Value>,
) -> Option<bool> {
    match operator {
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let left = as_f64(value?)?;
            let right = as_f64(&condition.target_value)?;
            Some(match operator {
                Operator::Gt => left > right,
                Operator::Gte => left >= right,
                Operator::Lt => left < right,
                Operator::Lte => left <= right,
                _ => unreachable!(),
            })
        }

        Operator::VersionGt
        | Operator::VersionGte
        | Operator::VersionLt
        | Operator::VersionLte
        | Operator::VersionEq
        | Operator::VersionNeq => {
            let left = as_string(value?)?;
            let right = as_string(&condition.target_value)?;
            let ordering = compare_versions(&left, &right)?;
            Some(match operator {
                Operator::VersionGt => ordering == Ordering::Greater,
                Operator::VersionGte => ordering != Ordering::Less,
                Operator::VersionLt => ordering == Ordering::Less,
                Operator::VersionLte => ordering != Ordering::Greater,
                Operator::VersionEq => ordering == Ordering::Equal,
                Operator::VersionNeq => ordering != Ordering::Equal,
                _ => unreachable!(),
            })
        }

        Operator::Any | Operator::None => {
            let needle = as_string(value?)?.to_lowercase();
            let contains = match &condition.fast_target_value {
                Some(fast) => fast.contains(&needle),
                None => target_strings(condition).any(|t| t.to_lowercase() == needle),
            };
            Some(if operator == Operator::Any {
                contains
            } else {
                !contains
            })
        }

        Operator::AnyCaseSensitive | Operator::NoneCaseSensitive => {
            let needle = as_string(value?)?;
            let contains = match &condition.fast_target_value {
                Some(fast) => fast.contains(&needle),
                None => target_strings(condition).any(|t| t == needle),
            };
            Some(if operator == Operator::AnyCaseSensitive {
                contains
            } else {
                !contains
            })
        }

        Operator::StrStartsWithAny | Operator::StrEndsWithAny => {
            let needle = as_string(value?)?.to_lowercase();
            let test = |t: &str| {
                if operator == Operator::StrStartsWithAny {
                    needle.starts_with(t)
                } else {
                    needle.ends_with(t)
                }
            };
            // The compiled set is already lowercased at ingest.
            let matched = match &condition.fast_target_value {
                Some(fast) => fast.iter().any(|t| test(t)),
                None => target_strings_lowered(condition).any(|t| test(&t)),
            };
            Some(matched)
        }

        Operator::StrContainsAny | Operator::StrContainsNone => {
            let needle = as_string(value?)?.to_lowercase();
            let matched = match &condition.fast_target_value {
                Some(fast) => fast.iter().any(|t| needle.contains(t.as_str())),
                None => target_strings_lowered(condition).any(|t| needle.contains(&t)),
            };
            Some(if operator == Operator::StrContainsAny {
                matched
            } else {
                !matched
            })
        }

        Operator::StrMatches => {
            let needle = as_string(value?)?;
            let matched = match &condition.compiled_regex {
                Some(regex) => regex.is_match(&needle),
                None => {
                    let pattern = condition.target_value.as_str()?;
                    Regex::new(pattern).ok()?.is_match(&needle)
                }
            };
            Some(matched)
        }

        Operator::Eq => Some(json_eq(value, &condition.target_value)),
        Operator::Neq => Some(!json_eq(value, &condition.target_value)),

        Operator::Before | Operator::After | Operator::On => {
            let left = as_epoch_ms(value?)?;
            let right = as_epoch_ms(&condition.target_value)?;
            Some(match operator {
                Operator::Before => left < right,
                Operator::After => left > right,
                // Date-only comparison.
                Operator::On => left / 86_400_000 == right / 86_400_000,
                _ => unreachable!(),
            })
        }

        Operator::ArrayContainsAny
        | Operator::ArrayContainsNone
        | Operator::ArrayContainsAll
        | Operator::NotArrayContainsAll => {
            let Some(Value::Array(items)) = value else {
                return None;
            };
            let haystack: Vec<String> = items.iter().filter_map(as_string).collect();
            let mut targets = target_strings(condition).peekable();
            targets.peek()?;
            let result = match operator {
                Operator::ArrayContainsAny => targets.any(|t| haystack.contains(&t)),
                Operator::ArrayContainsNone => !targets.any(|t| haystack.contains(&t)),
                Operator::ArrayContainsAll => targets.all(|t| haystack.contains(&t)),
                Operator::NotArrayContainsAll => !targets.all(|t| haystack.contains(&t)),
                _ => unreachable!(),
            };
            Some(result)
        }

        // Resolved by the evaluator against the ID-list store.
        Operator::InSegmentList | Operator::NotInSegmentList => None,

        Operator::Unknown => None,
    }
}

fn json_eq(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None | Some(Value::Null) => target.is_null(),
        Some(v) => v == target,
    }
}

fn target_strings(condition: &Condition) -> impl Iterator<Item = String> + '_ {
    let items: Box<dyn Iterator<Item = &Value>> = match &condition.target_value {
        Value::Array(values) => Box::new(values.iter()),
        other => Box::new(std::iter::once(other)),
    };
    items.filter_map(as_string)
}

fn target_strings_lowered(condition: &Condition) -> impl Iterator<Item = String> + '_ {
    target_strings(condition).map(|s| s.to_lowercase())
}
