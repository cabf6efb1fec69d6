use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A user to evaluate gates, configs and layers against.
///
/// Typed attributes are looked up through an explicit field mapping (see
/// [`StatsigUser::get_user_value`]); `custom` and `private_attributes` are consulted afterwards.
/// `private_attributes` participate in evaluation but are never serialized to the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsigUser {
    #[serde(rename = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "customIDs", skip_serializing_if = "HashMap::is_empty")]
    pub custom_ids: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, Value>,
    // Participates in evaluation but must never leave the process.
    #[serde(skip_serializing)]
    pub private_attributes: HashMap<String, Value>,
    #[serde(
        rename = "statsigEnvironment",
        skip_serializing_if = "Option::is_none"
    )]
    pub statsig_environment: Option<HashMap<String, String>>,
}

impl StatsigUser {
    /// Create a user identified by `user_id`.
    pub fn with_user_id(user_id: impl Into<String>) -> StatsigUser {
        StatsigUser {
            user_id: Some(user_id.into()),
            ..StatsigUser::default()
        }
    }

    /// Create a user identified by custom IDs only (e.g., `{"stableID": "..."}`).
    pub fn with_custom_ids(custom_ids: HashMap<String, String>) -> StatsigUser {
        StatsigUser {
            custom_ids,
            ..StatsigUser::default()
        }
    }

    /// The identifier dimension feeding bucketing for a spec with the given `id_type`.
    ///
    /// `"userID"` (any casing) resolves to the user ID; anything else is looked up in
    /// `custom_ids`, first by the exact key and then case-insensitively.
    pub fn get_unit_id(&self, id_type: &str) -> Option<&str> {
        if id_type.eq_ignore_ascii_case("userid") {
            return self.user_id.as_deref();
        }
        if let Some(id) = self.custom_ids.get(id_type) {
            return Some(id);
        }
        self.custom_ids
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(id_type))
            .map(|(_, v)| v.as_str())
    }

    /// Look up a `user_field` condition value: typed attribute first, then `custom`, then
    /// `private_attributes`. Both the exact field name and its lowercased form are tried.
    pub fn get_user_value(&self, field: &str) -> Option<Value> {
        if let Some(value) = self.get_typed_field(field) {
            return Some(Value::String(value.to_owned()));
        }
        lookup_map(&self.custom, field).or_else(|| lookup_map(&self.private_attributes, field))
    }

    fn get_typed_field(&self, field: &str) -> Option<&str> {
        let value = match field.to_lowercase().as_str() {
            "userid" | "user_id" => &self.user_id,
            "email" => &self.email,
            "ip" => &self.ip,
            "useragent" | "user_agent" => &self.user_agent,
            "country" => &self.country,
            "locale" => &self.locale,
            "appversion" | "app_version" => &self.app_version,
            _ => return None,
        };
        value.as_deref()
    }

    /// Value of a `statsigEnvironment` field (e.g., "tier").
    pub fn get_environment_value(&self, field: &str) -> Option<Value> {
        let environment = self.statsig_environment.as_ref()?;
        environment
            .get(field)
            .or_else(|| {
                environment
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field))
                    .map(|(_, v)| v)
            })
            .map(|v| Value::String(v.clone()))
    }

    /// Whether the user carries any usable identifier at all.
    pub fn has_identifier(&self) -> bool {
        self.user_id.as_deref().is_some_and(|id| !id.is_empty()) || !self.custom_ids.is_empty()
    }

    /// A stable digest of the user's identity, used in exposure-dedup keys.
    pub(crate) fn identity_digest(&self) -> String {
        let mut digest = self.user_id.clone().unwrap_or_default();
        if !self.custom_ids.is_empty() {
            let mut ids: Vec<_> = self
                .custom_ids
                .iter()
                .map(|(k, v)| format!("{k}:{v}"))
                .collect();
            ids.sort();
            digest.push(';');
            digest.push_str(&ids.join(";"));
        }
        digest
    }
}

fn lookup_map(map: &HashMap<String, Value>, field: &str) -> Option<Value> {
    if let Some(value) = map.get(field) {
        return Some(value.clone());
    }
    let lowered = field.to_lowercase();
    map.get(&lowered)
        .or_else(|| {
            map.iter()
                .find(|(k, _)| k.to_lowercase() == lowered)
                .map(|(_, v)| v)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_id_resolution() {
        let mut user = StatsigUser::with_user_id("123");
        user.custom_ids
            .insert("companyID".to_owned(), "acme".to_owned());

        assert_eq!(user.get_unit_id("userID"), Some("123"));
        assert_eq!(user.get_unit_id("userid"), Some("123"));
        assert_eq!(user.get_unit_id("companyID"), Some("acme"));
        assert_eq!(user.get_unit_id("companyid"), Some("acme"));
        assert_eq!(user.get_unit_id("stableID"), None);
    }

    #[test]
    fn user_field_lookup_order() {
        let mut user = StatsigUser::with_user_id("123");
        user.email = Some("typed@example.com".to_owned());
        user.custom
            .insert("plan".to_owned(), json!("pro"));
        user.private_attributes
            .insert("secret".to_owned(), json!(42));

        assert_eq!(
            user.get_user_value("email"),
            Some(json!("typed@example.com"))
        );
        assert_eq!(user.get_user_value("plan"), Some(json!("pro")));
        assert_eq!(user.get_user_value("Plan"), Some(json!("pro")));
        assert_eq!(user.get_user_value("secret"), Some(json!(42)));
        assert_eq!(user.get_user_value("missing"), None);
    }

    #[test]
    fn private_attributes_are_not_serialized() {
        let mut user = StatsigUser::with_user_id("123");
        user.private_attributes
            .insert("ssn".to_owned(), json!("000-00-0000"));

        let serialized = serde_json::to_string(&user).unwrap();
        assert!(!serialized.contains("ssn"));
        assert!(serialized.contains("userID"));
    }

    #[test]
    fn identity_digest_is_order_independent() {
        let mut a = StatsigUser::with_user_id("u");
        a.custom_ids.insert("k1".to_owned(), "v1".to_owned());
        a.custom_ids.insert("k2".to_owned(), "v2".to_owned());

        let mut b = StatsigUser::with_user_id("u");
        b.custom_ids.insert("k2".to_owned(), "v2".to_owned());
        b.custom_ids.insert("k1".to_owned(), "v1".to_owned());

        assert_eq!(a.identity_digest(), b.identity_digest());
    }
}
