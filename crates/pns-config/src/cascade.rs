//! Three-level property lookup: user, then context, then server.

use std::collections::HashMap;

use pns_core::{ConfigView, PushResult};
use serde_json::Value;

use crate::settings::AppConfig;

type Properties = HashMap<String, Value>;

/// Property snapshot built from [`AppConfig`].
///
/// Nested tables are flattened into dotted names and names are compared
/// case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct PropertyCascade {
    server: Properties,
    contexts: HashMap<i32, Properties>,
    users: HashMap<(i32, i32), Properties>,
}

impl PropertyCascade {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut cascade = Self {
            server: flatten(&config.properties),
            ..Default::default()
        };
        for (context_key, overrides) in &config.contexts {
            let Ok(context_id) = context_key.parse::<i32>() else {
                continue;
            };
            cascade
                .contexts
                .insert(context_id, flatten(&overrides.properties));
            for (user_key, props) in &overrides.users {
                if let Ok(user_id) = user_key.parse::<i32>() {
                    cascade.users.insert((context_id, user_id), flatten(props));
                }
            }
        }
        cascade
    }

    /// Most specific value of `name` for the user
    pub fn lookup(&self, user_id: i32, context_id: i32, name: &str) -> Option<&Value> {
        let key = name.to_ascii_lowercase();
        self.users
            .get(&(context_id, user_id))
            .and_then(|props| props.get(&key))
            .or_else(|| self.contexts.get(&context_id).and_then(|p| p.get(&key)))
            .or_else(|| self.server.get(&key))
    }
}

impl ConfigView for PropertyCascade {
    fn property(&self, user_id: i32, context_id: i32, name: &str) -> PushResult<Option<Value>> {
        Ok(self.lookup(user_id, context_id, name).cloned())
    }
}

fn flatten(props: &Properties) -> Properties {
    let mut out = Properties::new();
    for (key, value) in props {
        flatten_into(&mut out, key, value);
    }
    out
}

fn flatten_into(out: &mut Properties, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(out, &format!("{prefix}.{key}"), nested);
            }
        }
        other => {
            out.insert(prefix.to_ascii_lowercase(), other.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ContextOverrides;
    use serde_json::json;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.properties
            .insert("pns.transport.apns.enabled".into(), json!(false));
        cfg.properties.insert(
            "pns".into(),
            json!({"webhooks": {"enabledIds": "crm,erp"}}),
        );
        cfg.contexts.insert(
            "1".into(),
            ContextOverrides {
                properties: HashMap::from([(
                    "pns.transport.apns.enabled".to_string(),
                    json!(true),
                )]),
                users: HashMap::from([(
                    "3".to_string(),
                    HashMap::from([("pns.transport.apns.enabled".to_string(), json!("false"))]),
                )]),
            },
        );
        cfg
    }

    #[test]
    fn test_precedence() {
        let cascade = PropertyCascade::from_config(&config());
        let name = "pns.transport.apns.enabled";

        assert_eq!(cascade.bool_property(3, 1, name).unwrap(), Some(false));
        assert_eq!(cascade.bool_property(4, 1, name).unwrap(), Some(true));
        assert_eq!(cascade.bool_property(3, 2, name).unwrap(), Some(false));
        assert_eq!(cascade.bool_property(3, 1, "pns.unknown").unwrap(), None);
    }

    #[test]
    fn test_nested_tables_are_flattened() {
        let cascade = PropertyCascade::from_config(&config());
        assert_eq!(
            cascade
                .string_property(3, 1, "pns.webhooks.enabledIds")
                .unwrap()
                .as_deref(),
            Some("crm,erp")
        );
    }
}
