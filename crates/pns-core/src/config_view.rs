//! Hierarchical configuration lookup as seen by transports.

use serde_json::Value;

use crate::error::{PushError, PushResult};

/// Per-user view on the configuration.
///
/// Implementations resolve user, context and server level values; callers
/// only ever ask for a fully qualified property name.
pub trait ConfigView: Send + Sync {
    /// Raw property value visible to the user, `None` if undefined
    fn property(&self, user_id: i32, context_id: i32, name: &str) -> PushResult<Option<Value>>;

    /// Boolean property; accepts JSON booleans and `"true"`/`"false"` strings
    fn bool_property(&self, user_id: i32, context_id: i32, name: &str) -> PushResult<Option<bool>> {
        match self.property(user_id, context_id, name)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(PushError::configuration(format!(
                    "Property {name} is not a boolean: {s}"
                ))),
            },
            Some(other) => Err(PushError::configuration(format!(
                "Property {name} is not a boolean: {other}"
            ))),
        }
    }

    /// String property; numbers and booleans are rendered as strings
    fn string_property(
        &self,
        user_id: i32,
        context_id: i32,
        name: &str,
    ) -> PushResult<Option<String>> {
        Ok(match self.property(user_id, context_id, name)? {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }
}

/// Property names consulted for an enablement decision, most specific first:
/// `base.client.topic`, `base.client`, `base`.
pub fn enabled_property_candidates(base: &str, client: &str, topic: &str) -> Vec<String> {
    let mut names = Vec::with_capacity(3);
    if !client.is_empty() {
        if !topic.is_empty() {
            names.push(format!("{base}.{client}.{topic}"));
        }
        names.push(format!("{base}.{client}"));
    }
    names.push(base.to_string());
    names
}
