use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{PushError, PushResult};

/// Topic matching every notification
pub const TOPIC_ALL: &str = "*";

/// Suffix marking a prefix (wildcard) topic, e.g. `ox:mail:*`
pub const TOPIC_WILDCARD_SUFFIX: &str = ":*";

/// Cache key for enablement decisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnabledKey {
    pub topic: String,
    pub client: String,
    pub user_id: i32,
    pub context_id: i32,
}

impl EnabledKey {
    pub fn new(
        topic: impl Into<String>,
        client: impl Into<String>,
        user_id: i32,
        context_id: i32,
    ) -> Self {
        Self {
            topic: topic.into(),
            client: client.into(),
            user_id,
            context_id,
        }
    }
}

/// Device token or endpoint of a subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    /// Client-supplied meta data, kept as serialized JSON so the token stays hashable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
}

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: &Value) -> Self {
        self.meta = Some(meta.to_string());
        self
    }

    /// Parsed meta data, if any
    pub fn meta(&self) -> PushResult<Option<Value>> {
        self.meta
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| PushError::unsupported_message(format!("Invalid token meta data: {e}")))
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// A notification raised by an upstream event source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    pub topic: String,
    pub user_id: i32,
    pub context_id: i32,
    /// Arbitrary message data handed to the message generators
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Token of the client that caused the event; it is not notified itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub created_at: OffsetDateTime,
}

impl PushNotification {
    pub fn new(topic: impl Into<String>, user_id: i32, context_id: i32) -> Self {
        Self {
            topic: topic.into(),
            user_id,
            context_id,
            data: Map::new(),
            source_token: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_source_token(mut self, token: impl Into<String>) -> Self {
        self.source_token = Some(token.into());
        self
    }
}

/// A subscription selected to receive a notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PushMatch {
    pub user_id: i32,
    pub context_id: i32,
    pub client: String,
    /// The subscribed topic that matched, possibly a wildcard
    pub topic: String,
    pub transport_id: String,
    pub token: Token,
}

/// Outcome of a single delivery attempt.
///
/// Every attempt ends in exactly one of these; none of them schedules
/// another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted {
        /// Gateway-assigned identifier, if the gateway returns one
        id: Option<String>,
    },
    Rejected {
        reason: String,
        /// Point in time from which the gateway considers the token invalid
        token_invalidated_at: Option<OffsetDateTime>,
    },
    TransportError(String),
}

impl DeliveryOutcome {
    pub fn accepted(id: Option<String>) -> Self {
        Self::Accepted { id }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            token_invalidated_at: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Validates a topic name as accepted on registration.
///
/// Topics are colon-separated segments (`ox:mail:new`); a trailing `*`
/// segment makes a prefix topic and `*` alone matches everything.
pub fn validate_topic(topic: &str) -> PushResult<()> {
    if topic == TOPIC_ALL {
        return Ok(());
    }
    let name = topic.strip_suffix(TOPIC_WILDCARD_SUFFIX).unwrap_or(topic);
    if name.is_empty() {
        return Err(PushError::InvalidTopic(topic.to_string()));
    }
    let valid = name.split(':').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    });
    if valid {
        Ok(())
    } else {
        Err(PushError::InvalidTopic(topic.to_string()))
    }
}

/// Whether a subscribed topic covers a concrete notification topic
pub fn topic_matches(subscribed: &str, topic: &str) -> bool {
    if subscribed == TOPIC_ALL {
        return true;
    }
    match subscribed.strip_suffix('*') {
        Some(prefix) if subscribed.ends_with(TOPIC_WILDCARD_SUFFIX) => topic.starts_with(prefix),
        _ => subscribed == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_enabled_key_structural_equality() {
        let a = EnabledKey::new("ox:mail:new", "open-xchange-mobile-api-facade", 3, 1);
        let b = EnabledKey::new("ox:mail:new", "open-xchange-mobile-api-facade", 3, 1);
        let c = EnabledKey::new("ox:mail:new", "open-xchange-mobile-api-facade", 4, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("*").is_ok());
        assert!(validate_topic("ox:mail:new").is_ok());
        assert!(validate_topic("ox:calendar:*").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("ox::new").is_err());
        assert!(validate_topic("ox:mail new").is_err());
        assert!(validate_topic(":*").is_err());
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("*", "ox:mail:new"));
        assert!(topic_matches("ox:mail:*", "ox:mail:new"));
        assert!(topic_matches("ox:mail:new", "ox:mail:new"));
        assert!(!topic_matches("ox:mail:*", "ox:calendar:changed"));
        assert!(!topic_matches("ox:mail:new", "ox:mail:deleted"));
    }

    #[test]
    fn test_token_meta() {
        let token = Token::new("https://hooks.example.com/1")
            .with_meta(&serde_json::json!({"version": 1}));
        assert_eq!(token.meta().unwrap().unwrap()["version"], 1);
        assert!(Token::new("abc123").meta().unwrap().is_none());

        let broken = Token {
            value: "abc123".into(),
            meta: Some("{not json".into()),
        };
        assert!(broken.meta().is_err());
    }
}
