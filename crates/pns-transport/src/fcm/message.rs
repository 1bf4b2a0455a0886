//! Request bodies for the FCM legacy HTTP API.

use pns_core::{Message, PushError, PushResult};
use serde_json::{Map, Value};
use tracing::warn;

/// Max. size of a message body without its registration ids
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// Max. registration ids per request
pub const MULTICAST_LIMIT: usize = 1000;

const NOTIFICATION_FIELDS: [&str; 6] = ["body", "click_action", "color", "sound", "tag", "title"];

/// Build the body shared by every chunk of a multicast.
///
/// `registration_ids` is left out; the delivery task adds its chunk.
pub fn build_message(message: &Message) -> PushResult<Map<String, Value>> {
    let mut body = match message {
        Message::Map(map) => map_message(map)?,
        Message::Json(Value::Object(object)) => object.clone(),
        Message::Json(other) => {
            return Err(PushError::unsupported_message(format!(
                "FCM message must be a JSON object, got: {other}"
            )));
        }
        Message::Text(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(PushError::message_generation(
                    "Raw FCM message is not a JSON object",
                ));
            }
            Err(e) => {
                return Err(PushError::message_generation(format!(
                    "Raw FCM message is not JSON: {e}"
                )));
            }
        },
    };
    body.remove("registration_ids");

    let length = serde_json::to_string(&body)?.len();
    if length > MAX_PAYLOAD_SIZE {
        return Err(PushError::MessageTooBig {
            max: MAX_PAYLOAD_SIZE,
            actual: length,
        });
    }
    Ok(body)
}

fn map_message(message: &Map<String, Value>) -> PushResult<Map<String, Value>> {
    let mut source = message.clone();
    let mut body = Map::new();

    if let Some(collapse_key) = take_string(&mut source, "collapse_key") {
        body.insert("collapse_key".into(), Value::String(collapse_key));
    }
    for flag in ["content_available", "delay_while_idle"] {
        if let Some(value) = source.remove(flag) {
            match as_bool(&value) {
                Some(b) => {
                    body.insert(flag.into(), Value::Bool(b));
                }
                None => warn!(key = flag, %value, "Ignoring non-boolean flag"),
            }
        }
    }

    let icon = take_string(&mut source, "icon")
        .filter(|icon| !icon.trim().is_empty())
        .ok_or_else(|| PushError::message_generation("Missing \"icon\" element."))?;
    let mut notification = Map::new();
    notification.insert("icon".into(), Value::String(icon));
    if let Some(badge) = source.remove("badge") {
        match badge.as_i64() {
            Some(n) => {
                notification.insert("badge".into(), Value::String(n.to_string()));
            }
            None => warn!(value = %badge, "Ignoring non-numeric badge"),
        }
    }
    for field in NOTIFICATION_FIELDS {
        if let Some(value) = take_string(&mut source, field) {
            notification.insert(field.into(), Value::String(value));
        }
    }
    body.insert("notification".into(), Value::Object(notification));

    if let Some(priority) = take_string(&mut source, "priority") {
        let priority = priority.to_ascii_lowercase();
        if priority == "high" || priority == "normal" {
            body.insert("priority".into(), Value::String(priority));
        } else {
            warn!(%priority, "Ignoring unknown priority");
        }
    }
    if let Some(package) = take_string(&mut source, "restricted_package_name") {
        body.insert("restricted_package_name".into(), Value::String(package));
    }
    if let Some(ttl) = source.remove("time_to_live") {
        match ttl.as_u64() {
            Some(secs) => {
                body.insert("time_to_live".into(), Value::from(secs));
            }
            None => warn!(value = %ttl, "Ignoring invalid time to live"),
        }
    }

    // data values are strings on the wire
    let data: Map<String, Value> = source
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| match value {
            Value::String(_) => (key, value),
            other => (key, Value::String(other.to_string())),
        })
        .collect();
    if !data.is_empty() {
        body.insert("data".into(), Value::Object(data));
    }
    Ok(body)
}

fn take_string(source: &mut Map<String, Value>, key: &str) -> Option<String> {
    match source.remove(key)? {
        Value::String(s) => Some(s),
        other => {
            warn!(key, value = %other, "Ignoring non-string value");
            None
        }
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pns_core::PushErrorKind;
    use serde_json::json;

    fn map(value: Value) -> Message {
        match value {
            Value::Object(map) => Message::Map(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_map_message_fields() {
        let message = map(json!({
            "icon": "ic_mail",
            "title": "New mail",
            "body": "Hi there",
            "badge": 3,
            "collapse_key": "mail",
            "content_available": "true",
            "priority": "HIGH",
            "time_to_live": 600,
            "topic": "ox:mail:new",
            "unread": 7,
        }));

        let body = build_message(&message).unwrap();
        assert_eq!(
            Value::Object(body),
            json!({
                "collapse_key": "mail",
                "content_available": true,
                "priority": "high",
                "time_to_live": 600,
                "notification": {
                    "icon": "ic_mail",
                    "title": "New mail",
                    "body": "Hi there",
                    "badge": "3",
                },
                "data": {"topic": "ox:mail:new", "unread": "7"},
            })
        );
    }

    #[test]
    fn test_missing_icon_fails() {
        let err = build_message(&map(json!({"title": "New mail"}))).unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::MessageGeneration);

        let err = build_message(&map(json!({"icon": "  "}))).unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::MessageGeneration);
    }

    #[test]
    fn test_raw_messages_pass_through() {
        let json = Message::Json(json!({"data": {"k": "v"}, "registration_ids": ["x"]}));
        assert_eq!(Value::Object(build_message(&json).unwrap()), json!({"data": {"k": "v"}}));

        let text = Message::Text(r#"{"priority":"normal"}"#.into());
        assert_eq!(build_message(&text).unwrap()["priority"], "normal");

        let err = build_message(&Message::Text("[1]".into())).unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::MessageGeneration);
        let err = build_message(&Message::Json(json!("plain"))).unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::UnsupportedMessage);
    }

    #[test]
    fn test_oversized_message_is_rejected() {
        let message = map(json!({"icon": "ic", "blob": "x".repeat(MAX_PAYLOAD_SIZE)}));
        let err = build_message(&message).unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::MessageTooBig);
    }
}
