//! Platform specific APNs payloads.

use pns_core::{Message, PushError, PushNotification, PushResult};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tracing::warn;

/// Max. payload size accepted by the gateway for regular pushes
pub const MAX_PAYLOAD_SIZE: usize = 4096;

const FILE_PROVIDER_TOPIC_SUFFIX: &str = ".pushkit.fileprovider";
const FILE_PROVIDER_ROOT_CONTAINER: &str = "NSFileProviderRootContainerItemIdentifier";
const DRIVE_TOPIC_PREFIX: &str = "ox:drive:";

/// Target platform of an APNs client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformKind {
    Ios,
    /// File provider extension, only woken up for drive changes
    IosFileProvider,
    MacOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    FileProvider,
}

impl PushType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::FileProvider => "fileprovider",
        }
    }

    /// Background style pushes must not use immediate priority
    pub fn priority(&self) -> u8 {
        match self {
            Self::Alert => 10,
            Self::Background | Self::FileProvider => 5,
        }
    }
}

/// A single request to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsPayload {
    pub device_token: String,
    /// Value of the `apns-topic` header
    pub topic: String,
    pub push_type: PushType,
    pub priority: u8,
    pub expiration: Option<OffsetDateTime>,
    pub collapse_id: Option<String>,
    /// JSON body
    pub body: String,
}

impl ApnsPayload {
    fn new(device_token: &str, topic: String, push_type: PushType, body: String) -> Self {
        Self {
            device_token: device_token.to_string(),
            topic,
            push_type,
            priority: push_type.priority(),
            expiration: None,
            collapse_id: None,
            body,
        }
    }
}

/// Build the payload for a platform.
///
/// `Ok(None)` means the platform has nothing to send for this message.
pub fn build_payload(
    platform: PlatformKind,
    message: &Message,
    notification: &PushNotification,
    device_token: &str,
    topic: &str,
) -> PushResult<Option<ApnsPayload>> {
    let payload = match (platform, message) {
        (PlatformKind::IosFileProvider, message) => {
            file_provider_payload(message, notification, device_token, topic)?
        }
        // macOS clients do not register for silent pushes
        (PlatformKind::MacOs, Message::Json(_)) => None,
        (PlatformKind::Ios | PlatformKind::MacOs, Message::Map(map)) => {
            Some(alert_payload(map, device_token, topic)?)
        }
        (PlatformKind::Ios, Message::Json(json)) => {
            Some(background_payload(json, device_token, topic)?)
        }
        (PlatformKind::Ios | PlatformKind::MacOs, Message::Text(text)) => {
            serde_json::from_str::<Value>(text).map_err(|e| {
                PushError::message_generation(format!("Raw APNs payload is not JSON: {e}"))
            })?;
            Some(ApnsPayload::new(
                device_token,
                topic.to_string(),
                PushType::Alert,
                text.clone(),
            ))
        }
    };

    match payload {
        Some(p) if p.body.len() > MAX_PAYLOAD_SIZE => Err(PushError::MessageTooBig {
            max: MAX_PAYLOAD_SIZE,
            actual: p.body.len(),
        }),
        other => Ok(other),
    }
}

fn alert_payload(
    message: &Map<String, Value>,
    device_token: &str,
    topic: &str,
) -> PushResult<ApnsPayload> {
    let mut source = message.clone();
    let mut aps = Map::new();
    let mut body = Map::new();

    if let Some(sound) = take_string(&mut source, "sound") {
        aps.insert("sound".into(), Value::String(sound));
    }
    if let Some(badge) = source.remove("badge") {
        match badge.as_i64() {
            Some(n) => {
                aps.insert("badge".into(), Value::from(n));
            }
            None => warn!(value = %badge, "Ignoring non-numeric badge"),
        }
    }
    if let Some(alert) = take_string(&mut source, "alert") {
        aps.insert("alert".into(), json!({ "body": alert }));
    }
    if let Some(category) = take_string(&mut source, "category") {
        aps.insert("category".into(), Value::String(category));
    }
    let collapse_id = take_string(&mut source, "collapse-id");
    let expiration = source
        .remove("expiration")
        .and_then(|v| v.as_i64())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok());

    for (key, value) in source {
        match value {
            Value::String(_) | Value::Number(_) => {
                body.insert(key, value);
            }
            other => warn!(key, value = %other, "Ignoring unsupported custom field value"),
        }
    }
    body.insert("aps".into(), Value::Object(aps));

    let mut payload = ApnsPayload::new(
        device_token,
        topic.to_string(),
        PushType::Alert,
        serde_json::to_string(&body)?,
    );
    payload.collapse_id = collapse_id;
    payload.expiration = expiration;
    Ok(payload)
}

fn background_payload(message: &Value, device_token: &str, topic: &str) -> PushResult<ApnsPayload> {
    let mut body = Map::new();
    let args = message.get("args").and_then(Value::as_array);
    for arg in args.into_iter().flatten() {
        if let Some(fields) = arg.as_object() {
            for (key, value) in fields {
                body.insert(key.clone(), value.clone());
            }
        }
    }
    body.insert("aps".into(), json!({ "content-available": 1 }));

    Ok(ApnsPayload::new(
        device_token,
        topic.to_string(),
        PushType::Background,
        serde_json::to_string(&body)?,
    ))
}

fn file_provider_payload(
    message: &Message,
    notification: &PushNotification,
    device_token: &str,
    topic: &str,
) -> PushResult<Option<ApnsPayload>> {
    if !notification.topic.starts_with(DRIVE_TOPIC_PREFIX) {
        return Ok(None);
    }
    let container = match message {
        Message::Map(map) => map.get("container-identifier").and_then(Value::as_str),
        Message::Json(json) => json.get("container-identifier").and_then(Value::as_str),
        Message::Text(_) => None,
    }
    .unwrap_or(FILE_PROVIDER_ROOT_CONTAINER);

    let body = json!({ "container-identifier": container });
    Ok(Some(ApnsPayload::new(
        device_token,
        format!("{topic}{FILE_PROVIDER_TOPIC_SUFFIX}"),
        PushType::FileProvider,
        serde_json::to_string(&body)?,
    )))
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

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "abc123";
    const BUNDLE: &str = "com.example.mail";

    fn body(payload: &ApnsPayload) -> Value {
        serde_json::from_str(&payload.body).unwrap()
    }

    fn mail() -> PushNotification {
        PushNotification::new("ox:mail:new", 3, 1)
    }

    #[test]
    fn test_map_message_becomes_alert() {
        let message = Message::Map(
            json!({
                "alert": "New mail from Jane",
                "sound": "default",
                "badge": 4,
                "category": "new-mail",
                "folder": "INBOX",
                "uid": 1234,
                "flags": ["seen"],
                "collapse-id": "inbox"
            })
            .as_object()
            .cloned()
            .unwrap(),
        );

        let payload = build_payload(PlatformKind::Ios, &message, &mail(), TOKEN, BUNDLE)
            .unwrap()
            .unwrap();
        assert_eq!(payload.push_type, PushType::Alert);
        assert_eq!(payload.priority, 10);
        assert_eq!(payload.topic, BUNDLE);
        assert_eq!(payload.collapse_id.as_deref(), Some("inbox"));

        let body = body(&payload);
        assert_eq!(body["aps"]["alert"]["body"], "New mail from Jane");
        assert_eq!(body["aps"]["sound"], "default");
        assert_eq!(body["aps"]["badge"], 4);
        assert_eq!(body["aps"]["category"], "new-mail");
        assert_eq!(body["folder"], "INBOX");
        assert_eq!(body["uid"], 1234);
        assert!(body.get("flags").is_none());
        assert!(body.get("collapse-id").is_none());
    }

    #[test]
    fn test_json_args_become_background_push() {
        let message = Message::Json(json!({
            "args": [{"folder": "INBOX"}, {"unread": 7}]
        }));

        let payload = build_payload(PlatformKind::Ios, &message, &mail(), TOKEN, BUNDLE)
            .unwrap()
            .unwrap();
        assert_eq!(payload.push_type, PushType::Background);
        assert_eq!(payload.priority, 5);
        let body = body(&payload);
        assert_eq!(body["aps"]["content-available"], 1);
        assert_eq!(body["folder"], "INBOX");
        assert_eq!(body["unread"], 7);

        assert!(
            build_payload(PlatformKind::MacOs, &message, &mail(), TOKEN, BUNDLE)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_text_message_is_sent_raw() {
        let raw = r#"{"aps":{"alert":"hi"}}"#;
        let payload = build_payload(
            PlatformKind::MacOs,
            &Message::Text(raw.into()),
            &mail(),
            TOKEN,
            BUNDLE,
        )
        .unwrap()
        .unwrap();
        assert_eq!(payload.body, raw);

        let err = build_payload(
            PlatformKind::Ios,
            &Message::Text("not json".into()),
            &mail(),
            TOKEN,
            BUNDLE,
        )
        .unwrap_err();
        assert!(matches!(err, PushError::MessageGeneration(_)));
    }

    #[test]
    fn test_file_provider_only_for_drive_topics() {
        let message = Message::Map(Map::new());
        assert!(
            build_payload(PlatformKind::IosFileProvider, &message, &mail(), TOKEN, BUNDLE)
                .unwrap()
                .is_none()
        );

        let drive = PushNotification::new("ox:drive:update", 3, 1);
        let payload = build_payload(PlatformKind::IosFileProvider, &message, &drive, TOKEN, BUNDLE)
            .unwrap()
            .unwrap();
        assert_eq!(payload.push_type, PushType::FileProvider);
        assert_eq!(payload.topic, "com.example.mail.pushkit.fileprovider");
        assert_eq!(
            body(&payload)["container-identifier"],
            FILE_PROVIDER_ROOT_CONTAINER
        );
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let message = Message::Map(
            json!({ "alert": "x".repeat(MAX_PAYLOAD_SIZE) })
                .as_object()
                .cloned()
                .unwrap(),
        );
        let err = build_payload(PlatformKind::Ios, &message, &mail(), TOKEN, BUNDLE).unwrap_err();
        assert!(matches!(err, PushError::MessageTooBig { max: MAX_PAYLOAD_SIZE, .. }));
    }
}
