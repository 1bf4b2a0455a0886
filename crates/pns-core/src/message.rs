//! Message generation: turning a notification into transport input.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{PushError, PushResult};
use crate::registry::ServiceRegistry;
use crate::types::{PushMatch, PushNotification};

/// Client id of the fallback generator
pub const GENERIC_CLIENT: &str = "generic";

/// Transport-agnostic message produced by a generator
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Flat key/value message; transports map well-known keys
    Map(Map<String, Value>),
    /// Structured JSON message passed through as-is
    Json(Value),
    /// Pre-rendered payload text
    Text(String),
}

impl Message {
    /// JSON text of the message
    pub fn to_text(&self) -> String {
        match self {
            Self::Map(map) => Value::Object(map.clone()).to_string(),
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Generates messages for a specific client
pub trait PushMessageGenerator: Send + Sync {
    /// The client this generator serves
    fn client(&self) -> &str;

    fn generate(&self, transport_id: &str, notification: &PushNotification) -> PushResult<Message>;
}

/// Message generator that copies the notification data and adds the topic
#[derive(Debug, Default)]
pub struct GenericMessageGenerator;

impl PushMessageGenerator for GenericMessageGenerator {
    fn client(&self) -> &str {
        GENERIC_CLIENT
    }

    fn generate(&self, _transport_id: &str, notification: &PushNotification) -> PushResult<Message> {
        let mut map = notification.data.clone();
        map.entry("topic")
            .or_insert_with(|| Value::String(notification.topic.clone()));
        Ok(Message::Map(map))
    }
}

/// Generators keyed by client id
pub struct MessageGeneratorRegistry {
    generators: ServiceRegistry<dyn PushMessageGenerator>,
}

impl MessageGeneratorRegistry {
    pub fn new() -> Self {
        Self {
            generators: ServiceRegistry::new(),
        }
    }

    /// Registry holding only the generic generator
    pub fn with_generic() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(GenericMessageGenerator));
        registry
    }

    pub fn register(&self, generator: Arc<dyn PushMessageGenerator>) {
        let client = generator.client().to_string();
        self.generators.register(client, generator);
    }

    pub fn unregister(&self, client: &str) {
        self.generators.unregister(client);
    }

    /// Generator for the client, falling back to the generic one
    pub fn generator(&self, client: &str) -> Option<Arc<dyn PushMessageGenerator>> {
        self.generators
            .get(client)
            .or_else(|| self.generators.get(GENERIC_CLIENT))
    }

    /// Generator for the match or [`PushError::NoSuchGenerator`]
    pub fn generator_for(
        &self,
        push_match: &PushMatch,
    ) -> PushResult<Arc<dyn PushMessageGenerator>> {
        self.generator(&push_match.client).ok_or_else(|| {
            PushError::no_such_generator(&push_match.client, &push_match.transport_id)
        })
    }

    pub fn serves(&self, client: &str) -> bool {
        self.generator(client).is_some()
    }
}

impl Default for MessageGeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
