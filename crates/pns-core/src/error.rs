use thiserror::Error;

/// Result type for push notification operations
pub type PushResult<T> = std::result::Result<T, PushError>;

/// Coarse classification of a [`PushError`].
///
/// Callers branch on the kind rather than on individual variants, e.g. the
/// enablement gate fails closed on [`PushErrorKind::Configuration`] but
/// surfaces everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushErrorKind {
    Configuration,
    NoSuchGenerator,
    UnsupportedMessage,
    MessageTooBig,
    MessageGeneration,
    InvalidTopic,
    Io,
    Storage,
    MaxSubscriptionsExceeded,
    ServiceUnavailable,
    Unexpected,
}

/// Errors raised by the push notification core
#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("Configuration unavailable: {0}")]
    Configuration(String),

    #[error("No message generator for client {client} and transport {transport}")]
    NoSuchGenerator { client: String, transport: String },

    #[error("Unsupported message: {0}")]
    UnsupportedMessage(String),

    #[error("Message too big: max. {max} bytes allowed, but was {actual} bytes")]
    MessageTooBig { max: usize, actual: usize },

    #[error("Message generation failed: {0}")]
    MessageGeneration(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Too many subscriptions for transport {transport} and client {client}")]
    MaxSubscriptionsExceeded { transport: String, client: String },

    #[error("Required service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PushError {
    pub fn kind(&self) -> PushErrorKind {
        match self {
            Self::Configuration(_) => PushErrorKind::Configuration,
            Self::NoSuchGenerator { .. } => PushErrorKind::NoSuchGenerator,
            Self::UnsupportedMessage(_) => PushErrorKind::UnsupportedMessage,
            Self::MessageTooBig { .. } => PushErrorKind::MessageTooBig,
            Self::MessageGeneration(_) => PushErrorKind::MessageGeneration,
            Self::InvalidTopic(_) => PushErrorKind::InvalidTopic,
            Self::Io(_) => PushErrorKind::Io,
            Self::Storage(_) => PushErrorKind::Storage,
            Self::MaxSubscriptionsExceeded { .. } => PushErrorKind::MaxSubscriptionsExceeded,
            Self::ServiceUnavailable(_) => PushErrorKind::ServiceUnavailable,
            Self::Unexpected(_) => PushErrorKind::Unexpected,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn no_such_generator(client: impl Into<String>, transport: impl Into<String>) -> Self {
        Self::NoSuchGenerator {
            client: client.into(),
            transport: transport.into(),
        }
    }

    pub fn unsupported_message(msg: impl Into<String>) -> Self {
        Self::UnsupportedMessage(msg.into())
    }

    pub fn message_generation(msg: impl Into<String>) -> Self {
        Self::MessageGeneration(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}

impl From<serde_json::Error> for PushError {
    fn from(e: serde_json::Error) -> Self {
        Self::MessageGeneration(e.to_string())
    }
}
