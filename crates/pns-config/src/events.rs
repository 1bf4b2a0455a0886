//! Configuration change events

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Source of a configuration change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Configuration file on disk
    File,
    /// Reload requested by an operator command
    Api,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// Section of the settings a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigCategory {
    Logging,
    Pool,
    EnabledCache,
    Subscriptions,
    Apns,
    Fcm,
    Webhook,
    /// Server, context or user level properties
    Properties,
}

impl ConfigCategory {
    pub fn all() -> &'static [ConfigCategory] {
        &[
            Self::Logging,
            Self::Pool,
            Self::EnabledCache,
            Self::Subscriptions,
            Self::Apns,
            Self::Fcm,
            Self::Webhook,
            Self::Properties,
        ]
    }
}

impl std::fmt::Display for ConfigCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Logging => "logging",
            Self::Pool => "pool",
            Self::EnabledCache => "enabled_cache",
            Self::Subscriptions => "subscriptions",
            Self::Apns => "apns",
            Self::Fcm => "fcm",
            Self::Webhook => "webhook",
            Self::Properties => "properties",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOperation {
    /// A section changed value
    Update,
    /// The file changed on disk; sent before the new snapshot is applied
    Reload,
}

impl std::fmt::Display for ConfigOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Event representing a configuration change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    pub source: ConfigSource,
    pub category: ConfigCategory,
    pub operation: ConfigOperation,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ConfigChangeEvent {
    pub fn new(source: ConfigSource, category: ConfigCategory, operation: ConfigOperation) -> Self {
        Self {
            source,
            category,
            operation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Whether the change can affect enablement decisions
    pub fn affects_enablement(&self) -> bool {
        matches!(
            self.category,
            ConfigCategory::Properties
                | ConfigCategory::Apns
                | ConfigCategory::Fcm
                | ConfigCategory::Webhook
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ConfigChangeEvent::new(
            ConfigSource::File,
            ConfigCategory::EnabledCache,
            ConfigOperation::Update,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["source"], "file");
        assert_eq!(json["category"], "enabled_cache");
        assert_eq!(json["operation"], "update");
        assert!(!event.affects_enablement());
    }

    #[test]
    fn test_enablement_relevant_categories() {
        let relevant: Vec<_> = ConfigCategory::all()
            .iter()
            .filter(|c| {
                ConfigChangeEvent::new(ConfigSource::File, **c, ConfigOperation::Update)
                    .affects_enablement()
            })
            .map(ToString::to_string)
            .collect();
        assert_eq!(relevant, vec!["apns", "fcm", "webhook", "properties"]);
    }
}
