//! Application settings as read from `pns.toml`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub enabled_cache: EnabledCacheConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub apns: ApnsSettings,
    #[serde(default)]
    pub fcm: FcmSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    /// Server level properties of the config cascade
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// Context and user level overrides, keyed by context id
    #[serde(default)]
    pub contexts: HashMap<String, ContextOverrides>,
}

impl AppConfig {
    /// Parse and validate settings from a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(content)
            .map_err(|e| ConfigError::parse(format!("TOML parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        if self.pool.max_concurrent_tasks == 0 {
            return Err(ConfigError::validation(
                "pool.max_concurrent_tasks must be > 0",
            ));
        }
        if self.enabled_cache.max_entries == 0 || self.enabled_cache.ttl_secs == 0 {
            return Err(ConfigError::validation(
                "enabled_cache.max_entries and enabled_cache.ttl_secs must be > 0",
            ));
        }
        for client in &self.apns.clients {
            if client.client.is_empty() || client.topic.is_empty() {
                return Err(ConfigError::validation(
                    "apns.clients entries require client and topic",
                ));
            }
            if client.auth.is_none() && client.bearer_token.is_none() {
                return Err(ConfigError::validation(format!(
                    "apns client {} requires either auth or bearer_token",
                    client.client
                )));
            }
        }
        for client in &self.fcm.clients {
            if client.client.is_empty() || client.api_key.is_empty() {
                return Err(ConfigError::validation(
                    "fcm.clients entries require client and api_key",
                ));
            }
        }
        for (id, webhook) in &self.webhook.webhooks {
            if webhook.uri.is_empty() {
                return Err(ConfigError::validation(format!(
                    "webhook.webhooks.{id}.uri must not be empty"
                )));
            }
        }
        for (context_id, overrides) in &self.contexts {
            context_id.parse::<i32>().map_err(|_| {
                ConfigError::validation(format!("contexts key {context_id} is not a context id"))
            })?;
            for user_id in overrides.users.keys() {
                user_id.parse::<i32>().map_err(|_| {
                    ConfigError::validation(format!(
                        "contexts.{context_id}.users key {user_id} is not a user id"
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound of delivery tasks running at the same time
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

fn default_max_concurrent_tasks() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnabledCacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_entries() -> u64 {
    65_536
}
fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

impl Default for EnabledCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// Max. subscriptions per user, transport and client (0 = unlimited)
    #[serde(default)]
    pub max_per_client: usize,
    #[serde(default)]
    pub allow_shared_token: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnsSettings {
    /// Base name of the enablement properties
    #[serde(default = "default_apns_enabled_property")]
    pub enabled_property: String,
    /// Rejection reasons marking a device token as permanently dead
    #[serde(default = "default_dead_token_reasons")]
    pub dead_token_reasons: Vec<String>,
    /// Retries for connections that never reached the gateway
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default)]
    pub clients: Vec<ApnsClientSettings>,
}

fn default_apns_enabled_property() -> String {
    "pns.transport.apns.enabled".into()
}
fn default_dead_token_reasons() -> Vec<String> {
    vec!["BadDeviceToken".into(), "Unregistered".into()]
}
fn default_connect_retries() -> u32 {
    2
}

impl Default for ApnsSettings {
    fn default() -> Self {
        Self {
            enabled_property: default_apns_enabled_property(),
            dead_token_reasons: default_dead_token_reasons(),
            connect_retries: default_connect_retries(),
            clients: Vec::new(),
        }
    }
}

/// Target platform of an APNs client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApnsPlatform {
    Ios,
    IosFileProvider,
    Macos,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApnsEnvironment {
    #[default]
    Production,
    Sandbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnsClientSettings {
    /// Client identifier used by subscriptions
    pub client: String,
    pub platform: ApnsPlatform,
    /// The app's bundle id, sent as `apns-topic`
    pub topic: String,
    #[serde(default)]
    pub environment: ApnsEnvironment,
    /// Overrides the gateway derived from `environment`
    #[serde(default)]
    pub gateway_url: Option<String>,
    /// Provider token authentication
    #[serde(default)]
    pub auth: Option<ApnsAuthSettings>,
    /// Static bearer token, mostly for test gateways
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_apns_timeout_ms")]
    pub timeout_ms: u64,
    /// Speak HTTP/2 without upgrade negotiation, as the gateway requires
    #[serde(default = "default_true")]
    pub http2_only: bool,
}

fn default_apns_timeout_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApnsAuthSettings {
    pub key_id: String,
    pub team_id: String,
    /// Path of the `.p8` signing key
    pub private_key_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcmSettings {
    #[serde(default = "default_fcm_enabled_property")]
    pub enabled_property: String,
    /// Result errors after which a registration id is removed for every user
    #[serde(default = "default_fcm_dead_token_reasons")]
    pub dead_token_reasons: Vec<String>,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(default)]
    pub clients: Vec<FcmClientSettings>,
}

fn default_fcm_enabled_property() -> String {
    "pns.transport.fcm.enabled".into()
}
fn default_fcm_dead_token_reasons() -> Vec<String> {
    [
        "NotRegistered",
        "InvalidRegistration",
        "MissingRegistration",
        "MismatchSenderId",
        "InvalidPackageName",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for FcmSettings {
    fn default() -> Self {
        Self {
            enabled_property: default_fcm_enabled_property(),
            dead_token_reasons: default_fcm_dead_token_reasons(),
            connect_retries: default_connect_retries(),
            clients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FcmClientSettings {
    pub client: String,
    /// Server key sent as `Authorization: key=...`
    pub api_key: String,
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default = "default_apns_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_webhook_enabled_property")]
    pub enabled_property: String,
    /// Property listing the webhook ids a user may call
    #[serde(default = "default_webhook_enabled_ids_property")]
    pub enabled_ids_property: String,
    /// Property requiring HTTPS end-points
    #[serde(default = "default_webhook_https_only_property")]
    pub https_only_property: String,
    /// Status codes answering that the webhook subscription is gone
    #[serde(default = "default_remove_status_codes")]
    pub remove_status_codes: Vec<u16>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    /// Configured webhooks keyed by webhook id
    #[serde(default)]
    pub webhooks: HashMap<String, WebhookDefinition>,
}

fn default_webhook_enabled_property() -> String {
    "pns.transport.webhooks.enabled".into()
}
fn default_webhook_enabled_ids_property() -> String {
    "pns.webhooks.enabledIds".into()
}
fn default_webhook_https_only_property() -> String {
    "pns.transport.webhooks.httpsOnly".into()
}
fn default_remove_status_codes() -> Vec<u16> {
    vec![403, 404, 405]
}
fn default_webhook_timeout_ms() -> u64 {
    10_000
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled_property: default_webhook_enabled_property(),
            enabled_ids_property: default_webhook_enabled_ids_property(),
            https_only_property: default_webhook_https_only_property(),
            remove_status_codes: default_remove_status_codes(),
            timeout_ms: default_webhook_timeout_ms(),
            connect_retries: default_connect_retries(),
            webhooks: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDefinition {
    /// Default end-point; a subscription's token may name another one
    pub uri: String,
    #[serde(default)]
    pub signature_secret: Option<String>,
    #[serde(default)]
    pub signature_header: Option<String>,
    #[serde(default = "default_signature_version")]
    pub version: u32,
    /// Literal `Authorization` header value
    #[serde(default)]
    pub authorization: Option<String>,
}

fn default_signature_version() -> u32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextOverrides {
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    /// User level properties keyed by user id
    #[serde(default)]
    pub users: HashMap<String, HashMap<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.enabled_cache.max_entries, 65_536);
        assert_eq!(cfg.enabled_cache.ttl_secs, 1800);
        assert_eq!(
            cfg.apns.dead_token_reasons,
            vec!["BadDeviceToken", "Unregistered"]
        );
        assert_eq!(cfg.webhook.remove_status_codes, vec![403, 404, 405]);
        assert_eq!(cfg.fcm.enabled_property, "pns.transport.fcm.enabled");
        assert!(cfg.fcm.dead_token_reasons.contains(&"NotRegistered".to_string()));
        assert!(!cfg.fcm.dead_token_reasons.contains(&"Unavailable".to_string()));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let cfg = AppConfig::from_toml(
            r#"
[logging]
level = "debug"

[[apns.clients]]
client = "mobile"
platform = "ios_file_provider"
topic = "com.example.drive"
environment = "sandbox"
bearer_token = "test"

[[fcm.clients]]
client = "android"
api_key = "server-key"

[webhook.webhooks.crm]
uri = "https://crm.example.com/hook"
signature_secret = "s3cret"
signature_header = "X-Signature"

[properties]
"pns.transport.apns.enabled" = true

[contexts.1.properties]
"pns.transport.apns.enabled" = false

[contexts.1.users.3]
"pns.transport.apns.enabled.mobile" = true
"#,
        )
        .unwrap();

        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.apns.clients[0].platform, ApnsPlatform::IosFileProvider);
        assert_eq!(cfg.apns.clients[0].environment, ApnsEnvironment::Sandbox);
        assert!(cfg.apns.clients[0].http2_only);
        assert_eq!(cfg.fcm.clients[0].api_key, "server-key");
        assert_eq!(cfg.fcm.clients[0].timeout_ms, 10_000);
        assert_eq!(cfg.webhook.webhooks["crm"].version, 1);
        assert_eq!(cfg.properties["pns.transport.apns.enabled"], Value::Bool(true));
        assert_eq!(
            cfg.contexts["1"].users["3"]["pns.transport.apns.enabled.mobile"],
            Value::Bool(true)
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.contexts.insert("abc".into(), ContextOverrides::default());
        assert!(cfg.validate().is_err());

        let result = AppConfig::from_toml(
            r#"
[[apns.clients]]
client = "mobile"
platform = "ios"
topic = "com.example.mail"
"#,
        );
        assert!(result.is_err());

        let result = AppConfig::from_toml(
            r#"
[[fcm.clients]]
client = "android"
api_key = ""
"#,
        );
        assert!(result.is_err());
    }
}
