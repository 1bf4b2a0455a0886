//! Webhook transport.
//!
//! The subscription's client is the webhook id and its token the end-point
//! URI; its meta data may override the configured signature, authorization
//! and URI. Webhooks must be configured on the server, enabled for the user and,
//! if the user requires it, use HTTPS.

pub mod signature;
pub mod task;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use moka::sync::Cache;
use pns_core::{
    ConfigView, Message, MessageGeneratorRegistry, PushError, PushMatch, PushNotification,
    PushResult, PushSubscriptionStore,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

pub use signature::signature_header;
pub use task::WebhookDeliveryTask;

use crate::enabled::{EnabledCache, EnablementGate};
use crate::pool::WorkerPool;
use crate::response::{DeadTokenPolicy, ResponseHandler};
use crate::retry::RetryPolicy;
use crate::transport::PushTransport;

pub const WEBHOOK_TRANSPORT_ID: &str = "webhook";

/// How long per-user webhook settings are reused
const USER_CONFIG_TTL: Duration = Duration::from_secs(7);

/// A webhook configured on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEndpoint {
    /// Used when the subscription carries no valid URI
    pub uri: String,
    pub signature_secret: Option<String>,
    pub signature_header: Option<String>,
    pub version: u32,
    pub authorization: Option<String>,
}

/// One end-point to call and the subscriptions pointing at it
#[derive(Debug, Clone)]
pub struct WebhookTarget {
    pub uri: Url,
    pub endpoint: WebhookEndpoint,
    pub matches: Vec<PushMatch>,
}

pub struct WebhookTransportConfig {
    pub enabled_property: String,
    /// Comma separated ids of the webhooks a user may call
    pub enabled_ids_property: String,
    pub https_only_property: String,
    /// Response status codes meaning the subscription is gone
    pub remove_status_codes: Vec<u16>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub enabled_cache: EnabledCache,
}

impl Default for WebhookTransportConfig {
    fn default() -> Self {
        Self {
            enabled_property: "pns.transport.webhooks.enabled".into(),
            enabled_ids_property: "pns.webhooks.enabledIds".into(),
            https_only_property: "pns.transport.webhooks.httpsOnly".into(),
            remove_status_codes: vec![403, 404, 405],
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            enabled_cache: EnabledCache::default(),
        }
    }
}

/// Webhook settings a client supplied in its token's meta data
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientWebhookInfo {
    uri: Option<String>,
    signature_secret: Option<String>,
    #[serde(alias = "signatureHeaderName")]
    signature_header: Option<String>,
    version: Option<u32>,
    authorization: Option<String>,
}

/// End-point for a match: client-specified fields from the token's meta data
/// win over the configured webhook. The URI is taken from the meta data, the
/// token or the configuration, in that order.
fn effective_endpoint(
    configured: &WebhookEndpoint,
    push_match: &PushMatch,
) -> PushResult<(Url, WebhookEndpoint)> {
    let client = match push_match.token.meta()? {
        Some(meta) => serde_json::from_value::<ClientWebhookInfo>(meta).map_err(|e| {
            PushError::unsupported_message(format!("Invalid client-specified webhook info: {e}"))
        })?,
        None => ClientWebhookInfo::default(),
    };

    let uri = match &client.uri {
        Some(uri) => Url::parse(uri).map_err(|e| {
            PushError::unsupported_message(format!("Invalid client-specified URI {uri}: {e}"))
        })?,
        None => Url::parse(&push_match.token.value)
            .or_else(|_| Url::parse(&configured.uri))
            .map_err(|e| PushError::unsupported_message(format!("Invalid URI: {e}")))?,
    };

    let endpoint = WebhookEndpoint {
        uri: uri.to_string(),
        signature_secret: client
            .signature_secret
            .or_else(|| configured.signature_secret.clone()),
        signature_header: client
            .signature_header
            .or_else(|| configured.signature_header.clone()),
        version: client.version.unwrap_or(configured.version),
        authorization: client
            .authorization
            .or_else(|| configured.authorization.clone()),
    };
    Ok((uri, endpoint))
}

#[derive(Debug, Clone)]
struct UserWebhookConfig {
    https_only: bool,
    enabled_ids: HashSet<String>,
}

pub struct WebhookTransport {
    webhooks: HashMap<String, WebhookEndpoint>,
    enabled_ids_property: String,
    https_only_property: String,
    client: Client,
    retry: RetryPolicy,
    generators: Arc<MessageGeneratorRegistry>,
    config_view: Arc<dyn ConfigView>,
    gate: EnablementGate,
    user_configs: Cache<(i32, i32), UserWebhookConfig>,
    handler: Arc<ResponseHandler>,
    pool: Arc<dyn WorkerPool>,
}

impl WebhookTransport {
    pub fn new(
        config: WebhookTransportConfig,
        webhooks: HashMap<String, WebhookEndpoint>,
        generators: Arc<MessageGeneratorRegistry>,
        config_view: Arc<dyn ConfigView>,
        store: Arc<dyn PushSubscriptionStore>,
        pool: Arc<dyn WorkerPool>,
    ) -> PushResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushError::configuration(format!("Failed to create HTTP client: {e}")))?;
        let dead_tokens =
            DeadTokenPolicy::new(config.remove_status_codes.iter().map(u16::to_string));

        Ok(Self {
            webhooks,
            enabled_ids_property: config.enabled_ids_property,
            https_only_property: config.https_only_property,
            client,
            retry: config.retry,
            generators,
            gate: EnablementGate::with_cache(
                config.enabled_property,
                Arc::clone(&config_view),
                config.enabled_cache,
            ),
            config_view,
            user_configs: Cache::builder().time_to_live(USER_CONFIG_TTL).build(),
            handler: Arc::new(ResponseHandler::new(
                WEBHOOK_TRANSPORT_ID,
                store,
                dead_tokens,
            )),
            pool,
        })
    }

    fn user_config(&self, user_id: i32, context_id: i32) -> PushResult<UserWebhookConfig> {
        self.user_configs
            .try_get_with((user_id, context_id), || {
                let https_only = self
                    .config_view
                    .bool_property(user_id, context_id, &self.https_only_property)?
                    .unwrap_or(true);
                let enabled_ids = self
                    .config_view
                    .string_property(user_id, context_id, &self.enabled_ids_property)?
                    .map(|ids| {
                        ids.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok::<_, PushError>(UserWebhookConfig {
                    https_only,
                    enabled_ids,
                })
            })
            .map_err(|e| (*e).clone())
    }

    /// Split matches into callable targets and matches of unknown webhooks
    fn targets(&self, webhook_id: &str, matches: Vec<PushMatch>) -> (Vec<WebhookTarget>, Vec<PushMatch>) {
        let Some(configured) = self.webhooks.get(webhook_id) else {
            return (Vec::new(), matches);
        };

        let mut targets: Vec<WebhookTarget> = Vec::new();
        for m in matches {
            let (uri, endpoint) = match effective_endpoint(configured, &m) {
                Ok(effective) => effective,
                Err(e) => {
                    warn!(
                        webhook = webhook_id,
                        user_id = m.user_id,
                        context_id = m.context_id,
                        error = %e,
                        "No valid URI available for webhook"
                    );
                    continue;
                }
            };
            match targets
                .iter_mut()
                .find(|t| t.uri == uri && t.endpoint == endpoint)
            {
                Some(target) => target.matches.push(m),
                None => targets.push(WebhookTarget {
                    uri,
                    endpoint,
                    matches: vec![m],
                }),
            }
        }
        (targets, Vec::new())
    }

    fn render(&self, webhook_id: &str, notification: &PushNotification, timestamp: i64) -> PushResult<String> {
        let generator = self
            .generators
            .generator(webhook_id)
            .ok_or_else(|| PushError::no_such_generator(webhook_id, WEBHOOK_TRANSPORT_ID))?;
        let body = match generator.generate(WEBHOOK_TRANSPORT_ID, notification)? {
            Message::Map(mut map) => {
                map.insert("timestamp".into(), Value::from(timestamp));
                Value::Object(map).to_string()
            }
            Message::Json(Value::Object(mut map)) => {
                map.insert("timestamp".into(), Value::from(timestamp));
                Value::Object(map).to_string()
            }
            other => other.to_text(),
        };
        Ok(body)
    }
}

#[async_trait]
impl PushTransport for WebhookTransport {
    fn id(&self) -> &str {
        WEBHOOK_TRANSPORT_ID
    }

    fn serves_client(&self, client: &str) -> bool {
        self.generators.serves(client)
    }

    fn is_enabled(&self, topic: &str, client: &str, user_id: i32, context_id: i32) -> PushResult<bool> {
        self.gate.is_enabled(topic, client, user_id, context_id)
    }

    async fn transport(
        &self,
        notification: Arc<PushNotification>,
        matches: Vec<PushMatch>,
    ) -> PushResult<()> {
        if let Some(m) = matches
            .iter()
            .find(|m| m.user_id != notification.user_id || m.context_id != notification.context_id)
        {
            return Err(PushError::unexpected(format!(
                "Passed wrong push match for notification with topic \"{}\": user {} in context {}",
                notification.topic, m.user_id, m.context_id
            )));
        }

        let user_config = self.user_config(notification.user_id, notification.context_id)?;

        let mut per_webhook: BTreeMap<String, Vec<PushMatch>> = BTreeMap::new();
        for m in matches {
            per_webhook.entry(m.client.clone()).or_default().push(m);
        }

        for (webhook_id, matches) in per_webhook {
            let (targets, absent) = self.targets(&webhook_id, matches);
            for m in &absent {
                warn!(
                    webhook = %webhook_id,
                    user_id = m.user_id,
                    context_id = m.context_id,
                    "No such webhook configured, removing subscription"
                );
                self.handler.remove_subscription(m).await;
            }

            let targets: Vec<WebhookTarget> = targets
                .into_iter()
                .filter(|t| {
                    if !user_config.enabled_ids.contains(&webhook_id) {
                        warn!(webhook = %webhook_id, uri = %t.uri, topic = %notification.topic, "Webhook not enabled for user");
                        return false;
                    }
                    if user_config.https_only && t.uri.scheme() != "https" {
                        warn!(webhook = %webhook_id, uri = %t.uri, topic = %notification.topic, "Webhook end-point is not HTTPS");
                        return false;
                    }
                    true
                })
                .collect();
            if targets.is_empty() {
                continue;
            }

            let timestamp = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
            let body = match self.render(&webhook_id, &notification, timestamp) {
                Ok(body) => body,
                Err(e) => {
                    warn!(webhook = %webhook_id, error = %e, "Failed to generate webhook message");
                    continue;
                }
            };

            debug!(webhook = %webhook_id, targets = targets.len(), topic = %notification.topic, "Submitting webhook delivery");
            let task = WebhookDeliveryTask {
                webhook_id,
                targets,
                body,
                timestamp,
                client: self.client.clone(),
                retry: self.retry,
                handler: Arc::clone(&self.handler),
            };
            self.pool.submit(task.run().boxed());
        }
        Ok(())
    }

    fn invalidate_enabled_cache(&self) {
        self.gate.invalidate_all();
        self.user_configs.invalidate_all();
    }
}
