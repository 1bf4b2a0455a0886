//! HTTP client for the FCM legacy send endpoint.

use std::time::Duration;

use async_trait::async_trait;
use pns_core::{DeliveryOutcome, PushError, PushResult};
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::retry::RetryPolicy;

pub const FCM_GATEWAY: &str = "https://fcm.googleapis.com";

/// Per registration id result, in request order
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FcmResult {
    pub message_id: Option<String>,
    /// Canonical registration id replacing the one sent
    pub registration_id: Option<String>,
    pub error: Option<String>,
}

impl FcmResult {
    pub fn outcome(&self) -> DeliveryOutcome {
        match (&self.message_id, &self.error) {
            (Some(id), _) => DeliveryOutcome::accepted(Some(id.clone())),
            (None, Some(error)) => DeliveryOutcome::rejected(error.as_str()),
            (None, None) => DeliveryOutcome::TransportError("Empty FCM result".into()),
        }
    }

    /// The canonical id of an accepted message, if it differs from `sent`
    pub fn canonical_id(&self, sent: &str) -> Option<&str> {
        self.message_id.as_ref()?;
        self.registration_id
            .as_deref()
            .filter(|canonical| !canonical.is_empty() && *canonical != sent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MulticastResponse {
    #[serde(default)]
    pub success: u32,
    #[serde(default)]
    pub failure: u32,
    #[serde(default)]
    pub canonical_ids: u32,
    #[serde(default)]
    pub results: Vec<FcmResult>,
}

/// Sends one multicast request.
///
/// An `Err` means no per-id results are available.
#[async_trait]
pub trait FcmProvider: Send + Sync {
    async fn send(&self, body: &Value) -> PushResult<MulticastResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpFcmClientConfig {
    pub gateway_url: String,
    pub timeout: Duration,
    /// Applies to connection failures only
    pub retry: RetryPolicy,
}

impl Default for HttpFcmClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: FCM_GATEWAY.to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct HttpFcmClient {
    client: Client,
    config: HttpFcmClientConfig,
    api_key: String,
}

impl HttpFcmClient {
    pub fn new(config: HttpFcmClientConfig, api_key: impl Into<String>) -> PushResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PushError::configuration(format!("Failed to create FCM client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/fcm/send", self.config.gateway_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl FcmProvider for HttpFcmClient {
    async fn send(&self, body: &Value) -> PushResult<MulticastResponse> {
        let url = self.send_url();
        let authorization = format!("key={}", self.api_key);

        let response = self
            .config
            .retry
            .run(
                || {
                    self.client
                        .post(&url)
                        .header(header::AUTHORIZATION, &authorization)
                        .json(body)
                        .send()
                },
                reqwest::Error::is_connect,
            )
            .await
            .map_err(|e| PushError::io(format!("FCM request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PushError::io(format!("FCM gateway responded with {status}")));
        }
        let parsed: MulticastResponse = response
            .json()
            .await
            .map_err(|e| PushError::io(format!("Invalid FCM response: {e}")))?;
        debug!(
            success = parsed.success,
            failure = parsed.failure,
            canonical_ids = parsed.canonical_ids,
            "FCM gateway responded"
        );
        Ok(parsed)
    }
}
