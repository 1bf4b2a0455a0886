//! HTTP/2 client for the APNs provider API.

use std::time::Duration;

use async_trait::async_trait;
use pns_core::{DeliveryOutcome, PushError, PushResult};
use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use super::payload::ApnsPayload;
use super::token::ProviderToken;
use crate::retry::RetryPolicy;

pub const PRODUCTION_GATEWAY: &str = "https://api.push.apple.com";
pub const SANDBOX_GATEWAY: &str = "https://api.sandbox.push.apple.com";

/// The gateway's answer to one push
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsResponse {
    pub status: u16,
    pub apns_id: Option<String>,
    pub reason: Option<String>,
    /// Set with status 410: the token is invalid since this instant
    pub token_invalidated_at: Option<OffsetDateTime>,
}

impl ApnsResponse {
    pub fn accepted(apns_id: Option<String>) -> Self {
        Self {
            status: 200,
            apns_id,
            reason: None,
            token_invalidated_at: None,
        }
    }

    pub fn rejected(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            apns_id: None,
            reason: Some(reason.into()),
            token_invalidated_at: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == 200
    }

    pub fn into_outcome(self) -> DeliveryOutcome {
        if self.is_accepted() {
            return DeliveryOutcome::accepted(self.apns_id);
        }
        DeliveryOutcome::Rejected {
            reason: self.reason.unwrap_or_else(|| self.status.to_string()),
            token_invalidated_at: self.token_invalidated_at,
        }
    }
}

/// Sends payloads to the gateway.
///
/// An `Err` means the push never got an answer, e.g. the connection failed.
#[async_trait]
pub trait ApnsProvider: Send + Sync {
    async fn send(&self, payload: &ApnsPayload) -> PushResult<ApnsResponse>;
}

pub enum ApnsAuth {
    /// Provider token signed with the team's key
    Token(ProviderToken),
    /// Fixed bearer token
    Bearer(String),
}

impl ApnsAuth {
    fn bearer(&self) -> PushResult<String> {
        match self {
            Self::Token(token) => token.bearer(),
            Self::Bearer(token) => Ok(token.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpApnsClientConfig {
    pub gateway_url: String,
    pub timeout: Duration,
    /// Speak HTTP/2 without negotiation; the production gateway requires it
    pub http2_only: bool,
    /// Applies to connection failures only
    pub retry: RetryPolicy,
}

impl Default for HttpApnsClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: PRODUCTION_GATEWAY.to_string(),
            timeout: Duration::from_secs(10),
            http2_only: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: Option<String>,
    /// Milliseconds since the epoch
    timestamp: Option<i64>,
}

pub struct HttpApnsClient {
    client: Client,
    config: HttpApnsClientConfig,
    auth: ApnsAuth,
}

impl HttpApnsClient {
    pub fn new(config: HttpApnsClientConfig, auth: ApnsAuth) -> PushResult<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if config.http2_only {
            builder = builder.http2_prior_knowledge();
        }
        let client = builder
            .build()
            .map_err(|e| PushError::configuration(format!("Failed to create APNs client: {e}")))?;
        Ok(Self {
            client,
            config,
            auth,
        })
    }

    fn device_url(&self, device_token: &str) -> String {
        format!(
            "{}/3/device/{}",
            self.config.gateway_url.trim_end_matches('/'),
            device_token
        )
    }

    async fn parse_response(response: reqwest::Response) -> ApnsResponse {
        let status = response.status();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status == StatusCode::OK {
            return ApnsResponse::accepted(apns_id);
        }

        let body: Option<ErrorBody> = response.json().await.ok();
        let (reason, timestamp) = body
            .map(|b| (b.reason, b.timestamp))
            .unwrap_or((None, None));
        let token_invalidated_at = timestamp
            .filter(|_| status == StatusCode::GONE)
            .and_then(|ms| {
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
            });

        ApnsResponse {
            status: status.as_u16(),
            apns_id,
            reason,
            token_invalidated_at,
        }
    }
}

#[async_trait]
impl ApnsProvider for HttpApnsClient {
    async fn send(&self, payload: &ApnsPayload) -> PushResult<ApnsResponse> {
        let url = self.device_url(&payload.device_token);
        let bearer = self.auth.bearer()?;

        let response = self
            .config
            .retry
            .run(
                || {
                    let mut request = self
                        .client
                        .post(&url)
                        .header(header::AUTHORIZATION, format!("bearer {bearer}"))
                        .header(header::CONTENT_TYPE, "application/json")
                        .header("apns-topic", &payload.topic)
                        .header("apns-push-type", payload.push_type.as_str())
                        .header("apns-priority", payload.priority.to_string());
                    if let Some(expiration) = payload.expiration {
                        request = request
                            .header("apns-expiration", expiration.unix_timestamp().to_string());
                    }
                    if let Some(collapse_id) = &payload.collapse_id {
                        request = request.header("apns-collapse-id", collapse_id);
                    }
                    request.body(payload.body.clone()).send()
                },
                reqwest::Error::is_connect,
            )
            .await
            .map_err(|e| PushError::io(format!("APNs request failed: {e}")))?;

        let parsed = Self::parse_response(response).await;
        debug!(
            status = parsed.status,
            apns_id = parsed.apns_id.as_deref().unwrap_or("-"),
            "APNs gateway responded"
        );
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_outcome_mapping() {
        assert_eq!(
            ApnsResponse::accepted(Some("id-1".into())).into_outcome(),
            DeliveryOutcome::accepted(Some("id-1".into()))
        );
        assert_eq!(
            ApnsResponse::rejected(400, "BadDeviceToken").into_outcome(),
            DeliveryOutcome::rejected("BadDeviceToken")
        );

        let gone = ApnsResponse {
            status: 410,
            apns_id: None,
            reason: None,
            token_invalidated_at: Some(OffsetDateTime::UNIX_EPOCH),
        };
        assert_eq!(
            gone.into_outcome(),
            DeliveryOutcome::Rejected {
                reason: "410".into(),
                token_invalidated_at: Some(OffsetDateTime::UNIX_EPOCH),
            }
        );
    }
}
