use std::sync::Arc;

use pns_core::{DeliveryOutcome, PushResult};
use reqwest::{Client, header};
use tracing::{debug, warn};

use super::WebhookTarget;
use super::signature::signature_header;
use crate::response::ResponseHandler;
use crate::retry::RetryPolicy;

/// Delivery of one message to all end-points of one webhook
pub struct WebhookDeliveryTask {
    pub webhook_id: String,
    pub targets: Vec<WebhookTarget>,
    pub body: String,
    /// Milliseconds since the epoch, also part of the signature
    pub timestamp: i64,
    pub client: Client,
    pub retry: RetryPolicy,
    pub handler: Arc<ResponseHandler>,
}

impl WebhookDeliveryTask {
    pub async fn run(self) {
        for target in &self.targets {
            let outcome = match self.post(target).await {
                Ok(outcome) => outcome,
                Err(e) => DeliveryOutcome::TransportError(e.to_string()),
            };
            for push_match in &target.matches {
                self.handler.handle(&outcome, push_match).await;
            }
        }
    }

    async fn post(&self, target: &WebhookTarget) -> PushResult<DeliveryOutcome> {
        let endpoint = &target.endpoint;
        let signature = match (&endpoint.signature_secret, &endpoint.signature_header) {
            (Some(secret), Some(name)) if !secret.is_empty() && !name.is_empty() => Some((
                name.as_str(),
                signature_header(secret, endpoint.version, self.timestamp, &self.body)?,
            )),
            _ => None,
        };

        let response = self
            .retry
            .run(
                || {
                    let mut request = self
                        .client
                        .post(target.uri.as_str())
                        .header(header::CONTENT_TYPE, "application/json");
                    if let Some(authorization) = &endpoint.authorization {
                        request = request.header(header::AUTHORIZATION, authorization);
                    }
                    if let Some((name, value)) = &signature {
                        request = request.header(*name, value);
                    }
                    request.body(self.body.clone()).send()
                },
                reqwest::Error::is_connect,
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    webhook = %self.webhook_id,
                    uri = %target.uri,
                    error = %e,
                    "Failed communication with webhook"
                );
                return Ok(DeliveryOutcome::TransportError(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(webhook = %self.webhook_id, uri = %target.uri, status = status.as_u16(), "Webhook call succeeded");
            Ok(DeliveryOutcome::accepted(None))
        } else {
            warn!(webhook = %self.webhook_id, uri = %target.uri, status = status.as_u16(), "Webhook call failed");
            Ok(DeliveryOutcome::rejected(status.as_u16().to_string()))
        }
    }
}
