use std::sync::Arc;

use pns_core::{DeliveryOutcome, PushMatch, PushMessageGenerator, PushNotification};
use tracing::{debug, warn};

use super::client::ApnsProvider;
use super::payload::{PlatformKind, build_payload};
use crate::response::ResponseHandler;

/// Delivery of one notification to one subscription
pub struct ApnsDeliveryTask {
    pub notification: Arc<PushNotification>,
    pub push_match: PushMatch,
    pub platform: PlatformKind,
    /// Bundle id of the client app
    pub topic: String,
    pub generator: Arc<dyn PushMessageGenerator>,
    pub provider: Arc<dyn ApnsProvider>,
    pub handler: Arc<ResponseHandler>,
}

impl ApnsDeliveryTask {
    pub async fn run(self) {
        let token = &self.push_match.token;
        let payload = self
            .generator
            .generate(&self.push_match.transport_id, &self.notification)
            .and_then(|message| {
                build_payload(
                    self.platform,
                    &message,
                    &self.notification,
                    &token.value,
                    &self.topic,
                )
            });

        let payload = match payload {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(
                    %token,
                    platform = ?self.platform,
                    topic = %self.notification.topic,
                    "Nothing to send for platform"
                );
                return;
            }
            Err(e) => {
                warn!(%token, topic = %self.notification.topic, error = %e, "Failed to build APNs payload");
                return;
            }
        };

        debug!(
            topic = %self.notification.topic,
            user_id = self.push_match.user_id,
            context_id = self.push_match.context_id,
            %token,
            "Sending APNs notification"
        );
        let outcome = match self.provider.send(&payload).await {
            Ok(response) => response.into_outcome(),
            Err(e) => DeliveryOutcome::TransportError(e.to_string()),
        };
        self.handler.handle(&outcome, &self.push_match).await;
    }
}
