//! Routes notifications to the transports of the matching subscriptions.

use std::sync::Arc;

use pns_core::{PushMatch, PushNotification, PushSubscriptionStore};
use tracing::{debug, error, warn};

use crate::transport::{PushTransport, TransportRegistry};

/// Counters of one dispatch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscriptions interested in the topic
    pub matched: usize,
    /// Dropped by the enablement gate or a gate failure
    pub disabled: usize,
    /// Handed to a transport
    pub submitted: usize,
}

pub struct PushDispatcher {
    store: Arc<dyn PushSubscriptionStore>,
    transports: Arc<TransportRegistry>,
}

impl PushDispatcher {
    pub fn new(store: Arc<dyn PushSubscriptionStore>, transports: Arc<TransportRegistry>) -> Self {
        Self { store, transports }
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    /// Deliver a notification through every active transport.
    ///
    /// Failures are logged per transport and never reach the caller.
    pub async fn dispatch(&self, notification: PushNotification) -> DispatchReport {
        let notification = Arc::new(notification);
        let mut report = DispatchReport::default();

        for transport in self.transports.list() {
            let matches = match self
                .store
                .interested(
                    &notification.topic,
                    notification.user_id,
                    notification.context_id,
                    transport.id(),
                )
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    error!(transport = transport.id(), error = %e, "Failed to look up subscriptions");
                    continue;
                }
            };
            report.matched += matches.len();

            let enabled = self.filter(&notification, transport.as_ref(), matches, &mut report);
            if enabled.is_empty() {
                continue;
            }

            report.submitted += enabled.len();
            if let Err(e) = transport
                .transport(Arc::clone(&notification), enabled)
                .await
            {
                error!(
                    transport = transport.id(),
                    topic = %notification.topic,
                    error = %e,
                    "Failed to transport notification"
                );
            }
        }

        debug!(
            topic = %notification.topic,
            user_id = notification.user_id,
            context_id = notification.context_id,
            matched = report.matched,
            submitted = report.submitted,
            "Dispatched notification"
        );
        report
    }

    fn filter(
        &self,
        notification: &PushNotification,
        transport: &dyn PushTransport,
        matches: Vec<PushMatch>,
        report: &mut DispatchReport,
    ) -> Vec<PushMatch> {
        let mut enabled = Vec::with_capacity(matches.len());
        for m in matches {
            if m.user_id != notification.user_id || m.context_id != notification.context_id {
                warn!(
                    user_id = m.user_id,
                    context_id = m.context_id,
                    "Ignoring subscription of another user"
                );
                continue;
            }
            if notification.source_token.as_deref() == Some(m.token.value.as_str()) {
                debug!(token = %m.token, "Skipping originating client");
                continue;
            }
            if !transport.serves_client(&m.client) {
                debug!(transport = transport.id(), client = %m.client, "Client not served");
                report.disabled += 1;
                continue;
            }
            match transport.is_enabled(&notification.topic, &m.client, m.user_id, m.context_id) {
                Ok(true) => enabled.push(m),
                Ok(false) => {
                    debug!(transport = transport.id(), client = %m.client, "Push disabled");
                    report.disabled += 1;
                }
                Err(e) => {
                    error!(transport = transport.id(), error = %e, "Enablement check failed");
                    report.disabled += 1;
                }
            }
        }
        enabled
    }
}
