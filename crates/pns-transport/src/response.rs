//! Interpretation of delivery outcomes and pruning of dead subscriptions.

use std::collections::HashSet;
use std::sync::Arc;

use pns_core::{DeliveryOutcome, PushMatch, PushSubscriptionStore, SubscriptionDescription};
use tracing::{debug, error, info, warn};

/// Rejection reasons marking a token as permanently dead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadTokenPolicy {
    reasons: HashSet<String>,
}

impl DeadTokenPolicy {
    pub fn new<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }

    /// `BadDeviceToken` and `Unregistered`
    pub fn apns_default() -> Self {
        Self::new(["BadDeviceToken", "Unregistered"])
    }

    /// FCM errors after which a registration id never becomes valid again
    pub fn fcm_default() -> Self {
        Self::new([
            "NotRegistered",
            "InvalidRegistration",
            "MissingRegistration",
            "MismatchSenderId",
            "InvalidPackageName",
        ])
    }

    /// A rejection is terminal if the gateway dated the token's invalidation
    /// or names one of the configured reasons
    pub fn is_dead(&self, outcome: &DeliveryOutcome) -> bool {
        match outcome {
            DeliveryOutcome::Rejected {
                reason,
                token_invalidated_at,
            } => token_invalidated_at.is_some() || self.reasons.contains(reason.trim()),
            _ => false,
        }
    }
}

/// How much a dead token takes with it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PruneScope {
    /// Only the matched subscription
    #[default]
    Subscription,
    /// Every subscription of the transport holding the token, across users
    Token,
}

impl Default for DeadTokenPolicy {
    fn default() -> Self {
        Self::apns_default()
    }
}

/// Handles the outcome of one delivery attempt.
///
/// Never fails: every outcome ends in a log line, and dead tokens
/// additionally in a removal from the store.
pub struct ResponseHandler {
    transport_id: String,
    store: Arc<dyn PushSubscriptionStore>,
    policy: DeadTokenPolicy,
    scope: PruneScope,
}

impl ResponseHandler {
    pub fn new(
        transport_id: impl Into<String>,
        store: Arc<dyn PushSubscriptionStore>,
        policy: DeadTokenPolicy,
    ) -> Self {
        Self {
            transport_id: transport_id.into(),
            store,
            policy,
            scope: PruneScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: PruneScope) -> Self {
        self.scope = scope;
        self
    }

    pub async fn handle(&self, outcome: &DeliveryOutcome, push_match: &PushMatch) {
        let token = &push_match.token;
        match outcome {
            DeliveryOutcome::Accepted { id } => {
                debug!(
                    transport = %self.transport_id,
                    user_id = push_match.user_id,
                    context_id = push_match.context_id,
                    %token,
                    id = id.as_deref().unwrap_or("-"),
                    "Push notification accepted"
                );
            }
            DeliveryOutcome::Rejected { reason, .. } if self.policy.is_dead(outcome) => {
                warn!(
                    transport = %self.transport_id,
                    %token,
                    reason,
                    "Unsuccessful push notification due to inactive or invalid token"
                );
                match self.scope {
                    PruneScope::Subscription => {
                        self.remove_subscription(push_match).await;
                    }
                    PruneScope::Token => {
                        self.remove_token(push_match).await;
                    }
                }
            }
            DeliveryOutcome::Rejected { reason, .. } => {
                warn!(
                    transport = %self.transport_id,
                    user_id = push_match.user_id,
                    context_id = push_match.context_id,
                    %token,
                    reason,
                    "Push notification rejected"
                );
            }
            DeliveryOutcome::TransportError(cause) => {
                warn!(
                    transport = %self.transport_id,
                    %token,
                    error = %cause,
                    "Failed to send push notification"
                );
            }
        }
    }

    /// Best-effort removal; failures are logged only
    pub async fn remove_subscription(&self, push_match: &PushMatch) -> bool {
        let description = SubscriptionDescription::from(push_match);
        match self.store.unregister(&description).await {
            Ok(true) => {
                info!(
                    transport = %self.transport_id,
                    user_id = push_match.user_id,
                    context_id = push_match.context_id,
                    token = %push_match.token,
                    "Removed subscription"
                );
                true
            }
            Ok(false) => {
                debug!(token = %push_match.token, "No subscription to remove");
                false
            }
            Err(e) => {
                error!(token = %push_match.token, error = %e, "Error removing subscription");
                false
            }
        }
    }

    /// Removes the token from every user; returns the number of removed subscriptions
    pub async fn remove_token(&self, push_match: &PushMatch) -> usize {
        let token = &push_match.token;
        match self
            .store
            .unregister_token(&token.value, &push_match.transport_id)
            .await
        {
            Ok(removed) => {
                info!(transport = %self.transport_id, %token, removed, "Removed token");
                removed
            }
            Err(e) => {
                error!(%token, error = %e, "Error removing token");
                0
            }
        }
    }

    /// Replaces the matched token of the user with the gateway's canonical one.
    ///
    /// The update spans all clients of the user on this transport.
    pub async fn replace_token(&self, push_match: &PushMatch, new_token: &str) -> bool {
        let description = SubscriptionDescription {
            client: None,
            ..SubscriptionDescription::from(push_match)
        };
        match self.store.update_token(&description, new_token).await {
            Ok(true) => {
                info!(
                    transport = %self.transport_id,
                    user_id = push_match.user_id,
                    context_id = push_match.context_id,
                    old = %push_match.token,
                    new = new_token,
                    "Replaced token with canonical one"
                );
                true
            }
            Ok(false) => {
                warn!(token = %push_match.token, "Token not updated");
                false
            }
            Err(e) => {
                error!(token = %push_match.token, error = %e, "Error updating token");
                false
            }
        }
    }
}
