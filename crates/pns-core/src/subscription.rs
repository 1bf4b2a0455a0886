//! Push subscriptions and the storage contract used by transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::PushResult;
use crate::types::{PushMatch, Token};

/// A registered device endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub user_id: i32,
    pub context_id: i32,
    pub token: Token,
    pub client: String,
    pub transport_id: String,
    pub topics: Vec<String>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub expires: Option<OffsetDateTime>,
}

impl PushSubscription {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    pub fn description(&self) -> SubscriptionDescription {
        SubscriptionDescription {
            user_id: self.user_id,
            context_id: self.context_id,
            token: self.token.value.clone(),
            client: Some(self.client.clone()),
            transport_id: self.transport_id.clone(),
        }
    }
}

/// Identifies the subscription(s) to remove or update.
///
/// Without a client, every client's subscription for the token is affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDescription {
    pub user_id: i32,
    pub context_id: i32,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub transport_id: String,
}

impl From<&PushMatch> for SubscriptionDescription {
    fn from(m: &PushMatch) -> Self {
        Self {
            user_id: m.user_id,
            context_id: m.context_id,
            token: m.token.value.clone(),
            client: Some(m.client.clone()),
            transport_id: m.transport_id.clone(),
        }
    }
}

/// Restrictions applied when registering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionRestrictions {
    /// Max. subscriptions per user, transport and client; `0` means unlimited
    pub max_per_client: usize,
    /// Whether the same token may be registered by several users
    pub allow_shared_token: bool,
}

/// Result of a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationResult {
    /// Newly created
    Created,
    /// An existing subscription of the same user was replaced
    Updated,
    /// The token is already registered by another user
    Conflict { user_id: i32, context_id: i32 },
}

/// Storage for push subscriptions.
///
/// Implementations provide their own concurrency safety; transports only
/// read matches and delete dead subscriptions.
#[async_trait]
pub trait PushSubscriptionStore: Send + Sync {
    /// Register or update a subscription
    async fn register(
        &self,
        subscription: PushSubscription,
        restrictions: SubscriptionRestrictions,
    ) -> PushResult<RegistrationResult>;

    /// Remove the described subscription; returns whether anything was removed
    async fn unregister(&self, description: &SubscriptionDescription) -> PushResult<bool>;

    /// Remove every subscription using the token on the given transport
    async fn unregister_token(&self, token: &str, transport_id: &str) -> PushResult<usize>;

    /// Replace the token of the described subscription
    async fn update_token(
        &self,
        description: &SubscriptionDescription,
        new_token: &str,
    ) -> PushResult<bool>;

    /// Subscriptions of the user interested in the topic on the given transport
    async fn interested(
        &self,
        topic: &str,
        user_id: i32,
        context_id: i32,
        transport_id: &str,
    ) -> PushResult<Vec<PushMatch>>;

    /// All subscriptions of a user
    async fn subscriptions_for(
        &self,
        user_id: i32,
        context_id: i32,
    ) -> PushResult<Vec<PushSubscription>>;
}
