//! In-memory subscription store backed by DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::{PushError, PushResult};
use crate::subscription::{
    PushSubscription, PushSubscriptionStore, RegistrationResult, SubscriptionDescription,
    SubscriptionRestrictions,
};
use crate::types::{PushMatch, validate_topic, topic_matches};

/// Subscriptions grouped by `(context_id, user_id)`
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: DashMap<(i32, i32), Vec<PushSubscription>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_token_owner(&self, subscription: &PushSubscription) -> Option<(i32, i32)> {
        self.subscriptions.iter().find_map(|entry| {
            entry
                .value()
                .iter()
                .any(|s| {
                    s.token.value == subscription.token.value
                        && s.transport_id == subscription.transport_id
                        && s.client == subscription.client
                })
                .then(|| *entry.key())
        })
    }
}

fn describes(description: &SubscriptionDescription, s: &PushSubscription) -> bool {
    s.token.value == description.token
        && s.transport_id == description.transport_id
        && description.client.as_ref().is_none_or(|c| *c == s.client)
}

#[async_trait]
impl PushSubscriptionStore for InMemorySubscriptionStore {
    async fn register(
        &self,
        subscription: PushSubscription,
        restrictions: SubscriptionRestrictions,
    ) -> PushResult<RegistrationResult> {
        for topic in &subscription.topics {
            validate_topic(topic)?;
        }

        let owner = (subscription.context_id, subscription.user_id);
        if !restrictions.allow_shared_token
            && let Some((context_id, user_id)) = self.find_token_owner(&subscription)
            && (context_id, user_id) != owner
        {
            debug!(
                token = %subscription.token,
                user_id,
                context_id,
                "Token already registered by another user"
            );
            return Ok(RegistrationResult::Conflict {
                user_id,
                context_id,
            });
        }

        let mut entry = self.subscriptions.entry(owner).or_default();
        let existing = entry.iter().position(|s| {
            s.token.value == subscription.token.value
                && s.transport_id == subscription.transport_id
                && s.client == subscription.client
        });

        if let Some(index) = existing {
            entry[index] = subscription;
            return Ok(RegistrationResult::Updated);
        }

        if restrictions.max_per_client > 0 {
            let count = entry
                .iter()
                .filter(|s| {
                    s.transport_id == subscription.transport_id && s.client == subscription.client
                })
                .count();
            if count >= restrictions.max_per_client {
                warn!(
                    transport = %subscription.transport_id,
                    client = %subscription.client,
                    user_id = subscription.user_id,
                    context_id = subscription.context_id,
                    "Denied subscription: too many subscriptions"
                );
                return Err(PushError::MaxSubscriptionsExceeded {
                    transport: subscription.transport_id,
                    client: subscription.client,
                });
            }
        }

        entry.push(subscription);
        Ok(RegistrationResult::Created)
    }

    async fn unregister(&self, description: &SubscriptionDescription) -> PushResult<bool> {
        let key = (description.context_id, description.user_id);
        let Some(mut entry) = self.subscriptions.get_mut(&key) else {
            return Ok(false);
        };
        let before = entry.len();
        entry.retain(|s| !describes(description, s));
        let removed = entry.len() < before;
        let now_empty = entry.is_empty();
        drop(entry);

        if now_empty {
            self.subscriptions.remove_if(&key, |_, v| v.is_empty());
        }
        Ok(removed)
    }

    async fn unregister_token(&self, token: &str, transport_id: &str) -> PushResult<usize> {
        let mut removed = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let before = entry.len();
            entry.retain(|s| !(s.token.value == token && s.transport_id == transport_id));
            removed += before - entry.len();
        }
        self.subscriptions.retain(|_, v| !v.is_empty());
        Ok(removed)
    }

    async fn update_token(
        &self,
        description: &SubscriptionDescription,
        new_token: &str,
    ) -> PushResult<bool> {
        let key = (description.context_id, description.user_id);
        let Some(mut entry) = self.subscriptions.get_mut(&key) else {
            return Ok(false);
        };
        let mut updated = false;
        for subscription in entry.iter_mut().filter(|s| describes(description, s)) {
            subscription.token.value = new_token.to_string();
            updated = true;
        }
        Ok(updated)
    }

    async fn interested(
        &self,
        topic: &str,
        user_id: i32,
        context_id: i32,
        transport_id: &str,
    ) -> PushResult<Vec<PushMatch>> {
        let now = OffsetDateTime::now_utc();
        let Some(entry) = self.subscriptions.get(&(context_id, user_id)) else {
            return Ok(Vec::new());
        };

        let matches = entry
            .iter()
            .filter(|s| s.transport_id == transport_id && !s.is_expired(now))
            .filter_map(|s| {
                s.topics
                    .iter()
                    .find(|t| topic_matches(t, topic))
                    .map(|matching| PushMatch {
                        user_id,
                        context_id,
                        client: s.client.clone(),
                        topic: matching.clone(),
                        transport_id: s.transport_id.clone(),
                        token: s.token.clone(),
                    })
            })
            .collect();
        Ok(matches)
    }

    async fn subscriptions_for(
        &self,
        user_id: i32,
        context_id: i32,
    ) -> PushResult<Vec<PushSubscription>> {
        Ok(self
            .subscriptions
            .get(&(context_id, user_id))
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}
