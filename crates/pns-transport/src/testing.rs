//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pns_core::{
    PushError, PushMatch, PushResult, PushSubscription, PushSubscriptionStore, RegistrationResult,
    SubscriptionDescription, SubscriptionRestrictions,
};

/// Store recording removals and answering `interested` with fixed matches
#[derive(Default)]
pub struct RecordingStore {
    matches: Vec<PushMatch>,
    removed: Mutex<Vec<SubscriptionDescription>>,
    removed_tokens: Mutex<Vec<(String, String)>>,
    updated: Mutex<Vec<(SubscriptionDescription, String)>>,
    attempts: AtomicUsize,
    fail_with: Option<PushError>,
}

impl RecordingStore {
    pub fn with_matches(matches: Vec<PushMatch>) -> Self {
        Self {
            matches,
            ..Default::default()
        }
    }

    pub fn failing(error: PushError) -> Self {
        Self {
            fail_with: Some(error),
            ..Default::default()
        }
    }

    pub fn removed(&self) -> Vec<SubscriptionDescription> {
        self.removed.lock().clone()
    }

    /// `(token, transport_id)` pairs passed to `unregister_token`
    pub fn removed_tokens(&self) -> Vec<(String, String)> {
        self.removed_tokens.lock().clone()
    }

    pub fn updated(&self) -> Vec<(SubscriptionDescription, String)> {
        self.updated.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSubscriptionStore for RecordingStore {
    async fn register(
        &self,
        _: PushSubscription,
        _: SubscriptionRestrictions,
    ) -> PushResult<RegistrationResult> {
        Ok(RegistrationResult::Created)
    }

    async fn unregister(&self, description: &SubscriptionDescription) -> PushResult<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        self.removed.lock().push(description.clone());
        Ok(true)
    }

    async fn unregister_token(&self, token: &str, transport_id: &str) -> PushResult<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        self.removed_tokens
            .lock()
            .push((token.to_string(), transport_id.to_string()));
        Ok(1)
    }

    async fn update_token(
        &self,
        description: &SubscriptionDescription,
        new_token: &str,
    ) -> PushResult<bool> {
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        self.updated
            .lock()
            .push((description.clone(), new_token.to_string()));
        Ok(true)
    }

    async fn interested(
        &self,
        _: &str,
        _: i32,
        _: i32,
        transport_id: &str,
    ) -> PushResult<Vec<PushMatch>> {
        Ok(self
            .matches
            .iter()
            .filter(|m| m.transport_id == transport_id)
            .cloned()
            .collect())
    }

    async fn subscriptions_for(&self, _: i32, _: i32) -> PushResult<Vec<PushSubscription>> {
        Ok(Vec::new())
    }
}
