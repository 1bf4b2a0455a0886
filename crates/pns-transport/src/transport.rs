use std::sync::Arc;

use async_trait::async_trait;
use pns_core::{PushMatch, PushNotification, PushResult, ServiceRegistry};

/// A push transport such as APNs or webhooks
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Identifier used by subscriptions, e.g. `apns`
    fn id(&self) -> &str;

    /// Whether the transport can deliver to the given client
    fn serves_client(&self, client: &str) -> bool;

    /// Enablement gate; see [`crate::EnablementGate`]
    fn is_enabled(
        &self,
        topic: &str,
        client: &str,
        user_id: i32,
        context_id: i32,
    ) -> PushResult<bool>;

    /// Hand the matches to the worker pool.
    ///
    /// Returns once all delivery tasks are submitted; outcomes are handled
    /// by the tasks themselves.
    async fn transport(
        &self,
        notification: Arc<PushNotification>,
        matches: Vec<PushMatch>,
    ) -> PushResult<()>;

    /// Drop all cached enablement decisions
    fn invalidate_enabled_cache(&self);
}

/// Active transports keyed by id
pub type TransportRegistry = ServiceRegistry<dyn PushTransport>;
