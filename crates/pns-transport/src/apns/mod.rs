//! APNs transport.
//!
//! Matches are grouped per client; every client maps to one configured app
//! (bundle id, platform and gateway client). Each match becomes one
//! [`ApnsDeliveryTask`] on the worker pool.

pub mod client;
pub mod payload;
pub mod task;
pub mod token;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use pns_core::{
    ConfigView, MessageGeneratorRegistry, PushError, PushMatch, PushNotification, PushResult,
    PushSubscriptionStore,
};
use tracing::{debug, error};

pub use client::{
    ApnsAuth, ApnsProvider, ApnsResponse, HttpApnsClient, HttpApnsClientConfig,
    PRODUCTION_GATEWAY, SANDBOX_GATEWAY,
};
pub use payload::{ApnsPayload, MAX_PAYLOAD_SIZE, PlatformKind, PushType, build_payload};
pub use task::ApnsDeliveryTask;
pub use token::ProviderToken;

use crate::enabled::{EnabledCache, EnablementGate};
use crate::pool::WorkerPool;
use crate::response::{DeadTokenPolicy, ResponseHandler};
use crate::transport::PushTransport;

pub const APNS_TRANSPORT_ID: &str = "apns";

/// A client app reachable through APNs
#[derive(Clone)]
pub struct ApnsApp {
    pub client: String,
    pub platform: PlatformKind,
    /// Bundle id sent as `apns-topic`
    pub topic: String,
    pub provider: Arc<dyn ApnsProvider>,
}

pub struct ApnsTransportConfig {
    /// Base name of the enablement properties
    pub enabled_property: String,
    pub dead_tokens: DeadTokenPolicy,
    pub enabled_cache: EnabledCache,
}

impl Default for ApnsTransportConfig {
    fn default() -> Self {
        Self {
            enabled_property: "pns.transport.apns.enabled".into(),
            dead_tokens: DeadTokenPolicy::apns_default(),
            enabled_cache: EnabledCache::default(),
        }
    }
}

pub struct ApnsTransport {
    apps: HashMap<String, ApnsApp>,
    generators: Arc<MessageGeneratorRegistry>,
    gate: EnablementGate,
    handler: Arc<ResponseHandler>,
    pool: Arc<dyn WorkerPool>,
}

impl ApnsTransport {
    pub fn new(
        config: ApnsTransportConfig,
        apps: Vec<ApnsApp>,
        generators: Arc<MessageGeneratorRegistry>,
        config_view: Arc<dyn ConfigView>,
        store: Arc<dyn PushSubscriptionStore>,
        pool: Arc<dyn WorkerPool>,
    ) -> Self {
        Self {
            apps: apps.into_iter().map(|a| (a.client.clone(), a)).collect(),
            generators,
            gate: EnablementGate::with_cache(
                config.enabled_property,
                config_view,
                config.enabled_cache,
            ),
            handler: Arc::new(ResponseHandler::new(
                APNS_TRANSPORT_ID,
                store,
                config.dead_tokens,
            )),
            pool,
        }
    }

    fn tasks_for_client(
        &self,
        client: &str,
        notification: &Arc<PushNotification>,
        matches: Vec<PushMatch>,
    ) -> PushResult<Vec<ApnsDeliveryTask>> {
        let app = self.apps.get(client).ok_or_else(|| {
            PushError::unexpected(format!("No push client found for client: '{client}'"))
        })?;

        let mut tasks = Vec::with_capacity(matches.len());
        for push_match in matches {
            let generator = self.generators.generator_for(&push_match)?;
            tasks.push(ApnsDeliveryTask {
                notification: Arc::clone(notification),
                push_match,
                platform: app.platform,
                topic: app.topic.clone(),
                generator,
                provider: Arc::clone(&app.provider),
                handler: Arc::clone(&self.handler),
            });
        }
        Ok(tasks)
    }
}

#[async_trait]
impl PushTransport for ApnsTransport {
    fn id(&self) -> &str {
        APNS_TRANSPORT_ID
    }

    fn serves_client(&self, client: &str) -> bool {
        self.apps.contains_key(client) && self.generators.serves(client)
    }

    fn is_enabled(&self, topic: &str, client: &str, user_id: i32, context_id: i32) -> PushResult<bool> {
        self.gate.is_enabled(topic, client, user_id, context_id)
    }

    async fn transport(
        &self,
        notification: Arc<PushNotification>,
        matches: Vec<PushMatch>,
    ) -> PushResult<()> {
        let mut per_client: BTreeMap<String, Vec<PushMatch>> = BTreeMap::new();
        for m in matches {
            per_client.entry(m.client.clone()).or_default().push(m);
        }

        for (client, matches) in per_client {
            match self.tasks_for_client(&client, &notification, matches) {
                Ok(tasks) => {
                    debug!(
                        client = %client,
                        topic = %notification.topic,
                        count = tasks.len(),
                        "Submitting APNs delivery tasks"
                    );
                    for task in tasks {
                        self.pool.submit(task.run().boxed());
                    }
                }
                Err(e) => {
                    error!(client = %client, topic = %notification.topic, error = %e, "Cannot deliver to client");
                }
            }
        }
        Ok(())
    }

    fn invalidate_enabled_cache(&self) {
        self.gate.invalidate_all();
    }
}
