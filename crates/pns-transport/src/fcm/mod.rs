//! FCM transport.
//!
//! Matches are grouped per client. Each client's message is generated once
//! and multicast in chunks of [`MULTICAST_LIMIT`] registration ids; every
//! chunk becomes one [`FcmDeliveryTask`]. Canonical ids reported by the
//! gateway replace the stored token, dead registration ids are removed for
//! every user holding them.

pub mod client;
pub mod message;
pub mod task;

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
    FCM_GATEWAY, FcmProvider, FcmResult, HttpFcmClient, HttpFcmClientConfig, MulticastResponse,
};
pub use message::{MAX_PAYLOAD_SIZE, MULTICAST_LIMIT, build_message};
pub use task::FcmDeliveryTask;

use crate::enabled::{EnabledCache, EnablementGate};
use crate::pool::WorkerPool;
use crate::response::{DeadTokenPolicy, PruneScope, ResponseHandler};
use crate::transport::PushTransport;

pub const FCM_TRANSPORT_ID: &str = "fcm";

/// A client app reachable through FCM
#[derive(Clone)]
pub struct FcmApp {
    pub client: String,
    pub provider: Arc<dyn FcmProvider>,
}

pub struct FcmTransportConfig {
    /// Base name of the enablement properties
    pub enabled_property: String,
    pub dead_tokens: DeadTokenPolicy,
    pub enabled_cache: EnabledCache,
}

impl Default for FcmTransportConfig {
    fn default() -> Self {
        Self {
            enabled_property: "pns.transport.fcm.enabled".into(),
            dead_tokens: DeadTokenPolicy::fcm_default(),
            enabled_cache: EnabledCache::default(),
        }
    }
}

pub struct FcmTransport {
    apps: HashMap<String, FcmApp>,
    generators: Arc<MessageGeneratorRegistry>,
    gate: EnablementGate,
    handler: Arc<ResponseHandler>,
    pool: Arc<dyn WorkerPool>,
}

impl FcmTransport {
    pub fn new(
        config: FcmTransportConfig,
        apps: Vec<FcmApp>,
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
            handler: Arc::new(
                ResponseHandler::new(FCM_TRANSPORT_ID, store, config.dead_tokens)
                    .with_scope(PruneScope::Token),
            ),
            pool,
        }
    }

    fn tasks_for_client(
        &self,
        client: &str,
        notification: &Arc<PushNotification>,
        matches: Vec<PushMatch>,
    ) -> PushResult<Vec<FcmDeliveryTask>> {
        let app = self.apps.get(client).ok_or_else(|| {
            PushError::unexpected(format!("No push client found for client: '{client}'"))
        })?;
        let Some(first) = matches.first() else {
            return Ok(Vec::new());
        };
        let generator = self.generators.generator_for(first)?;
        let message = generator.generate(FCM_TRANSPORT_ID, notification)?;
        let message = Arc::new(build_message(&message)?);

        let mut tasks = Vec::with_capacity(matches.len().div_ceil(MULTICAST_LIMIT));
        let mut remaining = matches.into_iter().peekable();
        while remaining.peek().is_some() {
            tasks.push(FcmDeliveryTask {
                notification: Arc::clone(notification),
                matches: remaining.by_ref().take(MULTICAST_LIMIT).collect(),
                message: Arc::clone(&message),
                provider: Arc::clone(&app.provider),
                handler: Arc::clone(&self.handler),
            });
        }
        Ok(tasks)
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    fn id(&self) -> &str {
        FCM_TRANSPORT_ID
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
                        chunks = tasks.len(),
                        "Submitting FCM delivery tasks"
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
