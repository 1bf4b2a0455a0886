//! Composition of the push service from settings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pns_config::{
    ApnsClientSettings, ApnsEnvironment, ApnsPlatform, AppConfig, ConfigurationManager,
    FcmClientSettings,
};
use pns_core::{
    ConfigView, InMemorySubscriptionStore, MessageGeneratorRegistry, PushError, PushResult,
    PushSubscriptionStore, RegistryEvent, SubscriptionRestrictions,
};
use pns_transport::apns::{
    ApnsAuth, HttpApnsClient, HttpApnsClientConfig, PRODUCTION_GATEWAY, ProviderToken,
    SANDBOX_GATEWAY,
};
use pns_transport::fcm::{FCM_GATEWAY, HttpFcmClient, HttpFcmClientConfig};
use pns_transport::{
    APNS_TRANSPORT_ID, ApnsApp, ApnsTransport, ApnsTransportConfig, DeadTokenPolicy, EnabledCache,
    FCM_TRANSPORT_ID, FcmApp, FcmTransport, FcmTransportConfig, PlatformKind, PushDispatcher,
    PushTransport, RetryPolicy, TokioWorkerPool, TransportRegistry, WEBHOOK_TRANSPORT_ID,
    WebhookEndpoint, WebhookTransport, WebhookTransportConfig,
};
use tracing::{error, info, warn};

/// The composed service; every component is owned here and shared by `Arc`
pub struct PushService {
    pub manager: Arc<ConfigurationManager>,
    pub store: Arc<InMemorySubscriptionStore>,
    pub generators: Arc<MessageGeneratorRegistry>,
    pub transports: Arc<TransportRegistry>,
    pub pool: Arc<TokioWorkerPool>,
    pub dispatcher: PushDispatcher,
}

impl PushService {
    pub fn build(manager: Arc<ConfigurationManager>) -> anyhow::Result<Self> {
        let config = manager.config();
        let store = Arc::new(InMemorySubscriptionStore::new());
        let generators = Arc::new(MessageGeneratorRegistry::with_generic());
        let pool = Arc::new(TokioWorkerPool::new(config.pool.max_concurrent_tasks));

        let transports = Arc::new(TransportRegistry::new());
        transports.observe(|event| match event {
            RegistryEvent::Registered { id, .. } => info!(transport = %id, "Transport registered"),
            RegistryEvent::Unregistered { id } => info!(transport = %id, "Transport unregistered"),
        });

        let service = Self {
            dispatcher: PushDispatcher::new(
                Arc::clone(&store) as Arc<dyn PushSubscriptionStore>,
                Arc::clone(&transports),
            ),
            manager,
            store,
            generators,
            transports,
            pool,
        };
        service
            .install_apns()
            .context("Failed to set up APNs transport")?;
        service
            .install_fcm()
            .context("Failed to set up FCM transport")?;
        service
            .install_webhooks()
            .context("Failed to set up webhook transport")?;
        Ok(service)
    }

    pub fn restrictions(&self) -> SubscriptionRestrictions {
        let config = self.manager.config();
        SubscriptionRestrictions {
            max_per_client: config.subscriptions.max_per_client,
            allow_shared_token: config.subscriptions.allow_shared_token,
        }
    }

    /// (Re-)create the APNs transport; without configured clients it is removed
    pub fn install_apns(&self) -> PushResult<()> {
        let config = self.manager.config();
        let apps: Vec<ApnsApp> = config
            .apns
            .clients
            .iter()
            .filter_map(|settings| match apns_app(settings, config.apns.connect_retries) {
                Ok(app) => Some(app),
                Err(e) => {
                    error!(client = %settings.client, error = %e, "Skipping APNs client");
                    None
                }
            })
            .collect();

        if apps.is_empty() {
            self.transports.unregister(APNS_TRANSPORT_ID);
            return Ok(());
        }

        let transport = ApnsTransport::new(
            ApnsTransportConfig {
                enabled_property: config.apns.enabled_property.clone(),
                dead_tokens: DeadTokenPolicy::new(config.apns.dead_token_reasons.iter().cloned()),
                enabled_cache: enabled_cache(&config),
            },
            apps,
            Arc::clone(&self.generators),
            self.config_view(),
            self.store_handle(),
            Arc::clone(&self.pool) as _,
        );
        self.transports
            .register(APNS_TRANSPORT_ID, Arc::new(transport) as Arc<dyn PushTransport>);
        Ok(())
    }

    /// (Re-)create the FCM transport; without configured clients it is removed
    pub fn install_fcm(&self) -> PushResult<()> {
        let config = self.manager.config();
        let apps: Vec<FcmApp> = config
            .fcm
            .clients
            .iter()
            .filter_map(|settings| match fcm_app(settings, config.fcm.connect_retries) {
                Ok(app) => Some(app),
                Err(e) => {
                    error!(client = %settings.client, error = %e, "Skipping FCM client");
                    None
                }
            })
            .collect();

        if apps.is_empty() {
            self.transports.unregister(FCM_TRANSPORT_ID);
            return Ok(());
        }

        let transport = FcmTransport::new(
            FcmTransportConfig {
                enabled_property: config.fcm.enabled_property.clone(),
                dead_tokens: DeadTokenPolicy::new(config.fcm.dead_token_reasons.iter().cloned()),
                enabled_cache: enabled_cache(&config),
            },
            apps,
            Arc::clone(&self.generators),
            self.config_view(),
            self.store_handle(),
            Arc::clone(&self.pool) as _,
        );
        self.transports
            .register(FCM_TRANSPORT_ID, Arc::new(transport) as Arc<dyn PushTransport>);
        Ok(())
    }

    /// (Re-)create the webhook transport; without configured webhooks it is removed
    pub fn install_webhooks(&self) -> PushResult<()> {
        let config = self.manager.config();
        let settings = &config.webhook;
        if settings.webhooks.is_empty() {
            self.transports.unregister(WEBHOOK_TRANSPORT_ID);
            return Ok(());
        }

        let webhooks: HashMap<String, WebhookEndpoint> = settings
            .webhooks
            .iter()
            .map(|(id, def)| {
                (
                    id.clone(),
                    WebhookEndpoint {
                        uri: def.uri.clone(),
                        signature_secret: def.signature_secret.clone(),
                        signature_header: def.signature_header.clone(),
                        version: def.version,
                        authorization: def.authorization.clone(),
                    },
                )
            })
            .collect();

        let transport = WebhookTransport::new(
            WebhookTransportConfig {
                enabled_property: settings.enabled_property.clone(),
                enabled_ids_property: settings.enabled_ids_property.clone(),
                https_only_property: settings.https_only_property.clone(),
                remove_status_codes: settings.remove_status_codes.clone(),
                timeout: Duration::from_millis(settings.timeout_ms),
                retry: RetryPolicy::default().with_max_retries(settings.connect_retries),
                enabled_cache: enabled_cache(&config),
            },
            webhooks,
            Arc::clone(&self.generators),
            self.config_view(),
            self.store_handle(),
            Arc::clone(&self.pool) as _,
        )?;
        self.transports
            .register(WEBHOOK_TRANSPORT_ID, Arc::new(transport) as Arc<dyn PushTransport>);
        Ok(())
    }

    /// Drop cached enablement decisions of every transport
    pub fn invalidate_enabled_caches(&self) {
        for transport in self.transports.list() {
            transport.invalidate_enabled_cache();
        }
    }

    fn config_view(&self) -> Arc<dyn ConfigView> {
        Arc::clone(&self.manager) as Arc<dyn ConfigView>
    }

    fn store_handle(&self) -> Arc<dyn PushSubscriptionStore> {
        Arc::clone(&self.store) as Arc<dyn PushSubscriptionStore>
    }
}

fn enabled_cache(config: &AppConfig) -> EnabledCache {
    EnabledCache::new(
        config.enabled_cache.max_entries,
        Duration::from_secs(config.enabled_cache.ttl_secs),
    )
}

fn apns_app(settings: &ApnsClientSettings, connect_retries: u32) -> PushResult<ApnsApp> {
    let auth = match (&settings.auth, &settings.bearer_token) {
        (Some(auth), _) => {
            let pem = std::fs::read(&auth.private_key_path).map_err(|e| {
                PushError::configuration(format!(
                    "Cannot read APNs key {}: {e}",
                    auth.private_key_path
                ))
            })?;
            ApnsAuth::Token(ProviderToken::from_pem(&auth.key_id, &auth.team_id, &pem)?)
        }
        (None, Some(token)) => {
            warn!(client = %settings.client, "APNs client uses a static bearer token");
            ApnsAuth::Bearer(token.clone())
        }
        (None, None) => {
            return Err(PushError::configuration(format!(
                "APNs client {} has no credentials",
                settings.client
            )));
        }
    };

    let gateway_url = settings.gateway_url.clone().unwrap_or_else(|| {
        match settings.environment {
            ApnsEnvironment::Production => PRODUCTION_GATEWAY,
            ApnsEnvironment::Sandbox => SANDBOX_GATEWAY,
        }
        .to_string()
    });
    let client = HttpApnsClient::new(
        HttpApnsClientConfig {
            gateway_url,
            timeout: Duration::from_millis(settings.timeout_ms),
            http2_only: settings.http2_only,
            retry: RetryPolicy::default().with_max_retries(connect_retries),
        },
        auth,
    )?;

    Ok(ApnsApp {
        client: settings.client.clone(),
        platform: platform_kind(settings.platform),
        topic: settings.topic.clone(),
        provider: Arc::new(client),
    })
}

fn fcm_app(settings: &FcmClientSettings, connect_retries: u32) -> PushResult<FcmApp> {
    let client = HttpFcmClient::new(
        HttpFcmClientConfig {
            gateway_url: settings
                .gateway_url
                .clone()
                .unwrap_or_else(|| FCM_GATEWAY.to_string()),
            timeout: Duration::from_millis(settings.timeout_ms),
            retry: RetryPolicy::default().with_max_retries(connect_retries),
        },
        settings.api_key.clone(),
    )?;
    Ok(FcmApp {
        client: settings.client.clone(),
        provider: Arc::new(client),
    })
}

fn platform_kind(platform: ApnsPlatform) -> PlatformKind {
    match platform {
        ApnsPlatform::Ios => PlatformKind::Ios,
        ApnsPlatform::IosFileProvider => PlatformKind::IosFileProvider,
        ApnsPlatform::Macos => PlatformKind::MacOs,
    }
}
