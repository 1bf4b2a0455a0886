//! Applies configuration changes to the running service.

use std::sync::Arc;

use pns_config::{ConfigCategory, ConfigChangeEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bootstrap::PushService;
use crate::observability::LogHandle;

/// Listen for configuration changes until the manager goes away
pub fn spawn_reload_listener(service: Arc<PushService>, log: LogHandle) -> JoinHandle<()> {
    let mut rx = service.manager.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => apply_change(&service, &log, &event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed configuration events, refreshing everything");
                    for category in ConfigCategory::all() {
                        apply_category(&service, &log, *category);
                    }
                    service.invalidate_enabled_caches();
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Configuration listener stopped");
    })
}

pub fn apply_change(service: &PushService, log: &LogHandle, event: &ConfigChangeEvent) {
    info!(
        category = %event.category,
        source = %event.source,
        operation = %event.operation,
        "Applying configuration change"
    );
    apply_category(service, log, event.category);
    if event.affects_enablement() {
        service.invalidate_enabled_caches();
    }
}

fn apply_category(service: &PushService, log: &LogHandle, category: ConfigCategory) {
    let config = service.manager.config();
    match category {
        ConfigCategory::Logging => log.apply_level(&config.logging.level),
        ConfigCategory::Pool => {
            if config.pool.max_concurrent_tasks != service.pool.max_concurrent() {
                warn!(
                    configured = config.pool.max_concurrent_tasks,
                    active = service.pool.max_concurrent(),
                    "Worker pool size changes take effect after restart"
                );
            }
        }
        // Read per registration
        ConfigCategory::Subscriptions => {}
        // Only cached enablement decisions depend on properties
        ConfigCategory::Properties => {}
        ConfigCategory::Apns | ConfigCategory::Fcm | ConfigCategory::Webhook => {
            install(service, category)
        }
        ConfigCategory::EnabledCache => {
            install(service, ConfigCategory::Apns);
            install(service, ConfigCategory::Fcm);
            install(service, ConfigCategory::Webhook);
        }
    }
}

fn install(service: &PushService, category: ConfigCategory) {
    let result = match category {
        ConfigCategory::Apns => service.install_apns(),
        ConfigCategory::Fcm => service.install_fcm(),
        ConfigCategory::Webhook => service.install_webhooks(),
        _ => return,
    };
    if let Err(e) = result {
        error!(%category, error = %e, "Failed to rebuild transport, previous one stays active");
    }
}
