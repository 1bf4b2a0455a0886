//! Configuration manager
//!
//! Owns the active settings snapshot. Reloads swap the snapshot atomically
//! and broadcast one event per changed section; a reload that fails to parse
//! or validate keeps the previous snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use pns_core::{ConfigView, PushResult};
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::cascade::PropertyCascade;
use crate::events::{ConfigCategory, ConfigChangeEvent, ConfigOperation, ConfigSource};
use crate::loader::load_config;
use crate::settings::AppConfig;
use crate::watcher::{FileWatcher, FileWatcherConfig, WatchHandle};
use crate::Result;

pub struct ConfigurationManager {
    path: PathBuf,
    current: ArcSwap<AppConfig>,
    cascade: ArcSwap<PropertyCascade>,
    event_bus: broadcast::Sender<ConfigChangeEvent>,
    watch_handle: Mutex<Option<WatchHandle>>,
}

impl ConfigurationManager {
    /// Load the settings file and create the manager
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = load_config(Some(&path))?;
        Ok(Self::with_config(path, config))
    }

    /// Create a manager around already loaded settings
    pub fn with_config(path: impl Into<PathBuf>, config: AppConfig) -> Self {
        let (event_bus, _) = broadcast::channel(100);
        Self {
            path: path.into(),
            cascade: ArcSwap::from_pointee(PropertyCascade::from_config(&config)),
            current: ArcSwap::from_pointee(config),
            event_bus,
            watch_handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings snapshot
    pub fn config(&self) -> Arc<AppConfig> {
        self.current.load_full()
    }

    pub fn cascade(&self) -> Arc<PropertyCascade> {
        self.cascade.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.event_bus.subscribe()
    }

    /// Re-read the settings file and apply it.
    ///
    /// Returns the categories that changed. On error the active snapshot is
    /// left untouched.
    pub fn reload(&self, source: ConfigSource) -> Result<Vec<ConfigCategory>> {
        let next = match load_config(Some(&self.path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, path = ?self.path, "Config reload rejected, keeping previous settings");
                return Err(e);
            }
        };
        Ok(self.apply(next, source))
    }

    /// Replace the active settings and broadcast the changed categories
    pub fn apply(&self, next: AppConfig, source: ConfigSource) -> Vec<ConfigCategory> {
        let previous = self.current.load_full();
        let changed = changed_categories(&previous, &next);
        if changed.is_empty() {
            debug!("Config reload without changes");
            return changed;
        }

        if changed.contains(&ConfigCategory::Properties) {
            self.cascade
                .store(Arc::new(PropertyCascade::from_config(&next)));
        }
        self.current.store(Arc::new(next));
        info!(categories = ?changed, %source, "Configuration updated");

        for category in &changed {
            let event = ConfigChangeEvent::new(source, *category, ConfigOperation::Update);
            if self.event_bus.send(event).is_err() {
                debug!("No subscribers for config change event");
            }
        }
        changed
    }

    /// Watch the settings file and reload on change
    pub async fn start_watching(self: &Arc<Self>) {
        let mut guard = self.watch_handle.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<ConfigChangeEvent>(100);
        let watcher = FileWatcher::new(FileWatcherConfig::new(&self.path));
        *guard = Some(watcher.watch(tx));

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                debug!(?event, "Received config change event");
                // Errors are logged by reload
                let _ = manager.reload(event.source);
            }
        });
    }

    pub async fn stop_watching(&self) {
        if let Some(handle) = self.watch_handle.lock().await.take() {
            handle.stop().await;
        }
    }
}

impl ConfigView for ConfigurationManager {
    fn property(&self, user_id: i32, context_id: i32, name: &str) -> PushResult<Option<Value>> {
        Ok(self.cascade.load().lookup(user_id, context_id, name).cloned())
    }
}

fn changed_categories(old: &AppConfig, new: &AppConfig) -> Vec<ConfigCategory> {
    let mut changed = Vec::new();
    if old.logging != new.logging {
        changed.push(ConfigCategory::Logging);
    }
    if old.pool != new.pool {
        changed.push(ConfigCategory::Pool);
    }
    if old.enabled_cache != new.enabled_cache {
        changed.push(ConfigCategory::EnabledCache);
    }
    if old.subscriptions != new.subscriptions {
        changed.push(ConfigCategory::Subscriptions);
    }
    if old.apns != new.apns {
        changed.push(ConfigCategory::Apns);
    }
    if old.fcm != new.fcm {
        changed.push(ConfigCategory::Fcm);
    }
    if old.webhook != new.webhook {
        changed.push(ConfigCategory::Webhook);
    }
    if old.properties != new.properties || old.contexts != new.contexts {
        changed.push(ConfigCategory::Properties);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_emits_changed_categories() {
        let manager = ConfigurationManager::with_config("unused.toml", AppConfig::default());
        let mut rx = manager.subscribe();

        let mut next = AppConfig::default();
        next.logging.level = "debug".into();
        next.properties
            .insert("pns.transport.apns.enabled".into(), json!(true));

        let changed = manager.apply(next, ConfigSource::Api);
        assert_eq!(
            changed,
            vec![ConfigCategory::Logging, ConfigCategory::Properties]
        );
        assert_eq!(rx.try_recv().unwrap().category, ConfigCategory::Logging);
        assert_eq!(rx.try_recv().unwrap().category, ConfigCategory::Properties);
        assert_eq!(
            manager
                .bool_property(1, 1, "pns.transport.apns.enabled")
                .unwrap(),
            Some(true)
        );
    }

    #[test]
    fn test_apply_without_changes_is_silent() {
        let manager = ConfigurationManager::with_config("unused.toml", AppConfig::default());
        let mut rx = manager.subscribe();
        assert!(manager.apply(AppConfig::default(), ConfigSource::Api).is_empty());
        assert!(rx.try_recv().is_err());
    }
}
