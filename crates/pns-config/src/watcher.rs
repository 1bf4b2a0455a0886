//! Debounced watcher for the settings file.

use std::path::PathBuf;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::{ConfigCategory, ConfigChangeEvent, ConfigOperation, ConfigSource};

#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    pub path: PathBuf,
    /// Debounce duration for rapid changes
    pub debounce: Duration,
}

impl FileWatcherConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(500),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Handle for a running watcher
pub struct WatchHandle {
    handle: JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

impl WatchHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

pub struct FileWatcher {
    config: FileWatcherConfig,
}

impl FileWatcher {
    pub fn new(config: FileWatcherConfig) -> Self {
        Self { config }
    }

    /// Start watching; a `Reload` event is sent for every debounced change
    pub fn watch(&self, tx: mpsc::Sender<ConfigChangeEvent>) -> WatchHandle {
        let path = self.config.path.clone();
        let debounce = self.config.debounce;

        // Watch the parent directory so editors replacing the file are seen
        let watch_path = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut debouncer = match new_debouncer(debounce, notify_tx) {
                Ok(d) => d,
                Err(e) => {
                    error!("Failed to create file watcher: {e}");
                    return;
                }
            };

            if let Err(e) = debouncer
                .watcher()
                .watch(&watch_path, RecursiveMode::NonRecursive)
            {
                error!("Failed to watch path {:?}: {e}", watch_path);
                return;
            }

            info!("Started watching config file: {:?}", path);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("File watcher shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        while let Ok(events) = notify_rx.try_recv() {
                            let events = match events {
                                Ok(events) => events,
                                Err(e) => {
                                    error!("File watcher error: {:?}", e);
                                    continue;
                                }
                            };
                            if !events.iter().any(|e| e.path.file_name() == path.file_name()) {
                                continue;
                            }
                            info!("Config file changed: {:?}", path);
                            let event = ConfigChangeEvent::new(
                                ConfigSource::File,
                                ConfigCategory::Properties,
                                ConfigOperation::Reload,
                            );
                            if tx.send(event).await.is_err() {
                                warn!("Config change receiver dropped");
                                return;
                            }
                        }
                    }
                }
            }
        });

        WatchHandle {
            handle,
            shutdown: shutdown_tx,
        }
    }
}
