//! Configuration for the push notification service.
//!
//! Settings are read from a TOML file with `PNS__`-prefixed environment
//! overrides. The [`ConfigurationManager`] keeps the active snapshot, watches
//! the file for changes and broadcasts what changed; the [`PropertyCascade`]
//! answers per-user property lookups with user, context and server levels.

pub mod cascade;
pub mod events;
pub mod loader;
pub mod manager;
pub mod settings;
pub mod watcher;

pub use cascade::PropertyCascade;
pub use events::{ConfigCategory, ConfigChangeEvent, ConfigOperation, ConfigSource};
pub use loader::{DEFAULT_CONFIG_PATH, load_config};
pub use manager::ConfigurationManager;
pub use settings::*;
pub use watcher::{FileWatcher, FileWatcherConfig, WatchHandle};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Config build error: {0}")]
    Build(#[from] config::ConfigError),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn watcher(msg: impl Into<String>) -> Self {
        Self::Watcher(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
