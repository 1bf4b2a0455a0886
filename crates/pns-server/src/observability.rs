// Tracing initialization with a configurable and reloadable log level.
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Changes the active log filter at runtime
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` was set and takes precedence over the settings
    env_override: bool,
}

impl LogHandle {
    /// Apply a new logging level unless `RUST_LOG` pins it
    pub fn apply_level(&self, level: &str) {
        if self.env_override {
            return;
        }
        if let Err(e) = self.handle.modify(|f| *f = EnvFilter::new(level)) {
            tracing::warn!(error = %e, "Failed to apply logging level");
        }
    }
}

/// Initialize tracing; logs go to stderr since stdout carries command replies.
pub fn init_tracing(level: &str) -> LogHandle {
    // Prefer RUST_LOG from env, otherwise use provided level string.
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok());
    let env_override = env_filter.is_some();
    let base_filter = env_filter.unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();

    LogHandle {
        handle,
        env_override,
    }
}
