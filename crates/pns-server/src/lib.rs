//! Push notification service: wires configuration, subscription storage and
//! transports together and serves line-delimited JSON commands.

pub mod bootstrap;
pub mod ingest;
pub mod observability;
pub mod reload;

pub use bootstrap::PushService;
pub use observability::{LogHandle, init_tracing};
pub use reload::spawn_reload_listener;
