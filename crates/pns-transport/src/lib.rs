//! Push transports and the delivery pipeline.
//!
//! A [`PushDispatcher`] asks the subscription store for interested
//! subscriptions, checks each transport's [`EnablementGate`], and lets the
//! transport submit delivery tasks to a [`WorkerPool`]. Every task ends with
//! the [`ResponseHandler`], which prunes subscriptions whose token the remote
//! side reported as dead.

pub mod apns;
pub mod dispatch;
pub mod enabled;
pub mod fcm;
pub mod pool;
pub mod response;
pub mod retry;
pub mod transport;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

pub use apns::{APNS_TRANSPORT_ID, ApnsApp, ApnsTransport, ApnsTransportConfig, PlatformKind};
pub use dispatch::{DispatchReport, PushDispatcher};
pub use enabled::{EnabledCache, EnablementGate};
pub use fcm::{FCM_TRANSPORT_ID, FcmApp, FcmTransport, FcmTransportConfig};
pub use pool::{TokioWorkerPool, WorkerPool};
pub use response::{DeadTokenPolicy, PruneScope, ResponseHandler};
pub use retry::RetryPolicy;
pub use transport::{PushTransport, TransportRegistry};
pub use webhook::{
    WEBHOOK_TRANSPORT_ID, WebhookEndpoint, WebhookTransport, WebhookTransportConfig,
};
