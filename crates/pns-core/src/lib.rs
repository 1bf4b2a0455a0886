//! Core types for push notification delivery.
//!
//! Holds the data model shared by all transports (notifications, matches,
//! subscriptions, delivery outcomes), the error taxonomy, and the boundary
//! traits implemented by the surrounding application: subscription storage
//! and the per-user configuration view.

pub mod config_view;
pub mod error;
pub mod memory;
pub mod message;
pub mod registry;
pub mod subscription;
pub mod types;

pub use config_view::{ConfigView, enabled_property_candidates};
pub use error::{PushError, PushErrorKind, PushResult};
pub use memory::InMemorySubscriptionStore;
pub use message::{
    GENERIC_CLIENT, GenericMessageGenerator, Message, MessageGeneratorRegistry,
    PushMessageGenerator,
};
pub use registry::{RegistryEvent, ServiceRegistry};
pub use subscription::{
    PushSubscription, PushSubscriptionStore, RegistrationResult, SubscriptionDescription,
    SubscriptionRestrictions,
};
pub use types::*;
