//! Concurrent registry of named services with change observers.
//!
//! Transports and message generators come and go at runtime; consumers
//! either look them up by id or subscribe to registration changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Change notification delivered to observers
pub enum RegistryEvent<'a, T: ?Sized> {
    Registered { id: &'a str, service: &'a Arc<T> },
    Unregistered { id: &'a str },
}

type Observer<T> = Box<dyn Fn(&RegistryEvent<'_, T>) + Send + Sync>;

pub struct ServiceRegistry<T: ?Sized> {
    services: RwLock<BTreeMap<String, Arc<T>>>,
    observers: RwLock<Vec<Observer<T>>>,
}

impl<T: ?Sized> ServiceRegistry<T> {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register a service, replacing any previous one with the same id
    pub fn register(&self, id: impl Into<String>, service: Arc<T>) -> Option<Arc<T>> {
        let id = id.into();
        let previous = self.services.write().insert(id.clone(), Arc::clone(&service));
        self.notify(&RegistryEvent::Registered {
            id: &id,
            service: &service,
        });
        previous
    }

    pub fn unregister(&self, id: &str) -> Option<Arc<T>> {
        let removed = self.services.write().remove(id);
        if removed.is_some() {
            self.notify(&RegistryEvent::Unregistered { id });
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.services.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.read().contains_key(id)
    }

    /// Snapshot of the active services, ordered by id
    pub fn list(&self) -> Vec<Arc<T>> {
        self.services.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Add an observer; it is called for every later change
    pub fn observe(&self, observer: impl Fn(&RegistryEvent<'_, T>) + Send + Sync + 'static) {
        self.observers.write().push(Box::new(observer));
    }

    fn notify(&self, event: &RegistryEvent<'_, T>) {
        for observer in self.observers.read().iter() {
            observer(event);
        }
    }
}

impl<T: ?Sized> Default for ServiceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Service(&'static str);

    impl Named for Service {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_lookup_and_list() {
        let registry: ServiceRegistry<dyn Named> = ServiceRegistry::new();
        registry.register("webhook", Arc::new(Service("webhook")));
        registry.register("apns", Arc::new(Service("apns")));

        assert_eq!(registry.get("apns").unwrap().name(), "apns");
        assert!(registry.get("gcm").is_none());
        assert_eq!(registry.ids(), vec!["apns", "webhook"]);

        assert!(registry.unregister("apns").is_some());
        assert!(registry.unregister("apns").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_observers() {
        let registry: ServiceRegistry<dyn Named> = ServiceRegistry::new();
        let registered = Arc::new(AtomicUsize::new(0));
        let unregistered = Arc::new(AtomicUsize::new(0));

        let (r, u) = (Arc::clone(&registered), Arc::clone(&unregistered));
        registry.observe(move |event| match event {
            RegistryEvent::Registered { .. } => {
                r.fetch_add(1, Ordering::SeqCst);
            }
            RegistryEvent::Unregistered { .. } => {
                u.fetch_add(1, Ordering::SeqCst);
            }
        });

        registry.register("apns", Arc::new(Service("apns")));
        registry.unregister("apns");
        registry.unregister("apns");

        assert_eq!(registered.load(Ordering::SeqCst), 1);
        assert_eq!(unregistered.load(Ordering::SeqCst), 1);
    }
}
