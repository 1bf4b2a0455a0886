//! Enablement gate with a time- and size-bounded decision cache.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use pns_core::{ConfigView, EnabledKey, PushErrorKind, PushResult, enabled_property_candidates};
use tracing::{debug, warn};

pub const DEFAULT_MAX_ENTRIES: u64 = 65_536;
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Memoized enablement decisions keyed by topic, client, user and context
#[derive(Clone)]
pub struct EnabledCache {
    cache: Cache<EnabledKey, bool>,
}

impl EnabledCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Cached decision or the result of `compute`; errors are not cached.
    ///
    /// Concurrent misses for the same key share one computation.
    pub fn get_or_compute(
        &self,
        key: EnabledKey,
        compute: impl FnOnce() -> PushResult<bool>,
    ) -> Result<bool, Arc<pns_core::PushError>> {
        self.cache.try_get_with(key, compute)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries; exact after [`Self::run_pending_tasks`]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and invalidations
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

impl Default for EnabledCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

/// Decides whether a transport may deliver a topic to a user's client.
///
/// Looks up `base.client.topic`, then `base.client`, then `base`; the first
/// defined value wins and nothing defined means `false`.
pub struct EnablementGate {
    base_property: String,
    config: Arc<dyn ConfigView>,
    cache: EnabledCache,
}

impl EnablementGate {
    pub fn new(base_property: impl Into<String>, config: Arc<dyn ConfigView>) -> Self {
        Self::with_cache(base_property, config, EnabledCache::default())
    }

    pub fn with_cache(
        base_property: impl Into<String>,
        config: Arc<dyn ConfigView>,
        cache: EnabledCache,
    ) -> Self {
        Self {
            base_property: base_property.into(),
            config,
            cache,
        }
    }

    /// Whether delivery is enabled.
    ///
    /// An unavailable configuration counts as disabled and is not remembered,
    /// so the next call asks again. Any other failure is returned.
    pub fn is_enabled(
        &self,
        topic: &str,
        client: &str,
        user_id: i32,
        context_id: i32,
    ) -> PushResult<bool> {
        let key = EnabledKey::new(topic, client, user_id, context_id);
        match self
            .cache
            .get_or_compute(key, || self.evaluate(topic, client, user_id, context_id))
        {
            Ok(enabled) => Ok(enabled),
            Err(e) if e.kind() == PushErrorKind::Configuration => {
                warn!(
                    user_id,
                    context_id,
                    client,
                    topic,
                    error = %e,
                    "Configuration unavailable, treating push as disabled"
                );
                Ok(false)
            }
            Err(e) => Err((*e).clone()),
        }
    }

    pub fn invalidate_all(&self) {
        debug!(property = %self.base_property, "Invalidating enablement cache");
        self.cache.invalidate_all();
    }

    fn evaluate(&self, topic: &str, client: &str, user_id: i32, context_id: i32) -> PushResult<bool> {
        for name in enabled_property_candidates(&self.base_property, client, topic) {
            if let Some(enabled) = self.config.bool_property(user_id, context_id, &name)? {
                return Ok(enabled);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pns_core::PushError;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BASE: &str = "pns.transport.apns.enabled";

    #[derive(Default)]
    struct CountingView {
        values: HashMap<String, Value>,
        lookups: AtomicUsize,
        fail_with: Option<PushError>,
        delay: Option<Duration>,
    }

    impl CountingView {
        fn with(entries: &[(&str, bool)]) -> Self {
            Self {
                values: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::Bool(*v)))
                    .collect(),
                ..Default::default()
            }
        }

        fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    impl ConfigView for CountingView {
        fn property(&self, _: i32, _: i32, name: &str) -> PushResult<Option<Value>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            Ok(self.values.get(name).cloned())
        }
    }

    fn gate(view: &Arc<CountingView>) -> EnablementGate {
        EnablementGate::new(BASE, Arc::clone(view) as Arc<dyn ConfigView>)
    }

    #[test]
    fn test_second_lookup_is_served_from_cache() {
        let view = Arc::new(CountingView::with(&[(BASE, true)]));
        let gate = gate(&view);

        assert!(gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
        let after_first = view.lookups();
        assert!(after_first > 0);

        assert!(gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
        assert_eq!(view.lookups(), after_first);
    }

    #[test]
    fn test_invalidate_all_forces_reevaluation() {
        let view = Arc::new(CountingView::with(&[(BASE, true)]));
        let gate = gate(&view);

        gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap();
        let after_first = view.lookups();

        gate.invalidate_all();
        gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap();
        assert!(view.lookups() > after_first);
    }

    #[test]
    fn test_concurrent_misses_share_one_lookup() {
        const THREADS: usize = 16;
        let view = Arc::new(CountingView {
            delay: Some(Duration::from_millis(100)),
            ..CountingView::with(&[(BASE, true)])
        });
        let gate = gate(&view);
        let barrier = std::sync::Barrier::new(THREADS);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    barrier.wait();
                    assert!(gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
                });
            }
        });

        assert_eq!(view.lookups(), 1);
    }

    #[test]
    fn test_fallback_precedence() {
        let view = Arc::new(CountingView::with(&[
            ("pns.transport.apns.enabled.mobile.ox:mail:new", true),
            ("pns.transport.apns.enabled.mobile", false),
            (BASE, false),
        ]));
        assert!(gate(&view).is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());

        let view = Arc::new(CountingView::with(&[(BASE, true)]));
        assert!(gate(&view).is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());

        let view = Arc::new(CountingView::with(&[
            ("pns.transport.apns.enabled.mobile", false),
            (BASE, true),
        ]));
        assert!(!gate(&view).is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());

        let view = Arc::new(CountingView::default());
        assert!(!gate(&view).is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
    }

    #[test]
    fn test_configuration_errors_fail_closed_and_are_not_cached() {
        let view = Arc::new(CountingView {
            fail_with: Some(PushError::configuration("config service down")),
            ..Default::default()
        });
        let gate = gate(&view);

        assert!(!gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
        assert!(!gate.is_enabled("ox:mail:new", "mobile", 3, 1).unwrap());
        assert_eq!(view.lookups(), 2);
    }

    #[test]
    fn test_unexpected_errors_propagate() {
        let view = Arc::new(CountingView {
            fail_with: Some(PushError::ServiceUnavailable("config view".into())),
            ..Default::default()
        });
        let err = gate(&view)
            .is_enabled("ox:mail:new", "mobile", 3, 1)
            .unwrap_err();
        assert_eq!(err.kind(), PushErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_cache_size_is_bounded() {
        let cache = EnabledCache::default();
        for i in 0..70_000 {
            let key = EnabledKey::new("ox:mail:new", "mobile", i, 1);
            cache.get_or_compute(key, || Ok(true)).unwrap();
        }
        cache.run_pending_tasks();
        assert!(cache.entry_count() <= DEFAULT_MAX_ENTRIES);
    }
}
