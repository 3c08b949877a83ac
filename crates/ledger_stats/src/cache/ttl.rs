//! Keyed TTL cache with at most one in-flight computation per key.

use crate::cache::clock::Clock;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};
use tokio::sync::OnceCell;
use tracing::debug;

struct Slot<V> {
    cell: OnceCell<(V, OffsetDateTime)>,
}

impl<V> Slot<V> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
        })
    }

    fn expired(&self, now: OffsetDateTime) -> bool {
        self.cell.get().is_some_and(|(_, expiry)| *expiry <= now)
    }
}

/// Expired, or left empty by a failed init with no caller still waiting on it.
fn is_stale<V>(slot: &Arc<Slot<V>>, now: OffsetDateTime) -> bool {
    slot.expired(now) || (!slot.cell.initialized() && Arc::strong_count(slot) == 1)
}

/// Populated keys are read concurrently; populating a key is serialized so concurrent callers
/// share one computation. Failed computations are not cached.
pub struct TtlCache<K, V> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `key`, replacing it if its value has expired. Also drops other stale slots.
    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let now = self.clock.now();
        let mut slots = match self.slots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.retain(|k, s| k == key || !is_stale(s, now));
        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
        if slot.expired(now) {
            debug!(cache = self.name, ?key, "expired");
            *slot = Slot::new();
        }
        Arc::clone(slot)
    }

    /// Cached value for `key`, or the result of `init` which becomes the cached value on success.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(&key);
        let ttl = self.ttl;
        let clock = Arc::clone(&self.clock);
        let (value, _) = slot
            .cell
            .get_or_try_init(|| async move {
                debug!(cache = self.name, ?key, "populating");
                let v = init().await?;
                Ok::<_, E>((v, clock.now() + ttl))
            })
            .await?;
        Ok(value.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    fn cache(clock: Arc<ManualClock>) -> TtlCache<u32, String> {
        TtlCache::new("test", Duration::hours(1), clock)
    }

    #[tokio::test]
    async fn hit_within_ttl_and_miss_after() {
        let clock = Arc::new(ManualClock::new(datetime!(2020-01-01 0:00 UTC)));
        let c = cache(Arc::clone(&clock));
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("v".to_string())
        };
        assert_eq!(c.get_or_try_init(1, load).await.unwrap(), "v");
        clock.advance(Duration::minutes(59));
        assert_eq!(c.get_or_try_init(1, load).await.unwrap(), "v");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        clock.advance(Duration::minutes(2));
        c.get_or_try_init(1, load).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let clock = Arc::new(ManualClock::new(datetime!(2020-01-01 0:00 UTC)));
        let c = cache(clock);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let load = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok::<_, ()>("shared".to_string())
        };
        let (a, b, d) = tokio::join!(
            c.get_or_try_init(7, load),
            c.get_or_try_init(7, load),
            c.get_or_try_init(7, load)
        );
        assert_eq!(a.unwrap(), "shared");
        assert_eq!(b.unwrap(), "shared");
        assert_eq!(d.unwrap(), "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let clock = Arc::new(ManualClock::new(datetime!(2020-01-01 0:00 UTC)));
        let c = cache(clock);
        let first: Result<String, &str> = c.get_or_try_init(1, || async { Err("down") }).await;
        assert!(first.is_err());
        let second: Result<String, &str> =
            c.get_or_try_init(1, || async { Ok("up".to_string()) }).await;
        assert_eq!(second.unwrap(), "up");
    }

    #[tokio::test]
    async fn failed_slots_are_pruned() {
        let clock = Arc::new(ManualClock::new(datetime!(2020-01-01 0:00 UTC)));
        let c = cache(clock);
        for key in 1..=3 {
            let failed: Result<String, &str> = c.get_or_try_init(key, || async { Err("down") }).await;
            assert!(failed.is_err());
        }
        assert_eq!(c.len(), 1);
        c.get_or_try_init(9, || async { Ok::<_, &str>("ok".to_string()) })
            .await
            .unwrap();
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(datetime!(2020-01-01 0:00 UTC)));
        let c = cache(clock);
        c.get_or_try_init(1, || async { Ok::<_, ()>("a".to_string()) })
            .await
            .unwrap();
        let b = c
            .get_or_try_init(2, || async { Ok::<_, ()>("b".to_string()) })
            .await
            .unwrap();
        assert_eq!(b, "b");
        assert_eq!(c.len(), 2);
    }
}
