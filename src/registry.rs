//! Process-wide registries of refcounted background monitors, keyed by [`crate::cluster_id`]
//! (the Cluster Topology Monitor) or by a derived router-service id (the Limitless Router
//! Monitor).
//!
//! Creation inserts refcount 1; each additional consumer increments; on [`Handle`] drop, the
//! count decrements, and when it reaches zero the monitor is removed from the map and shut
//! down cooperatively on its own task, matching the "Monitor registration entry" lifecycle in
//! the specification's data model.

use std::{collections::HashMap, hash::Hash, ops::Deref, sync::Mutex};

use async_trait::async_trait;

use crate::runtime;

/// A background monitor owned by a [`Registry`]. `shutdown` must be safe to call exactly once,
/// after which the monitor's task(s) are expected to have exited.
#[async_trait]
pub(crate) trait ManagedMonitor: Send + Sync + 'static {
    async fn shutdown(&self);
}

struct Slot<M> {
    refcount: u32,
    monitor: std::sync::Arc<M>,
}

/// A map from key to refcounted monitor. Registries are process-lifetime statics (see
/// `topology::monitor::registry` and `limitless::router::registry`), so every [`Handle`] it
/// hands out borrows it for `'static`.
pub(crate) struct Registry<K, M> {
    entries: Mutex<HashMap<K, Slot<M>>>,
}

impl<K, M> Registry<K, M>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    M: ManagedMonitor,
{
    pub(crate) const fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a handle to the monitor registered under `key`, creating one via `make` (and
    /// inserting it with refcount 1) if this is the first consumer. The second element of the
    /// return value is `true` exactly when `make` ran, i.e. this call created the monitor.
    pub(crate) fn acquire<F>(&'static self, key: K, make: F) -> (Handle<K, M>, bool)
    where
        F: FnOnce() -> std::sync::Arc<M>,
    {
        let mut entries = self.entries.lock().unwrap();
        let mut created = false;
        let slot = entries.entry(key.clone()).or_insert_with(|| {
            created = true;
            Slot {
                refcount: 0,
                monitor: make(),
            }
        });
        slot.refcount += 1;
        let monitor = slot.monitor.clone();
        drop(entries);
        (
            Handle {
                registry: self,
                key,
                monitor: Some(monitor),
            },
            created,
        )
    }

    fn release(&'static self, key: &K) {
        let shutting_down = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(key) {
                Some(slot) => {
                    slot.refcount -= 1;
                    if slot.refcount == 0 {
                        entries.remove(key).map(|slot| slot.monitor)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(monitor) = shutting_down {
            runtime::spawn(async move { monitor.shutdown().await });
        }
    }

    #[cfg(test)]
    fn refcount(&self, key: &K) -> u32 {
        self.entries.lock().unwrap().get(key).map(|s| s.refcount).unwrap_or(0)
    }
}

/// An RAII reference to a registered monitor. Dropping the last outstanding handle for a key
/// tears the monitor down cooperatively and erases it from the registry.
pub(crate) struct Handle<K, M>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    M: ManagedMonitor,
{
    registry: &'static Registry<K, M>,
    key: K,
    // Always `Some` until `Drop::drop` takes it; an `Option` only to allow moving the `Arc` out
    // without violating `Drop`'s `&mut self` signature.
    monitor: Option<std::sync::Arc<M>>,
}

impl<K, M> Deref for Handle<K, M>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    M: ManagedMonitor,
{
    type Target = M;

    fn deref(&self) -> &M {
        self.monitor.as_deref().expect("monitor present until drop")
    }
}

impl<K, M> Drop for Handle<K, M>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    M: ManagedMonitor,
{
    fn drop(&mut self) {
        self.monitor.take();
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use std::time::Duration;

    struct CountingMonitor {
        shutdowns: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ManagedMonitor for CountingMonitor {
        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    static REGISTRY: Registry<&'static str, CountingMonitor> = Registry::new();

    #[tokio::test]
    async fn refcount_tracks_live_handles_and_shuts_down_at_zero() {
        let shutdowns = Arc::new(AtomicU32::new(0));
        let (h1, created1) = REGISTRY.acquire("cluster-a", || {
            Arc::new(CountingMonitor {
                shutdowns: shutdowns.clone(),
            })
        });
        assert!(created1);
        let (h2, created2) = REGISTRY.acquire("cluster-a", || unreachable!("second acquire must reuse"));
        assert!(!created2);
        assert_eq!(REGISTRY.refcount(&"cluster-a"), 2);

        drop(h1);
        assert_eq!(REGISTRY.refcount(&"cluster-a"), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);

        drop(h2);
        // shutdown runs on a spawned task; give it a tick to complete.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(REGISTRY.refcount(&"cluster-a"), 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
