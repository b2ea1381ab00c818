// In-memory cache whose entries expire a fixed time after they were written.
// Expired entries are invisible to readers immediately and physically removed
// by a periodic sweep.
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

pub struct ExpiringCache<K, V> {
    ttl: Duration,
    items: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        ExpiringCache {
            ttl,
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value if present and not yet expired. Expired entries are
    /// left in place for the sweep.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let read_guard = self.items.read();
        let entry = read_guard.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Inserts or replaces the entry, starting a fresh TTL window.
    pub fn set(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.items.write().insert(key, entry);
    }

    /// Returns whether an entry (expired or not) was removed.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.items.write().remove(key).is_some()
    }

    /// Number of physically stored entries, including expired ones.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut write_guard = self.items.write();
        let before = write_guard.len();
        write_guard.retain(|_, entry| now <= entry.expires_at);
        before - write_guard.len()
    }

    /// Sweeps every `every` until `stop` fires or its sender is dropped.
    pub async fn run_sweep(&self, every: Duration, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired cache entries");
                    }
                }
                _ = &mut stop => break,
            }
        }
    }
}

/// Handle to a background sweep task. Dropping it also ends the task.
pub struct Sweeper {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn<K, V>(cache: Arc<ExpiringCache<K, V>>, every: Duration) -> Self
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { cache.run_sweep(every, stop_rx).await });
        Sweeper { stop, handle }
    }

    /// Signals the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "cache sweep task failed");
        }
    }
}
