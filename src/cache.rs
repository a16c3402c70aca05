//! Read-through cache with a freshness window.
//!
//! Entries live in memory and, when a directory is configured, in
//! `{dir}/{key}.json` as `{"updated": <unix secs>, "data": ...}` so a restart
//! does not cost upstream calls. Concurrent misses on one key share a per-key
//! lock, so at most one loader runs per key at a time. Locks go away with their
//! last waiter and stale entries are swept on every load.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<V> {
    pub updated: u64,
    pub data: V,
}

impl<V> Envelope<V> {
    pub fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.updated) < ttl.as_secs()
    }
}

pub struct TtlCache<V> {
    ttl: Duration,
    dir: Option<PathBuf>,
    entries: DashMap<String, Arc<Envelope<V>>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<V> TtlCache<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, dir: Option<PathBuf>) -> Self {
        Self {
            ttl,
            dir,
            entries: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Fresh in-memory value, no I/O.
    pub fn peek(&self, key: &str) -> Option<Arc<Envelope<V>>> {
        self.entries
            .get(key)
            .map(|e| e.value().clone())
            .filter(|e| e.is_fresh(unix_now(), self.ttl))
    }

    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<Arc<Envelope<V>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.peek(key) {
            return Ok(hit);
        }
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let res = {
            let _guard = lock.lock().await;
            self.fill(key, load).await
        };
        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        res
    }

    async fn fill<F, Fut>(&self, key: &str, load: F) -> Result<Arc<Envelope<V>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        // someone else may have filled it while we waited
        if let Some(hit) = self.peek(key) {
            debug!(key, "cache filled by concurrent loader");
            return Ok(hit);
        }
        if let Some(env) = self.read_file(key).await {
            debug!(key, "cache file hit");
            let env = Arc::new(env);
            self.entries.insert(key.to_string(), Arc::clone(&env));
            return Ok(env);
        }
        debug!(key, "cache miss");
        let env = Arc::new(Envelope {
            updated: unix_now(),
            data: load().await?,
        });
        self.write_file(key, &env).await;
        self.evict_stale();
        self.entries.insert(key.to_string(), Arc::clone(&env));
        Ok(env)
    }

    fn evict_stale(&self) {
        let now = unix_now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_fresh(now, self.ttl));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "stale cache entries dropped");
        }
    }

    fn file(&self, key: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{key}.json")))
    }

    async fn read_file(&self, key: &str) -> Option<Envelope<V>> {
        let path = self.file(key)?;
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice::<Envelope<V>>(&bytes) {
            Ok(env) if env.is_fresh(unix_now(), self.ttl) => Some(env),
            Ok(_) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable cache file");
                None
            }
        }
    }

    // best effort, a failed write only costs a refetch later
    async fn write_file(&self, key: &str, env: &Envelope<V>) {
        let Some(path) = self.file(key) else {
            return;
        };
        let res = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("json.part");
            tokio::fs::write(&tmp, serde_json::to_vec(env)?).await?;
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<_, crate::error::Error>(())
        }
        .await;
        if let Err(e) = res {
            warn!(path = %path.display(), error = %e, "failed to write cache file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Error;

    #[test]
    fn freshness_window() {
        let env = Envelope { updated: 1000, data: () };
        let ttl = Duration::from_secs(3600);
        assert!(env.is_fresh(1000, ttl));
        assert!(env.is_fresh(4599, ttl));
        assert!(!env.is_fresh(4600, ttl));
        // clock went backwards, still fresh
        assert!(env.is_fresh(10, ttl));
    }

    #[tokio::test]
    async fn second_call_within_window_does_not_load() {
        let cache = TtlCache::<u32>::new(Duration::from_secs(3600), None);
        let calls = &AtomicUsize::new(0);
        for _ in 0..2 {
            let v = cache
                .get_or_load("stats_1", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(v.data, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entries_reload() {
        let cache = TtlCache::<u32>::new(Duration::ZERO, None);
        let calls = &AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get_or_load("k", || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse() {
        let cache = TtlCache::<u32>::new(Duration::from_secs(60), None);
        let calls = &AtomicUsize::new(0);
        let load = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1)
        };
        let (a, b, c) = tokio::join!(
            cache.get_or_load("k", load),
            cache.get_or_load("k", load),
            cache.get_or_load("k", load),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn stale_entries_and_idle_locks_do_not_pile_up() {
        let cache = TtlCache::<u32>::new(Duration::ZERO, None);
        for uid in 0..50 {
            cache
                .get_or_load(&format!("stats_{uid}"), || async { Ok(1) })
                .await
                .unwrap();
        }
        assert_eq!(cache.entries.len(), 1);
        assert!(cache.locks.is_empty());
        let _ = cache
            .get_or_load("stats_x", || async { Err(Error::AccountNotFound(1)) })
            .await;
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache = TtlCache::<u32>::new(Duration::from_secs(60), None);
        let e = cache
            .get_or_load("k", || async { Err(Error::AccountNotFound(1)) })
            .await;
        assert!(matches!(e, Err(Error::AccountNotFound(1))));
        assert!(cache.peek("k").is_none());
    }

    #[tokio::test]
    async fn file_round_trip_yields_data_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = serde_json::json!({"stats": {"active_day_number": 300}, "avatars": [1, 2]});
        let env = Envelope {
            updated: unix_now(),
            data: data.clone(),
        };
        std::fs::write(dir.path().join("stats_123456789.json"), serde_json::to_vec(&env).unwrap()).unwrap();

        let cache = TtlCache::<serde_json::Value>::new(Duration::from_secs(3600), Some(dir.path().into()));
        let got = cache
            .get_or_load("stats_123456789", || async { Err(Error::NoSetu) })
            .await
            .unwrap();
        assert_eq!(got.data, data);
    }

    #[tokio::test]
    async fn stale_file_is_refetched_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats_1.json");
        let old = Envelope { updated: unix_now() - 7200, data: 1u32 };
        std::fs::write(&path, serde_json::to_vec(&old).unwrap()).unwrap();

        let cache = TtlCache::<u32>::new(Duration::from_secs(3600), Some(dir.path().into()));
        let got = cache.get_or_load("stats_1", || async { Ok(2) }).await.unwrap();
        assert_eq!(got.data, 2);
        let on_disk: Envelope<u32> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.data, 2);
        assert!(on_disk.is_fresh(unix_now(), Duration::from_secs(3600)));
    }
}
