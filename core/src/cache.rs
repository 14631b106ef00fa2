//! Identifier → location cache with a debounced durable mirror.

use geoflag_protocol::Identifier;
use geoflag_protocol::PersistedLocation;
use geoflag_protocol::storage::LOCATION_CACHE_KEY;
use geoflag_protocol::storage::PersistedCache;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::EnricherConfig;
use crate::storage::KeyValueStore;

/// A resolved (or failed) lookup held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRecord {
    pub identifier: Identifier,
    pub location: Option<String>,
    pub cached_at: i64,
    pub expires_at: i64,
}

impl LocationRecord {
    fn is_hit(&self, now_ms: i64) -> bool {
        self.location.is_some() && self.expires_at > now_ms
    }

    fn to_persisted(&self) -> PersistedLocation {
        PersistedLocation {
            location: self.location.clone(),
            expiry: self.expires_at,
            cached_at: self.cached_at,
        }
    }
}

/// Process-wide location cache. Cloning shares the same entries.
#[derive(Clone)]
pub struct LocationCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: Mutex<HashMap<Identifier, LocationRecord>>,
    storage: Arc<dyn KeyValueStore>,
    ttl_ms: i64,
    debounce: Duration,
    flush_armed: AtomicBool,
    durable: AtomicBool,
    epoch: AtomicU64,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl LocationCache {
    /// Load live entries from `storage`. Never fails: an unreachable store
    /// yields an empty, memory-only cache.
    pub async fn load(storage: Arc<dyn KeyValueStore>, config: &EnricherConfig) -> Self {
        Self::load_at(storage, config, now_ms()).await
    }

    pub async fn load_at(
        storage: Arc<dyn KeyValueStore>,
        config: &EnricherConfig,
        now_ms: i64,
    ) -> Self {
        let cache = Self::empty(storage, config);
        let blob = match cache.inner.storage.get(LOCATION_CACHE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<PersistedCache>(value) {
                Ok(blob) => blob,
                Err(err) => {
                    warn!("Discarding unreadable location cache: {err}");
                    PersistedCache::new()
                }
            },
            Ok(None) => PersistedCache::new(),
            Err(err) => {
                warn!("Failed to load location cache: {err}");
                if err.is_permanent() {
                    cache.inner.durable.store(false, Ordering::SeqCst);
                }
                PersistedCache::new()
            }
        };

        let total = blob.len();
        let live: HashMap<Identifier, LocationRecord> = blob
            .into_iter()
            .filter(|(_, entry)| entry.is_live(now_ms))
            .map(|(identifier, entry)| {
                let record = LocationRecord {
                    identifier: identifier.clone(),
                    location: entry.location,
                    cached_at: entry.cached_at,
                    expires_at: entry.expiry,
                };
                (identifier, record)
            })
            .collect();
        info!("Loaded {} of {} cached locations", live.len(), total);
        *cache.inner.lock() = live;
        cache
    }

    fn empty(storage: Arc<dyn KeyValueStore>, config: &EnricherConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                storage,
                ttl_ms: i64::try_from(config.cache_ttl_ms).unwrap_or(i64::MAX),
                debounce: config.cache_flush_debounce(),
                flush_armed: AtomicBool::new(false),
                durable: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Cached location for `identifier`, if one is live.
    ///
    /// Null and expired entries are evicted here and reported as a miss.
    pub fn get(&self, identifier: &str) -> Option<String> {
        self.get_at(identifier, now_ms())
    }

    pub fn get_at(&self, identifier: &str, now_ms: i64) -> Option<String> {
        let mut entries = self.inner.lock();
        let record = entries.get(identifier)?;
        if record.is_hit(now_ms) {
            return record.location.clone();
        }
        debug!("Evicting stale cache entry for {identifier}");
        entries.remove(identifier);
        None
    }

    /// Record a resolution. Visible to readers immediately; persisted by the
    /// next debounced flush unless `location` is `None`.
    pub fn put(&self, identifier: &str, location: Option<String>) {
        let record = self.record(identifier, location);
        self.inner.lock().insert(identifier.to_string(), record);
        self.schedule_flush();
    }

    /// Number of times the cache was cleared.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Like [`put`](Self::put), but dropped when the cache was cleared since
    /// `epoch` was read. Returns whether the record was stored.
    pub fn put_if_epoch(&self, epoch: u64, identifier: &str, location: Option<String>) -> bool {
        let record = self.record(identifier, location);
        {
            let mut entries = self.inner.lock();
            if self.inner.epoch.load(Ordering::SeqCst) != epoch {
                debug!("Dropping stale lookup result for {identifier}");
                return false;
            }
            entries.insert(identifier.to_string(), record);
        }
        self.schedule_flush();
        true
    }

    fn record(&self, identifier: &str, location: Option<String>) -> LocationRecord {
        let now = now_ms();
        LocationRecord {
            identifier: identifier.to_string(),
            location,
            cached_at: now,
            expires_at: now.saturating_add(self.inner.ttl_ms),
        }
    }

    /// Raw in-memory record, without eviction.
    pub fn peek(&self, identifier: &str) -> Option<LocationRecord> {
        self.inner.lock().get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.inner.lock().contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn is_durable(&self) -> bool {
        self.inner.durable.load(Ordering::SeqCst)
    }

    /// Drop every entry, including the durable copy on the next flush.
    pub fn clear(&self) {
        {
            let mut entries = self.inner.lock();
            entries.clear();
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.schedule_flush();
    }

    /// Write the live snapshot now.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    fn schedule_flush(&self) {
        if !self.is_durable() || self.inner.flush_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.inner.flush_armed.store(false, Ordering::SeqCst);
            debug!("No runtime available; cache flush skipped");
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.flush_armed.store(false, Ordering::SeqCst);
            inner.flush().await;
        });
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<Identifier, LocationRecord>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn flush(&self) {
        if !self.durable.load(Ordering::SeqCst) {
            return;
        }
        let now = now_ms();
        let snapshot: PersistedCache = self
            .lock()
            .values()
            .filter(|record| record.is_hit(now))
            .map(|record| (record.identifier.clone(), record.to_persisted()))
            .collect();
        let count = snapshot.len();
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to serialize location cache: {err}");
                return;
            }
        };
        match self.storage.set(LOCATION_CACHE_KEY, value).await {
            Ok(()) => debug!("Persisted {count} cached locations"),
            Err(err) if err.is_permanent() => {
                self.durable.store(false, Ordering::SeqCst);
                warn!("Storage unavailable; location cache is now memory-only");
            }
            Err(err) => warn!("Failed to persist location cache: {err}"),
        }
    }
}
