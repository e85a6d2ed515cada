// Metadata cache - memoizes describe calls with TTL expiry and bounded size
//
// Two maps: single items and collections, each with its own TTL and entry cap.
// Over the cap the oldest 30% (by insertion time) of that map goes. Under memory
// pressure the least-hit 30% across both maps goes instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::extractors::{ExtendedVideoInfo, InfoExtractor, PlaylistInfo};
use super::traits::{Clock, KvStore};

/// Storage key for the persisted blob
pub const CACHE_STORE_KEY: &str = "metadata-cache";

const EVICT_FRACTION: f64 = 0.3;

/// Query parameters that never change what a URL points at
const TRACKING_PARAMS: &[&str] = &["si", "feature", "fbclid", "gclid", "igshid", "igsh", "ref_src"];

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub video_ttl: Duration,
    pub collection_ttl: Duration,
    pub max_video_entries: usize,
    pub max_collection_entries: usize,
    /// Persisted blobs larger than this are discarded on load
    pub max_persisted_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            video_ttl: Duration::from_secs(3600),
            collection_ttl: Duration::from_secs(1800),
            max_video_entries: 100,
            max_collection_entries: 50,
            max_persisted_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    /// Unix seconds when the entry was stored
    pub timestamp: i64,
    /// Unix seconds after which the entry is stale
    pub expiry: i64,
    /// Serialized-length estimate in bytes
    pub size: usize,
    pub hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub video_entries: usize,
    pub collection_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub estimated_bytes: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedCache {
    videos: Vec<CacheEntry<ExtendedVideoInfo>>,
    collections: Vec<CacheEntry<PlaylistInfo>>,
    hits: u64,
    misses: u64,
}

#[derive(Default)]
struct CacheState {
    videos: HashMap<String, CacheEntry<ExtendedVideoInfo>>,
    collections: HashMap<String, CacheEntry<PlaylistInfo>>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn estimated_bytes(&self) -> usize {
        self.videos.values().map(|e| e.size).sum::<usize>()
            + self.collections.values().map(|e| e.size).sum::<usize>()
    }
}

/// Canonical cache key: no fragment, no tracking parameters
pub fn normalize_key(url: &str) -> String {
    let trimmed = url.trim();
    let mut parsed = match url::Url::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => return trimmed.to_string(),
    };
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

fn estimate_size<T: Serialize>(payload: &T) -> usize {
    serde_json::to_vec(payload).map(|v| v.len()).unwrap_or(0)
}

fn lookup<T: Clone>(map: &mut HashMap<String, CacheEntry<T>>, key: &str, now: i64) -> Option<T> {
    let entry = map.get_mut(key)?;
    if now >= entry.expiry {
        return None;
    }
    entry.hits += 1;
    Some(entry.payload.clone())
}

fn insert<T: Serialize>(map: &mut HashMap<String, CacheEntry<T>>, key: String, payload: T, now: i64, ttl: Duration) {
    let size = estimate_size(&payload);
    map.insert(
        key.clone(),
        CacheEntry {
            key,
            payload,
            timestamp: now,
            expiry: now + ttl.as_secs() as i64,
            size,
            hits: 0,
        },
    );
}

fn evict_oldest<T>(map: &mut HashMap<String, CacheEntry<T>>, cap: usize) -> usize {
    if map.len() <= cap {
        return 0;
    }
    let count = ((map.len() as f64) * EVICT_FRACTION).ceil() as usize;
    let mut by_age: Vec<(i64, String)> = map.values().map(|e| (e.timestamp, e.key.clone())).collect();
    by_age.sort();
    for (_, key) in by_age.into_iter().take(count) {
        map.remove(&key);
    }
    count
}

fn prune<T>(map: &mut HashMap<String, CacheEntry<T>>, now: i64) -> usize {
    let before = map.len();
    map.retain(|_, e| now < e.expiry);
    before - map.len()
}

fn collect_entries<T>(entries: Vec<CacheEntry<T>>, now: i64) -> HashMap<String, CacheEntry<T>> {
    entries
        .into_iter()
        .filter(|e| now < e.expiry)
        .map(|e| (e.key.clone(), e))
        .collect()
}

pub struct MetadataCache {
    extractor: Arc<dyn InfoExtractor>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn KvStore>>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl MetadataCache {
    pub fn new(extractor: Arc<dyn InfoExtractor>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            extractor,
            clock,
            store: None,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Attach a store for `save` / `load`
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn now(&self) -> i64 {
        self.clock.now().unix_timestamp()
    }

    /// Describe a single item, from cache when fresh
    pub async fn get_video(&self, url: &str, force_refresh: bool) -> Result<ExtendedVideoInfo, DownloadError> {
        let key = normalize_key(url);
        {
            let mut state = self.state.lock();
            if !force_refresh {
                if let Some(info) = lookup(&mut state.videos, &key, self.now()) {
                    state.hits += 1;
                    debug!(key = %key, "metadata cache hit");
                    return Ok(info);
                }
            }
            state.misses += 1;
        }

        let info = self.extractor.describe(url).await?;

        let mut state = self.state.lock();
        insert(&mut state.videos, key, info.clone(), self.now(), self.config.video_ttl);
        let evicted = evict_oldest(&mut state.videos, self.config.max_video_entries);
        if evicted > 0 {
            debug!(evicted, "metadata cache over capacity, dropped oldest entries");
        }
        Ok(info)
    }

    /// Describe a collection, from cache when fresh
    pub async fn get_collection(&self, url: &str, force_refresh: bool) -> Result<PlaylistInfo, DownloadError> {
        let key = normalize_key(url);
        {
            let mut state = self.state.lock();
            if !force_refresh {
                if let Some(info) = lookup(&mut state.collections, &key, self.now()) {
                    state.hits += 1;
                    debug!(key = %key, "collection cache hit");
                    return Ok(info);
                }
            }
            state.misses += 1;
        }

        let info = self.extractor.describe_collection(url).await?;

        let mut state = self.state.lock();
        insert(&mut state.collections, key, info.clone(), self.now(), self.config.collection_ttl);
        evict_oldest(&mut state.collections, self.config.max_collection_entries);
        Ok(info)
    }

    /// Raw entry for a URL, expired or not
    pub fn video_entry(&self, url: &str) -> Option<CacheEntry<ExtendedVideoInfo>> {
        self.state.lock().videos.get(&normalize_key(url)).cloned()
    }

    /// Drop the least-hit 30% of all entries, both maps combined.
    /// Returns how many entries were removed.
    pub fn evict_under_pressure(&self) -> usize {
        let mut state = self.state.lock();

        // (hits, timestamp, is_collection, key): least used first, older first on ties
        let mut ranked: Vec<(u64, i64, bool, String)> = state
            .videos
            .values()
            .map(|e| (e.hits, e.timestamp, false, e.key.clone()))
            .chain(
                state
                    .collections
                    .values()
                    .map(|e| (e.hits, e.timestamp, true, e.key.clone())),
            )
            .collect();
        if ranked.is_empty() {
            return 0;
        }
        ranked.sort();

        let count = ((ranked.len() as f64) * EVICT_FRACTION).ceil() as usize;
        for (_, _, is_collection, key) in ranked.into_iter().take(count) {
            if is_collection {
                state.collections.remove(&key);
            } else {
                state.videos.remove(&key);
            }
        }
        info!(evicted = count, "metadata cache trimmed under memory pressure");
        count
    }

    /// Remove expired entries from both maps
    pub fn prune_expired(&self) -> usize {
        let now = self.now();
        let mut state = self.state.lock();
        prune(&mut state.videos, now) + prune(&mut state.collections, now)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.videos.clear();
        state.collections.clear();
        info!("metadata cache cleared");
    }

    pub fn estimated_bytes(&self) -> usize {
        self.state.lock().estimated_bytes()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            video_entries: state.videos.len(),
            collection_entries: state.collections.len(),
            hits: state.hits,
            misses: state.misses,
            estimated_bytes: state.estimated_bytes(),
        }
    }

    /// Write the cache to the attached store. No store, no-op.
    pub fn save(&self) -> Result<(), DownloadError> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };

        let blob = {
            let state = self.state.lock();
            let persisted = PersistedCache {
                videos: state.videos.values().cloned().collect(),
                collections: state.collections.values().cloned().collect(),
                hits: state.hits,
                misses: state.misses,
            };
            serde_json::to_vec(&persisted)?
        };

        if blob.len() > self.config.max_persisted_bytes {
            warn!(bytes = blob.len(), "metadata cache too large to persist, skipping");
            return Ok(());
        }
        store.put(CACHE_STORE_KEY, &blob)
    }

    /// Restore from the attached store. Corrupt or oversized blobs reset the
    /// cache to empty; expired entries are pruned. Returns the entry count.
    pub fn load(&self) -> usize {
        let store = match &self.store {
            Some(store) => store,
            None => return 0,
        };

        let restored = match store.get(CACHE_STORE_KEY) {
            Ok(Some(bytes)) if bytes.len() > self.config.max_persisted_bytes => {
                warn!(bytes = bytes.len(), "persisted metadata cache is oversized, starting empty");
                PersistedCache::default()
            }
            Ok(Some(bytes)) => decode_or_default(&bytes),
            Ok(None) => PersistedCache::default(),
            Err(e) => {
                warn!(error = %e, "failed to read persisted metadata cache");
                PersistedCache::default()
            }
        };

        let now = self.now();
        let mut state = self.state.lock();
        state.videos = collect_entries(restored.videos, now);
        state.collections = collect_entries(restored.collections, now);
        state.hits = restored.hits;
        state.misses = restored.misses;

        let count = state.videos.len() + state.collections.len();
        debug!(count, "metadata cache restored");
        count
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        warn!(error = %e, "persisted metadata cache is corrupt, starting empty");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::extractors::PlaylistEntry;
    use crate::downloader::traits::{ManualClock, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    #[derive(Default)]
    struct CountingExtractor {
        describes: AtomicUsize,
        collections: AtomicUsize,
    }

    #[async_trait]
    impl InfoExtractor for CountingExtractor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn describe(&self, url: &str) -> Result<ExtendedVideoInfo, DownloadError> {
            let n = self.describes.fetch_add(1, Ordering::SeqCst);
            if url.contains("broken") {
                return Err(DownloadError::ParseError("bad json".to_string()));
            }
            Ok(ExtendedVideoInfo {
                id: format!("id-{}", n),
                title: format!("title for {}", url),
                uploader: "someone".to_string(),
                duration_seconds: 60,
                thumbnail: String::new(),
                webpage_url: url.to_string(),
                is_live: false,
                formats: Vec::new(),
            })
        }

        async fn describe_collection(&self, url: &str) -> Result<PlaylistInfo, DownloadError> {
            self.collections.fetch_add(1, Ordering::SeqCst);
            Ok(PlaylistInfo {
                id: "PL".to_string(),
                title: "list".to_string(),
                uploader: "someone".to_string(),
                entries: vec![PlaylistEntry {
                    id: "a".to_string(),
                    title: "a".to_string(),
                    url: url.to_string(),
                    duration_seconds: None,
                }],
            })
        }
    }

    fn setup(config: CacheConfig) -> (Arc<CountingExtractor>, Arc<ManualClock>, MetadataCache) {
        let extractor = Arc::new(CountingExtractor::default());
        let clock = Arc::new(ManualClock::new(OffsetDateTime::UNIX_EPOCH + Duration::from_secs(1_000_000)));
        let cache = MetadataCache::new(extractor.clone(), clock.clone(), config);
        (extractor, clock, cache)
    }

    const URL: &str = "https://www.youtube.com/watch?v=jNQXAC9IVRw";

    #[tokio::test]
    async fn second_get_within_ttl_is_served_from_cache() {
        let (extractor, _clock, cache) = setup(CacheConfig::default());

        let first = cache.get_video(URL, false).await.unwrap();
        let second = cache.get_video(URL, false).await.unwrap();

        assert_eq!(extractor.describes.load(Ordering::SeqCst), 1);
        assert_eq!(serde_json::to_vec(&first).unwrap(), serde_json::to_vec(&second).unwrap());
        assert_eq!(cache.video_entry(URL).unwrap().hits, 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn ttl_expiry_scenario() {
        let (extractor, clock, cache) = setup(CacheConfig::default());

        cache.get_video(URL, false).await.unwrap();
        let stored = cache.video_entry(URL).unwrap();
        assert_eq!(stored.expiry - stored.timestamp, 3600);

        clock.advance(Duration::from_secs(10));
        cache.get_video(URL, false).await.unwrap();
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(3690));
        let refreshed = cache.get_video(URL, false).await.unwrap();
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.id, "id-1");

        let entry = cache.video_entry(URL).unwrap();
        assert_eq!(entry.timestamp, stored.timestamp + 3700);
        assert_eq!(entry.expiry, entry.timestamp + 3600);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let (extractor, _clock, cache) = setup(CacheConfig::default());
        cache.get_video(URL, false).await.unwrap();
        cache.get_video(URL, true).await.unwrap();
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_describe_is_not_cached() {
        let (extractor, _clock, cache) = setup(CacheConfig::default());
        let url = "https://youtu.be/broken";
        assert!(cache.get_video(url, false).await.is_err());
        assert!(cache.get_video(url, false).await.is_err());
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().video_entries, 0);
    }

    #[tokio::test]
    async fn tracking_params_share_an_entry() {
        let (extractor, _clock, cache) = setup(CacheConfig::default());
        cache.get_video("https://youtu.be/abc?si=xyz", false).await.unwrap();
        cache.get_video("https://youtu.be/abc#t=10", false).await.unwrap();
        cache.get_video("https://youtu.be/abc?utm_source=feed", false).await.unwrap();
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn normalize_keeps_meaningful_params() {
        assert_eq!(
            normalize_key(" https://www.youtube.com/watch?v=abc&feature=share&list=PL1#x "),
            "https://www.youtube.com/watch?v=abc&list=PL1"
        );
        assert_eq!(normalize_key("not a url"), "not a url");
    }

    #[tokio::test]
    async fn over_capacity_drops_oldest_thirty_percent() {
        let (_extractor, clock, cache) = setup(CacheConfig {
            max_video_entries: 10,
            ..CacheConfig::default()
        });

        for i in 0..11 {
            cache.get_video(&format!("https://youtu.be/v{}", i), false).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        // 11 entries > 10, ceil(11 * 0.3) = 4 oldest removed
        assert_eq!(cache.stats().video_entries, 7);
        assert!(cache.video_entry("https://youtu.be/v0").is_none());
        assert!(cache.video_entry("https://youtu.be/v3").is_none());
        assert!(cache.video_entry("https://youtu.be/v4").is_some());
        assert!(cache.video_entry("https://youtu.be/v10").is_some());
    }

    #[tokio::test]
    async fn pressure_eviction_drops_least_hit_across_both_maps() {
        let (_extractor, _clock, cache) = setup(CacheConfig::default());

        for i in 0..6 {
            let url = format!("https://youtu.be/v{}", i);
            cache.get_video(&url, false).await.unwrap();
            for _ in 0..(i + 1) {
                cache.get_video(&url, false).await.unwrap();
            }
        }
        let list = "https://www.youtube.com/playlist?list=PL1";
        cache.get_collection(list, false).await.unwrap();
        for _ in 0..10 {
            cache.get_collection(list, false).await.unwrap();
        }

        // 7 entries, ceil(7 * 0.3) = 3: v0, v1, v2 have the fewest hits
        assert_eq!(cache.evict_under_pressure(), 3);
        let stats = cache.stats();
        assert_eq!(stats.video_entries, 3);
        assert_eq!(stats.collection_entries, 1);
        assert!(cache.video_entry("https://youtu.be/v2").is_none());
        assert!(cache.video_entry("https://youtu.be/v3").is_some());
    }

    #[tokio::test]
    async fn collections_use_their_own_ttl() {
        let (extractor, clock, cache) = setup(CacheConfig::default());
        let list = "https://www.youtube.com/playlist?list=PL1";
        cache.get_collection(list, false).await.unwrap();
        clock.advance(Duration::from_secs(1801));
        cache.get_collection(list, false).await.unwrap();
        assert_eq!(extractor.collections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistence_roundtrip_prunes_expired() {
        let store = Arc::new(MemoryStore::new());
        let (_extractor, clock, cache) = setup(CacheConfig::default());
        let cache = cache.with_store(store.clone());

        cache.get_video("https://youtu.be/old", false).await.unwrap();
        clock.advance(Duration::from_secs(3000));
        cache.get_video("https://youtu.be/new", false).await.unwrap();
        cache.save().unwrap();

        let extractor = Arc::new(CountingExtractor::default());
        let restored = MetadataCache::new(extractor.clone(), clock.clone(), CacheConfig::default())
            .with_store(store);
        clock.advance(Duration::from_secs(1000));
        assert_eq!(restored.load(), 1);
        assert!(restored.video_entry("https://youtu.be/new").is_some());

        restored.get_video("https://youtu.be/new", false).await.unwrap();
        assert_eq!(extractor.describes.load(Ordering::SeqCst), 0);
        assert_eq!(restored.stats().misses, 2);
    }

    #[tokio::test]
    async fn corrupt_or_oversized_blob_resets_to_empty() {
        let store = Arc::new(MemoryStore::new());
        let (_extractor, _clock, cache) = setup(CacheConfig {
            max_persisted_bytes: 64,
            ..CacheConfig::default()
        });
        let cache = cache.with_store(store.clone());

        cache.get_video(URL, false).await.unwrap();
        store.put(CACHE_STORE_KEY, b"{not json").unwrap();
        assert_eq!(cache.load(), 0);
        assert_eq!(cache.stats().video_entries, 0);

        store.put(CACHE_STORE_KEY, &[b' '; 65]).unwrap();
        assert_eq!(cache.load(), 0);
    }

    #[tokio::test]
    async fn clear_and_prune() {
        let (_extractor, clock, cache) = setup(CacheConfig::default());
        cache.get_video(URL, false).await.unwrap();
        assert!(cache.estimated_bytes() > 0);

        clock.advance(Duration::from_secs(4000));
        assert_eq!(cache.prune_expired(), 1);

        cache.get_video(URL, false).await.unwrap();
        cache.clear();
        assert_eq!(cache.stats().video_entries, 0);
        assert_eq!(cache.estimated_bytes(), 0);
    }
}
