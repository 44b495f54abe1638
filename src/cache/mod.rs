//! Bounded track cache keyed by catalog id.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::ErrorKind;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

use crate::error::{CatalogError, StorageError};
use crate::models::{Artwork, CacheEntry, Track, TrackId};
use crate::storage::{self, KeyValueStore, CACHE_INDEX_KEY};

/// LRU cache of tracks, artwork and local audio files
///
/// Safe to share between tasks. Lookups through [`TrackCache::get`] have no
/// side effects; [`TrackCache::get_or_fetch`] counts as an access and
/// coalesces concurrent fetches for the same id into one.
pub struct TrackCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    store: Option<Arc<dyn KeyValueStore>>,
    /// Files under this directory belong to the cache and are deleted with
    /// their entry
    download_dir: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<TrackId, Slot>,
    /// Access tick to id, oldest first
    recency: BTreeMap<u64, TrackId>,
    tick: u64,
    inflight: HashMap<TrackId, Arc<OnceCell<CacheEntry>>>,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, id: &TrackId) -> Option<CacheEntry> {
        let tick = self.next_tick();
        let slot = self.entries.get_mut(id)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, id.clone());
        Some(slot.entry.clone())
    }

    /// Insert or merge, returning the stored entry and the entries evicted to
    /// stay within capacity
    fn put(&mut self, id: TrackId, entry: CacheEntry, capacity: usize) -> (CacheEntry, Vec<CacheEntry>) {
        let tick = self.next_tick();
        let entry = match self.entries.remove(&id) {
            Some(previous) => {
                self.recency.remove(&previous.tick);
                merge(previous.entry, entry)
            }
            None => entry,
        };
        self.recency.insert(tick, id.clone());
        self.entries.insert(id, Slot { entry: entry.clone(), tick });

        // The newest tick is never the oldest, so `entry` survives
        let mut evicted = Vec::new();
        while self.entries.len() > capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&oldest) {
                evicted.push(slot.entry);
            }
        }
        (entry, evicted)
    }

    fn remove(&mut self, id: &TrackId) -> Option<CacheEntry> {
        let slot = self.entries.remove(id)?;
        self.recency.remove(&slot.tick);
        Some(slot.entry)
    }

    /// Entries from least to most recently used
    fn in_recency_order(&self) -> impl Iterator<Item = &CacheEntry> {
        self.recency
            .values()
            .filter_map(|id| self.entries.get(id).map(|slot| &slot.entry))
    }
}

/// Newer values win, but never lose a local file or artwork we already had
fn merge(previous: CacheEntry, newer: CacheEntry) -> CacheEntry {
    CacheEntry {
        track: newer.track,
        artwork: newer.artwork.or(previous.artwork),
        local_path: newer.local_path.or(previous.local_path),
    }
}

/// Persisted form of one entry; artwork stays in memory only
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    track: Track,
    local_path: Option<PathBuf>,
}

impl TrackCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
            store: None,
            download_dir: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Persist the index to `store` after every mutation
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn download_dir(&self) -> Option<&Path> {
        self.download_dir.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the persisted index, keeping its recency order
    pub fn restore(&self) -> Result<usize, StorageError> {
        let Some(store) = self.store.as_deref() else {
            return Ok(0);
        };
        let records: Vec<IndexRecord> =
            storage::load_json(store, CACHE_INDEX_KEY)?.unwrap_or_default();

        let mut inner = self.lock();
        let mut restored = 0;
        for record in records {
            let Some(id) = record.track.id.clone() else {
                continue;
            };
            let entry = CacheEntry {
                track: record.track,
                artwork: None,
                local_path: record.local_path.filter(|path| path.exists()),
            };
            // Evictions here only trim an index larger than the capacity
            inner.put(id, entry, self.capacity);
            restored += 1;
        }
        info!("Restored {} cached tracks", inner.entries.len());
        Ok(restored)
    }

    /// Look up an entry without touching its recency
    pub fn get(&self, id: &TrackId) -> Option<CacheEntry> {
        self.lock().entries.get(id).map(|slot| slot.entry.clone())
    }

    /// Mark an entry as used
    pub fn touch(&self, id: &TrackId) -> bool {
        let touched = self.lock().touch(id).is_some();
        if touched {
            self.persist();
        }
        touched
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Whether every id has an entry, e.g. a whole playlist
    pub fn contains_all<'a, I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a TrackId>,
    {
        let inner = self.lock();
        ids.into_iter().all(|id| inner.entries.contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Cached tracks, most recently used first
    pub fn tracks(&self) -> Vec<Track> {
        let inner = self.lock();
        let mut tracks: Vec<Track> = inner.in_recency_order().map(|e| e.track.clone()).collect();
        tracks.reverse();
        tracks
    }

    /// Cached tracks whose title or artist contains `query`
    pub fn search(&self, query: &str) -> Vec<Track> {
        self.tracks()
            .into_iter()
            .filter(|track| track.matches(query))
            .collect()
    }

    /// Explicit save-to-cache; tracks without an id cannot be cached
    pub fn insert(&self, entry: CacheEntry) -> bool {
        let Some(id) = entry.track.id.clone() else {
            debug!("Not caching '{}' without an id", entry.track.title);
            return false;
        };
        let (_, evicted) = self.lock().put(id, entry, self.capacity);
        self.finish_mutation(evicted);
        true
    }

    pub fn attach_local_file(&self, id: &TrackId, path: PathBuf) -> bool {
        let attached = match self.lock().entries.get_mut(id) {
            Some(slot) => {
                slot.entry.local_path = Some(path);
                true
            }
            None => false,
        };
        if attached {
            self.persist();
        }
        attached
    }

    pub fn set_artwork(&self, id: &TrackId, artwork: Artwork) -> bool {
        match self.lock().entries.get_mut(id) {
            Some(slot) => {
                slot.entry.artwork = Some(artwork);
                true
            }
            None => false,
        }
    }

    /// Remove an entry and any audio file the cache owns for it
    pub fn remove(&self, id: &TrackId) -> Option<CacheEntry> {
        let removed = self.lock().remove(id)?;
        self.delete_owned_file(&removed);
        self.persist();
        Some(removed)
    }

    /// Remove an entry but leave its audio file for the caller
    pub fn detach(&self, id: &TrackId) -> Option<CacheEntry> {
        let removed = self.lock().remove(id)?;
        self.persist();
        Some(removed)
    }

    /// Whether `path` lies in the directory whose files the cache owns
    pub fn owns_file(&self, path: &Path) -> bool {
        self.download_dir
            .as_deref()
            .map(|dir| path.starts_with(dir))
            .unwrap_or(false)
    }

    /// Move the entry cached under `from` to the id of `track`
    ///
    /// Recency and cached artifacts carry over, so afterwards exactly one
    /// entry exists for the track.
    pub fn rekey(&self, from: &TrackId, track: Track) -> bool {
        let Some(to) = track.id.clone() else {
            return false;
        };

        let moved = {
            let mut inner = self.lock();
            match inner.entries.remove(from) {
                Some(mut slot) => {
                    inner.recency.remove(&slot.tick);
                    slot.entry.track = track;
                    let entry = match inner.entries.remove(&to) {
                        Some(existing) => {
                            inner.recency.remove(&existing.tick);
                            merge(existing.entry, slot.entry)
                        }
                        None => slot.entry,
                    };
                    inner.recency.insert(slot.tick, to.clone());
                    inner.entries.insert(to.clone(), Slot { entry, tick: slot.tick });
                    true
                }
                None => false,
            }
        };

        if moved {
            debug!("Re-keyed cache entry {} -> {}", from, to);
            self.persist();
        }
        moved
    }

    /// Return the cached entry or fetch it once
    pub async fn get_or_fetch<F, Fut>(&self, id: &TrackId, fetcher: F) -> Result<CacheEntry, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, CatalogError>>,
    {
        self.fetch_unless(id, |_| true, fetcher).await
    }

    /// Like [`TrackCache::get_or_fetch`], but an entry without artwork counts
    /// as a miss
    pub async fn artwork_or_fetch<F, Fut>(&self, id: &TrackId, fetcher: F) -> Result<CacheEntry, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, CatalogError>>,
    {
        self.fetch_unless(id, |entry| entry.artwork.is_some(), fetcher).await
    }

    async fn fetch_unless<P, F, Fut>(
        &self,
        id: &TrackId,
        complete: P,
        fetcher: F,
    ) -> Result<CacheEntry, CatalogError>
    where
        P: Fn(&CacheEntry) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, CatalogError>>,
    {
        let lookup = {
            let mut inner = self.lock();
            match inner.touch(id) {
                Some(entry) if complete(&entry) => ControlFlow::Break(entry),
                _ => ControlFlow::Continue(inner.inflight.entry(id.clone()).or_default().clone()),
            }
        };
        let cell = match lookup {
            ControlFlow::Break(entry) => {
                // Recency is part of the persisted index
                self.persist();
                return Ok(entry);
            }
            ControlFlow::Continue(cell) => cell,
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!("Cache miss for {}, fetching", id);
                let fetched = fetcher().await?;
                Ok(self.store_fetched(id, fetched))
            })
            .await
            .cloned();

        let mut inner = self.lock();
        if inner
            .inflight
            .get(id)
            .map(|current| Arc::ptr_eq(current, &cell))
            .unwrap_or(false)
        {
            inner.inflight.remove(id);
        }

        result
    }

    fn store_fetched(&self, id: &TrackId, fetched: CacheEntry) -> CacheEntry {
        let (entry, evicted) = self.lock().put(id.clone(), fetched, self.capacity);
        self.finish_mutation(evicted);
        entry
    }

    fn finish_mutation(&self, evicted: Vec<CacheEntry>) {
        for entry in &evicted {
            debug!("Evicted '{}' from cache", entry.track.title);
            self.delete_owned_file(entry);
        }
        self.persist();
    }

    fn delete_owned_file(&self, entry: &CacheEntry) {
        let Some(path) = entry.local_path.as_deref() else {
            return;
        };
        if !self.owns_file(path) {
            return;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Deleted cached file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to delete cached file {}: {}", path.display(), err),
        }
    }

    fn persist(&self) {
        let Some(store) = self.store.as_deref() else {
            return;
        };

        let _ordering = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let records: Vec<IndexRecord> = self
            .lock()
            .in_recency_order()
            .map(|entry| IndexRecord {
                track: entry.track.clone(),
                local_path: entry.local_path.clone(),
            })
            .collect();

        if let Err(err) = storage::save_json(store, CACHE_INDEX_KEY, &records) {
            warn!("Failed to persist cache index: {}", err);
        }
    }
}
