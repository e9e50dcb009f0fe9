//! Size-bounded byte cache with idle-time expiry.
//!
//! Entries are ordered by last touch. Growing past `max_size` evicts the
//! least recently touched entries; entries untouched for longer than
//! `expiration` are dropped by [`ExpiringCache::expire_now`], which a
//! background thread runs on an interval. Both paths report each dropped key
//! to the eviction callback once the cache's own lock has been released, so
//! the callback may call back into the cache.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

/// Why an entry left the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// Untouched for longer than the expiration.
    Expired,
    /// Pushed out to make room.
    Capacity,
}

pub type EvictionCallback = Arc<dyn Fn(&str, EvictionReason) + Send + Sync>;

/// Point-in-time cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub bytes: u64,
    pub items: usize,
    /// Entries dropped by expiry since creation.
    pub expired: u64,
    /// Entries dropped for capacity since creation.
    pub evicted: u64,
}

/// An entry's bytes: growing while appended to, then frozen into a shared
/// buffer the first time they are read.
enum Data {
    Building(Vec<u8>),
    Shared(Bytes),
}

impl Data {
    fn len(&self) -> usize {
        match self {
            Self::Building(v) => v.len(),
            Self::Shared(b) => b.len(),
        }
    }

    fn extend(&mut self, chunk: &[u8]) {
        match self {
            Self::Building(v) => v.extend_from_slice(chunk),
            Self::Shared(b) => {
                let mut v = Vec::with_capacity(b.len() + chunk.len());
                v.extend_from_slice(b);
                v.extend_from_slice(chunk);
                *self = Self::Building(v);
            }
        }
    }

    fn share(&mut self) -> Bytes {
        let frozen = match self {
            Self::Shared(b) => return b.clone(),
            Self::Building(v) => Bytes::from(std::mem::take(v)),
        };
        *self = Self::Shared(frozen.clone());
        frozen
    }
}

struct Entry {
    data: Data,
    touched: Instant,
}

struct Inner {
    entries: LruCache<String, Entry>,
    bytes: u64,
    expired: u64,
    evicted: u64,
}

pub struct ExpiringCache {
    inner: Mutex<Inner>,
    max_size: u64,
    expiration: Duration,
    on_evict: RwLock<Option<EvictionCallback>>,
}

impl ExpiringCache {
    /// `max_size == 0` disables the size bound; a zero `expiration` disables
    /// expiry.
    pub fn new(max_size: u64, expiration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                bytes: 0,
                expired: 0,
                evicted: 0,
            }),
            max_size,
            expiration,
            on_evict: RwLock::new(None),
        }
    }

    pub fn set_eviction_callback(&self, callback: EvictionCallback) {
        *self.on_evict.write() = Some(callback);
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn fits(&self, len: u64) -> bool {
        self.max_size == 0 || len <= self.max_size
    }

    /// Store `data` under `key`, replacing any previous value. Returns
    /// `false` if `data` alone exceeds the size bound.
    pub fn set(&self, key: &str, data: impl Into<Bytes>) -> bool {
        let data: Bytes = data.into();
        if !self.fits(data.len() as u64) {
            return false;
        }
        let evicted = {
            let mut inner = self.inner.lock();
            inner.bytes += data.len() as u64;
            let entry = Entry {
                data: Data::Shared(data),
                touched: Instant::now(),
            };
            if let Some(old) = inner.entries.put(key.to_string(), entry) {
                inner.bytes -= old.data.len() as u64;
            }
            self.shrink(&mut inner)
        };
        self.notify(evicted, EvictionReason::Capacity);
        true
    }

    /// Store `data` only if `key` is absent. Returns `true` if it was stored.
    pub fn insert_if_absent(&self, key: &str, data: impl Into<Bytes>) -> bool {
        self.insert_if_absent_when(key, data, || true)
    }

    /// [`insert_if_absent`](Self::insert_if_absent), also requiring `keep`
    /// to hold. `keep` runs under the cache lock, so it must not call back
    /// into the cache.
    pub fn insert_if_absent_when(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        keep: impl FnOnce() -> bool,
    ) -> bool {
        let data: Bytes = data.into();
        if !self.fits(data.len() as u64) {
            return false;
        }
        let evicted = {
            let mut inner = self.inner.lock();
            if inner.entries.contains(key) || !keep() {
                return false;
            }
            inner.bytes += data.len() as u64;
            inner.entries.put(
                key.to_string(),
                Entry {
                    data: Data::Shared(data),
                    touched: Instant::now(),
                },
            );
            self.shrink(&mut inner)
        };
        self.notify(evicted, EvictionReason::Capacity);
        true
    }

    /// Append `chunk` to the value under `key`, creating it if absent.
    ///
    /// Returns `false` if the grown value would exceed the size bound. The
    /// entry being appended to is never the one evicted to make room.
    pub fn append(&self, key: &str, chunk: &[u8]) -> bool {
        let evicted = {
            let mut inner = self.inner.lock();
            let current = inner.entries.peek(key).map_or(0, |e| e.data.len() as u64);
            if !self.fits(current + chunk.len() as u64) {
                return false;
            }
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.data.extend(chunk);
                    entry.touched = Instant::now();
                }
                None => {
                    inner.entries.put(
                        key.to_string(),
                        Entry {
                            data: Data::Building(chunk.to_vec()),
                            touched: Instant::now(),
                        },
                    );
                }
            }
            inner.bytes += chunk.len() as u64;
            self.shrink(&mut inner)
        };
        self.notify(evicted, EvictionReason::Capacity);
        true
    }

    /// The value under `key`, sharing the cached buffer. Counts as a touch.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.get_mut(key)?;
        entry.touched = Instant::now();
        Some(entry.data.share())
    }

    /// Length of the value under `key`, without touching it.
    pub fn len_of(&self, key: &str) -> Option<usize> {
        self.inner.lock().entries.peek(key).map(|e| e.data.len())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Drop `key` without invoking the eviction callback.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.pop(key) {
            Some(entry) => {
                inner.bytes -= entry.data.len() as u64;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            bytes: inner.bytes,
            items: inner.entries.len(),
            expired: inner.expired,
            evicted: inner.evicted,
        }
    }

    /// Drop every entry idle for longer than the expiration. Returns how
    /// many were dropped.
    pub fn expire_now(&self) -> usize {
        if self.expiration.is_zero() {
            return 0;
        }
        let expired = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let keys: Vec<String> = inner
                .entries
                .iter()
                .rev()
                .take_while(|(_, e)| now.duration_since(e.touched) > self.expiration)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                if let Some(entry) = inner.entries.pop(key) {
                    inner.bytes -= entry.data.len() as u64;
                    inner.expired += 1;
                }
            }
            keys
        };
        let count = expired.len();
        self.notify(expired, EvictionReason::Expired);
        count
    }

    /// Run [`expire_now`](Self::expire_now) every `interval` on a background
    /// thread until the returned handle is stopped or dropped.
    pub fn spawn_expiry(self: &Arc<Self>, interval: Duration) -> std::io::Result<ExpiryHandle> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread = std::thread::Builder::new()
            .name("cache-expiry".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let Some(cache) = cache.upgrade() else { break };
                let n = cache.expire_now();
                if n > 0 {
                    tracing::debug!(expired = n, "expired cached objects");
                }
            })?;
        Ok(ExpiryHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Evict least recently touched entries until within bounds.
    fn shrink(&self, inner: &mut Inner) -> Vec<String> {
        let mut evicted = Vec::new();
        if self.max_size == 0 {
            return evicted;
        }
        while inner.bytes > self.max_size {
            let Some((key, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.bytes -= entry.data.len() as u64;
            inner.evicted += 1;
            evicted.push(key);
        }
        evicted
    }

    /// Must be called without `inner` locked.
    fn notify(&self, keys: Vec<String>, reason: EvictionReason) {
        if keys.is_empty() {
            return;
        }
        let Some(callback) = self.on_evict.read().clone() else {
            return;
        };
        for key in &keys {
            callback(key, reason);
        }
    }
}

impl std::fmt::Debug for ExpiringCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("max_size", &self.max_size)
            .field("expiration", &self.expiration)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Stops the background expiry thread when stopped or dropped.
pub struct ExpiryHandle {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ExpiryHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("cache expiry thread panicked");
            }
        }
    }
}

impl Drop for ExpiryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
