//! Output Cache: a bounded `fingerprint → entry` mapping with
//! at-most-one-in-flight-build semantics, LRU eviction and TTL expiry.
//!
//! An LRU-bounded map guarding concurrent writers with an in-flight
//! marker, generalized from "job state" to "cached agent output".

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 512;
const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Stable hash of `(normalizedPrompt, provider)`.
pub fn fingerprint(prompt: &str, provider: &str) -> String {
    let normalized = prompt.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(provider.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub provider: String,
    pub output: String,
    pub confidence: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub hit_rate: f64,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Most-recently-used fingerprint at the back.
    order: VecDeque<String>,
    in_flight: HashMap<String, Arc<Notify>>,
    hits: u64,
    misses: u64,
}

/// What a caller gets back from [`OutputCache::acquire`]: either an
/// existing (possibly freshly-built) entry, or ownership of the build —
/// the caller must eventually call [`BuildGuard::complete`], or dropping
/// it without completing releases the marker so the next caller retries
///.
pub enum Acquisition<'a> {
    Hit(CacheEntry),
    Owner(BuildGuard<'a>),
}

pub struct BuildGuard<'a> {
    cache: &'a OutputCache,
    fingerprint: String,
    provider: String,
    completed: bool,
}

impl<'a> BuildGuard<'a> {
    pub async fn complete(mut self, output: String, confidence: u8) -> CacheEntry {
        self.completed = true;
        self.cache.put_inner(&self.fingerprint, &self.provider, output, confidence)
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let notify = {
            let mut inner = self.cache.inner.lock().unwrap();
            inner.in_flight.remove(&self.fingerprint)
        };
        if let Some(notify) = notify {
            debug!(fingerprint = %self.fingerprint, "build guard dropped without completing, releasing marker");
            notify.notify_waiters();
        }
    }
}

pub struct OutputCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl Default for OutputCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(DEFAULT_TTL_SECONDS))
    }
}

impl OutputCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                in_flight: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        (Utc::now() - entry.created_at).num_seconds() as u64 >= self.ttl.as_secs()
    }

    fn touch(order: &mut VecDeque<String>, fp: &str) {
        order.retain(|f| f != fp);
        order.push_back(fp.to_string());
    }

    /// `get(fp)`: returns the entry if present and unexpired.
    pub fn get(&self, fp: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(fp) {
            Some(entry) => self.is_expired(entry),
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            inner.entries.remove(fp);
            inner.order.retain(|f| f != fp);
            inner.misses += 1;
            return None;
        }
        Self::touch(&mut inner.order, fp);
        inner.hits += 1;
        inner.entries.get(fp).cloned()
    }

    /// `put(fp, output, confidence)`.
    pub fn put(&self, fp: &str, provider: &str, output: String, confidence: u8) -> CacheEntry {
        self.put_inner(fp, provider, output, confidence)
    }

    fn put_inner(&self, fp: &str, provider: &str, output: String, confidence: u8) -> CacheEntry {
        let entry = CacheEntry {
            fingerprint: fp.to_string(),
            provider: provider.to_string(),
            output,
            confidence,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.lock().unwrap();
        inner.entries.insert(fp.to_string(), entry.clone());
        Self::touch(&mut inner.order, fp);

        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
                debug!(fingerprint = %evicted, "evicted LRU cache entry");
            }
        }

        if let Some(notify) = inner.in_flight.remove(fp) {
            notify.notify_waiters();
        }
        entry
    }

    /// At-most-one-concurrent-build: a caller
    /// that finds no entry and no in-flight marker becomes the owner and
    /// must build; a caller that finds an in-flight marker waits for it to
    /// resolve and re-checks.
    pub async fn acquire(&self, fp: &str, provider: &str) -> Acquisition<'_> {
        loop {
            let waiter = {
                let mut inner = self.inner.lock().unwrap();
                if let Some(entry) = inner.entries.get(fp) {
                    if !self.is_expired(entry) {
                        Self::touch(&mut inner.order, fp);
                        inner.hits += 1;
                        return Acquisition::Hit(entry.clone());
                    }
                    inner.entries.remove(fp);
                    inner.order.retain(|f| f != fp);
                }

                if let Some(notify) = inner.in_flight.get(fp).cloned() {
                    Some(notify)
                } else {
                    inner.misses += 1;
                    let notify = Arc::new(Notify::new());
                    inner.in_flight.insert(fp.to_string(), notify);
                    None
                }
            };

            match waiter {
                Some(notify) => notify.notified().await,
                None => {
                    return Acquisition::Owner(BuildGuard {
                        cache: self,
                        fingerprint: fp.to_string(),
                        provider: provider.to_string(),
                        completed: false,
                    })
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let total = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            max_size: self.capacity,
            hit_rate: if total == 0 { 0.0 } else { inner.hits as f64 / total as f64 },
        }
    }
}
