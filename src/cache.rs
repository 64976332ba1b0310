use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Last known good value for one resource key, plus freshness bookkeeping.
/// Entries are replaced wholesale under the lock, so a reader never observes
/// a partially-updated record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: JsonValue,
    pub updated_ts: f64,
    pub stale: bool,
    #[serde(skip)]
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub ts: f64,
    pub value: f64,
}

/// Keyed mirror of the latest fetch results. Constructed once per session and
/// passed explicitly to consumers; there is no module-level singleton.
///
/// Writes are last-write-wins per key, gated on a generation counter so a
/// fetch superseded by newer params has its result discarded rather than
/// applied out of order. A failed refresh keeps the last good value and only
/// flips the stale flag.
#[derive(Clone)]
pub struct MirrorCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    series: Arc<RwLock<HashMap<String, VecDeque<Sample>>>>,
    next_generation: Arc<AtomicU64>,
    series_window: usize,
}

impl MirrorCache {
    pub fn new(series_window: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            series: Arc::new(RwLock::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(1)),
            series_window: series_window.max(2),
        }
    }

    /// Allocate the generation for a refresh about to start. Results carrying
    /// an older generation than the entry's current one are dropped.
    pub fn begin_refresh(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns false when the write was superseded and discarded.
    pub fn store_fresh(&self, key: &str, generation: u64, value: JsonValue, ts: f64) -> bool {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key) {
            if existing.generation > generation {
                log::debug!("cache.superseded key={} generation={}", key, generation);
                return false;
            }
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                updated_ts: ts,
                stale: false,
                generation,
            },
        );
        true
    }

    /// Keep the last known good value, mark it stale.
    pub fn mark_stale(&self, key: &str) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.stale = true;
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn series_keys(&self) -> Vec<String> {
        self.series.read().keys().cloned().collect()
    }

    // ---- Time-stamped numeric series (per key, bounded window) ----

    pub fn push_sample(&self, key: &str, ts: f64, value: f64) {
        let mut series = self.series.write();
        let q = series.entry(key.to_string()).or_default();
        q.push_back(Sample { ts, value });
        while q.len() > self.series_window {
            q.pop_front();
        }
    }

    /// Oldest-first copy of the retained samples for a key.
    pub fn series(&self, key: &str) -> Vec<Sample> {
        self.series
            .read()
            .get(key)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Mean over the most recent `n` samples. None when the series is empty.
    pub fn moving_average(&self, key: &str, n: usize) -> Option<f64> {
        let series = self.series.read();
        let q = series.get(key)?;
        if q.is_empty() || n == 0 {
            return None;
        }
        let tail: Vec<f64> = q.iter().rev().take(n).map(|s| s.value).collect();
        Some(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// Sample standard deviation over the most recent `n` samples. Needs at
    /// least two samples.
    pub fn volatility(&self, key: &str, n: usize) -> Option<f64> {
        let series = self.series.read();
        let q = series.get(key)?;
        let tail: Vec<f64> = q.iter().rev().take(n).map(|s| s.value).collect();
        if tail.len() < 2 {
            return None;
        }
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let var = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (tail.len() - 1) as f64;
        Some(var.sqrt())
    }
}
