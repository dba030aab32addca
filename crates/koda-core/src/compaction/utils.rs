// Copyright (c) 2025-2026 Koda Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use koda_model::Message;

/// Number of distinct texts whose estimates stay cached.
const CACHE_CAPACITY: usize = 1024;

/// Deterministic cheap token proxy: `ceil(len / 4)` over the message text.
///
/// Estimates are cached by content hash — the compaction trigger re-scans
/// the same long tool outputs on every check, so the cache turns the hot
/// path into a hash lookup.
pub struct TokenEstimator {
    cache: Mutex<LruCache<u64, usize>>,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    pub fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let key = hasher.finish();

        let mut cache = self.cache.lock().expect("estimator cache poisoned");
        if let Some(cached) = cache.get(&key) {
            return *cached;
        }
        let estimate = text.len().div_ceil(4);
        cache.put(key, estimate);
        estimate
    }

    pub fn estimate_message(&self, message: &Message) -> usize {
        self.estimate(&message.content)
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
