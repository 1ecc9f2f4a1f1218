//! Read-through cache for balance lookups.
//!
//! Entries are only ever populated from committed reads and are dropped by the
//! transaction engine after each commit. Nothing on the write path reads from
//! here.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    pub tenant_id: Uuid,
    pub item_id: Uuid,
    pub location_id: Uuid,
}

impl BalanceKey {
    pub fn new(tenant_id: Uuid, item_id: Uuid, location_id: Uuid) -> Self {
        Self {
            tenant_id,
            item_id,
            location_id,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    qty_base: Decimal,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct BalanceCache {
    store: Arc<DashMap<BalanceKey, CacheEntry>>,
    stats: Arc<CacheStats>,
    ttl: Duration,
    capacity: usize,
    enabled: bool,
}

impl BalanceCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            stats: Arc::new(CacheStats::default()),
            ttl: Duration::from_secs(config.ttl_secs),
            capacity: config.capacity.max(1),
            enabled: config.enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        })
    }

    pub fn get(&self, key: &BalanceKey) -> Option<Decimal> {
        if !self.enabled {
            return None;
        }
        let hit = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.qty_base),
            _ => None,
        };
        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.store.remove_if(key, |_, entry| entry.is_expired());
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    pub fn put(&self, key: BalanceKey, qty_base: Decimal) {
        if !self.enabled {
            return;
        }
        if self.store.len() >= self.capacity && !self.store.contains_key(&key) {
            self.store.retain(|_, entry| !entry.is_expired());
            if self.store.len() >= self.capacity {
                // still full: evict one arbitrary entry
                let victim = self.store.iter().next().map(|entry| *entry.key());
                if let Some(victim) = victim {
                    self.store.remove(&victim);
                }
            }
        }
        self.store.insert(
            key,
            CacheEntry {
                qty_base,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &BalanceKey) {
        self.store.remove(key);
    }

    /// Drops every cached location balance of one item.
    pub fn invalidate_item(&self, tenant_id: Uuid, item_id: Uuid) {
        self.store
            .retain(|key, _| !(key.tenant_id == tenant_id && key.item_id == item_id));
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.hits.load(Ordering::Relaxed),
            self.stats.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config(ttl_secs: u64, capacity: usize) -> CacheConfig {
        CacheConfig {
            enabled: true,
            ttl_secs,
            capacity,
        }
    }

    #[test]
    fn put_then_get_hits() {
        let cache = BalanceCache::new(&config(30, 10));
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(cache.get(&key), None);
        cache.put(key, dec!(12.5));
        assert_eq!(cache.get(&key), Some(dec!(12.5)));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn zero_ttl_entries_expire() {
        let cache = BalanceCache::new(&config(0, 10));
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put(key, dec!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_item_only_drops_that_item() {
        let cache = BalanceCache::new(&config(30, 10));
        let tenant = Uuid::new_v4();
        let item = Uuid::new_v4();
        let other = Uuid::new_v4();
        cache.put(BalanceKey::new(tenant, item, Uuid::new_v4()), dec!(1));
        cache.put(BalanceKey::new(tenant, item, Uuid::new_v4()), dec!(2));
        let kept = BalanceKey::new(tenant, other, Uuid::new_v4());
        cache.put(kept, dec!(3));

        cache.invalidate_item(tenant, item);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&kept), Some(dec!(3)));
    }

    #[test]
    fn capacity_is_respected() {
        let cache = BalanceCache::new(&config(30, 2));
        for _ in 0..5 {
            cache.put(
                BalanceKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()),
                dec!(1),
            );
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = BalanceCache::disabled();
        let key = BalanceKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put(key, dec!(1));
        assert_eq!(cache.get(&key), None);
    }
}
