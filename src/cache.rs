use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use lru::LruCache;

#[derive(Clone)]
struct CacheItem<V> {
    value: V,
    expires_at: Instant,
}

/// 带容量上限与绝对过期时间的 LRU 缓存。
///
/// 命中的读取会把条目移到最近使用的位置；过期时间只在 `set` 时确定，读取不会续期。
pub struct BoundedCache<V> {
    cache: Mutex<LruCache<String, CacheItem<V>>>,
    max_age: Duration,
}

impl<V: Clone> BoundedCache<V> {
    pub fn new(max_items: usize, max_age: Duration) -> Self {
        let capacity = match NonZeroUsize::new(max_items) {
            Some(capacity) => capacity,
            None => {
                warn!("缓存容量被指定为0，该值将被改为1");
                NonZeroUsize::MIN
            }
        };
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheItem<V>>> {
        match self.cache.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    // 查询
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    // 放入
    pub fn set(&self, key: &str, value: V) {
        self.set_at(key, value, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut cache = self.lock();
        let expired = match cache.peek(key) {
            Some(item) => now >= item.expires_at,
            None => return None,
        };
        if expired {
            debug!("缓存条目已过期：{}", key);
            cache.pop(key);
            return None;
        }
        cache.get(key).map(|item| item.value.clone())
    }

    pub(crate) fn set_at(&self, key: &str, value: V, now: Instant) {
        let item = CacheItem {
            value,
            expires_at: now + self.max_age,
        };
        let mut cache = self.lock();
        // push 在容量已满时弹出最久未使用的条目，键相同时返回旧值
        if let Some((evicted, _)) = cache.push(key.to_string(), item) {
            if evicted != key {
                debug!("缓存已满，淘汰条目：{}", evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// 按从最久未使用到最近使用的顺序列出所有键（包括尚未被清理的过期条目）
    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().rev().map(|(key, _)| key.clone()).collect()
    }
}
