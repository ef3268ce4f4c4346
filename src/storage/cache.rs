//! 翻译与分析结果缓存
//!
//! 缓存键由操作类型、变体（语言对或提示词版本与模型）和规范化后的文本计算，
//! 值是译文或已校验分析结果的 JSON。过期条目在查找时惰性删除。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::constants;

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Translate,
    Analyze,
}

impl CacheOperation {
    fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Translate => "translate",
            CacheOperation::Analyze => "analyze",
        }
    }
}

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `variant` 对翻译是 `"{src}>{tgt}"`，对分析是 `"{prompt_version}:{model}"`
    pub fn new(operation: CacheOperation, text: &str, variant: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(operation.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(variant.as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_text(text).as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 去掉首尾空白，合并连续空白并转小写
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    /// 检查条目是否过期
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// 缓存统计信息
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_entries: usize,
    pub capacity: usize,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// 计算缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_requests as f64
        }
    }

    /// 填充率
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.total_entries as f64 / self.capacity as f64
        }
    }
}

/// 结果缓存后端
///
/// 异步接口，远程后端不会阻塞 worker。`put` 幂等，后写者胜出。
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<String>;

    async fn put(&self, key: CacheKey, value: String, ttl: Duration);

    async fn size(&self) -> usize;

    /// 删除过期条目并按 LRU 淘汰到容量以内，返回删除数量
    async fn evict_if_over_capacity(&self) -> usize;

    async fn stats(&self) -> CacheStats;
}

// ============================================================================
// 进程内实现
// ============================================================================

struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    stats: CacheStats,
}

/// 进程内 LRU 缓存
pub struct LocalResultCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl Default for LocalResultCache {
    fn default() -> Self {
        Self::new(constants::DEFAULT_CACHE_CAPACITY)
    }
}

impl LocalResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 清空缓存
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
        state.stats.total_entries = 0;
    }

    fn evict_locked(state: &mut CacheState, capacity: usize) -> usize {
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.entries.pop(key);
        }
        state.stats.expirations += expired.len() as u64;

        let mut evicted = 0;
        while state.entries.len() > capacity {
            if state.entries.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        state.stats.evictions += evicted as u64;
        state.stats.total_entries = state.entries.len();

        expired.len() + evicted
    }
}

#[async_trait]
impl ResultCache for LocalResultCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        let mut state = self.state.lock().await;
        state.stats.total_requests += 1;

        let lookup = state
            .entries
            .get(key)
            .map(|entry| (entry.is_expired(), entry.value.clone()));

        let hit = match lookup {
            Some((false, value)) => Some(value),
            Some((true, _)) => {
                state.entries.pop(key);
                state.stats.expirations += 1;
                state.stats.total_entries = state.entries.len();
                None
            }
            None => None,
        };

        if hit.is_some() {
            state.stats.cache_hits += 1;
        } else {
            state.stats.cache_misses += 1;
        }
        hit
    }

    async fn put(&self, key: CacheKey, value: String, ttl: Duration) {
        let mut state = self.state.lock().await;
        state.entries.put(key, CacheEntry::new(value, ttl));

        if state.entries.len() > self.capacity {
            let removed = Self::evict_locked(&mut state, self.capacity);
            tracing::debug!("缓存超出容量，已淘汰 {} 个条目", removed);
        }
        state.stats.total_entries = state.entries.len();
    }

    async fn size(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    async fn evict_if_over_capacity(&self) -> usize {
        let mut state = self.state.lock().await;
        Self::evict_locked(&mut state, self.capacity)
    }

    async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.total_entries = state.entries.len();
        stats
    }
}
