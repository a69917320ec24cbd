//! 缓存层 - 尽力而为的读加速
//!
//! 缓存永远不是事实来源。任何后端传输错误都在本层吞掉并记录
//! 日志，读降级为 miss、写降级为 no-op：缓存故障只能表现为
//! 「总是重算」，绝不能作为应用错误向上传播。
//!
//! # 新鲜度不变量
//!
//! 读命中当且仅当 `now - cached_at <= ttl`；过期条目按 miss
//! 处理并被主动删除。
//!
//! # 键形状（外部接口约定）
//!
//! | 用途 | 形状 | 示例 |
//! |------|------|------|
//! | 单实体 | `<domain>:<id>` | `part_detail:42` |
//! | 列表失效 | `<domain>_list:*` | `part_list:*` |

pub mod backend;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, warn};

pub use backend::{CacheBackend, CachedValue, MemoryCacheBackend};

/// 缓存观测统计
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entry_count: u64,
}

/// 缓存层
#[derive(Debug)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    /// 游标扫描的单批大小
    scan_batch: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, scan_batch: usize) -> Self {
        Self {
            backend,
            scan_batch: scan_batch.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 读取，遵守新鲜度不变量
    ///
    /// 过期条目视为不存在并被主动删除；后端错误降级为 miss。
    pub async fn get(&self, key: &str) -> Option<Value> {
        let entry = match self.backend.get(key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(key = %key, error = %err, "Cache get failed, degrading to miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let now = chrono::Utc::now().timestamp();
        if !entry.is_fresh(now) {
            debug!(key = %key, age = now - entry.cached_at, "Stale cache entry evicted");
            if let Err(err) = self.backend.delete(key).await {
                warn!(key = %key, error = %err, "Failed to evict stale entry");
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.data)
    }

    /// 无条件覆盖写入
    pub async fn set(&self, key: &str, payload: Value, ttl_secs: u64) {
        let value = CachedValue::new(payload, ttl_secs);
        if let Err(err) = self.backend.set(key, value).await {
            warn!(key = %key, error = %err, "Cache set failed, skipping");
        }
    }

    /// 删除单个精确键
    pub async fn invalidate(&self, key: &str) {
        if let Err(err) = self.backend.delete(key).await {
            warn!(key = %key, error = %err, "Cache invalidate failed, skipping");
        } else {
            debug!(key = %key, "Cache key invalidated");
        }
    }

    /// 按通配符批量失效
    ///
    /// 游标扫描（有界批次，循环至游标归零）收集所有匹配键，
    /// 然后单批删除。返回删除的键数；后端错误降级为 no-op。
    pub async fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            match self.backend.scan(cursor, pattern, self.scan_batch).await {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Err(err) => {
                    warn!(pattern = %pattern, error = %err, "Cache scan failed, skipping invalidation");
                    return 0;
                }
            }
        }

        if keys.is_empty() {
            return 0;
        }
        match self.backend.delete_many(&keys).await {
            Ok(removed) => {
                debug!(pattern = %pattern, removed, "Pattern invalidation completed");
                removed
            }
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "Cache batch delete failed, skipping");
                0
            }
        }
    }

    /// 观测统计
    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        let entry_count = self.backend.entry_count().await.unwrap_or_else(|err| {
            warn!(error = %err, "Cache entry_count failed");
            0
        });
        CacheStats {
            hits,
            misses,
            hit_rate,
            entry_count,
        }
    }
}
