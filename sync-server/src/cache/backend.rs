//! 缓存后端抽象与内存实现
//!
//! 后端只负责存取与游标扫描；新鲜度判定、命中统计与错误隔离
//! 都在上层 [`CacheLayer`](super::CacheLayer) 完成。

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value, json};

use crate::utils::AppResult;

/// 缓存条目
///
/// 信封序列化形状（外部接口约定）：
/// - 对象载荷：`{ "_cached_at": <unix_ts>, ...字段... }`
/// - 其他载荷：`{ "_cached_at": <unix_ts>, "data": ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    /// 写入时间（Unix 秒）
    pub cached_at: i64,
    /// 写入时指定的存活秒数
    pub ttl_secs: u64,
    /// 不透明载荷
    pub data: Value,
}

impl CachedValue {
    pub fn new(data: Value, ttl_secs: u64) -> Self {
        Self {
            cached_at: chrono::Utc::now().timestamp(),
            ttl_secs,
            data,
        }
    }

    /// 新鲜度判定：`now - cached_at <= ttl`
    pub fn is_fresh(&self, now: i64) -> bool {
        now - self.cached_at <= self.ttl_secs as i64
    }

    /// 序列化为信封形状（后端写入时调用）
    pub fn to_envelope(&self) -> Value {
        match &self.data {
            Value::Object(fields) => {
                let mut envelope = Map::new();
                envelope.insert("_cached_at".to_string(), json!(self.cached_at));
                for (key, value) in fields {
                    envelope.insert(key.clone(), value.clone());
                }
                Value::Object(envelope)
            }
            other => json!({ "_cached_at": self.cached_at, "data": other }),
        }
    }

    /// 从信封形状还原（后端读取时调用）
    ///
    /// `ttl_secs` 由后端提供：真实缓存引擎用原生过期机制持有
    /// 存活时长，信封里只携带 `_cached_at` 与载荷。
    /// 缺少 `_cached_at` 的值视为不可解析，返回 None。
    pub fn from_envelope(envelope: &Value, ttl_secs: u64) -> Option<Self> {
        let obj = envelope.as_object()?;
        let cached_at = obj.get("_cached_at")?.as_i64()?;

        // 恰好 {_cached_at, data} 两个键 → 包装形状，其余 → 展平的对象载荷
        let data = if obj.len() == 2 && obj.contains_key("data") {
            obj.get("data")?.clone()
        } else {
            let mut fields = Map::new();
            for (key, value) in obj {
                if key != "_cached_at" {
                    fields.insert(key.clone(), value.clone());
                }
            }
            Value::Object(fields)
        };

        Some(Self {
            cached_at,
            ttl_secs,
            data,
        })
    }
}

/// 缓存后端特征
///
/// 实现可以是远端缓存引擎，也可以是进程内存。任何方法都允许
/// 返回传输错误；上层保证将其降级为 miss/no-op。
#[async_trait]
pub trait CacheBackend: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> AppResult<Option<CachedValue>>;

    /// 无条件覆盖
    async fn set(&self, key: &str, value: CachedValue) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 单批删除多个键
    async fn delete_many(&self, keys: &[String]) -> AppResult<u64>;

    /// 游标扫描匹配通配符的键
    ///
    /// `cursor = 0` 表示从头开始；返回的游标为 0 表示扫描结束。
    /// 每批最多返回 `count` 个键。
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> AppResult<(u64, Vec<String>)>;

    /// 当前条目数（观测用）
    async fn entry_count(&self) -> AppResult<u64>;
}

/// 通配符匹配（`*` 任意序列，`?` 任意单字符）
///
/// 迭代回溯实现，与常见缓存引擎的键模式语义一致。
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    let (mut p, mut k) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, k));
            p += 1;
        } else if let Some((sp, sk)) = star {
            p = sp + 1;
            k = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// 后端内的存储单元：信封 JSON + 存活时长
///
/// 真实缓存引擎存储的就是信封 JSON，存活时长走原生过期机制；
/// 内存实现把两者放在同一槽位。
#[derive(Debug)]
struct StoredEntry {
    ttl_secs: u64,
    envelope: Value,
}

/// In-process cache backend
///
/// 与真实引擎一致，按信封形状存储：写入时编码、读取时解码，
/// 保证内存与线缆两种后端走同一份序列化契约。
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: DashMap<String, StoredEntry>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> AppResult<Option<CachedValue>> {
        Ok(self
            .entries
            .get(key)
            .and_then(|entry| CachedValue::from_envelope(&entry.envelope, entry.ttl_secs)))
    }

    async fn set(&self, key: &str, value: CachedValue) -> AppResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                ttl_secs: value.ttl_secs,
                envelope: value.to_envelope(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> AppResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> AppResult<(u64, Vec<String>)> {
        // 快照排序保证游标在并发写入下仍然推进到结束
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();

        let start = cursor as usize;
        if start >= keys.len() {
            return Ok((0, Vec::new()));
        }

        let end = (start + count.max(1)).min(keys.len());
        let matched = keys[start..end]
            .iter()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        let next_cursor = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next_cursor, matched))
    }

    async fn entry_count(&self) -> AppResult<u64> {
        Ok(self.entries.len() as u64)
    }
}
