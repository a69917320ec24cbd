//! Memory 存储引擎实现 (同进程存储)
//!
//! 用于测试与单机运行。行与历史放在同一个 DashMap 槽位内，
//! `commit_update` 借助分片条目锁获得行级排他性，天然满足
//! 「不同实体的写入互不阻塞」的约束。

use async_trait::async_trait;
use dashmap::DashMap;

use shared::{ChangeHistoryEntry, Entity};

use super::engine::{StorageEngine, TxnToken};
use crate::utils::{AppError, AppResult};

/// 行槽位：实体当前状态 + 完整历史序列
#[derive(Debug)]
struct RowSlot {
    entity: Entity,
    history: Vec<ChangeHistoryEntry>,
}

/// In-process storage engine
#[derive(Debug, Default)]
pub struct MemoryEngine {
    rows: DashMap<String, RowSlot>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    /// 当前行数（观测用）
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn insert(&self, entity: Entity) -> AppResult<Entity> {
        use dashmap::mapref::entry::Entry;
        match self.rows.entry(entity.id.clone()) {
            Entry::Occupied(_) => Err(AppError::validation(format!(
                "entity {} already exists",
                entity.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(RowSlot {
                    entity: entity.clone(),
                    history: Vec::new(),
                });
                Ok(entity)
            }
        }
    }

    async fn load(&self, entity_id: &str) -> AppResult<Option<Entity>> {
        Ok(self.rows.get(entity_id).map(|slot| slot.entity.clone()))
    }

    async fn commit_update(
        &self,
        entity_id: &str,
        expected_version: u64,
        updated: Entity,
        entry: ChangeHistoryEntry,
    ) -> AppResult<Entity> {
        // get_mut 持有分片条目锁，提交窗口内该行排他
        let Some(mut slot) = self.rows.get_mut(entity_id) else {
            return Err(AppError::not_found(format!("entity {}", entity_id)));
        };

        if slot.entity.version != expected_version {
            return Err(AppError::Conflict {
                entity_id: entity_id.to_string(),
                expected: expected_version,
                current: slot.entity.version,
            });
        }

        slot.entity = updated.clone();
        slot.history.push(entry);
        Ok(updated)
    }

    async fn history(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<ChangeHistoryEntry>> {
        let Some(slot) = self.rows.get(entity_id) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<ChangeHistoryEntry> = slot.history.clone();
        entries.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn history_at(
        &self,
        entity_id: &str,
        version: u64,
    ) -> AppResult<Option<ChangeHistoryEntry>> {
        let Some(slot) = self.rows.get(entity_id) else {
            return Ok(None);
        };
        Ok(slot
            .history
            .iter()
            .find(|entry| entry.version == version)
            .cloned())
    }

    // 内存引擎的提交本身即原子，事务作用域只做日志记录
    async fn begin(&self) -> AppResult<TxnToken> {
        let txn = TxnToken::new();
        tracing::trace!(txn = %txn.0, "Transaction scope opened");
        Ok(txn)
    }

    async fn commit(&self, txn: TxnToken) -> AppResult<()> {
        tracing::trace!(txn = %txn.0, "Transaction scope committed");
        Ok(())
    }

    async fn rollback_txn(&self, txn: TxnToken) -> AppResult<()> {
        tracing::trace!(txn = %txn.0, "Transaction scope rolled back");
        Ok(())
    }
}
