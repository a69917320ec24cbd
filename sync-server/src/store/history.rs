//! 变更历史查询服务
//!
//! 追加只发生在 [`StorageEngine::commit_update`] 的原子提交内；
//! 本服务只提供审计/回滚所需的只读查询。不删除、不压缩。

use std::sync::Arc;

use shared::ChangeHistoryEntry;

use super::engine::StorageEngine;
use crate::utils::AppResult;

/// 只读历史查询
#[derive(Debug, Clone)]
pub struct ChangeHistory {
    engine: Arc<dyn StorageEngine>,
}

impl ChangeHistory {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    /// 按版本号降序列出条目（审计/回滚界面使用）
    pub async fn list(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<ChangeHistoryEntry>> {
        self.engine.history(entity_id, limit).await
    }

    /// 返回产生指定版本的那一条条目
    ///
    /// 版本 1 是创建状态，没有条目，返回 None。
    pub async fn at(
        &self,
        entity_id: &str,
        version: u64,
    ) -> AppResult<Option<ChangeHistoryEntry>> {
        if version <= 1 {
            return Ok(None);
        }
        self.engine.history_at(entity_id, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryEngine;
    use serde_json::json;
    use shared::{Entity, EntityKind};
    use std::collections::BTreeMap;

    async fn seeded_history() -> ChangeHistory {
        let engine = Arc::new(MemoryEngine::new());
        let mut fields = BTreeMap::new();
        fields.insert("current_stock".to_string(), json!(10));
        engine
            .insert(Entity::new(EntityKind::Stock, "42", fields, "seeder"))
            .await
            .unwrap();

        for version in 2..=3u64 {
            let mut updated = Entity::new(EntityKind::Stock, "42", BTreeMap::new(), "tester");
            updated.version = version;
            let entry =
                ChangeHistoryEntry::new("42", version, shared::ChangeSet::new(), "tester", None);
            engine
                .commit_update("42", version - 1, updated, entry)
                .await
                .unwrap();
        }
        ChangeHistory::new(engine)
    }

    #[tokio::test]
    async fn test_at_returns_none_for_creation_version() {
        let history = seeded_history().await;
        // 版本 1 是创建状态，没有对应条目
        assert!(history.at("42", 1).await.unwrap().is_none());
        assert!(history.at("42", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_at_returns_matching_entry() {
        let history = seeded_history().await;
        let entry = history.at("42", 3).await.unwrap().unwrap();
        assert_eq!(entry.version, 3);
        assert!(history.at("42", 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_is_descending() {
        let history = seeded_history().await;
        let entries = history.list("42", None).await.unwrap();
        let versions: Vec<u64> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![3, 2]);

        let limited = history.list("42", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
