//! 字段级变更与历史条目
//!
//! 变更历史是审计追踪的唯一来源：条目一旦写入不可变、不可删除。
//! 对同一实体，条目的 `version` 构成从 2 开始的无间隙递增序列
//! （版本 1 为创建状态，没有对应条目）。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 单字段差异
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta {
    /// 变更前的值
    pub old: Value,
    /// 变更后的值
    pub new: Value,
}

/// 字段名 -> 差异 的映射
///
/// 仅记录实际发生变化的字段；无变化的写入产生空映射
/// （版本仍然递增，与 last-write-wins 语义一致）。
pub type ChangeSet = BTreeMap<String, FieldDelta>;

/// 回滚标记
///
/// 回滚不删除历史条目，而是追加一条新条目并打上此标记。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMarker {
    /// 回滚前的版本（即当时的当前版本）
    pub from_version: u64,
    /// 回滚目标版本
    pub to_version: u64,
}

/// 变更历史条目（不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    /// 实体 ID
    pub entity_id: String,
    /// 此条目产生的版本号
    pub version: u64,
    /// 字段级差异
    pub changes: ChangeSet,
    /// 写入者标识
    pub changed_by: String,
    /// 可选说明（回滚时为 "rollback to version N"）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 回滚标记（普通更新为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackMarker>,
    /// 写入时间（Unix 毫秒）
    pub created_at: i64,
}

impl ChangeHistoryEntry {
    pub fn new(
        entity_id: impl Into<String>,
        version: u64,
        changes: ChangeSet,
        changed_by: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            version,
            changes,
            changed_by: changed_by.into(),
            reason,
            rollback: None,
            created_at: crate::now_millis(),
        }
    }

    /// 标记为回滚条目
    pub fn with_rollback(mut self, from_version: u64, to_version: u64) -> Self {
        self.rollback = Some(RollbackMarker {
            from_version,
            to_version,
        });
        self
    }

    /// 是否回滚条目
    pub fn is_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}
