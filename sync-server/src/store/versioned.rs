//! 版本化存储 - CAS 更新与回滚
//!
//! # 更新流程
//!
//! ```text
//! caller --(update, expected_version, changes)--> VersionedStore
//!   读取当前行 -> 计算差异 -> 构造新行(version+1) + 历史条目
//!   -> engine.commit_update (行级排他, 原子)
//! ```
//!
//! 缓存失效与事件发布由调用方在提交成功后触发，保持在锁外，
//! 以缩短锁持有时间。Conflict 不在本层重试，重试策略属于编排层。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use shared::{ChangeHistoryEntry, Entity, EntityKind};

use super::diff;
use super::engine::StorageEngine;
use crate::utils::{AppError, AppResult};

/// 一次成功更新的产出：新实体状态 + 对应历史条目
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub entity: Entity,
    pub entry: ChangeHistoryEntry,
}

/// 版本化存储
///
/// 对单个实体的并发写入用 `version` 上的 compare-and-swap 串行化。
#[derive(Debug, Clone)]
pub struct VersionedStore {
    engine: Arc<dyn StorageEngine>,
}

impl VersionedStore {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// 以版本 1 创建实体
    pub async fn create(
        &self,
        kind: EntityKind,
        id: impl Into<String>,
        fields: BTreeMap<String, Value>,
        actor: impl Into<String>,
    ) -> AppResult<Entity> {
        let entity = Entity::new(kind, id, fields, actor);
        let entity = self.engine.insert(entity).await?;
        debug!(entity_id = %entity.id, kind = %entity.kind, "Entity created at version 1");
        Ok(entity)
    }

    /// 读取实体当前状态
    pub async fn get(&self, entity_id: &str) -> AppResult<Entity> {
        self.engine
            .load(entity_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("entity {}", entity_id)))
    }

    /// CAS 更新
    ///
    /// 单次、锁作用域内的尝试；版本不匹配返回 `Conflict`
    /// （携带当前版本，调用方可刷新后重试），实体不存在返回
    /// `NotFound`。无变化的写入仍然递增版本，差异集为空。
    pub async fn update(
        &self,
        entity_id: &str,
        expected_version: u64,
        field_changes: BTreeMap<String, Value>,
        actor: &str,
        reason: Option<String>,
    ) -> AppResult<UpdateOutcome> {
        self.update_inner(entity_id, expected_version, field_changes, actor, reason, None)
            .await
    }

    async fn update_inner(
        &self,
        entity_id: &str,
        expected_version: u64,
        field_changes: BTreeMap<String, Value>,
        actor: &str,
        reason: Option<String>,
        rollback_to: Option<u64>,
    ) -> AppResult<UpdateOutcome> {
        if expected_version < 1 {
            return Err(AppError::validation("expected_version must be >= 1"));
        }

        let current = self
            .engine
            .load(entity_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("entity {}", entity_id)))?;

        for field in field_changes.keys() {
            if !current.kind.is_mutable_field(field) {
                return Err(AppError::validation(format!(
                    "field '{}' is not mutable on {} records",
                    field, current.kind
                )));
            }
        }

        // 提前冲突检查只是快速失败；真正的判定在 commit_update
        // 的排他作用域内再做一次
        if current.version != expected_version {
            return Err(AppError::Conflict {
                entity_id: entity_id.to_string(),
                expected: expected_version,
                current: current.version,
            });
        }

        let changes = diff::compute_changes(&current.fields, &field_changes);

        let mut updated = current.clone();
        for (field, value) in &field_changes {
            updated.fields.insert(field.clone(), value.clone());
        }
        updated.version = expected_version + 1;
        updated.last_updated_by = actor.to_string();
        updated.updated_at = shared::now_millis();

        let mut entry = ChangeHistoryEntry::new(
            entity_id,
            updated.version,
            changes,
            actor,
            reason,
        );
        if let Some(target) = rollback_to {
            entry = entry.with_rollback(current.version, target);
        }

        let entity = self
            .engine
            .commit_update(entity_id, expected_version, updated, entry.clone())
            .await?;

        info!(
            entity_id = %entity.id,
            version = entity.version,
            actor = %actor,
            changed_fields = entry.changes.len(),
            "Record updated"
        );
        Ok(UpdateOutcome { entity, entry })
    }

    /// 回滚到历史版本
    ///
    /// 按降序折叠 `version > target_version` 条目的 `old` 侧重建
    /// 目标版本的字段值，再以当前版本为期望版本执行一次普通更新。
    /// 目标版本不早于当前版本、或在历史中不存在时，不改变任何
    /// 状态直接失败（目标版本 1 恒为合法：创建状态）。
    pub async fn rollback(
        &self,
        entity_id: &str,
        target_version: u64,
        actor: &str,
    ) -> AppResult<Entity> {
        if target_version < 1 {
            return Err(AppError::rollback("target version must be >= 1"));
        }

        let current = self
            .engine
            .load(entity_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("entity {}", entity_id)))?;

        if target_version >= current.version {
            return Err(AppError::rollback(format!(
                "target version {} is not older than current version {}",
                target_version, current.version
            )));
        }

        let entries = self.engine.history(entity_id, None).await?;
        if target_version > 1 && !entries.iter().any(|e| e.version == target_version) {
            return Err(AppError::rollback(format!(
                "version {} not found in history of entity {}",
                target_version, entity_id
            )));
        }

        let reconstructed = diff::reconstruct_fields(&entries, target_version);
        let reason = format!("rollback to version {}", target_version);

        let outcome = self
            .update_inner(
                entity_id,
                current.version,
                reconstructed,
                actor,
                Some(reason),
                Some(target_version),
            )
            .await?;

        info!(
            entity_id = %entity_id,
            from_version = current.version,
            to_version = target_version,
            new_version = outcome.entity.version,
            "Record rolled back"
        );
        Ok(outcome.entity)
    }
}
