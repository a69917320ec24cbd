//! 存储引擎抽象
//!
//! 提供可插拔的后备存储架构：
//! ```text
//!         ┌──────────────────────┐
//!         │  StorageEngine Trait │  ◄── 可插拔接口
//!         └──────────┬───────────┘
//!                    │
//!                    ▼
//!              MemoryEngine
//!              (同进程存储)
//! ```
//!
//! 引擎是唯一需要加锁纪律的共享资源：`commit_update` 必须以
//! 行级排他的方式原子地完成「校验版本 → 写入新行 → 追加历史」，
//! 锁的持有范围仅覆盖这一提交窗口。

use async_trait::async_trait;
use uuid::Uuid;

use shared::{ChangeHistoryEntry, Entity};

use crate::utils::AppResult;

/// 显式事务作用域令牌
///
/// 由 [`StorageEngine::begin`] 签发，作为参数显式传递，
/// 不做任何隐式的事务发现。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnToken(pub Uuid);

impl TxnToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxnToken {
    fn default() -> Self {
        Self::new()
    }
}

/// 存储引擎特征
///
/// 所有实现必须保证 `commit_update` 的原子性：
/// 行写入与历史追加要么都发生，要么都不发生。
#[async_trait]
pub trait StorageEngine: Send + Sync + std::fmt::Debug {
    /// 插入新实体（版本 1），ID 已存在时返回 Validation 错误
    async fn insert(&self, entity: Entity) -> AppResult<Entity>;

    /// 读取实体当前状态
    async fn load(&self, entity_id: &str) -> AppResult<Option<Entity>>;

    /// 原子提交一次版本化更新
    ///
    /// 在行级排他作用域内：
    /// 1. 校验当前版本 == `expected_version`，否则返回
    ///    `Conflict`（携带当前版本）或 `NotFound`
    /// 2. 写入 `updated` 行
    /// 3. 追加 `entry` 到该实体的历史序列
    async fn commit_update(
        &self,
        entity_id: &str,
        expected_version: u64,
        updated: Entity,
        entry: ChangeHistoryEntry,
    ) -> AppResult<Entity>;

    /// 按版本号降序列出历史条目
    async fn history(&self, entity_id: &str, limit: Option<usize>)
    -> AppResult<Vec<ChangeHistoryEntry>>;

    /// 返回产生指定版本的那一条历史条目（版本 1 无条目）
    async fn history_at(&self, entity_id: &str, version: u64)
    -> AppResult<Option<ChangeHistoryEntry>>;

    // ========== 事务作用域 ==========

    /// 开启事务作用域
    async fn begin(&self) -> AppResult<TxnToken>;

    /// 提交事务作用域
    async fn commit(&self, txn: TxnToken) -> AppResult<()>;

    /// 回滚事务作用域
    async fn rollback_txn(&self, txn: TxnToken) -> AppResult<()>;
}
