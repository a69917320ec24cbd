//! 变更事件与分布式中继帧
//!
//! 事件是瞬态值对象，本子系统不持久化。
//! 本地分发与跨进程中继使用完全相同的信封：
//!
//! ```json
//! { "type": "record_updated",
//!   "data": { "entity_id": "42", "changes": {...},
//!             "updated_by": "alice", "new_version": 3 },
//!   "timestamp": 1714000000.123 }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::change::ChangeSet;
use crate::entity::{Entity, EntityKind};

/// 事件载荷 - 实体 ID + 变更摘要 + 操作者 + 新版本号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    pub entity_id: String,
    pub kind: EntityKind,
    pub changes: ChangeSet,
    pub updated_by: String,
    pub new_version: u64,
}

/// 变更事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// 事件类型，订阅方按此过滤
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ChangePayload,
    /// Unix 时间戳（秒，浮点）
    pub timestamp: f64,
}

impl ChangeEvent {
    /// 从一次成功提交的实体构造变更事件
    pub fn record_changed(entity: &Entity, changes: ChangeSet) -> Self {
        Self {
            event_type: entity.kind.event_type().to_string(),
            data: ChangePayload {
                entity_id: entity.id.clone(),
                kind: entity.kind,
                changes,
                updated_by: entity.last_updated_by.clone(),
                new_version: entity.version,
            },
            timestamp: crate::now_f64(),
        }
    }
}

/// 中继帧 - 事件跨进程传输的信封
///
/// `origin` 为发布进程的标识；本地分发已在发布前同步完成，
/// 监听端据此跳过自己发布的帧，避免重复分发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub origin: Uuid,
    pub event: ChangeEvent,
}

impl RelayFrame {
    pub fn new(origin: Uuid, event: ChangeEvent) -> Self {
        Self { origin, event }
    }
}
