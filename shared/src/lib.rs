//! 共享类型库 - 同步核心的值对象
//!
//! 本 crate 定义跨进程、跨连接边界传输的所有值类型：
//!
//! - **实体** (`entity`): 版本化实体及其两种实例（库存记录、目录记录）
//! - **变更** (`change`): 字段级差异、变更历史条目、回滚标记
//! - **事件** (`event`): 变更事件信封与分布式中继帧
//! - **消息** (`message`): Socket 消息信封与频道定义
//!
//! 所有类型均为纯值对象，不持有任何运行时资源。

pub mod change;
pub mod entity;
pub mod event;
pub mod message;

pub use change::{ChangeHistoryEntry, ChangeSet, FieldDelta, RollbackMarker};
pub use entity::{Entity, EntityKind};
pub use event::{ChangeEvent, ChangePayload, RelayFrame};
pub use message::{Channel, SocketMessage};

/// 当前 Unix 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 当前 Unix 时间戳（秒，浮点）
///
/// 用于事件与 Socket 消息信封中的 `timestamp` 字段。
pub fn now_f64() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
