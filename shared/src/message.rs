//! Socket 消息信封与频道
//!
//! 推送给连接的每条消息都是
//! `{ "type": "<kind>", ...kind 专属字段..., "timestamp": <float> }`。
//! 已识别的消息种类：连接确认、记录变更通知、心跳、系统消息。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::change::ChangeSet;
use crate::entity::EntityKind;
use crate::event::ChangeEvent;

/// 连接频道
///
/// 每个连接注册到一个命名频道，同时隐式加入 `all`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// 顾客端连接
    Customer,
    /// 管理端连接
    Admin,
    /// 隐式全体频道
    All,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Admin => write!(f, "admin"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Socket 消息
///
/// 内部标记序列化，正好落在规定的信封形状上。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketMessage {
    /// 连接确认（握手成功后立即下发）
    Connected { channel: Channel, timestamp: f64 },
    /// 记录变更通知
    RecordChanged {
        event_type: String,
        entity_id: String,
        kind: EntityKind,
        changes: ChangeSet,
        updated_by: String,
        new_version: u64,
        timestamp: f64,
    },
    /// 心跳保活
    Heartbeat { timestamp: f64 },
    /// 普通系统消息
    System { message: String, timestamp: f64 },
}

impl SocketMessage {
    pub fn connected(channel: Channel) -> Self {
        Self::Connected {
            channel,
            timestamp: crate::now_f64(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: crate::now_f64(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::System {
            message: message.into(),
            timestamp: crate::now_f64(),
        }
    }

    /// 由变更事件派生记录变更通知
    pub fn from_event(event: &ChangeEvent) -> Self {
        Self::RecordChanged {
            event_type: event.event_type.clone(),
            entity_id: event.data.entity_id.clone(),
            kind: event.data.kind,
            changes: event.data.changes.clone(),
            updated_by: event.data.updated_by.clone(),
            new_version: event.data.new_version,
            timestamp: crate::now_f64(),
        }
    }
}
