//! 内置事件订阅者
//!
//! 把缓存层与通知集线器接到事件总线上。本地写路径在提交后
//! 已直接做过一次缓存失效；订阅者路径对本地事件是幂等重复，
//! 对中继来的外来事件则是唯一的失效来源。

use std::sync::Arc;

use async_trait::async_trait;

use shared::{Channel, ChangeEvent, EntityKind, SocketMessage};

use super::bus::EventHandler;
use crate::cache::CacheLayer;
use crate::hub::NotificationHub;
use crate::utils::AppResult;

/// 记录变更 -> 缓存失效
#[derive(Debug)]
pub struct CacheInvalidator {
    cache: Arc<CacheLayer>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<CacheLayer>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl EventHandler for CacheInvalidator {
    fn name(&self) -> &'static str {
        "cache_invalidator"
    }

    async fn handle(&self, event: &ChangeEvent) -> AppResult<()> {
        let kind = event.data.kind;
        self.cache
            .invalidate(&kind.detail_key(&event.data.entity_id))
            .await;
        self.cache.invalidate_pattern(kind.list_pattern()).await;
        Ok(())
    }
}

/// 记录变更 -> Socket 广播
#[derive(Debug)]
pub struct HubForwarder {
    hub: Arc<NotificationHub>,
}

impl HubForwarder {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }

    /// 事件种类 -> 目标频道
    ///
    /// 库存变更只推给管理端；目录变更对所有连接可见。
    fn channel_for(kind: EntityKind) -> Channel {
        match kind {
            EntityKind::Stock => Channel::Admin,
            EntityKind::Catalog => Channel::All,
        }
    }
}

#[async_trait]
impl EventHandler for HubForwarder {
    fn name(&self) -> &'static str {
        "hub_forwarder"
    }

    async fn handle(&self, event: &ChangeEvent) -> AppResult<()> {
        let msg = SocketMessage::from_event(event);
        let channel = Self::channel_for(event.data.kind);
        self.hub.broadcast(channel, msg).await;
        Ok(())
    }
}
