//! 分布式事件中继
//!
//! 所有事件类型共用一个共享 pub/sub 主题，订阅方反序列化后按
//! `type` 字段过滤。每进程一个后台监听任务，收到其他进程发布的
//! 帧后重新走本地分发；自己发布的帧按 `origin` 跳过（本地分发
//! 已在发布前完成，无需重复）。
//!
//! 投递保证：at-most-once、尽力而为。中继不可用只影响分布式
//! 可见性，不影响本地路径。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use shared::{ChangeEvent, RelayFrame};

use super::bus::EventBus;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::utils::{AppError, AppResult};

/// 中继传输层特征
///
/// 实现可以是远端消息通道，也可以是进程内广播（测试/单机）。
#[async_trait]
pub trait RelayTransport: Send + Sync + std::fmt::Debug {
    /// 向共享主题发布一帧
    async fn publish(&self, bytes: Vec<u8>) -> AppResult<()>;

    /// 订阅共享主题
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;
}

/// Memory 中继传输层实现 (同进程通信)
///
/// 多个进程实例共享同一个 broadcast 通道即可模拟共享主题。
#[derive(Debug, Clone)]
pub struct MemoryRelayTransport {
    topic: broadcast::Sender<Vec<u8>>,
}

impl MemoryRelayTransport {
    pub fn new(capacity: usize) -> Self {
        let (topic, _) = broadcast::channel(capacity.max(1));
        Self { topic }
    }
}

#[async_trait]
impl RelayTransport for MemoryRelayTransport {
    async fn publish(&self, bytes: Vec<u8>) -> AppResult<()> {
        // 没有任何订阅者时发送会失败；对共享主题而言这不是错误
        let _ = self.topic.send(bytes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.topic.subscribe()
    }
}

/// 事件中继
///
/// 持有进程标识 `origin`，发布时写入帧信封。
#[derive(Debug)]
pub struct EventRelay {
    transport: Arc<dyn RelayTransport>,
    origin: Uuid,
}

impl EventRelay {
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self {
            transport,
            origin: Uuid::new_v4(),
        }
    }

    /// 本进程标识
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// 序列化并发布一帧
    pub async fn publish(&self, event: &ChangeEvent) -> AppResult<()> {
        let frame = RelayFrame::new(self.origin, event.clone());
        let bytes = serde_json::to_vec(&frame)
            .map_err(|e| AppError::relay(format!("frame encode failed: {}", e)))?;
        self.transport.publish(bytes).await
    }

    /// 启动中继监听任务（每进程一个）
    ///
    /// 收到外来帧后重新走 `bus.dispatch`；解码失败与通道滞后
    /// 仅记录日志。关闭时由取消令牌干净退出。
    pub fn spawn_listener(self: &Arc<Self>, bus: Arc<EventBus>, tasks: &mut BackgroundTasks) {
        let relay = Arc::clone(self);
        let mut rx = self.transport.subscribe();
        let token = tasks.shutdown_token();

        tasks.spawn("relay_listener", TaskKind::Listener, async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(bytes) => {
                            let frame: RelayFrame = match serde_json::from_slice(&bytes) {
                                Ok(frame) => frame,
                                Err(err) => {
                                    warn!(error = %err, "Relay frame decode failed, skipping");
                                    continue;
                                }
                            };
                            // 自己发布的帧：本地分发已经发生过
                            if frame.origin == relay.origin {
                                continue;
                            }
                            debug!(
                                event_type = %frame.event.event_type,
                                origin = %frame.origin,
                                "Relayed event received, re-dispatching locally"
                            );
                            bus.dispatch(&frame.event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Relay listener lagged, events lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("Relay listener stopped");
        });
    }
}
