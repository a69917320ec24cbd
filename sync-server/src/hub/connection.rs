//! 连接抽象
//!
//! 注册表不关心连接背后的具体传输；所有发送都经过
//! [`ConnectionSink`] 特征，生产实现可以是任意 socket 写端，
//! 测试与单机模式使用 [`MemorySink`]。

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use shared::{Channel, SocketMessage};

use crate::utils::{AppError, AppResult};

/// 连接写端特征
#[async_trait]
pub trait ConnectionSink: Send + Sync + std::fmt::Debug {
    /// 向连接写入一条消息
    async fn send(&self, msg: &SocketMessage) -> AppResult<()>;
}

/// 已注册连接
///
/// 握手成功时创建，断开或发送失败时从注册表移除；
/// 注册表最迟在下一次广播尝试时丢弃已关闭的连接。
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: Uuid,
    pub channel: Channel,
    /// 注册时间（Unix 毫秒）
    pub connected_at: i64,
    /// 已认证连接的身份标识
    pub identity: Option<String>,
    pub(crate) sink: Arc<dyn ConnectionSink>,
}

impl Connection {
    pub fn new(sink: Arc<dyn ConnectionSink>, channel: Channel, identity: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            connected_at: shared::now_millis(),
            identity,
            sink,
        }
    }
}

/// Memory 连接写端 (同进程通信)
///
/// 通过无界 mpsc 把消息交给进程内消费者。
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<SocketMessage>,
}

impl MemorySink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConnectionSink for MemorySink {
    async fn send(&self, msg: &SocketMessage) -> AppResult<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| AppError::send_failure("receiver dropped"))
    }
}
