//! 通知集线器 - 按频道分组的连接注册表与广播扇出
//!
//! ```text
//! EventBus 订阅者 ──▶ broadcast(channel, msg)
//!                        │ 遍历频道连接快照
//!                        ▼
//!          send (带超时) ──失败──▶ unregister(该连接)
//!                        │
//!                        └─成功──▶ delivered_count += 1
//! ```
//!
//! 单个连接的发送失败只会注销该连接，不会中断对其余连接的投递。
//! 心跳任务定期向 `all` 频道广播保活消息，顺带收割死连接。

pub mod connection;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::{Channel, SocketMessage};

pub use connection::{Connection, ConnectionSink, MemorySink};

use crate::core::tasks::{BackgroundTasks, TaskKind};

/// 通知集线器
#[derive(Debug)]
pub struct NotificationHub {
    /// 频道 -> 连接列表
    channels: DashMap<Channel, Vec<Arc<Connection>>>,
    /// 单次发送超时
    send_timeout: Duration,
    /// 心跳间隔
    heartbeat_interval: Duration,
}

impl NotificationHub {
    pub fn new(send_timeout: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            send_timeout,
            heartbeat_interval,
        }
    }

    /// 注册连接
    ///
    /// 加入指定频道与隐式 `all` 频道，并立即下发连接确认。
    /// 确认发送失败时连接按死连接处理，不会留在注册表里。
    pub async fn register(
        &self,
        sink: Arc<dyn ConnectionSink>,
        channel: Channel,
        identity: Option<String>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(sink, channel, identity));

        self.channels
            .entry(channel)
            .or_default()
            .push(conn.clone());
        if channel != Channel::All {
            self.channels
                .entry(Channel::All)
                .or_default()
                .push(conn.clone());
        }

        info!(
            connection = %conn.id,
            channel = %channel,
            identity = conn.identity.as_deref().unwrap_or("-"),
            "Connection registered"
        );

        let ack = SocketMessage::connected(channel);
        if self.try_send(&conn, &ack).await.is_err() {
            warn!(connection = %conn.id, "Welcome ack failed, unregistering");
            self.unregister(conn.id);
        }
        conn
    }

    /// 注销连接（幂等）：从其所属的每个频道移除
    pub fn unregister(&self, connection_id: Uuid) {
        let mut removed = false;
        for mut entry in self.channels.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|conn| conn.id != connection_id);
            removed |= entry.value().len() != before;
        }
        if removed {
            debug!(connection = %connection_id, "Connection unregistered");
        }
    }

    /// 指定频道当前连接数
    pub fn connection_count(&self, channel: Channel) -> usize {
        self.channels
            .get(&channel)
            .map(|conns| conns.len())
            .unwrap_or(0)
    }

    /// 向频道广播一条消息，返回成功投递数
    ///
    /// 对连接列表的快照遍历（容忍广播期间的并发注册/注销）；
    /// 发送失败或超时的连接被注销，投递继续。
    pub async fn broadcast(&self, channel: Channel, msg: SocketMessage) -> usize {
        let snapshot: Vec<Arc<Connection>> = self
            .channels
            .get(&channel)
            .map(|conns| conns.clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for conn in snapshot {
            match self.try_send(&conn, &msg).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        connection = %conn.id,
                        channel = %channel,
                        error = %err,
                        "Send failed, unregistering connection"
                    );
                    self.unregister(conn.id);
                }
            }
        }
        delivered
    }

    async fn try_send(
        &self,
        conn: &Connection,
        msg: &SocketMessage,
    ) -> crate::utils::AppResult<()> {
        match tokio::time::timeout(self.send_timeout, conn.sink.send(msg)).await {
            Ok(result) => result,
            Err(_) => Err(crate::utils::AppError::send_failure(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        }
    }

    /// 启动心跳任务
    ///
    /// 固定间隔向 `all` 频道广播保活消息；失败的连接在广播中
    /// 被顺带注销，无需额外处理。
    pub fn spawn_heartbeat(self: &Arc<Self>, tasks: &mut BackgroundTasks) {
        let hub = Arc::clone(self);
        let token = tasks.shutdown_token();
        let interval = self.heartbeat_interval;

        tasks.spawn("hub_heartbeat", TaskKind::Periodic, async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let delivered = hub.broadcast(Channel::All, SocketMessage::heartbeat()).await;
                        debug!(delivered, "Heartbeat broadcast");
                    }
                }
            }
            debug!("Heartbeat task stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::utils::{AppError, AppResult};

    fn hub() -> Arc<NotificationHub> {
        Arc::new(NotificationHub::new(
            Duration::from_millis(200),
            Duration::from_millis(50),
        ))
    }

    /// 发送必然失败的写端
    #[derive(Debug)]
    struct DeadSink;

    #[async_trait]
    impl ConnectionSink for DeadSink {
        async fn send(&self, _msg: &SocketMessage) -> AppResult<()> {
            Err(AppError::send_failure("broken pipe"))
        }
    }

    #[tokio::test]
    async fn test_register_sends_ack_and_joins_all() {
        let hub = hub();
        let (sink, mut rx) = MemorySink::new();
        let conn = hub
            .register(Arc::new(sink), Channel::Admin, Some("alice".to_string()))
            .await;

        assert_eq!(hub.connection_count(Channel::Admin), 1);
        assert_eq!(hub.connection_count(Channel::All), 1);
        assert_eq!(conn.identity.as_deref(), Some("alice"));

        match rx.recv().await.unwrap() {
            SocketMessage::Connected { channel, .. } => assert_eq!(channel, Channel::Admin),
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_resilience() {
        let hub = hub();
        let (sink1, mut rx1) = MemorySink::new();
        let (sink2, mut rx2) = MemorySink::new();
        hub.register(Arc::new(sink1), Channel::Admin, None).await;
        hub.register(Arc::new(sink2), Channel::Admin, None).await;

        // 手工塞入第三个连接，其写端在广播前已失效
        // （绕过注册确认，模拟注册后才断开的连接）
        let dead = Arc::new(Connection::new(Arc::new(DeadSink), Channel::Admin, None));
        hub.channels
            .entry(Channel::Admin)
            .or_default()
            .push(dead.clone());
        assert_eq!(hub.connection_count(Channel::Admin), 3);

        let delivered = hub
            .broadcast(Channel::Admin, SocketMessage::system("hello"))
            .await;
        assert_eq!(delivered, 2);
        // 失败的连接已被注销
        assert_eq!(hub.connection_count(Channel::Admin), 2);
        assert!(
            !hub.channels
                .get(&Channel::Admin)
                .unwrap()
                .iter()
                .any(|c| c.id == dead.id)
        );

        // 跳过各自的连接确认
        let _ = rx1.recv().await;
        let _ = rx2.recv().await;
        assert!(matches!(
            rx1.recv().await.unwrap(),
            SocketMessage::System { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            SocketMessage::System { .. }
        ));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = hub();
        let (sink, _rx) = MemorySink::new();
        let conn = hub.register(Arc::new(sink), Channel::Customer, None).await;

        hub.unregister(conn.id);
        hub.unregister(conn.id);
        assert_eq!(hub.connection_count(Channel::Customer), 0);
        assert_eq!(hub.connection_count(Channel::All), 0);
    }

    #[tokio::test]
    async fn test_channel_scoping() {
        let hub = hub();
        let (admin_sink, mut admin_rx) = MemorySink::new();
        let (customer_sink, mut customer_rx) = MemorySink::new();
        hub.register(Arc::new(admin_sink), Channel::Admin, None).await;
        hub.register(Arc::new(customer_sink), Channel::Customer, None)
            .await;
        let _ = admin_rx.recv().await;
        let _ = customer_rx.recv().await;

        let delivered = hub
            .broadcast(Channel::Admin, SocketMessage::system("admins only"))
            .await;
        assert_eq!(delivered, 1);

        let delivered = hub
            .broadcast(Channel::All, SocketMessage::system("everyone"))
            .await;
        assert_eq!(delivered, 2);
    }

    #[tokio::test]
    async fn test_heartbeat_reaps_dead_connections() {
        let mut tasks = BackgroundTasks::new();
        let hub = hub();
        let (sink, _rx) = MemorySink::new();
        hub.register(Arc::new(sink), Channel::Customer, None).await;

        // 手工塞入一个已死的连接（绕过注册确认）
        let (dead_sink, dead_rx) = MemorySink::new();
        drop(dead_rx);
        let dead = Arc::new(Connection::new(Arc::new(dead_sink), Channel::All, None));
        hub.channels
            .entry(Channel::All)
            .or_default()
            .push(dead.clone());
        assert_eq!(hub.connection_count(Channel::All), 2);

        hub.spawn_heartbeat(&mut tasks);
        tokio::time::sleep(Duration::from_millis(150)).await;
        tasks.shutdown().await;

        assert_eq!(hub.connection_count(Channel::All), 1);
    }
}
