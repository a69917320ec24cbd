//! 事件总线核心实现
//!
//! # 架构
//!
//! ```text
//! emit(event)
//!   ├─▶ 有界 mpsc 队列 ──▶ 分发器任务 ──▶ 订阅者（注册顺序）
//!   └─▶ EventRelay.publish ──▶ 共享中继通道 ──▶ 其他进程
//! ```
//!
//! # 语义
//!
//! - `emit` 非阻塞：入队 + 中继发布，不等待订阅者完成；
//!   队列打满时丢弃并记录日志（背压感知，at-most-once）
//! - 同一进程内，订阅者按注册顺序依次执行；单个订阅者出错
//!   只记录日志，不中断后续分发
//! - 中继通道不可用时本地分发照常进行，仅丢失分布式可见性

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use shared::ChangeEvent;

use super::relay::EventRelay;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::utils::AppResult;

/// 事件订阅者特征
///
/// `handle` 的错误会被总线捕获并记录，绝不中断分发。
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// 订阅者名称（日志用）
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &ChangeEvent) -> AppResult<()>;
}

enum QueueItem {
    Event(ChangeEvent),
    /// 测试与关闭前排空用的屏障
    Flush(oneshot::Sender<()>),
}

/// 事件总线
pub struct EventBus {
    /// 事件类型 -> 订阅者列表（注册顺序即分发顺序）
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    queue_tx: mpsc::Sender<QueueItem>,
    /// 分发器启动时取走
    queue_rx: Mutex<Option<mpsc::Receiver<QueueItem>>>,
    /// 分布式中继（可选；无中继时为纯本地总线）
    relay: Option<Arc<EventRelay>>,
}

impl EventBus {
    pub fn new(queue_capacity: usize, relay: Option<Arc<EventRelay>>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            subscribers: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            relay,
        }
    }

    /// 注册订阅者
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        debug!(event_type = %event_type, handler = handler.name(), "Subscriber registered");
        self.subscribers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// 指定事件类型的订阅者数量
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .get(event_type)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// 发出事件：入队本地分发 + 尽力而为的中继发布
    ///
    /// 两条路径的失败都只记录日志；写路径绝不因事件层失败而失败。
    pub async fn emit(&self, event: ChangeEvent) {
        if let Err(err) = self.queue_tx.try_send(QueueItem::Event(event.clone())) {
            warn!(
                event_type = %event.event_type,
                error = %err,
                "Event queue full or closed, dropping local dispatch"
            );
        }

        if let Some(relay) = &self.relay {
            if let Err(err) = relay.publish(&event).await {
                warn!(
                    event_type = %event.event_type,
                    error = %err,
                    "Relay publish failed, event visible locally only"
                );
            }
        }
    }

    /// 本地分发：按注册顺序依次调用订阅者
    ///
    /// 中继监听器对外来事件也走这条路径。
    pub async fn dispatch(&self, event: &ChangeEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            self.subscribers
                .read()
                .get(&event.event_type)
                .cloned()
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(err) = handler.handle(event).await {
                warn!(
                    event_type = %event.event_type,
                    handler = handler.name(),
                    error = %err,
                    "Event handler failed, continuing dispatch"
                );
            }
        }
    }

    /// 等待队列中已入队的事件全部分发完毕
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue_tx.send(QueueItem::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// 启动分发器任务（每个总线一个）
    pub fn spawn_dispatcher(self: &Arc<Self>, tasks: &mut BackgroundTasks) {
        let Some(mut rx) = self.queue_rx.lock().take() else {
            warn!("Event dispatcher already started, skipping");
            return;
        };
        let bus = Arc::clone(self);
        let token = tasks.shutdown_token();

        tasks.spawn("event_dispatcher", TaskKind::Worker, async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(QueueItem::Event(event)) => bus.dispatch(&event).await,
                        Some(QueueItem::Flush(ack)) => {
                            let _ = ack.send(());
                        }
                        None => break,
                    },
                }
            }
            debug!("Event dispatcher stopped");
        });
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.subscribers.read().len())
            .field("has_relay", &self.relay.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::AppError;
    use shared::{ChangeSet, Entity, EntityKind};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stock_event() -> ChangeEvent {
        let mut entity = Entity::new(EntityKind::Stock, "42", BTreeMap::new(), "alice");
        entity.version = 2;
        ChangeEvent::record_changed(&entity, ChangeSet::new())
    }

    /// 记录调用顺序的订阅者
    struct Recorder {
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, _event: &ChangeEvent) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(self.name);
            if self.fail {
                Err(AppError::internal("handler exploded"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_fanout_in_registration_order_despite_failure() {
        let mut tasks = BackgroundTasks::new();
        let bus = Arc::new(EventBus::new(16, None));
        bus.spawn_dispatcher(&mut tasks);

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = Arc::new(Recorder {
            name: "first",
            log: log.clone(),
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let second = Arc::new(Recorder {
            name: "second",
            log: log.clone(),
            fail: false,
            calls: AtomicUsize::new(0),
        });
        bus.subscribe("stock_updated", first.clone());
        bus.subscribe("stock_updated", second.clone());

        bus.emit(stock_event()).await;
        bus.flush().await;

        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);

        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_unrelated_event_type_not_dispatched() {
        let mut tasks = BackgroundTasks::new();
        let bus = Arc::new(EventBus::new(16, None));
        bus.spawn_dispatcher(&mut tasks);

        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let handler = Arc::new(Recorder {
            name: "catalog_only",
            log: log.clone(),
            fail: false,
            calls: AtomicUsize::new(0),
        });
        bus.subscribe("record_updated", handler.clone());

        bus.emit(stock_event()).await;
        bus.flush().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        tasks.shutdown().await;
    }

    #[tokio::test]
    async fn test_emit_without_dispatcher_does_not_block() {
        // 容量 1 的队列，第二次 emit 打满后丢弃而不是阻塞
        let bus = Arc::new(EventBus::new(1, None));
        bus.emit(stock_event()).await;
        bus.emit(stock_event()).await;
    }
}
