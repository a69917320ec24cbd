use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use shared::{ChangeEvent, ChangeHistoryEntry, ChangeSet, Entity, EntityKind};

use crate::cache::{CacheLayer, CacheStats, MemoryCacheBackend};
use crate::core::Config;
use crate::core::tasks::BackgroundTasks;
use crate::events::{
    CacheInvalidator, EventBus, EventRelay, HubForwarder, MemoryRelayTransport, RelayTransport,
};
use crate::hub::NotificationHub;
use crate::orchestration::{RetryPolicy, UpdateRequest, UpdateService, build_pipeline};
use crate::store::{ChangeHistory, MemoryEngine, StorageEngine, VersionedStore};
use crate::utils::AppResult;

/// 服务器状态 - 持有所有服务的单例引用
///
/// ServerState 是同步节点的核心数据结构，持有所有服务的共享引用。
/// 使用 Arc 实现浅拷贝，所有权成本极低。
///
/// # 服务组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | engine | Arc\<dyn StorageEngine\> | 后备存储 |
/// | store | Arc\<VersionedStore\> | 版本化读写 |
/// | history | ChangeHistory | 变更历史查询 |
/// | cache | Arc\<CacheLayer\> | 读加速缓存 |
/// | bus | Arc\<EventBus\> | 事件总线 |
/// | relay | Arc\<EventRelay\> | 分布式中继 |
/// | hub | Arc\<NotificationHub\> | Socket 通知集线器 |
/// | pipeline | Arc\<dyn UpdateService\> | 编排后的更新管线 |
///
/// # 写路径
///
/// ```text
/// update_record
///   └─▶ pipeline (事务 → 重试 → 计时 → 版本化 CAS)
///         └─成功─▶ 缓存失效 ─▶ bus.emit
///                     │            ├─▶ 本地订阅者 (缓存/集线器)
///                     │            └─▶ 中继 ─▶ 其他进程
/// ```
#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 后备存储引擎
    pub engine: Arc<dyn StorageEngine>,
    /// 版本化存储
    pub store: Arc<VersionedStore>,
    /// 变更历史查询
    pub history: ChangeHistory,
    /// 缓存层
    pub cache: Arc<CacheLayer>,
    /// 事件总线
    pub bus: Arc<EventBus>,
    /// 分布式事件中继
    pub relay: Arc<EventRelay>,
    /// 通知集线器
    pub hub: Arc<NotificationHub>,
    /// 更新管线 (事务 → 重试 → 计时 → 存储)
    pipeline: Arc<dyn UpdateService>,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("environment", &self.config.environment)
            .field("relay_origin", &self.relay.origin())
            .finish()
    }
}

impl ServerState {
    /// 初始化服务器状态 (全内存后端)
    pub fn initialize(config: &Config) -> Self {
        let transport: Arc<dyn RelayTransport> =
            Arc::new(MemoryRelayTransport::new(config.relay_channel_capacity));
        Self::initialize_with_transport(config, transport)
    }

    /// 初始化服务器状态，使用指定的中继传输层
    ///
    /// 多个实例共享同一个传输层即可组成分布式拓扑。
    pub fn initialize_with_transport(config: &Config, transport: Arc<dyn RelayTransport>) -> Self {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let store = Arc::new(VersionedStore::new(engine.clone()));
        let history = ChangeHistory::new(engine.clone());
        let cache = Arc::new(CacheLayer::new(
            Arc::new(MemoryCacheBackend::new()),
            config.cache_scan_batch,
        ));
        let relay = Arc::new(EventRelay::new(transport));
        let bus = Arc::new(EventBus::new(
            config.event_queue_capacity,
            Some(relay.clone()),
        ));
        let hub = Arc::new(NotificationHub::new(
            Duration::from_millis(config.send_timeout_ms),
            Duration::from_secs(config.heartbeat_interval_secs),
        ));
        let pipeline = build_pipeline(
            store.clone(),
            engine.clone(),
            RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                max_delay: Duration::from_millis(config.retry_max_delay_ms),
            },
        );

        Self {
            config: config.clone(),
            engine,
            store,
            history,
            cache,
            bus,
            relay,
            hub,
            pipeline,
        }
    }

    /// 启动后台任务并接线内置订阅者
    ///
    /// 启动的任务：
    /// - 事件分发器 (EventBus)
    /// - 中继监听器 (EventRelay)
    /// - 心跳广播 (NotificationHub)
    ///
    /// 订阅者按注册顺序执行：先缓存失效，后 Socket 广播。
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        for event_type in [EntityKind::Stock.event_type(), EntityKind::Catalog.event_type()] {
            self.bus
                .subscribe(event_type, Arc::new(CacheInvalidator::new(self.cache.clone())));
            self.bus
                .subscribe(event_type, Arc::new(HubForwarder::new(self.hub.clone())));
        }

        self.bus.spawn_dispatcher(tasks);
        self.relay.spawn_listener(self.bus.clone(), tasks);
        self.hub.spawn_heartbeat(tasks);
    }

    /// 创建记录 (版本 1)
    ///
    /// 创建不经过 CAS 管线，也不发事件；首个版本没有「变更」可言。
    pub async fn create_record(
        &self,
        kind: EntityKind,
        entity_id: &str,
        fields: BTreeMap<String, Value>,
        actor: &str,
    ) -> AppResult<Entity> {
        self.store.create(kind, entity_id, fields, actor).await
    }

    /// 更新记录：管线执行 → 缓存失效 → 事件发布
    ///
    /// 缓存失效先于事件发布，保证本进程后续读取不会命中旧值；
    /// 订阅者路径的再次失效对本地事件是幂等重复，对中继来的
    /// 外来事件则是唯一的失效来源。
    pub async fn update_record(
        &self,
        entity_id: &str,
        expected_version: u64,
        fields: BTreeMap<String, Value>,
        actor: &str,
        reason: Option<String>,
    ) -> AppResult<Entity> {
        let outcome = self
            .pipeline
            .execute(UpdateRequest {
                entity_id: entity_id.to_string(),
                expected_version,
                fields,
                actor: actor.to_string(),
                reason,
            })
            .await?;

        self.after_commit(&outcome.entity, outcome.entry.changes.clone())
            .await;
        Ok(outcome.entity)
    }

    /// 回滚记录到历史版本
    ///
    /// 回滚本身是一次普通的版本递增更新，走同样的失效与事件路径。
    pub async fn rollback_record(
        &self,
        entity_id: &str,
        target_version: u64,
        actor: &str,
    ) -> AppResult<Entity> {
        let entity = self.store.rollback(entity_id, target_version, actor).await?;
        let changes = self
            .history
            .at(entity_id, entity.version)
            .await?
            .map(|entry| entry.changes)
            .unwrap_or_default();

        self.after_commit(&entity, changes).await;
        Ok(entity)
    }

    async fn after_commit(&self, entity: &Entity, changes: ChangeSet) {
        self.cache.invalidate(&entity.kind.detail_key(&entity.id)).await;
        self.cache.invalidate_pattern(entity.kind.list_pattern()).await;
        self.bus
            .emit(ChangeEvent::record_changed(entity, changes))
            .await;
    }

    /// 读记录 (读穿缓存)
    ///
    /// 缓存命中直接返回；miss 时从存储加载、回填缓存后返回。
    pub async fn read_record(&self, kind: EntityKind, entity_id: &str) -> AppResult<Value> {
        let key = kind.detail_key(entity_id);
        if let Some(value) = self.cache.get(&key).await {
            return Ok(value);
        }

        let entity = self.store.get(entity_id).await?;
        let value = serde_json::to_value(&entity)
            .map_err(|e| crate::utils::AppError::internal(format!("entity encode failed: {}", e)))?;
        self.cache
            .set(&key, value.clone(), self.config.cache_ttl_secs)
            .await;
        Ok(value)
    }

    /// 查询变更历史 (降序)
    pub async fn record_history(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<ChangeHistoryEntry>> {
        self.history.list(entity_id, limit).await
    }

    /// 缓存观测统计
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
