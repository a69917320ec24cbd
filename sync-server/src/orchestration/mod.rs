//! 编排层 - 围绕版本化更新的横切包装器
//!
//! 显式的中间件组合，按固定顺序套在核心更新调用外面
//! （外 → 内）：
//!
//! ```text
//! TransactionLayer ─▶ RetryLayer ─▶ TimingLayer ─▶ StoreUpdate
//! ```
//!
//! 事务作用域作为显式参数传递（不做调用参数扫描）；重试只
//! 针对版本冲突，指数退避 + 抖动，尝试次数封顶；计时包装
//! 只做观测，绝不改变控制流。两种实体走完全相同的包装链。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::store::{StorageEngine, UpdateOutcome, VersionedStore};
use crate::utils::{AppError, AppResult};

/// 一次更新意图
///
/// `fields` 是调用方想要的目标字段值（绝对值，非增量）；
/// 重试时以刷新后的版本重新提交同一意图。
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub entity_id: String,
    pub expected_version: u64,
    pub fields: BTreeMap<String, Value>,
    pub actor: String,
    pub reason: Option<String>,
}

/// 更新服务特征 - 包装链上每一层都实现它
#[async_trait]
pub trait UpdateService: Send + Sync {
    async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome>;
}

// ========== 核心：版本化存储调用 ==========

/// 包装链最内层，直接调用 [`VersionedStore::update`]
pub struct StoreUpdate {
    store: Arc<VersionedStore>,
}

impl StoreUpdate {
    pub fn new(store: Arc<VersionedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UpdateService for StoreUpdate {
    async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome> {
        self.store
            .update(
                &request.entity_id,
                request.expected_version,
                request.fields,
                &request.actor,
                request.reason,
            )
            .await
    }
}

// ========== 事务包装 ==========

/// 事务边界：成功提交，任何错误回滚后原样上抛
pub struct TransactionLayer<S> {
    inner: S,
    engine: Arc<dyn StorageEngine>,
}

impl<S> TransactionLayer<S> {
    pub fn new(inner: S, engine: Arc<dyn StorageEngine>) -> Self {
        Self { inner, engine }
    }
}

#[async_trait]
impl<S: UpdateService> UpdateService for TransactionLayer<S> {
    async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome> {
        let txn = self.engine.begin().await?;
        match self.inner.execute(request).await {
            Ok(outcome) => {
                self.engine.commit(txn).await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = self.engine.rollback_txn(txn).await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(err)
            }
        }
    }
}

// ========== 重试包装 ==========

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    /// 首次退避时长
    pub base_delay: Duration,
    /// 退避上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的退避时长（指数 + 随机抖动）
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis().max(1) as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// 冲突重试：以冲突携带的当前版本刷新期望版本后整体重试
///
/// 只重试 `Conflict`；`NotFound` 等其余错误立即上抛。
/// 上限是尝试次数而非墙钟时限，需要硬截止的调用方自行在
/// 整个编排调用外面包超时。
pub struct RetryLayer<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryLayer<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: UpdateService> UpdateService for RetryLayer<S> {
    async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome> {
        let mut request = request;
        let mut attempt = 0u32;
        loop {
            match self.inner.execute(request.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(AppError::Conflict {
                    entity_id,
                    expected,
                    current,
                }) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        info!(
                            entity_id = %entity_id,
                            attempts = attempt,
                            "Retries exhausted, surfacing conflict"
                        );
                        return Err(AppError::Conflict {
                            entity_id,
                            expected,
                            current,
                        });
                    }
                    let delay = self.policy.backoff(attempt - 1);
                    debug!(
                        entity_id = %entity_id,
                        expected,
                        current,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Version conflict, retrying with refreshed version"
                    );
                    tokio::time::sleep(delay).await;
                    request.expected_version = current;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ========== 计时包装 ==========

/// 记录时长与结果，不改变控制流
pub struct TimingLayer<S> {
    inner: S,
    operation: &'static str,
}

impl<S> TimingLayer<S> {
    pub fn new(inner: S, operation: &'static str) -> Self {
        Self { inner, operation }
    }
}

#[async_trait]
impl<S: UpdateService> UpdateService for TimingLayer<S> {
    async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome> {
        let entity_id = request.entity_id.clone();
        let started = Instant::now();
        let result = self.inner.execute(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                operation = self.operation,
                entity_id = %entity_id,
                version = outcome.entity.version,
                elapsed_ms,
                outcome = "ok",
                "Update completed"
            ),
            Err(err) => info!(
                operation = self.operation,
                entity_id = %entity_id,
                elapsed_ms,
                outcome = "error",
                error = %err,
                "Update failed"
            ),
        }
        result
    }
}

/// 按固定顺序组装完整的更新管线
pub fn build_pipeline(
    store: Arc<VersionedStore>,
    engine: Arc<dyn StorageEngine>,
    policy: RetryPolicy,
) -> Arc<dyn UpdateService> {
    let core = StoreUpdate::new(store);
    let timed = TimingLayer::new(core, "versioned_update");
    let retried = RetryLayer::new(timed, policy);
    Arc::new(TransactionLayer::new(retried, engine))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEngine;
    use serde_json::json;
    use shared::EntityKind;

    fn fields(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    async fn setup() -> (Arc<VersionedStore>, Arc<dyn StorageEngine>) {
        let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let store = Arc::new(VersionedStore::new(engine.clone()));
        store
            .create(
                EntityKind::Stock,
                "42",
                fields(&[("current_stock", json!(10))]),
                "seeder",
            )
            .await
            .unwrap();
        (store, engine)
    }

    fn request(expected_version: u64, stock: i64) -> UpdateRequest {
        UpdateRequest {
            entity_id: "42".to_string(),
            expected_version,
            fields: fields(&[("current_stock", json!(stock))]),
            actor: "alice".to_string(),
            reason: None,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_pipeline_happy_path() {
        let (store, engine) = setup().await;
        let pipeline = build_pipeline(store, engine, fast_policy(3));

        let outcome = pipeline.execute(request(1, 8)).await.unwrap();
        assert_eq!(outcome.entity.version, 2);
        assert_eq!(outcome.entity.fields["current_stock"], json!(8));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_stale_version() {
        let (store, engine) = setup().await;
        // 先让版本前进到 2，使 expected_version = 1 的请求首次必然冲突
        store
            .update(
                "42",
                1,
                fields(&[("current_stock", json!(9))]),
                "other",
                None,
            )
            .await
            .unwrap();

        let pipeline = build_pipeline(store, engine, fast_policy(3));
        let outcome = pipeline.execute(request(1, 7)).await.unwrap();

        // 重试以刷新后的版本 2 成功，产生版本 3
        assert_eq!(outcome.entity.version, 3);
        assert_eq!(outcome.entity.fields["current_stock"], json!(7));
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_conflict() {
        let (_store, engine) = setup().await;

        /// 永远冲突的内层服务
        struct AlwaysConflict;

        #[async_trait]
        impl UpdateService for AlwaysConflict {
            async fn execute(&self, request: UpdateRequest) -> AppResult<UpdateOutcome> {
                Err(AppError::Conflict {
                    entity_id: request.entity_id,
                    expected: request.expected_version,
                    current: request.expected_version + 1,
                })
            }
        }

        let pipeline = TransactionLayer::new(
            RetryLayer::new(AlwaysConflict, fast_policy(3)),
            engine,
        );
        let err = pipeline.execute(request(1, 7)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (store, engine) = setup().await;
        let pipeline = build_pipeline(store, engine, fast_policy(5));

        let started = std::time::Instant::now();
        let err = pipeline
            .execute(UpdateRequest {
                entity_id: "missing".to_string(),
                expected_version: 1,
                fields: fields(&[("current_stock", json!(1))]),
                actor: "alice".to_string(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        // 没有经过退避循环
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
