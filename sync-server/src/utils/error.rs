//! 统一错误处理
//!
//! 提供应用级错误类型 [`AppError`] 和结果别名 [`AppResult`]。
//!
//! # 错误分类
//!
//! | 分类 | 变体 | 传播策略 |
//! |------|------|----------|
//! | 版本冲突 | `Conflict` | 由编排层有限重试，耗尽后上抛 |
//! | 不存在 | `NotFound` | 不重试，直接上抛 |
//! | 回滚失败 | `Rollback` | 不改变状态，直接上抛 |
//! | 校验失败 | `Validation` | 直接上抛 |
//! | 缓存传输 | `Cache` | 缓存层内部吞掉，降级为 miss |
//! | 中继传输 | `Relay` | 事件层内部吞掉，仅丢失分布式可见性 |
//! | 连接发送 | `ConnectionSend` | 注销该连接，广播继续 |
//! | 存储 | `Storage` | 上抛 |
//! | 内部错误 | `Internal` | 上抛 |
//!
//! 缓存/中继/连接错误绝不进入写路径：基础设施故障只能表现为
//! 最终的陈旧性，不能导致写入失败或回滚。

use tracing::error;

/// 应用错误枚举
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== 可恢复的业务错误 ==========
    /// 版本冲突：携带当前版本，调用方可刷新后重试
    #[error("version conflict on {entity_id}: expected {expected}, current {current}")]
    Conflict {
        entity_id: String,
        expected: u64,
        current: u64,
    },

    /// 实体不存在
    #[error("record not found: {0}")]
    NotFound(String),

    /// 回滚失败（目标版本缺失或不早于当前版本）
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// 参数校验失败
    #[error("validation failed: {0}")]
    Validation(String),

    // ========== 基础设施错误（各层内部隔离） ==========
    /// 缓存后端传输错误
    #[error("cache backend error: {0}")]
    Cache(String),

    /// 分布式中继传输错误
    #[error("relay transport error: {0}")]
    Relay(String),

    /// 单个连接发送失败
    #[error("connection send failed: {0}")]
    ConnectionSend(String),

    // ========== 系统错误 ==========
    /// 后备存储错误
    #[error("storage error: {0}")]
    Storage(String),

    /// 内部错误
    #[error("internal error: {0}")]
    Internal(String),
}

/// 统一结果别名
pub type AppResult<T> = Result<T, AppError>;

// ========== Helper Constructors ==========

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn rollback(msg: impl Into<String>) -> Self {
        Self::Rollback(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn relay(msg: impl Into<String>) -> Self {
        Self::Relay(msg.into())
    }

    pub fn send_failure(msg: impl Into<String>) -> Self {
        Self::ConnectionSend(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        error!(target: "internal", error = %msg, "Internal error occurred");
        Self::Internal(msg)
    }

    /// 是否版本冲突（编排层据此决定是否重试）
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_carries_versions() {
        let err = AppError::Conflict {
            entity_id: "42".to_string(),
            expected: 1,
            current: 2,
        };
        assert!(err.is_conflict());
        let msg = err.to_string();
        assert!(msg.contains("expected 1"));
        assert!(msg.contains("current 2"));
    }

    #[test]
    fn test_not_found_is_not_conflict() {
        assert!(!AppError::not_found("part 42").is_conflict());
    }
}
