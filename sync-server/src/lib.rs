//! Sync Server - 版本化目录/库存同步节点
//!
//! # 架构概述
//!
//! 本模块是 Sync Server 的主入口，提供以下核心功能：
//!
//! - **版本化存储** (`store`): CAS 更新、变更历史、历史回滚
//! - **缓存层** (`cache`): TTL 新鲜度 + 通配符失效的读加速
//! - **事件层** (`events`): 本地发布/订阅 + 分布式中继
//! - **通知集线器** (`hub`): 按频道分组的 Socket 广播
//! - **编排层** (`orchestration`): 事务/重试/计时包装的更新管线
//!
//! # 模块结构
//!
//! ```text
//! sync-server/src/
//! ├── core/            # 配置、状态、后台任务
//! ├── store/           # 版本化存储与变更历史
//! ├── cache/           # 缓存层
//! ├── events/          # 事件总线与中继
//! ├── hub/             # 通知集线器
//! ├── orchestration/   # 更新管线包装器
//! └── utils/           # 错误、日志
//! ```
//!
//! # 写路径一览
//!
//! ```text
//! update_record
//!   └─▶ 事务 ─▶ 重试 ─▶ 计时 ─▶ CAS 提交
//!         └─成功─▶ 缓存失效 ─▶ 事件总线
//!                                ├─▶ 本地订阅者
//!                                └─▶ 中继 ─▶ 其他进程
//! ```

pub mod cache;
pub mod core;
pub mod events;
pub mod hub;
pub mod orchestration;
pub mod store;
pub mod utils;

// Re-export 公共类型
pub use cache::{CacheLayer, CacheStats};
pub use core::{BackgroundTasks, Config, ServerState, TaskKind};
pub use events::{EventBus, EventHandler, EventRelay, MemoryRelayTransport, RelayTransport};
pub use hub::{Connection, ConnectionSink, MemorySink, NotificationHub};
pub use orchestration::{RetryPolicy, UpdateRequest, UpdateService};
pub use store::{ChangeHistory, MemoryEngine, StorageEngine, VersionedStore};
pub use utils::{AppError, AppResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};
