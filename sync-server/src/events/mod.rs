//! 事件层 - 本地发布/订阅 + 分布式中继
//!
//! 把「有东西变了」与「谁需要知道」解耦。两条投递路径：
//!
//! 1. **本地分发**：有界队列 + 专职分发器任务，订阅者按注册
//!    顺序执行
//! 2. **分布式中继**：同一事件序列化后发布到共享主题，其他
//!    进程的监听任务收到后重新走本地分发
//!
//! 进程内保证注册顺序；跨进程事件可任意交错。投递为
//! at-most-once、尽力而为。

pub mod bus;
pub mod relay;
pub mod subscribers;

pub use bus::{EventBus, EventHandler};
pub use relay::{EventRelay, MemoryRelayTransport, RelayTransport};
pub use subscribers::{CacheInvalidator, HubForwarder};
