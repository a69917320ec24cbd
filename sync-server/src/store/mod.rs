//! 版本化存储层
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               VersionedStore                 │
//! │   create / get / update(CAS) / rollback      │
//! └───────────────┬──────────────────────────────┘
//!                 │
//!      ┌──────────┴──────────┐
//!      │  StorageEngine 特征  │  ◄── 可插拔后备存储
//!      └──────────┬──────────┘
//!                 │
//!                 ▼
//!           MemoryEngine
//! ```
//!
//! 依赖顺序（叶子优先）：diff → engine → history → versioned。

pub mod diff;
pub mod engine;
pub mod history;
pub mod memory;
pub mod versioned;

pub use engine::{StorageEngine, TxnToken};
pub use history::ChangeHistory;
pub use memory::MemoryEngine;
pub use versioned::{UpdateOutcome, VersionedStore};
