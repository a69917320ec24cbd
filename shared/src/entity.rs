//! 版本化实体定义
//!
//! 实体是同步核心的被写对象，两种实例共用同一套 CAS 更新流程：
//!
//! | 种类 | 字段语义 | 缓存前缀 | 事件类型 |
//! |------|----------|----------|----------|
//! | Stock | 库存数量类 | `stock:` | `stock_updated` |
//! | Catalog | 目录描述类 | `part_detail:` | `record_updated` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 实体种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// 库存记录（数量、预留、库位）
    Stock,
    /// 目录记录（名称、描述、价格等描述性属性）
    Catalog,
}

/// 库存记录的可变字段白名单
const STOCK_MUTABLE_FIELDS: &[&str] = &[
    "current_stock",
    "reserved",
    "location",
    "restock_threshold",
];

/// 目录记录的可变字段白名单
const CATALOG_MUTABLE_FIELDS: &[&str] = &[
    "name",
    "description",
    "price",
    "status",
    "brand",
    "category",
];

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Catalog => "catalog",
        }
    }

    /// 单实体缓存键，如 `stock:42` / `part_detail:42`
    pub fn detail_key(&self, id: &str) -> String {
        match self {
            Self::Stock => format!("stock:{}", id),
            Self::Catalog => format!("part_detail:{}", id),
        }
    }

    /// 列表缓存失效通配符，任一成员变更时整批丢弃
    pub fn list_pattern(&self) -> &'static str {
        match self {
            Self::Stock => "stock_list:*",
            Self::Catalog => "part_list:*",
        }
    }

    /// 变更事件类型
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Stock => "stock_updated",
            Self::Catalog => "record_updated",
        }
    }

    /// 字段是否允许通过版本化更新修改
    pub fn is_mutable_field(&self, field: &str) -> bool {
        match self {
            Self::Stock => STOCK_MUTABLE_FIELDS.contains(&field),
            Self::Catalog => CATALOG_MUTABLE_FIELDS.contains(&field),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 版本化实体
///
/// 创建时版本为 1，之后仅通过版本化存储的 CAS 更新递增。
/// 本子系统不做硬删除（软停用属于外部 CRUD 层）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 稳定标识，由后备存储拥有
    pub id: String,
    /// 实体种类
    pub kind: EntityKind,
    /// 单调递增版本号，创建时为 1
    pub version: u64,
    /// 命名属性映射
    pub fields: BTreeMap<String, Value>,
    /// 最后一次写入者标识
    pub last_updated_by: String,
    /// 创建时间（Unix 毫秒）
    pub created_at: i64,
    /// 最后更新时间（Unix 毫秒）
    pub updated_at: i64,
}

impl Entity {
    /// 以版本 1 创建实体
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        fields: BTreeMap<String, Value>,
        actor: impl Into<String>,
    ) -> Self {
        let now = crate::now_millis();
        Self {
            id: id.into(),
            kind,
            version: 1,
            fields,
            last_updated_by: actor.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 单实体缓存键
    pub fn detail_key(&self) -> String {
        self.kind.detail_key(&self.id)
    }
}
