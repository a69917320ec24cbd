//! 字段差异计算与历史回放
//!
//! 通过比较更新前后的字段值生成变更差异，仅记录实际变化的字段。
//! 浮点数使用容差比较避免序列化精度问题。
//! 回放历史时严格按版本号降序折叠每条条目的 `old` 侧。

use serde_json::Value;
use std::collections::BTreeMap;

use shared::{ChangeHistoryEntry, ChangeSet, FieldDelta};

/// 浮点数比较容差 (用于处理序列化/反序列化精度损失)
const FLOAT_EPSILON: f64 = 1e-9;

/// 比较两个 JSON 值是否相等（浮点数使用容差比较）
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(fa), Some(fb)) => (fa - fb).abs() < FLOAT_EPSILON,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(va, vb)| values_equal(va, vb))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, va)| b.get(key).is_some_and(|vb| values_equal(va, vb)))
        }
        (a, b) => a == b,
    }
}

/// 计算一次写入的字段级差异
///
/// 只有值实际变化的字段才进入差异集合；写入方提交的字段中
/// 原先不存在的记为 `old = null`。无变化的写入产生空差异集
/// （版本仍会递增）。
pub fn compute_changes(
    current: &BTreeMap<String, Value>,
    incoming: &BTreeMap<String, Value>,
) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (field, new_value) in incoming {
        let old_value = current.get(field).cloned().unwrap_or(Value::Null);
        if !values_equal(&old_value, new_value) {
            changes.insert(
                field.clone(),
                FieldDelta {
                    old: old_value,
                    new: new_value.clone(),
                },
            );
        }
    }
    changes
}

/// 回放历史，重建实体在 `target_version` 时刻的字段值
///
/// 对每条 `version > target_version` 的条目取 `old` 侧折叠。
/// 折叠必须严格按版本号降序进行：当两个不相邻版本修改了同一
/// 字段时，最终生效的是最早那条（版本号最小）条目的 `old` 值，
/// 它才是目标版本时刻的真实取值。此顺序是硬性不变量。
///
/// 返回值仅包含自目标版本以来变化过的字段。
pub fn reconstruct_fields(
    entries: &[ChangeHistoryEntry],
    target_version: u64,
) -> BTreeMap<String, Value> {
    let mut sorted: Vec<&ChangeHistoryEntry> = entries
        .iter()
        .filter(|entry| entry.version > target_version)
        .collect();
    sorted.sort_by(|a, b| b.version.cmp(&a.version));

    let mut fields = BTreeMap::new();
    for entry in sorted {
        for (field, delta) in &entry.changes {
            // 降序覆盖：更早的条目最后写入，留下目标版本时的值
            fields.insert(field.clone(), delta.old.clone());
        }
    }
    fields
}
