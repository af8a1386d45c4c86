//! 设置值模型（封闭的标签联合）与显式类型转换规则。
//!
//! 转换规则（读取时）：
//! - `String` 只能从字符串读取；`bool` 只能从布尔读取
//! - 浮点数从数值读取；整数只接受“整数值且在目标类型范围内”的数值
//! - 不做跨类别的隐式转换（例如 `"42"` 不会被读成 `42`），无法转换即视为“不存在”
//!
//! 作者：PowerSuite 项目组（自动生成）
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个设置值。
///
/// 序列化格式：
/// - 使用 `#[serde(untagged)]`，在 JSON 中直接表现为字符串/数值/布尔/对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    String(String),
    Map(BTreeMap<String, SettingValue>),
}

/// f64 可精确表示的最大整数（2^53）。
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

impl SettingValue {
    /// 尝试从任意 JSON 值构造设置值。
    ///
    /// 返回值：
    /// - `None`：值无法用本模型表示（`null`、数组，或对象中含有此类值）
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(SettingValue::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(SettingValue::Number),
            serde_json::Value::String(s) => Some(SettingValue::String(s.clone())),
            serde_json::Value::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), SettingValue::from_json(v)?);
                }
                Some(SettingValue::Map(map))
            }
            serde_json::Value::Null | serde_json::Value::Array(_) => None,
        }
    }

    /// 是否可以无损写入 JSON：数值（包括嵌套在对象中的）不能是 NaN 或无穷大。
    pub fn is_finite(&self) -> bool {
        match self {
            SettingValue::Number(n) => n.is_finite(),
            SettingValue::Map(map) => map.values().all(SettingValue::is_finite),
            SettingValue::Bool(_) | SettingValue::String(_) => true,
        }
    }

    /// 转换为 JSON 值（用于持久化）。
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SettingValue::Bool(b) => serde_json::Value::Bool(*b),
            // 整数值按整数写出，保持设置文件可读。
            SettingValue::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serde_json::Value::from(*n as i64)
            }
            SettingValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            SettingValue::String(s) => serde_json::Value::String(s.clone()),
            SettingValue::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// 类别名称（用于日志）。
    pub fn kind_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Number(_) => "number",
            SettingValue::String(_) => "string",
            SettingValue::Map(_) => "map",
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingValue::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// 从 [`SettingValue`] 读取具体类型。
///
/// 返回 `None` 表示类型不兼容；调用方（设置存储）会将其视为“不存在”。
pub trait FromSettingValue: Sized {
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSettingValue for SettingValue {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromSettingValue for String {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromSettingValue for bool {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromSettingValue for f64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl FromSettingValue for f32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Number(n) if n.is_finite() && n.abs() <= f32::MAX as f64 => {
                Some(*n as f32)
            }
            _ => None,
        }
    }
}

impl FromSettingValue for BTreeMap<String, SettingValue> {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Map(m) => Some(m.clone()),
            _ => None,
        }
    }
}

macro_rules! integer_from_setting {
    ($($t:ty),*) => {
        $(
            impl FromSettingValue for $t {
                fn from_setting(value: &SettingValue) -> Option<Self> {
                    let SettingValue::Number(n) = value else {
                        return None;
                    };
                    // 只接受整数值，且必须落在目标类型范围内。
                    // 上界取 MAX + 1（2 的幂，可精确表示），避免 64 位类型在 `as` 转换时饱和。
                    if n.fract() != 0.0 || *n < <$t>::MIN as f64 || *n >= <$t>::MAX as f64 + 1.0 {
                        return None;
                    }
                    Some(*n as $t)
                }
            }

            impl From<$t> for SettingValue {
                fn from(v: $t) -> Self {
                    SettingValue::Number(v as f64)
                }
            }
        )*
    };
}

integer_from_setting!(i32, i64, u32, u64);

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::String(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::String(v.to_string())
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Number(v)
    }
}

impl From<f32> for SettingValue {
    fn from(v: f32) -> Self {
        SettingValue::Number(v as f64)
    }
}

impl From<BTreeMap<String, SettingValue>> for SettingValue {
    fn from(v: BTreeMap<String, SettingValue>) -> Self {
        SettingValue::Map(v)
    }
}
