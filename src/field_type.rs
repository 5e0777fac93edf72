//! 列的逻辑类型、Schema 与运行时值

use serde::{Deserialize, Serialize};
use crate::common::{OlapError, Result};

/// Schema 声明的存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Float | Self::Double)
    }

    /// 定长类型的字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int | Self::Float   => Some(4),
            Self::Long | Self::Double => Some(8),
            Self::String | Self::Bytes => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Int    => "INT",
            Self::Long   => "LONG",
            Self::Float  => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Bytes  => "BYTES",
        };
        f.write_str(s)
    }
}

/// 列的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    Dimension,
    Metric,
    Time,
}

fn default_true() -> bool { true }

/// 单列定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name:               String,
    pub data_type:          DataType,
    pub field_type:         FieldType,
    #[serde(default = "default_true")]
    pub single_value:       bool,
    /// 覆盖默认空值（JSON 字面量）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_null_value: Option<serde_json::Value>,
}

impl FieldSpec {
    pub fn dimension(name: &str, data_type: DataType, single_value: bool) -> Self {
        Self {
            name: name.into(), data_type, field_type: FieldType::Dimension,
            single_value, default_null_value: None,
        }
    }
    pub fn metric(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.into(), data_type, field_type: FieldType::Metric,
            single_value: true, default_null_value: None,
        }
    }
    pub fn time(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.into(), data_type, field_type: FieldType::Time,
            single_value: true, default_null_value: None,
        }
    }
    pub fn with_default_null_value(mut self, v: serde_json::Value) -> Self {
        self.default_null_value = Some(v); self
    }

    /// 该列的默认空值：metric 为 0，其余为各类型的最小哨兵值
    pub fn default_null_value(&self) -> Value {
        if let Some(v) = &self.default_null_value {
            if let Ok(parsed) = Value::from_json(v).coerce_scalar(self.data_type) {
                return parsed;
            }
        }
        let metric = self.field_type == FieldType::Metric;
        match self.data_type {
            DataType::Int    => Value::Int(if metric { 0 } else { i32::MIN }),
            DataType::Long   => Value::Long(if metric { 0 } else { i64::MIN }),
            DataType::Float  => Value::Float(if metric { 0.0 } else { f32::NEG_INFINITY }),
            DataType::Double => Value::Double(if metric { 0.0 } else { f64::NEG_INFINITY }),
            DataType::String => Value::String("null".into()),
            DataType::Bytes  => Value::Bytes(Vec::new()),
        }
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub schema_name: String,
    pub field_specs: Vec<FieldSpec>,
}

impl Schema {
    pub fn new(schema_name: &str, field_specs: Vec<FieldSpec>) -> Self {
        Self { schema_name: schema_name.into(), field_specs }
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| OlapError::Config(format!("invalid schema: {e}")))
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.field_specs.iter().find(|f| f.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.field_specs.iter().map(|f| f.name.as_str())
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.field_specs.iter()
            .filter(|f| f.field_type != FieldType::Metric)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.field_specs.iter()
            .filter(|f| f.field_type == FieldType::Metric)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn time_column(&self) -> Option<&FieldSpec> {
        self.field_specs.iter().find(|f| f.field_type == FieldType::Time)
    }
}

// ── 运行时值 ──────────────────────────────────────────────────────────────────

/// 列值（运行时表示）
///
/// 摄入端的值类型是异构的：`List` 表示元素类型不定的泛型列表，`Array` 表示元素同构的数组，
/// `Object` 承载少见的复杂类型（走慢速转换路径）。
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Array(Vec<Value>),
    Object(serde_json::Value),
}

/// 值的具体运行时类型（类型查找表的 key）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null, Boolean, Byte, Char, Short, Int, Long, Float, Double,
    String, Bytes, List, Array, Object,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null       => ValueKind::Null,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Byte(_)    => ValueKind::Byte,
            Self::Char(_)    => ValueKind::Char,
            Self::Short(_)   => ValueKind::Short,
            Self::Int(_)     => ValueKind::Int,
            Self::Long(_)    => ValueKind::Long,
            Self::Float(_)   => ValueKind::Float,
            Self::Double(_)  => ValueKind::Double,
            Self::String(_)  => ValueKind::String,
            Self::Bytes(_)   => ValueKind::Bytes,
            Self::List(_)    => ValueKind::List,
            Self::Array(_)   => ValueKind::Array,
            Self::Object(_)  => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    pub fn is_multi_value(&self) -> bool { matches!(self, Self::List(_) | Self::Array(_)) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v)    => Some(*v as i64),
            Self::Short(v)   => Some(*v as i64),
            Self::Int(v)     => Some(*v as i64),
            Self::Long(v)    => Some(*v),
            Self::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v)  => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Self::String(s) => Some(s), _ => None }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self { Self::Bytes(b) => Some(b), _ => None }
    }

    /// 多值列的元素；单值返回 None
    pub fn as_values(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) | Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// 将值序列化为可哈希、可比较的字节串（可变字典的 key）
    pub fn to_sort_key(&self) -> Vec<u8> {
        match self {
            Self::Null       => vec![],
            Self::Int(v)     => v.to_be_bytes().to_vec(),
            Self::Long(v)    => v.to_be_bytes().to_vec(),
            Self::Float(v)   => v.to_bits().to_be_bytes().to_vec(),
            Self::Double(v)  => v.to_bits().to_be_bytes().to_vec(),
            Self::String(s)  => s.as_bytes().to_vec(),
            Self::Bytes(b)   => b.clone(),
            _                => format!("{:?}", self).into_bytes(),
        }
    }

    /// 全序比较：同为整数或字符串/字节时精确比较，其余数值按 f64，最后退回文本
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b))   => a.cmp(b),
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => self.to_string().cmp(&other.to_string()),
                },
            },
        }
    }

    /// JSON 字面量 → 运行时值（数组视作泛型列表）
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null      => Self::Null,
            serde_json::Value::Bool(b)   => Self::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Long(i),
                None    => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(a)  => Self::List(a.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(_) => Self::Object(v.clone()),
        }
    }

    /// 单值宽松转换为指定存储类型（默认空值、谓词字面量使用）
    pub fn coerce_scalar(&self, data_type: DataType) -> Result<Value> {
        let err = || OlapError::TypeConversion(format!("cannot convert {self} to {data_type}"));
        Ok(match data_type {
            DataType::Int => match self {
                Self::String(s) => Value::Int(s.trim().parse().map_err(|_| err())?),
                _ => Value::Int(self.as_f64().ok_or_else(err)? as i32),
            },
            DataType::Long => match self {
                Self::String(s) => Value::Long(s.trim().parse().map_err(|_| err())?),
                _ => Value::Long(self.as_i64().or_else(|| self.as_f64().map(|f| f as i64)).ok_or_else(err)?),
            },
            DataType::Float => match self {
                Self::String(s) => Value::Float(s.trim().parse().map_err(|_| err())?),
                _ => Value::Float(self.as_f64().ok_or_else(err)? as f32),
            },
            DataType::Double => match self {
                Self::String(s) => Value::Double(s.trim().parse().map_err(|_| err())?),
                _ => Value::Double(self.as_f64().ok_or_else(err)?),
            },
            DataType::String => match self {
                Self::String(s) => Value::String(s.clone()),
                Self::Null | Self::List(_) | Self::Array(_) => return Err(err()),
                other => Value::String(other.to_string()),
            },
            DataType::Bytes => match self {
                Self::Bytes(b)  => Value::Bytes(b.clone()),
                Self::String(s) => Value::Bytes(hex::decode(s).map_err(|_| err())?),
                _ => return Err(err()),
            },
        })
    }
}

impl From<i32> for Value { fn from(v: i32) -> Self { Self::Int(v) } }
impl From<i64> for Value { fn from(v: i64) -> Self { Self::Long(v) } }
impl From<f32> for Value { fn from(v: f32) -> Self { Self::Float(v) } }
impl From<f64> for Value { fn from(v: f64) -> Self { Self::Double(v) } }
impl From<&str> for Value { fn from(v: &str) -> Self { Self::String(v.to_string()) } }
impl From<String> for Value { fn from(v: String) -> Self { Self::String(v) } }

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null       => write!(f, "null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Byte(v)    => write!(f, "{v}"),
            Self::Char(v)    => write!(f, "{v}"),
            Self::Short(v)   => write!(f, "{v}"),
            Self::Int(v)     => write!(f, "{v}"),
            Self::Long(v)    => write!(f, "{v}"),
            Self::Float(v)   => write!(f, "{v}"),
            Self::Double(v)  => write!(f, "{v}"),
            Self::String(s)  => write!(f, "{s}"),
            Self::Bytes(b)   => write!(f, "{}", hex::encode(b)),
            Self::List(vs) | Self::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 { write!(f, ",")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Object(o) => write!(f, "{o}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_json() {
        let json = r#"{
            "schemaName": "orders",
            "fieldSpecs": [
                {"name": "country", "dataType": "STRING", "fieldType": "DIMENSION"},
                {"name": "tags", "dataType": "STRING", "fieldType": "DIMENSION", "singleValue": false},
                {"name": "amount", "dataType": "DOUBLE", "fieldType": "METRIC"},
                {"name": "day", "dataType": "INT", "fieldType": "TIME", "defaultNullValue": 0}
            ]
        }"#;
        let schema = Schema::from_json_str(json).unwrap();
        assert_eq!(schema.field_specs.len(), 4);
        assert!(!schema.field_spec("tags").unwrap().single_value);
        assert_eq!(schema.metric_names(), vec!["amount"]);
        assert_eq!(schema.time_column().unwrap().name, "day");
        assert_eq!(schema.field_spec("day").unwrap().default_null_value(), Value::Int(0));
    }

    #[test]
    fn test_default_null_values() {
        assert_eq!(FieldSpec::dimension("d", DataType::Int, true).default_null_value(), Value::Int(i32::MIN));
        assert_eq!(FieldSpec::metric("m", DataType::Long).default_null_value(), Value::Long(0));
        assert_eq!(
            FieldSpec::dimension("s", DataType::String, true).default_null_value(),
            Value::String("null".into()),
        );
    }

    #[test]
    fn test_coerce_scalar() {
        assert_eq!(Value::String("42".into()).coerce_scalar(DataType::Int).unwrap(), Value::Int(42));
        assert_eq!(Value::Long(7).coerce_scalar(DataType::Double).unwrap(), Value::Double(7.0));
        assert_eq!(Value::Int(3).coerce_scalar(DataType::String).unwrap(), Value::String("3".into()));
        assert_eq!(
            Value::String("0aff".into()).coerce_scalar(DataType::Bytes).unwrap(),
            Value::Bytes(vec![0x0a, 0xff]),
        );
        assert!(Value::String("abc".into()).coerce_scalar(DataType::Long).is_err());
    }

    #[test]
    fn test_compare_total_order() {
        use std::cmp::Ordering;
        assert_eq!(Value::Long(i64::MAX).compare(&Value::Long(i64::MAX - 1)), Ordering::Greater);
        assert_eq!(Value::Int(2).compare(&Value::Double(2.5)), Ordering::Less);
        assert_eq!(Value::from("b").compare(&Value::from("ab")), Ordering::Greater);
        assert_eq!(Value::Double(f64::NAN).compare(&Value::Double(f64::NAN)), Ordering::Equal);
    }
}
