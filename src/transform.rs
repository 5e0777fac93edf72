//! 摄入期记录变换
//!
//! - `NullValueTransformer`：缺失 / null / 空多值 → 列的默认空值
//! - `DataTypeTransformer`：把异构输入值转成 schema 声明的存储类型
//! - `CompositeTransformer`：按顺序组合多个变换
//!
//! 源类型通过进程级只读查找表（单值、多值各一张，按运行时值类型索引）确定，
//! 查不到的类型归入 OBJECT / OBJECT_ARRAY 走慢速转换。只有源类型与目标类型不同时才转换，
//! 因此对已合规的行重复应用是空操作。

use std::collections::HashMap;
use once_cell::sync::Lazy;
use crate::common::{OlapError, Result};
use crate::field_type::{DataType, Schema, Value, ValueKind};
use crate::record::GenericRow;

pub trait RecordTransformer: Send + Sync {
    fn transform(&self, row: &mut GenericRow) -> Result<()>;
}

// ── 列数据类型 ────────────────────────────────────────────────────────────────

/// 运行时值的细分类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnDataType {
    Boolean,
    Byte,
    Character,
    Short,
    Integer,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Object,
    ByteArray,
    CharacterArray,
    ShortArray,
    IntegerArray,
    LongArray,
    FloatArray,
    DoubleArray,
    StringArray,
    ObjectArray,
}

impl ColumnDataType {
    pub fn is_multi_value(self) -> bool {
        matches!(
            self,
            Self::ByteArray | Self::CharacterArray | Self::ShortArray | Self::IntegerArray
                | Self::LongArray | Self::FloatArray | Self::DoubleArray | Self::StringArray
                | Self::ObjectArray
        )
    }

    /// schema 声明 → 目标类型
    pub fn for_field(data_type: DataType, single_value: bool) -> Result<Self> {
        Ok(match (data_type, single_value) {
            (DataType::Int, true)     => Self::Integer,
            (DataType::Long, true)    => Self::Long,
            (DataType::Float, true)   => Self::Float,
            (DataType::Double, true)  => Self::Double,
            (DataType::String, true)  => Self::String,
            (DataType::Bytes, true)   => Self::Bytes,
            (DataType::Int, false)    => Self::IntegerArray,
            (DataType::Long, false)   => Self::LongArray,
            (DataType::Float, false)  => Self::FloatArray,
            (DataType::Double, false) => Self::DoubleArray,
            (DataType::String, false) => Self::StringArray,
            (DataType::Bytes, false)  => {
                return Err(OlapError::Unsupported("multi-value BYTES columns".into()));
            }
        })
    }

    /// 目标类型对应的存储类型（多值取元素类型）
    fn storage_type(self) -> Option<DataType> {
        match self {
            Self::Integer | Self::IntegerArray => Some(DataType::Int),
            Self::Long | Self::LongArray       => Some(DataType::Long),
            Self::Float | Self::FloatArray     => Some(DataType::Float),
            Self::Double | Self::DoubleArray   => Some(DataType::Double),
            Self::String | Self::StringArray   => Some(DataType::String),
            Self::Bytes                        => Some(DataType::Bytes),
            _ => None,
        }
    }

    /// 把 `value`（源类型为 `self`）转换为 `dest`
    pub fn convert(self, value: Value, dest: ColumnDataType) -> Result<Value> {
        let target = dest.storage_type()
            .ok_or_else(|| OlapError::TypeConversion(format!("{dest:?} is not a storage type")))?;
        let scalar = |v: &Value| -> Result<Value> {
            match v {
                Value::Object(json) => Value::from_json(json).coerce_scalar(target),
                other => other.coerce_scalar(target),
            }
        };
        if dest.is_multi_value() {
            let items = match value {
                Value::List(vs) | Value::Array(vs) => vs,
                other => vec![other],
            };
            Ok(Value::Array(items.iter().map(scalar).collect::<Result<_>>()?))
        } else {
            match value {
                Value::List(vs) | Value::Array(vs) => {
                    let first = vs.first().ok_or_else(|| {
                        OlapError::TypeConversion(format!("empty array for single-value {target} column"))
                    })?;
                    scalar(first)
                }
                other => scalar(&other),
            }
        }
    }
}

static SINGLE_VALUE_TYPE_MAP: Lazy<HashMap<ValueKind, ColumnDataType>> = Lazy::new(|| {
    HashMap::from([
        (ValueKind::Boolean, ColumnDataType::Boolean),
        (ValueKind::Byte,    ColumnDataType::Byte),
        (ValueKind::Char,    ColumnDataType::Character),
        (ValueKind::Short,   ColumnDataType::Short),
        (ValueKind::Int,     ColumnDataType::Integer),
        (ValueKind::Long,    ColumnDataType::Long),
        (ValueKind::Float,   ColumnDataType::Float),
        (ValueKind::Double,  ColumnDataType::Double),
        (ValueKind::String,  ColumnDataType::String),
        (ValueKind::Bytes,   ColumnDataType::Bytes),
    ])
});

/// 按数组元素类型索引
static MULTI_VALUE_TYPE_MAP: Lazy<HashMap<ValueKind, ColumnDataType>> = Lazy::new(|| {
    HashMap::from([
        (ValueKind::Byte,   ColumnDataType::ByteArray),
        (ValueKind::Char,   ColumnDataType::CharacterArray),
        (ValueKind::Short,  ColumnDataType::ShortArray),
        (ValueKind::Int,    ColumnDataType::IntegerArray),
        (ValueKind::Long,   ColumnDataType::LongArray),
        (ValueKind::Float,  ColumnDataType::FloatArray),
        (ValueKind::Double, ColumnDataType::DoubleArray),
        (ValueKind::String, ColumnDataType::StringArray),
    ])
});

/// 运行时值的源类型
pub fn source_type(value: &Value) -> ColumnDataType {
    match value {
        Value::Array(items) | Value::List(items) => {
            let Some(first) = items.first() else { return ColumnDataType::ObjectArray };
            // 元素不同构时走慢速路径
            if items.iter().any(|v| v.kind() != first.kind()) {
                return ColumnDataType::ObjectArray;
            }
            MULTI_VALUE_TYPE_MAP.get(&first.kind()).copied().unwrap_or(ColumnDataType::ObjectArray)
        }
        other => SINGLE_VALUE_TYPE_MAP.get(&other.kind()).copied().unwrap_or(ColumnDataType::Object),
    }
}

// ── DataTypeTransformer ───────────────────────────────────────────────────────

pub struct DataTypeTransformer {
    dest_types: HashMap<String, ColumnDataType>,
}

impl DataTypeTransformer {
    pub fn new(schema: &Schema) -> Result<Self> {
        let dest_types: HashMap<String, ColumnDataType> = schema.field_specs.iter()
            .map(|f| Ok((f.name.clone(), ColumnDataType::for_field(f.data_type, f.single_value)?)))
            .collect::<Result<_>>()?;
        Ok(Self { dest_types })
    }
}

impl RecordTransformer for DataTypeTransformer {
    fn transform(&self, row: &mut GenericRow) -> Result<()> {
        for (column, dest) in &self.dest_types {
            let Some(value) = row.remove_value(column) else { continue };
            // 泛型列表先转成数组
            let value = match value {
                Value::List(items) => Value::Array(items),
                other => other,
            };
            let value = if value.is_null() || matches!(&value, Value::Array(v) if v.is_empty()) {
                value
            } else {
                let source = source_type(&value);
                if source == *dest {
                    value
                } else {
                    source.convert(value, *dest).map_err(|e| {
                        OlapError::TypeConversion(format!("column {column}: {e}"))
                    })?
                }
            };
            row.put_value(column, value);
        }
        Ok(())
    }
}

// ── NullValueTransformer ──────────────────────────────────────────────────────

pub struct NullValueTransformer {
    defaults: Vec<(String, Value)>,
}

impl NullValueTransformer {
    pub fn new(schema: &Schema) -> Self {
        let defaults = schema.field_specs.iter()
            .map(|f| {
                let d = f.default_null_value();
                (f.name.clone(), if f.single_value { d } else { Value::Array(vec![d]) })
            })
            .collect();
        Self { defaults }
    }
}

impl RecordTransformer for NullValueTransformer {
    fn transform(&self, row: &mut GenericRow) -> Result<()> {
        for (column, default) in &self.defaults {
            let missing = match row.get_value(column) {
                None | Some(Value::Null) => true,
                Some(Value::List(v)) | Some(Value::Array(v)) => v.is_empty(),
                Some(_) => false,
            };
            if missing {
                row.put_value(column, default.clone());
            }
        }
        Ok(())
    }
}

// ── CompositeTransformer ──────────────────────────────────────────────────────

pub struct CompositeTransformer {
    transformers: Vec<Box<dyn RecordTransformer>>,
}

impl CompositeTransformer {
    pub fn new(transformers: Vec<Box<dyn RecordTransformer>>) -> Self {
        Self { transformers }
    }

    /// 空值填充 → 类型转换
    pub fn default_for(schema: &Schema) -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(NullValueTransformer::new(schema)),
            Box::new(DataTypeTransformer::new(schema)?),
        ]))
    }
}

impl RecordTransformer for CompositeTransformer {
    fn transform(&self, row: &mut GenericRow) -> Result<()> {
        for t in &self.transformers {
            t.transform(row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::FieldSpec;

    fn schema() -> Schema {
        Schema::new("t", vec![
            FieldSpec::dimension("id", DataType::Int, true),
            FieldSpec::dimension("tags", DataType::String, false),
            FieldSpec::metric("price", DataType::Double),
            FieldSpec::dimension("scores", DataType::Long, false),
        ])
    }

    #[test]
    fn test_source_type_lookup() {
        assert_eq!(source_type(&Value::Int(1)), ColumnDataType::Integer);
        assert_eq!(source_type(&Value::Object(serde_json::json!({"a": 1}))), ColumnDataType::Object);
        assert_eq!(source_type(&Value::Array(vec![Value::Long(1)])), ColumnDataType::LongArray);
        assert_eq!(
            source_type(&Value::Array(vec![Value::Long(1), Value::String("x".into())])),
            ColumnDataType::ObjectArray,
        );
        assert_eq!(source_type(&Value::Array(vec![Value::Bytes(vec![1])])), ColumnDataType::ObjectArray);
    }

    #[test]
    fn test_converts_to_schema_types() {
        let t = CompositeTransformer::default_for(&schema()).unwrap();
        let mut row = GenericRow::from_pairs([
            ("id", Value::String("7".into())),
            ("tags", Value::List(vec![Value::Long(1), Value::String("b".into())])),
            ("price", Value::Long(3)),
        ]);
        t.transform(&mut row).unwrap();
        assert_eq!(row.get_value("id"), Some(&Value::Int(7)));
        assert_eq!(
            row.get_value("tags"),
            Some(&Value::Array(vec![Value::String("1".into()), Value::String("b".into())])),
        );
        assert_eq!(row.get_value("price"), Some(&Value::Double(3.0)));
        // 缺失的多值列填默认值
        assert_eq!(row.get_value("scores"), Some(&Value::Array(vec![Value::Long(i64::MIN)])));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let t = CompositeTransformer::default_for(&schema()).unwrap();
        let mut row = GenericRow::from_pairs([
            ("id", Value::Double(4.0)),
            ("tags", Value::String("solo".into())),
            ("scores", Value::List(vec![Value::Int(1), Value::Int(2)])),
        ]);
        t.transform(&mut row).unwrap();
        let once = row.clone();
        t.transform(&mut row).unwrap();
        assert_eq!(row, once);
        assert_eq!(row.get_value("tags"), Some(&Value::Array(vec![Value::String("solo".into())])));
    }

    #[test]
    fn test_conversion_failure() {
        let t = DataTypeTransformer::new(&schema()).unwrap();
        let mut row = GenericRow::from_pairs([("id", Value::String("abc".into()))]);
        assert!(matches!(t.transform(&mut row), Err(OlapError::TypeConversion(_))));
    }

    #[test]
    fn test_multi_value_bytes_rejected() {
        let s = Schema::new("t", vec![FieldSpec::dimension("b", DataType::Bytes, false)]);
        assert!(DataTypeTransformer::new(&s).is_err());
    }
}
