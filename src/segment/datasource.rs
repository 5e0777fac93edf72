//! 列数据源：字典 + 正排索引
//!
//! 段的普通列、星型树的维度列与预聚合列都以 `DataSource` 暴露给算子。

use std::sync::Arc;
use crate::common::{DictId, DocId};
use crate::dictionary::Dictionary;
use crate::field_type::{DataType, Value};
use crate::io::{
    FixedBitMultiValueReader, FixedBitSingleValueReader, FixedByteDoubleReader,
    MultiValueReaderContext,
};

#[derive(Debug, Clone)]
pub enum ForwardIndex {
    SingleValue(FixedBitSingleValueReader),
    MultiValue(FixedBitMultiValueReader),
    /// 无字典的 f64 列（星型树预聚合列）
    RawDouble(FixedByteDoubleReader),
}

impl ForwardIndex {
    pub fn num_docs(&self) -> usize {
        match self {
            Self::SingleValue(r) => r.num_docs(),
            Self::MultiValue(r)  => r.num_docs(),
            Self::RawDouble(r)   => r.num_docs(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataSource {
    column:     String,
    data_type:  DataType,
    dictionary: Option<Arc<Dictionary>>,
    forward:    ForwardIndex,
}

impl DataSource {
    pub fn new(
        column:     &str,
        data_type:  DataType,
        dictionary: Option<Arc<Dictionary>>,
        forward:    ForwardIndex,
    ) -> Self {
        Self { column: column.to_string(), data_type, dictionary, forward }
    }

    pub fn raw_double(column: &str, reader: FixedByteDoubleReader) -> Self {
        Self::new(column, DataType::Double, None, ForwardIndex::RawDouble(reader))
    }

    pub fn column(&self)      -> &str { &self.column }
    pub fn data_type(&self)   -> DataType { self.data_type }
    pub fn forward(&self)     -> &ForwardIndex { &self.forward }
    pub fn dictionary(&self)  -> Option<&Arc<Dictionary>> { self.dictionary.as_ref() }
    pub fn num_docs(&self)    -> usize { self.forward.num_docs() }

    pub fn is_single_value(&self) -> bool {
        !matches!(self.forward, ForwardIndex::MultiValue(_))
    }

    /// 单值字典列的 dict_id；其他列返回 None
    #[inline]
    pub fn dict_id(&self, doc_id: DocId) -> Option<DictId> {
        match &self.forward {
            ForwardIndex::SingleValue(r) => Some(r.get_int(doc_id)),
            _ => None,
        }
    }

    /// 数值视图：单值数值字典列或 f64 列
    #[inline]
    pub fn double_value(&self, doc_id: DocId) -> Option<f64> {
        match &self.forward {
            ForwardIndex::SingleValue(r) => self.dictionary.as_ref()?.get_f64(r.get_int(doc_id)),
            ForwardIndex::RawDouble(r)   => Some(r.get_double(doc_id)),
            ForwardIndex::MultiValue(_)  => None,
        }
    }

    pub fn create_mv_context(&self) -> Option<MultiValueReaderContext> {
        match &self.forward {
            ForwardIndex::MultiValue(r) => Some(r.create_context()),
            _ => None,
        }
    }

    /// 多值列的 dict_id 列表
    pub fn dict_ids_mv<'c>(&self, doc_id: DocId, ctx: &'c mut MultiValueReaderContext) -> &'c [DictId] {
        match &self.forward {
            ForwardIndex::MultiValue(r) => r.get_int_array_with_context(doc_id, ctx),
            _ => &[],
        }
    }

    /// 解码一行的值；多值列返回 `Value::Array`
    pub fn value(&self, doc_id: DocId, ctx: Option<&mut MultiValueReaderContext>) -> Value {
        match (&self.forward, &self.dictionary) {
            (ForwardIndex::SingleValue(r), Some(dict)) => dict.get(r.get_int(doc_id)),
            (ForwardIndex::SingleValue(r), None)       => Value::Int(r.get_int(doc_id)),
            (ForwardIndex::RawDouble(r), _)            => Value::Double(r.get_double(doc_id)),
            (ForwardIndex::MultiValue(r), dict) => {
                let mut owned;
                let ctx = match ctx {
                    Some(c) => c,
                    None => {
                        owned = r.create_context();
                        &mut owned
                    }
                };
                let ids = r.get_int_array_with_context(doc_id, ctx);
                Value::Array(ids.iter()
                    .map(|id| dict.as_ref().map_or(Value::Int(*id), |d| d.get(*id)))
                    .collect())
            }
        }
    }

    /// 共享字典、换一个正排索引（星型树维度列）
    pub fn with_forward(&self, forward: ForwardIndex) -> Self {
        Self {
            column: self.column.clone(),
            data_type: self.data_type,
            dictionary: self.dictionary.clone(),
            forward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{DataBuffer, FixedBitMultiValueWriter, FixedBitSingleValueWriter};

    #[test]
    fn test_decode_values() {
        let dir = tempfile::tempdir().unwrap();
        let vals: Vec<Value> = ["x", "y", "z"].iter().map(|s| Value::String(s.to_string())).collect();
        let dict = Arc::new(Dictionary::build(DataType::String, &vals).unwrap());

        let sv_path = dir.path().join("c.sv.unsorted.fwd");
        let mut w = FixedBitSingleValueWriter::create(&sv_path, 2, 2).unwrap();
        w.set_int(0, 2);
        w.set_int(1, 0);
        w.close().unwrap();
        let sv = FixedBitSingleValueReader::new(DataBuffer::load_file(&sv_path).unwrap(), 2, 2).unwrap();
        let ds = DataSource::new("c", DataType::String, Some(dict.clone()), ForwardIndex::SingleValue(sv));
        assert_eq!(ds.value(0, None), Value::String("z".into()));
        assert_eq!(ds.dict_id(1), Some(0));
        assert_eq!(ds.double_value(0), None);

        let mv_path = dir.path().join("c.mv.fwd");
        let mut w = FixedBitMultiValueWriter::create(&mv_path, 2, 3, 2, 2).unwrap();
        w.set_int_array(0, &[0, 1]).unwrap();
        w.set_int_array(1, &[2]).unwrap();
        w.close().unwrap();
        let mv = FixedBitMultiValueReader::new(DataBuffer::load_file(&mv_path).unwrap()).unwrap();
        let ds = DataSource::new("c", DataType::String, Some(dict), ForwardIndex::MultiValue(mv));
        assert!(!ds.is_single_value());
        let mut ctx = ds.create_mv_context().unwrap();
        assert_eq!(ds.dict_ids_mv(0, &mut ctx), &[0, 1]);
        assert_eq!(
            ds.value(0, Some(&mut ctx)),
            Value::Array(vec![Value::String("x".into()), Value::String("y".into())]),
        );
        assert_eq!(ds.value(1, None), Value::Array(vec![Value::String("z".into())]));
    }
}
