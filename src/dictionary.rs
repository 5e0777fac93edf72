//! 列字典（`<column>.dict`）
//!
//! - **Dictionary**: 段封存后的有序不可变字典，dict_id 即排序位置
//! - **MutableDictionary**: 实时段使用，按首次出现顺序分配 dict_id
//!
//! 文件格式（小端）：
//! ```text
//! cardinality (i32)
//! INT/FLOAT    : cardinality × 4 bytes
//! LONG/DOUBLE  : cardinality × 8 bytes
//! STRING/BYTES : cardinality × (len i32 + bytes)
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use byteorder::{LittleEndian, WriteBytesExt};
use parking_lot::RwLock;
use crate::common::{DictId, OlapError, Result};
use crate::field_type::{DataType, Value};
use crate::io::DataBuffer;

#[derive(Debug, Clone, PartialEq)]
enum DictValues {
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
}

// ── 不可变字典 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Dictionary {
    data_type: DataType,
    values:    DictValues,
}

impl Dictionary {
    /// 从任意顺序、可重复的值构建有序字典
    pub fn build<'a>(data_type: DataType, values: impl IntoIterator<Item = &'a Value>) -> Result<Self> {
        let values = match data_type {
            DataType::Int => {
                let mut v = collect(values, |x| match x { Value::Int(i) => Some(*i), _ => None })?;
                v.sort_unstable();
                v.dedup();
                DictValues::Int(v)
            }
            DataType::Long => {
                let mut v = collect(values, |x| match x { Value::Long(i) => Some(*i), _ => None })?;
                v.sort_unstable();
                v.dedup();
                DictValues::Long(v)
            }
            DataType::Float => {
                let mut v = collect(values, |x| match x { Value::Float(f) => Some(*f), _ => None })?;
                v.sort_unstable_by(|a, b| a.total_cmp(b));
                v.dedup_by(|a, b| a.to_bits() == b.to_bits());
                DictValues::Float(v)
            }
            DataType::Double => {
                let mut v = collect(values, |x| match x { Value::Double(f) => Some(*f), _ => None })?;
                v.sort_unstable_by(|a, b| a.total_cmp(b));
                v.dedup_by(|a, b| a.to_bits() == b.to_bits());
                DictValues::Double(v)
            }
            DataType::String => {
                let mut v = collect(values, |x| match x { Value::String(s) => Some(s.clone()), _ => None })?;
                v.sort_unstable();
                v.dedup();
                DictValues::String(v)
            }
            DataType::Bytes => {
                let mut v = collect(values, |x| match x { Value::Bytes(b) => Some(b.clone()), _ => None })?;
                v.sort_unstable();
                v.dedup();
                DictValues::Bytes(v)
            }
        };
        Ok(Self { data_type, values })
    }

    pub fn data_type(&self) -> DataType { self.data_type }

    pub fn cardinality(&self) -> usize {
        match &self.values {
            DictValues::Int(v)    => v.len(),
            DictValues::Long(v)   => v.len(),
            DictValues::Float(v)  => v.len(),
            DictValues::Double(v) => v.len(),
            DictValues::String(v) => v.len(),
            DictValues::Bytes(v)  => v.len(),
        }
    }

    pub fn get(&self, dict_id: DictId) -> Value {
        let i = dict_id as usize;
        match &self.values {
            DictValues::Int(v)    => Value::Int(v[i]),
            DictValues::Long(v)   => Value::Long(v[i]),
            DictValues::Float(v)  => Value::Float(v[i]),
            DictValues::Double(v) => Value::Double(v[i]),
            DictValues::String(v) => Value::String(v[i].clone()),
            DictValues::Bytes(v)  => Value::Bytes(v[i].clone()),
        }
    }

    /// 数值列的 f64 视图；非数值列返回 None
    pub fn get_f64(&self, dict_id: DictId) -> Option<f64> {
        let i = dict_id as usize;
        match &self.values {
            DictValues::Int(v)    => Some(v[i] as f64),
            DictValues::Long(v)   => Some(v[i] as f64),
            DictValues::Float(v)  => Some(v[i] as f64),
            DictValues::Double(v) => Some(v[i]),
            _ => None,
        }
    }

    pub fn min_value(&self) -> Option<Value> {
        (self.cardinality() > 0).then(|| self.get(0))
    }

    pub fn max_value(&self) -> Option<Value> {
        let n = self.cardinality();
        (n > 0).then(|| self.get(n as DictId - 1))
    }

    /// 精确查找；类型无法转换或值不存在时返回 None
    pub fn index_of(&self, value: &Value) -> Option<DictId> {
        let v = value.coerce_scalar(self.data_type).ok()?;
        let pos = match (&self.values, &v) {
            (DictValues::Int(xs),    Value::Int(x))    => xs.binary_search(x).ok(),
            (DictValues::Long(xs),   Value::Long(x))   => xs.binary_search(x).ok(),
            (DictValues::Float(xs),  Value::Float(x))  => xs.binary_search_by(|p| p.total_cmp(x)).ok(),
            (DictValues::Double(xs), Value::Double(x)) => xs.binary_search_by(|p| p.total_cmp(x)).ok(),
            (DictValues::String(xs), Value::String(x)) => xs.binary_search(x).ok(),
            (DictValues::Bytes(xs),  Value::Bytes(x))  => xs.binary_search(x).ok(),
            _ => None,
        };
        pos.map(|p| p as DictId)
    }

    /// 第一个 `>= value`（或 `> value`）的位置
    fn lower_position(&self, value: &Value, inclusive: bool) -> Result<usize> {
        let v = value.coerce_scalar(self.data_type)
            .map_err(|e| OlapError::BadQuery(format!("invalid range bound: {e}")))?;
        let p = match (&self.values, &v) {
            (DictValues::Int(xs),    Value::Int(x))    => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            (DictValues::Long(xs),   Value::Long(x))   => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            (DictValues::Float(xs),  Value::Float(x))  => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            (DictValues::Double(xs), Value::Double(x)) => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            (DictValues::String(xs), Value::String(x)) => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            (DictValues::Bytes(xs),  Value::Bytes(x))  => xs.partition_point(|p| if inclusive { p < x } else { p <= x }),
            _ => return Err(OlapError::BadQuery(format!("range bound {value} does not match {}", self.data_type))),
        };
        Ok(p)
    }

    /// 区间谓词对应的 dict_id 连续区间（有序字典的性质）
    pub fn dict_id_range(
        &self,
        lower: Option<(&Value, bool)>,
        upper: Option<(&Value, bool)>,
    ) -> Result<Range<DictId>> {
        let start = match lower {
            Some((v, inclusive)) => self.lower_position(v, inclusive)?,
            None => 0,
        };
        let end = match upper {
            // 上界 `<= v` 等价于第一个 `> v` 的位置
            Some((v, inclusive)) => self.lower_position(v, !inclusive)?,
            None => self.cardinality(),
        };
        Ok(start as DictId..end.max(start) as DictId)
    }

    // ── 持久化 ────────────────────────────────────────────────────────────────

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut out: Vec<u8> = Vec::new();
        out.write_i32::<LittleEndian>(self.cardinality() as i32)?;
        match &self.values {
            DictValues::Int(v)    => for x in v { out.write_i32::<LittleEndian>(*x)?; },
            DictValues::Long(v)   => for x in v { out.write_i64::<LittleEndian>(*x)?; },
            DictValues::Float(v)  => for x in v { out.write_f32::<LittleEndian>(*x)?; },
            DictValues::Double(v) => for x in v { out.write_f64::<LittleEndian>(*x)?; },
            DictValues::String(v) => for s in v {
                out.write_i32::<LittleEndian>(s.len() as i32)?;
                out.write_all(s.as_bytes())?;
            },
            DictValues::Bytes(v)  => for b in v {
                out.write_i32::<LittleEndian>(b.len() as i32)?;
                out.write_all(b)?;
            },
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    /// 字典总是整体读入堆
    pub fn load(buffer: &DataBuffer, data_type: DataType, expected_cardinality: usize) -> Result<Self> {
        let mut cur = Cursor { data: buffer.as_slice(), pos: 0 };
        let cardinality = cur.i32()?;
        if cardinality < 0 || cardinality as usize != expected_cardinality {
            return Err(OlapError::corruption(format!(
                "dictionary cardinality {cardinality} disagrees with metadata {expected_cardinality}",
            )));
        }
        let n = cardinality as usize;
        let values = match data_type {
            DataType::Int    => DictValues::Int((0..n).map(|_| cur.i32()).collect::<Result<_>>()?),
            DataType::Long   => DictValues::Long((0..n).map(|_| cur.i64()).collect::<Result<_>>()?),
            DataType::Float  => DictValues::Float((0..n).map(|_| cur.f32()).collect::<Result<_>>()?),
            DataType::Double => DictValues::Double((0..n).map(|_| cur.f64()).collect::<Result<_>>()?),
            DataType::String => DictValues::String((0..n)
                .map(|_| {
                    let b = cur.var_bytes()?;
                    String::from_utf8(b).map_err(|_| OlapError::corruption("dictionary string is not UTF-8"))
                })
                .collect::<Result<_>>()?),
            DataType::Bytes  => DictValues::Bytes((0..n).map(|_| cur.var_bytes()).collect::<Result<_>>()?),
        };
        Ok(Self { data_type, values })
    }
}

fn collect<'a, T>(
    values:  impl IntoIterator<Item = &'a Value>,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<T>> {
    values.into_iter()
        .map(|v| extract(v).ok_or_else(|| OlapError::SchemaMismatch(format!("unexpected dictionary value {v}"))))
        .collect()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl Cursor<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.pos + n > self.data.len() {
            return Err(OlapError::corruption("truncated dictionary"));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn i32(&mut self) -> Result<i32> { Ok(i32::from_le_bytes(self.take(4)?.try_into().map_err(|_| OlapError::corruption("dict"))?)) }
    fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.take(8)?.try_into().map_err(|_| OlapError::corruption("dict"))?)) }
    fn f32(&mut self) -> Result<f32> { Ok(f32::from_le_bytes(self.take(4)?.try_into().map_err(|_| OlapError::corruption("dict"))?)) }
    fn f64(&mut self) -> Result<f64> { Ok(f64::from_le_bytes(self.take(8)?.try_into().map_err(|_| OlapError::corruption("dict"))?)) }
    fn var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.i32()?;
        if len < 0 {
            return Err(OlapError::corruption("negative dictionary entry length"));
        }
        Ok(self.take(len as usize)?.to_vec())
    }
}

// ── 可变字典 ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MutableDictInner {
    values: Vec<Value>,
    index:  HashMap<Vec<u8>, DictId>,
}

/// 实时段字典：单写多读，dict_id 按首次出现分配
#[derive(Default)]
pub struct MutableDictionary {
    inner: RwLock<MutableDictInner>,
}

impl MutableDictionary {
    pub fn new() -> Self { Self::default() }

    /// 返回值的 dict_id，不存在则追加
    pub fn index(&self, value: &Value) -> DictId {
        let key = value.to_sort_key();
        if let Some(id) = self.inner.read().index.get(&key) {
            return *id;
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.index.get(&key) {
            return *id;
        }
        let id = inner.values.len() as DictId;
        inner.values.push(value.clone());
        inner.index.insert(key, id);
        id
    }

    pub fn index_of(&self, value: &Value) -> Option<DictId> {
        self.inner.read().index.get(&value.to_sort_key()).copied()
    }

    pub fn get(&self, dict_id: DictId) -> Value {
        self.inner.read().values[dict_id as usize].clone()
    }

    pub fn len(&self) -> usize { self.inner.read().values.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(xs: &[&str]) -> Vec<Value> {
        xs.iter().map(|s| Value::String(s.to_string())).collect()
    }

    #[test]
    fn test_build_sorted_dedup() {
        let vals = strings(&["us", "cn", "us", "de", "cn"]);
        let dict = Dictionary::build(DataType::String, &vals).unwrap();
        assert_eq!(dict.cardinality(), 3);
        assert_eq!(dict.get(0), Value::String("cn".into()));
        assert_eq!(dict.index_of(&Value::String("us".into())), Some(2));
        assert_eq!(dict.index_of(&Value::String("fr".into())), None);
        assert_eq!(dict.max_value(), Some(Value::String("us".into())));
    }

    #[test]
    fn test_index_of_coerces_literal() {
        let vals: Vec<Value> = [30, 10, 20].iter().map(|i| Value::Long(*i)).collect();
        let dict = Dictionary::build(DataType::Long, &vals).unwrap();
        assert_eq!(dict.index_of(&Value::Int(20)), Some(1));
        assert_eq!(dict.index_of(&Value::String("30".into())), Some(2));
        assert_eq!(dict.get_f64(0), Some(10.0));
    }

    #[test]
    fn test_dict_id_range() {
        let vals: Vec<Value> = [1, 3, 5, 7, 9].iter().map(|i| Value::Int(*i)).collect();
        let dict = Dictionary::build(DataType::Int, &vals).unwrap();
        let r = dict.dict_id_range(Some((&Value::Int(3), true)), Some((&Value::Int(7), false))).unwrap();
        assert_eq!(r, 1..3);
        let r = dict.dict_id_range(Some((&Value::Int(3), false)), None).unwrap();
        assert_eq!(r, 2..5);
        let r = dict.dict_id_range(None, Some((&Value::Int(4), true))).unwrap();
        assert_eq!(r, 0..2);
        let r = dict.dict_id_range(Some((&Value::Int(8), true)), Some((&Value::Int(2), true))).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for (dt, vals) in [
            (DataType::String, strings(&["b", "a", "ccc"])),
            (DataType::Double, vec![Value::Double(2.5), Value::Double(-1.0)]),
            (DataType::Bytes,  vec![Value::Bytes(vec![1, 2]), Value::Bytes(vec![])]),
        ] {
            let dict = Dictionary::build(dt, &vals).unwrap();
            let path = dir.path().join(format!("{dt}.dict"));
            dict.write_to(&path).unwrap();
            let buf = DataBuffer::load_file(&path).unwrap();
            assert_eq!(Dictionary::load(&buf, dt, dict.cardinality()).unwrap(), dict);
            assert!(Dictionary::load(&buf, dt, dict.cardinality() + 1).unwrap_err().is_corruption());
        }
    }

    #[test]
    fn test_mutable_dictionary() {
        let d = MutableDictionary::new();
        assert_eq!(d.index(&Value::Int(7)), 0);
        assert_eq!(d.index(&Value::Int(3)), 1);
        assert_eq!(d.index(&Value::Int(7)), 0);
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(1), Value::Int(3));
        assert_eq!(d.index_of(&Value::Int(9)), None);
    }
}
