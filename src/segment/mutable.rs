//! 实时（可变）段
//!
//! 单写多读。写入方 `index` 依次写字典、单值 dict_id（原子单元格）、多值列表，
//! 最后以 Release 发布 `num_docs_indexed`；读取方以 Acquire 读到的行数为准，
//! 只访问已发布的行。

use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::RwLock;
use tracing::debug;
use crate::common::{DictId, DocId, OlapError, Result};
use crate::dictionary::MutableDictionary;
use crate::field_type::{Schema, Value};
use crate::io::FixedByteSingleValueMultiColumnReaderWriter;
use crate::record::{GenericRow, RecordReader};

const DEFAULT_ROWS_PER_CHUNK: usize = 10_000;

enum ColumnStore {
    /// 多列读写器中的列下标
    Single(usize),
    Multi(RwLock<Vec<Vec<DictId>>>),
}

struct MutableColumn {
    name:       String,
    dictionary: MutableDictionary,
    store:      ColumnStore,
}

pub struct MutableSegment {
    segment_name:     String,
    schema:           Schema,
    columns:          Vec<MutableColumn>,
    single_values:    FixedByteSingleValueMultiColumnReaderWriter,
    num_docs_indexed: AtomicUsize,
}

impl MutableSegment {
    pub fn new(segment_name: &str, schema: Schema) -> Self {
        Self::with_chunk_size(segment_name, schema, DEFAULT_ROWS_PER_CHUNK)
    }

    pub fn with_chunk_size(segment_name: &str, schema: Schema, rows_per_chunk: usize) -> Self {
        let mut num_single = 0;
        let columns = schema.field_specs.iter()
            .map(|f| {
                let store = if f.single_value {
                    num_single += 1;
                    ColumnStore::Single(num_single - 1)
                } else {
                    ColumnStore::Multi(RwLock::new(Vec::new()))
                };
                MutableColumn { name: f.name.clone(), dictionary: MutableDictionary::new(), store }
            })
            .collect();
        Self {
            segment_name: segment_name.to_string(),
            schema,
            columns,
            single_values: FixedByteSingleValueMultiColumnReaderWriter::new(rows_per_chunk, num_single),
            num_docs_indexed: AtomicUsize::new(0),
        }
    }

    pub fn segment_name(&self) -> &str { &self.segment_name }
    pub fn schema(&self) -> &Schema { &self.schema }

    /// 已发布（对读取方可见）的行数
    pub fn num_docs(&self) -> usize {
        self.num_docs_indexed.load(Ordering::Acquire)
    }

    /// 追加一行（已经过 transformer），返回其 doc id。只允许一个写入线程。
    pub fn index(&self, row: &GenericRow) -> Result<DocId> {
        let doc = self.num_docs_indexed.load(Ordering::Relaxed);
        for column in &self.columns {
            let value = row.get_value(&column.name).unwrap_or(&Value::Null);
            match &column.store {
                ColumnStore::Single(idx) => {
                    if value.is_multi_value() {
                        return Err(OlapError::SchemaMismatch(format!(
                            "multi-value {value} for single-value column {}", column.name,
                        )));
                    }
                    let id = column.dictionary.index(value);
                    self.single_values.set_int(doc, *idx, id);
                }
                ColumnStore::Multi(lists) => {
                    let ids = value.as_values()
                        .unwrap_or(std::slice::from_ref(value))
                        .iter()
                        .map(|v| column.dictionary.index(v))
                        .collect();
                    lists.write().push(ids);
                }
            }
        }
        self.num_docs_indexed.store(doc + 1, Ordering::Release);
        Ok(doc as DocId)
    }

    /// 重建一行到 `reuse`
    pub fn get_record(&self, doc_id: DocId, reuse: &mut GenericRow) -> Result<()> {
        let doc = doc_id as usize;
        if doc >= self.num_docs() {
            return Err(OlapError::Internal(format!(
                "doc {doc_id} not yet indexed in {}", self.segment_name,
            )));
        }
        reuse.clear();
        for column in &self.columns {
            let value = match &column.store {
                ColumnStore::Single(idx) => column.dictionary.get(self.single_values.get_int(doc, *idx)),
                ColumnStore::Multi(lists) => {
                    let lists = lists.read();
                    Value::Array(lists[doc].iter().map(|id| column.dictionary.get(*id)).collect())
                }
            };
            reuse.put_value(&column.name, value);
        }
        Ok(())
    }

    /// 按列值升序的 doc id（值相同保持 doc id 顺序）；仅支持单值列
    pub fn sorted_doc_id_iteration_order(&self, column: &str) -> Result<Vec<DocId>> {
        let col = self.columns.iter().find(|c| c.name == column)
            .ok_or_else(|| OlapError::ColumnNotFound(column.to_string()))?;
        let &ColumnStore::Single(idx) = &col.store else {
            return Err(OlapError::Unsupported(format!("sorting by multi-value column {column}")));
        };
        let num_docs = self.num_docs();
        // 先给字典值排个名次，再按名次排 doc
        let mut ids: Vec<DictId> = (0..col.dictionary.len() as DictId).collect();
        let values: Vec<Value> = ids.iter().map(|id| col.dictionary.get(*id)).collect();
        ids.sort_by(|a, b| values[*a as usize].compare(&values[*b as usize]));
        let mut rank = vec![0usize; ids.len()];
        for (r, id) in ids.iter().enumerate() {
            rank[*id as usize] = r;
        }

        let mut docs: Vec<DocId> = (0..num_docs as DocId).collect();
        docs.sort_by_key(|d| rank[self.single_values.get_int(*d as usize, idx) as usize]);
        debug!(segment = %self.segment_name, column, docs = num_docs, "sorted doc id order");
        Ok(docs)
    }
}

// ── RealtimeSegmentRecordReader ───────────────────────────────────────────────

/// 把可变段当作记录源，喂给段生成器
pub struct RealtimeSegmentRecordReader<'a> {
    segment:  &'a MutableSegment,
    num_docs: usize,
    order:    Option<Vec<DocId>>,
    next_doc: usize,
}

impl<'a> RealtimeSegmentRecordReader<'a> {
    /// 行数在创建时固定；`sort_column` 给定时按该列值顺序输出
    pub fn new(segment: &'a MutableSegment, sort_column: Option<&str>) -> Result<Self> {
        let order = sort_column.map(|c| segment.sorted_doc_id_iteration_order(c)).transpose()?;
        let num_docs = order.as_ref().map_or_else(|| segment.num_docs(), Vec::len);
        Ok(Self { segment, num_docs, order, next_doc: 0 })
    }
}

impl RecordReader for RealtimeSegmentRecordReader<'_> {
    fn has_next(&self) -> bool { self.next_doc < self.num_docs }

    fn next(&mut self, reuse: &mut GenericRow) -> Result<()> {
        if !self.has_next() {
            return Err(OlapError::Internal("record reader exhausted".into()));
        }
        let doc = match &self.order {
            Some(order) => order[self.next_doc],
            None => self.next_doc as DocId,
        };
        self.next_doc += 1;
        self.segment.get_record(doc, reuse)
    }

    fn rewind(&mut self) -> Result<()> {
        self.next_doc = 0;
        Ok(())
    }

    fn schema(&self) -> &Schema { self.segment.schema() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::field_type::{DataType, FieldSpec};

    fn schema() -> Schema {
        Schema::new("clicks", vec![
            FieldSpec::dimension("country", DataType::String, true),
            FieldSpec::dimension("tags", DataType::String, false),
            FieldSpec::metric("clicks", DataType::Long),
        ])
    }

    fn row(country: &str, tags: &[&str], clicks: i64) -> GenericRow {
        GenericRow::from_pairs([
            ("country", Value::from(country)),
            ("tags", Value::Array(tags.iter().map(|t| Value::from(*t)).collect())),
            ("clicks", Value::Long(clicks)),
        ])
    }

    #[test]
    fn test_read_after_write() {
        let segment = MutableSegment::with_chunk_size("rt_0", schema(), 2);
        let mut reuse = GenericRow::new();
        for (i, c) in ["us", "cn", "us", "de", "fr"].iter().enumerate() {
            let doc = segment.index(&row(c, &["x", c], i as i64)).unwrap();
            assert_eq!(doc as usize, i);
            segment.get_record(doc, &mut reuse).unwrap();
            assert_eq!(reuse, row(c, &["x", c], i as i64));
        }
        assert_eq!(segment.num_docs(), 5);
        assert!(segment.get_record(5, &mut reuse).is_err());
    }

    #[test]
    fn test_sorted_iteration_and_reader() {
        let segment = MutableSegment::new("rt_0", schema());
        for (c, n) in [("us", 1), ("cn", 2), ("us", 3), ("br", 4)] {
            segment.index(&row(c, &[], n)).unwrap();
        }
        assert_eq!(segment.sorted_doc_id_iteration_order("country").unwrap(), vec![3, 1, 0, 2]);
        assert!(segment.sorted_doc_id_iteration_order("tags").is_err());

        let mut reader = RealtimeSegmentRecordReader::new(&segment, Some("clicks")).unwrap();
        let mut r = GenericRow::new();
        let mut clicks = Vec::new();
        while reader.has_next() {
            reader.next(&mut r).unwrap();
            clicks.push(r.get_value("clicks").cloned().unwrap());
        }
        assert_eq!(clicks, vec![Value::Long(1), Value::Long(2), Value::Long(3), Value::Long(4)]);
    }

    #[test]
    fn test_concurrent_reader_sees_only_published_docs() {
        let segment = Arc::new(MutableSegment::with_chunk_size("rt_0", schema(), 8));
        let reader = {
            let segment = Arc::clone(&segment);
            std::thread::spawn(move || {
                let mut reuse = GenericRow::new();
                for _ in 0..200 {
                    let n = segment.num_docs();
                    if n > 0 {
                        segment.get_record((n - 1) as DocId, &mut reuse).unwrap();
                        let clicks = reuse.get_value("clicks").and_then(Value::as_i64).unwrap();
                        assert_eq!(clicks as usize, n - 1);
                    }
                }
            })
        };
        for i in 0..100 {
            segment.index(&row("us", &["a"], i)).unwrap();
        }
        reader.join().unwrap();
    }
}
