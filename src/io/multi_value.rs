//! 多值定宽位打包正排索引（`<column>.mv.fwd`）
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ num_docs               (i32 LE)               │
//! │ total_num_values       (i32 LE)               │
//! │ max_num_values_per_doc (i32 LE)               │
//! │ num_bits_per_value     (i32 LE)               │
//! ├───────────────────────────────────────────────┤
//! │ start offsets  num_docs × bits(total)         │  按字节对齐
//! │ lengths        num_docs × bits(max per doc)   │  按字节对齐
//! │ values         total × num_bits_per_value     │
//! └───────────────────────────────────────────────┘
//! ```

use std::path::Path;
use crate::common::{DictId, DocId, OlapError, Result};
use crate::io::bitset;
use crate::io::buffer::{DataBuffer, MappedOutput};

const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    num_docs:               usize,
    total_num_values:       usize,
    max_num_values_per_doc: usize,
    num_bits:               u32,
    offset_bits:            u32,
    length_bits:            u32,
    lengths_start:          usize,
    values_start:           usize,
    total_size:             usize,
}

impl Layout {
    fn compute(num_docs: usize, total_num_values: usize, max_num_values_per_doc: usize, num_bits: u32) -> Self {
        let offset_bits   = bitset::num_bits_per_value(total_num_values as u32);
        let length_bits   = bitset::num_bits_per_value(max_num_values_per_doc as u32);
        let lengths_start = HEADER_SIZE + bitset::packed_size(num_docs, offset_bits);
        let values_start  = lengths_start + bitset::packed_size(num_docs, length_bits);
        let total_size    = values_start + bitset::packed_size(total_num_values, num_bits);
        Self {
            num_docs, total_num_values, max_num_values_per_doc, num_bits,
            offset_bits, length_bits, lengths_start, values_start, total_size,
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct FixedBitMultiValueWriter {
    out:         MappedOutput,
    layout:      Layout,
    next_doc_id: usize,
    next_offset: usize,
}

impl FixedBitMultiValueWriter {
    pub fn create(
        path:                   &Path,
        num_docs:               usize,
        total_num_values:       usize,
        max_num_values_per_doc: usize,
        num_bits:               u32,
    ) -> Result<Self> {
        if !(1..=32).contains(&num_bits) {
            return Err(OlapError::Internal(format!("invalid bits per value: {num_bits}")));
        }
        let layout  = Layout::compute(num_docs, total_num_values, max_num_values_per_doc, num_bits);
        let mut out = MappedOutput::create(path, layout.total_size)?;
        out.put_i32(0,  num_docs as i32);
        out.put_i32(4,  total_num_values as i32);
        out.put_i32(8,  max_num_values_per_doc as i32);
        out.put_i32(12, num_bits as i32);
        Ok(Self { out, layout, next_doc_id: 0, next_offset: 0 })
    }

    /// 按 doc_id 顺序追加一行多值
    pub fn set_int_array(&mut self, doc_id: DocId, values: &[DictId]) -> Result<()> {
        let doc = doc_id as usize;
        if doc != self.next_doc_id {
            return Err(OlapError::Internal(format!(
                "multi-value docs must be written in order: got {doc}, expected {}", self.next_doc_id,
            )));
        }
        if values.len() > self.layout.max_num_values_per_doc
            || self.next_offset + values.len() > self.layout.total_num_values
        {
            return Err(OlapError::Internal(format!(
                "doc {doc} with {} values overflows the declared multi-value layout", values.len(),
            )));
        }
        let l    = self.layout;
        let data = self.out.as_mut_slice();
        bitset::write_int(&mut data[HEADER_SIZE..], doc, l.offset_bits, self.next_offset as u32);
        bitset::write_int(&mut data[l.lengths_start..], doc, l.length_bits, values.len() as u32);
        let value_region = &mut data[l.values_start..];
        for (i, v) in values.iter().enumerate() {
            bitset::write_int(value_region, self.next_offset + i, l.num_bits, *v as u32);
        }
        self.next_offset += values.len();
        self.next_doc_id += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        // 未写入的尾部文档视为空数组
        while self.next_doc_id < self.layout.num_docs {
            let doc = self.next_doc_id as DocId;
            self.set_int_array(doc, &[])?;
        }
        self.out.flush()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// 读取复用缓冲；每个算子实例独占一个
#[derive(Debug, Default)]
pub struct MultiValueReaderContext {
    values: Vec<DictId>,
}

#[derive(Debug, Clone)]
pub struct FixedBitMultiValueReader {
    buffer: DataBuffer,
    layout: Layout,
}

impl FixedBitMultiValueReader {
    pub fn new(buffer: DataBuffer) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(OlapError::corruption("multi-value forward index shorter than its header"));
        }
        let num_docs   = buffer.get_i32(0);
        let total      = buffer.get_i32(4);
        let max_per    = buffer.get_i32(8);
        let num_bits   = buffer.get_i32(12);
        if num_docs < 0 || total < 0 || max_per < 0 || !(1..=32).contains(&num_bits) {
            return Err(OlapError::corruption(format!(
                "invalid multi-value header: docs={num_docs} total={total} max={max_per} bits={num_bits}",
            )));
        }
        let layout = Layout::compute(num_docs as usize, total as usize, max_per as usize, num_bits as u32);
        if buffer.len() < layout.total_size {
            return Err(OlapError::corruption(format!(
                "truncated multi-value forward index: {} bytes, expected {}", buffer.len(), layout.total_size,
            )));
        }
        Ok(Self { buffer, layout })
    }

    /// 校验 header 与列元数据一致
    pub fn validate(&self, num_docs: usize, total_num_values: usize, num_bits: u32) -> Result<()> {
        let l = &self.layout;
        if l.num_docs != num_docs || l.total_num_values != total_num_values || l.num_bits != num_bits {
            return Err(OlapError::corruption(format!(
                "multi-value header ({}, {}, {}) disagrees with metadata ({num_docs}, {total_num_values}, {num_bits})",
                l.num_docs, l.total_num_values, l.num_bits,
            )));
        }
        Ok(())
    }

    pub fn num_docs(&self)               -> usize { self.layout.num_docs }
    pub fn total_num_values(&self)       -> usize { self.layout.total_num_values }
    pub fn max_num_values_per_doc(&self) -> usize { self.layout.max_num_values_per_doc }
    pub fn num_bits(&self)               -> u32   { self.layout.num_bits }

    #[inline]
    fn range(&self, doc_id: DocId) -> (usize, usize) {
        let data  = self.buffer.as_slice();
        let l     = &self.layout;
        let start = bitset::read_int(&data[HEADER_SIZE..], doc_id as usize, l.offset_bits) as usize;
        let len   = bitset::read_int(&data[l.lengths_start..], doc_id as usize, l.length_bits) as usize;
        (start, len)
    }

    pub fn num_values(&self, doc_id: DocId) -> usize {
        self.range(doc_id).1
    }

    /// 无状态读取：写入调用方缓冲（长度至少为 max_num_values_per_doc），返回值个数
    pub fn get_int_array(&self, doc_id: DocId, out: &mut [DictId]) -> usize {
        let (start, len) = self.range(doc_id);
        let values = &self.buffer.as_slice()[self.layout.values_start..];
        for (i, slot) in out[..len].iter_mut().enumerate() {
            *slot = bitset::read_int(values, start + i, self.layout.num_bits) as DictId;
        }
        len
    }

    pub fn create_context(&self) -> MultiValueReaderContext {
        MultiValueReaderContext { values: Vec::with_capacity(self.layout.max_num_values_per_doc) }
    }

    pub fn get_int_array_with_context<'c>(
        &self,
        doc_id: DocId,
        ctx:    &'c mut MultiValueReaderContext,
    ) -> &'c [DictId] {
        let (start, len) = self.range(doc_id);
        let values = &self.buffer.as_slice()[self.layout.values_start..];
        ctx.values.clear();
        ctx.values.extend(
            (0..len).map(|i| bitset::read_int(values, start + i, self.layout.num_bits) as DictId),
        );
        &ctx.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::buffer::ReadMode;
    use rand::Rng;

    fn random_docs(num_docs: usize, max_per_doc: usize, num_bits: u32) -> Vec<Vec<DictId>> {
        let mut rng = rand::thread_rng();
        let max = (1u64 << num_bits) - 1;
        (0..num_docs)
            .map(|_| {
                let n = rng.gen_range(0..=max_per_doc);
                (0..n).map(|_| rng.gen_range(0..=max) as DictId).collect()
            })
            .collect()
    }

    fn write(path: &Path, docs: &[Vec<DictId>], num_bits: u32) -> (usize, usize) {
        let total: usize = docs.iter().map(|d| d.len()).sum();
        let max = docs.iter().map(|d| d.len()).max().unwrap_or(0);
        let mut w = FixedBitMultiValueWriter::create(path, docs.len(), total, max, num_bits).unwrap();
        for (doc, vals) in docs.iter().enumerate() {
            w.set_int_array(doc as DocId, vals).unwrap();
        }
        w.close().unwrap();
        (total, max)
    }

    #[test]
    fn test_round_trip_heap_and_mmap() {
        let dir = tempfile::tempdir().unwrap();
        for num_bits in 1..=31 {
            let path = dir.path().join(format!("col_{num_bits}.mv.fwd"));
            let docs = random_docs(40, 20, num_bits);
            let (total, max) = write(&path, &docs, num_bits);

            for mode in [ReadMode::Heap, ReadMode::Mmap] {
                let r = FixedBitMultiValueReader::new(DataBuffer::open(&path, mode).unwrap()).unwrap();
                r.validate(docs.len(), total, num_bits).unwrap();
                assert_eq!(r.max_num_values_per_doc(), max);

                let mut out = vec![0; max.max(1)];
                let mut ctx = r.create_context();
                for (doc, expected) in docs.iter().enumerate() {
                    let n = r.get_int_array(doc as DocId, &mut out);
                    assert_eq!(&out[..n], expected.as_slice());
                    assert_eq!(r.get_int_array_with_context(doc as DocId, &mut ctx), expected.as_slice());
                    assert_eq!(r.num_values(doc as DocId), expected.len());
                }
            }
        }
    }

    #[test]
    fn test_all_empty_docs() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mv.fwd");
        let docs = vec![Vec::new(); 5];
        write(&path, &docs, 1);
        let r = FixedBitMultiValueReader::new(DataBuffer::load_file(&path).unwrap()).unwrap();
        let mut ctx = r.create_context();
        for doc in 0..5 {
            assert!(r.get_int_array_with_context(doc, &mut ctx).is_empty());
        }
    }

    #[test]
    fn test_out_of_order_write_rejected() {
        let dir  = tempfile::tempdir().unwrap();
        let mut w = FixedBitMultiValueWriter::create(&dir.path().join("x.mv.fwd"), 2, 2, 1, 2).unwrap();
        assert!(w.set_int_array(1, &[1]).is_err());
        w.set_int_array(0, &[1]).unwrap();
        assert!(w.set_int_array(1, &[1, 2]).is_err());
    }

    #[test]
    fn test_truncated_and_mismatched_header() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.mv.fwd");
        write(&path, &[vec![1, 2, 3], vec![4]], 4);
        let mut bytes = std::fs::read(&path).unwrap();
        let r = FixedBitMultiValueReader::new(DataBuffer::from_vec(bytes.clone())).unwrap();
        assert!(r.validate(2, 5, 4).unwrap_err().is_corruption());

        bytes.truncate(bytes.len() - 1);
        assert!(FixedBitMultiValueReader::new(DataBuffer::from_vec(bytes)).unwrap_err().is_corruption());
    }
}
