//! 单值定宽位打包正排索引（`<column>.sv.unsorted.fwd`）
//!
//! 文件没有 header：共 `ceil(num_docs * num_bits / 8)` 字节，
//! 位宽与文档数来自列元数据。

use std::path::Path;
use crate::common::{DictId, DocId, OlapError, Result};
use crate::io::bitset;
use crate::io::buffer::{DataBuffer, MappedOutput};

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct FixedBitSingleValueWriter {
    out:      MappedOutput,
    num_docs: usize,
    num_bits: u32,
}

impl FixedBitSingleValueWriter {
    pub fn create(path: &Path, num_docs: usize, num_bits: u32) -> Result<Self> {
        if !(1..=32).contains(&num_bits) {
            return Err(OlapError::Internal(format!("invalid bits per value: {num_bits}")));
        }
        let out = MappedOutput::create(path, bitset::packed_size(num_docs, num_bits))?;
        Ok(Self { out, num_docs, num_bits })
    }

    pub fn set_int(&mut self, doc_id: DocId, value: DictId) {
        debug_assert!((doc_id as usize) < self.num_docs);
        bitset::write_int(self.out.as_mut_slice(), doc_id as usize, self.num_bits, value as u32);
    }

    pub fn close(self) -> Result<()> {
        self.out.flush()
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// 批量读取的复用缓冲；每个算子实例独占一个，不跨线程共享
#[derive(Debug, Default)]
pub struct SingleValueReaderContext {
    dict_ids: Vec<DictId>,
}

#[derive(Debug, Clone)]
pub struct FixedBitSingleValueReader {
    buffer:   DataBuffer,
    num_docs: usize,
    num_bits: u32,
}

impl FixedBitSingleValueReader {
    pub fn new(buffer: DataBuffer, num_docs: usize, num_bits: u32) -> Result<Self> {
        let expected = bitset::packed_size(num_docs, num_bits);
        if !(1..=32).contains(&num_bits) || buffer.len() < expected {
            return Err(OlapError::corruption(format!(
                "single-value forward index: {} bytes, expected {expected} ({num_docs} docs x {num_bits} bits)",
                buffer.len(),
            )));
        }
        Ok(Self { buffer, num_docs, num_bits })
    }

    pub fn num_docs(&self) -> usize { self.num_docs }
    pub fn num_bits(&self) -> u32   { self.num_bits }

    /// 无状态读取
    #[inline]
    pub fn get_int(&self, doc_id: DocId) -> DictId {
        bitset::read_int(self.buffer.as_slice(), doc_id as usize, self.num_bits) as DictId
    }

    pub fn create_context(&self) -> SingleValueReaderContext {
        SingleValueReaderContext::default()
    }

    /// 批量读取，结果写进 context 的复用缓冲
    pub fn read_dict_ids<'c>(
        &self,
        doc_ids: &[DocId],
        ctx:     &'c mut SingleValueReaderContext,
    ) -> &'c [DictId] {
        let data = self.buffer.as_slice();
        ctx.dict_ids.clear();
        ctx.dict_ids.extend(
            doc_ids.iter().map(|&d| bitset::read_int(data, d as usize, self.num_bits) as DictId),
        );
        &ctx.dict_ids
    }
}
