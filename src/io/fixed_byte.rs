//! 定长 f64 列：星型树的预聚合 metric（`SUM__price` 等），每行 8 字节小端

use std::path::Path;
use crate::common::{DocId, OlapError, Result};
use crate::io::buffer::{DataBuffer, MappedOutput};

const VALUE_SIZE: usize = 8;

pub struct FixedByteDoubleWriter {
    out:      MappedOutput,
    num_docs: usize,
}

impl FixedByteDoubleWriter {
    pub fn create(path: &Path, num_docs: usize) -> Result<Self> {
        Ok(Self { out: MappedOutput::create(path, num_docs * VALUE_SIZE)?, num_docs })
    }

    pub fn set_double(&mut self, doc_id: DocId, value: f64) {
        debug_assert!((doc_id as usize) < self.num_docs);
        self.out.put_f64(doc_id as usize * VALUE_SIZE, value);
    }

    pub fn close(self) -> Result<()> {
        self.out.flush()
    }
}

/// 序列化到内存（星型树索引文件内嵌使用）
pub fn encode_doubles(values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * VALUE_SIZE);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[derive(Debug, Clone)]
pub struct FixedByteDoubleReader {
    buffer:   DataBuffer,
    num_docs: usize,
}

impl FixedByteDoubleReader {
    pub fn new(buffer: DataBuffer, num_docs: usize) -> Result<Self> {
        if buffer.len() < num_docs * VALUE_SIZE {
            return Err(OlapError::corruption(format!(
                "fixed-byte column: {} bytes, expected {}", buffer.len(), num_docs * VALUE_SIZE,
            )));
        }
        Ok(Self { buffer, num_docs })
    }

    pub fn num_docs(&self) -> usize { self.num_docs }

    #[inline]
    pub fn get_double(&self, doc_id: DocId) -> f64 {
        self.buffer.get_f64(doc_id as usize * VALUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.fwd");
        let mut w = FixedByteDoubleWriter::create(&path, 3).unwrap();
        w.set_double(0, 1.5);
        w.set_double(2, -7.25);
        w.close().unwrap();

        let r = FixedByteDoubleReader::new(DataBuffer::map_file(&path).unwrap(), 3).unwrap();
        assert_eq!(r.get_double(0), 1.5);
        assert_eq!(r.get_double(1), 0.0);
        assert_eq!(r.get_double(2), -7.25);

        let mem = FixedByteDoubleReader::new(DataBuffer::from_vec(encode_doubles(&[4.0, 5.0])), 2).unwrap();
        assert_eq!(mem.get_double(1), 5.0);
        assert!(FixedByteDoubleReader::new(DataBuffer::from_vec(vec![0; 7]), 1).is_err());
    }
}
