//! 实时段的多列定长读写器
//!
//! 按 `rows_per_chunk` 分块扩容，每个单元格是一个 `AtomicU64`，
//! 写入方对单个值的写入对读取方是原子的（不会读到半写的比特）。
//! 文档级可见性由上层的 `num_docs_indexed`（Release/Acquire）保证。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;

type Chunk = Arc<[AtomicU64]>;

pub struct FixedByteSingleValueMultiColumnReaderWriter {
    rows_per_chunk: usize,
    num_columns:    usize,
    chunks:         RwLock<Vec<Chunk>>,
}

impl FixedByteSingleValueMultiColumnReaderWriter {
    pub fn new(rows_per_chunk: usize, num_columns: usize) -> Self {
        Self {
            rows_per_chunk: rows_per_chunk.max(1),
            num_columns,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub fn num_columns(&self) -> usize { self.num_columns }

    pub fn capacity(&self) -> usize {
        self.chunks.read().len() * self.rows_per_chunk
    }

    fn chunk_for_write(&self, row: usize) -> Chunk {
        let idx = row / self.rows_per_chunk;
        if let Some(c) = self.chunks.read().get(idx) {
            return Arc::clone(c);
        }
        let mut chunks = self.chunks.write();
        while chunks.len() <= idx {
            let cells: Vec<AtomicU64> = (0..self.rows_per_chunk * self.num_columns)
                .map(|_| AtomicU64::new(0))
                .collect();
            chunks.push(cells.into());
        }
        Arc::clone(&chunks[idx])
    }

    fn cell_index(&self, row: usize, column: usize) -> usize {
        debug_assert!(column < self.num_columns);
        (row % self.rows_per_chunk) * self.num_columns + column
    }

    fn store(&self, row: usize, column: usize, bits: u64) {
        let chunk = self.chunk_for_write(row);
        chunk[self.cell_index(row, column)].store(bits, Ordering::Relaxed);
    }

    /// 读取未分配的行属于调用方违约（越界 panic）
    fn load(&self, row: usize, column: usize) -> u64 {
        let chunk = Arc::clone(&self.chunks.read()[row / self.rows_per_chunk]);
        chunk[self.cell_index(row, column)].load(Ordering::Relaxed)
    }

    pub fn set_int(&self, row: usize, column: usize, value: i32) {
        self.store(row, column, value as u32 as u64);
    }
    pub fn get_int(&self, row: usize, column: usize) -> i32 {
        self.load(row, column) as u32 as i32
    }

    pub fn set_long(&self, row: usize, column: usize, value: i64) {
        self.store(row, column, value as u64);
    }
    pub fn get_long(&self, row: usize, column: usize) -> i64 {
        self.load(row, column) as i64
    }

    pub fn set_float(&self, row: usize, column: usize, value: f32) {
        self.store(row, column, value.to_bits() as u64);
    }
    pub fn get_float(&self, row: usize, column: usize) -> f32 {
        f32::from_bits(self.load(row, column) as u32)
    }

    pub fn set_double(&self, row: usize, column: usize, value: f64) {
        self.store(row, column, value.to_bits());
    }
    pub fn get_double(&self, row: usize, column: usize) -> f64 {
        f64::from_bits(self.load(row, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_cells_across_chunks() {
        let rw = FixedByteSingleValueMultiColumnReaderWriter::new(4, 3);
        for row in 0..10 {
            rw.set_int(row, 0, -(row as i32));
            rw.set_long(row, 1, i64::MAX - row as i64);
            rw.set_double(row, 2, row as f64 * 0.5);
        }
        assert_eq!(rw.capacity(), 12);
        for row in 0..10 {
            assert_eq!(rw.get_int(row, 0), -(row as i32));
            assert_eq!(rw.get_long(row, 1), i64::MAX - row as i64);
            assert_eq!(rw.get_double(row, 2), row as f64 * 0.5);
        }
        rw.set_float(11, 0, 1.25);
        assert_eq!(rw.get_float(11, 0), 1.25);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        use std::sync::atomic::AtomicUsize;
        let rw   = Arc::new(FixedByteSingleValueMultiColumnReaderWriter::new(16, 1));
        let done = Arc::new(AtomicUsize::new(0));

        let writer = {
            let (rw, done) = (Arc::clone(&rw), Arc::clone(&done));
            std::thread::spawn(move || {
                for row in 0..1000 {
                    rw.set_long(row, 0, row as i64 * 3);
                    done.store(row + 1, Ordering::Release);
                }
            })
        };
        let mut seen = 0;
        while seen < 1000 {
            let visible = done.load(Ordering::Acquire);
            for row in seen..visible {
                assert_eq!(rw.get_long(row, 0), row as i64 * 3);
            }
            seen = visible;
        }
        writer.join().unwrap();
    }
}
